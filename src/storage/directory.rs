//! Directory index (`directory.txt`)
//!
//! One shard name per line, in creation order. Reading stops at the first empty
//! line so a torn trailing write never yields a bogus entry.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use super::StorageError;

/// Handle on the directory index file
#[derive(Debug, Clone)]
pub struct DirectoryIndex {
    path: PathBuf,
}

impl DirectoryIndex {
    /// File name inside the ledger directory
    pub const FILE_NAME: &'static str = "directory.txt";

    /// Create a handle for the index inside `base_dir`
    pub fn new(base_dir: &Path) -> Self {
        Self {
            path: base_dir.join(Self::FILE_NAME),
        }
    }

    /// Path of the index file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Create the index file if it does not exist yet
    pub fn ensure_exists(&self) -> Result<(), StorageError> {
        OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map(|_| ())
            .map_err(|source| StorageError::Write {
                path: self.path.clone(),
                source,
            })
    }

    /// All shard names up to the first empty line
    pub fn entries(&self) -> Result<Vec<String>, StorageError> {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(source) => {
                return Err(StorageError::Read {
                    path: self.path.clone(),
                    source,
                })
            }
        };

        Ok(content
            .lines()
            .map(str::trim)
            .take_while(|line| !line.is_empty())
            .map(String::from)
            .collect())
    }

    /// Most recently created shard name
    pub fn last_entry(&self) -> Result<Option<String>, StorageError> {
        Ok(self.entries()?.pop())
    }

    /// Record a new shard name
    pub fn append(&self, name: &str) -> Result<(), StorageError> {
        let to_write_error = |source| StorageError::Write {
            path: self.path.clone(),
            source,
        };

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(to_write_error)?;

        writeln!(file, "{name}").map_err(to_write_error)?;
        file.sync_data().map_err(to_write_error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_missing_index_is_empty() {
        let dir = TempDir::new().unwrap();
        let index = DirectoryIndex::new(dir.path());
        assert!(index.entries().unwrap().is_empty());
        assert_eq!(index.last_entry().unwrap(), None);
    }

    #[test]
    fn test_append_and_read() {
        let dir = TempDir::new().unwrap();
        let index = DirectoryIndex::new(dir.path());
        index.ensure_exists().unwrap();
        index.append("0-10").unwrap();
        index.append("10-20").unwrap();

        assert_eq!(index.entries().unwrap(), vec!["0-10", "10-20"]);
        assert_eq!(index.last_entry().unwrap().as_deref(), Some("10-20"));
    }

    #[test]
    fn test_stops_at_first_empty_line() {
        let dir = TempDir::new().unwrap();
        let index = DirectoryIndex::new(dir.path());
        fs::write(index.path(), "0-10\n\n10-20\n").unwrap();

        assert_eq!(index.entries().unwrap(), vec!["0-10"]);
    }
}
