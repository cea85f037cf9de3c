//! Tests for config module

use primedist::config::Config;
use primedist::models::DispatchMode;
use std::path::Path;

#[test]
fn test_config_file_exists() {
    let config_path = Path::new("primedist.toml");
    assert!(
        config_path.exists(),
        "primedist.toml should exist in project root"
    );
}

#[test]
fn test_config_toml_readable() {
    let content =
        std::fs::read_to_string("primedist.toml").expect("Should be able to read primedist.toml");

    for section in ["[storage]", "[dispatcher]", "[worker]", "[logging]"] {
        assert!(
            content.contains(section),
            "primedist.toml should have {section} section"
        );
    }
}

#[test]
fn test_sample_config_loads() {
    let config = Config::load(Some(Path::new("primedist.toml"))).unwrap();

    assert_eq!(config.storage.max_buffer_size, 300);
    assert_eq!(config.storage.max_shard_size % config.storage.max_buffer_size, 0);
    assert_eq!(config.dispatcher.mode, DispatchMode::Split);
    assert_eq!(config.worker.concurrency, 4);
    assert_eq!(config.logging.format, "text");
}

#[test]
fn test_default_round_trips_through_toml() {
    let dir = tempfile::TempDir::new().unwrap();
    let path = dir.path().join("primedist.toml");
    std::fs::write(&path, Config::default().to_toml().unwrap()).unwrap();

    let loaded = Config::load(Some(&path)).unwrap();
    assert_eq!(loaded.dispatcher, Config::default().dispatcher);
    assert_eq!(loaded.storage, Config::default().storage);
}

#[test]
fn test_partial_file_takes_defaults() {
    let dir = tempfile::TempDir::new().unwrap();
    let path = dir.path().join("partial.toml");
    std::fs::write(&path, "[dispatcher]\nmode = \"whole\"\n").unwrap();

    let config = Config::load(Some(&path)).unwrap();
    assert_eq!(config.dispatcher.mode, DispatchMode::Whole);
    assert_eq!(config.dispatcher.queue_capacity, 100);
    assert_eq!(config.storage.starting_prime, 1);
}

#[test]
fn test_shard_size_must_be_buffer_multiple() {
    let dir = tempfile::TempDir::new().unwrap();
    let path = dir.path().join("bad.toml");
    std::fs::write(&path, "[storage]\nmax_shard_size = 1000\nmax_buffer_size = 300\n").unwrap();

    assert!(Config::load(Some(&path)).is_err());
}
