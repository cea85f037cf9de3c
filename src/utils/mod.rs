//! Common utilities and helper functions
//!
//! This module provides shared utilities used across the application.

pub mod retry;

use std::time::Duration;

const LABEL: &str = "\x1b[1;93mTesting \x1b[0m";

/// Format a duration the way it is shown next to each candidate
pub fn format_elapsed(elapsed: Duration) -> String {
    format!("{elapsed:?}")
}

/// Console line for a confirmed prime
pub fn prime_line(value: u64, elapsed: Duration) -> String {
    format!(
        "{LABEL}\x1b[1;32m{value}\x1b[0m\t\x1b[4;30;42mSuccess\x1b[0m\t{}\x1b[0m",
        format_elapsed(elapsed)
    )
}

/// Console line for a rejected candidate
pub fn rejection_line(value: u64, elapsed: Duration) -> String {
    format!(
        "{LABEL}\x1b[1;32m{value}\x1b[0m\t\x1b[2;1;41mFail\x1b[0m\t{}\t\x1b[0m",
        format_elapsed(elapsed)
    )
}

/// Print a confirmed prime
pub fn display_prime(value: u64, elapsed: Duration) {
    println!("{}", prime_line(value, elapsed));
}

/// Print a rejected candidate
pub fn display_rejection(value: u64, elapsed: Duration) {
    println!("{}", rejection_line(value, elapsed));
}

/// Round `value` to the nearest hundred, as shown by `count`
pub fn round_to_hundred(value: u64) -> u64 {
    (value + 50) / 100 * 100
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_elapsed() {
        assert_eq!(format_elapsed(Duration::from_micros(1500)), "1.5ms");
        assert_eq!(format_elapsed(Duration::ZERO), "0ns");
    }

    #[test]
    fn test_lines() {
        let line = prime_line(101, Duration::from_millis(2));
        assert!(line.contains("101"));
        assert!(line.contains("Success"));
        assert!(line.contains("2ms"));

        let line = rejection_line(99, Duration::ZERO);
        assert!(line.contains("99"));
        assert!(line.contains("Fail"));
    }

    #[test]
    fn test_round_to_hundred() {
        assert_eq!(round_to_hundred(0), 0);
        assert_eq!(round_to_hundred(149), 100);
        assert_eq!(round_to_hundred(150), 200);
    }
}
