//! Shared helpers for integration tests.

#![allow(dead_code)]

use std::path::Path;
use std::time::Duration;

/// Read the connection log, one entry per line.
pub fn log_lines(path: &Path) -> Vec<String> {
    std::fs::read_to_string(path)
        .unwrap_or_default()
        .lines()
        .map(str::to_owned)
        .collect()
}

/// Upper bound for any single session in these tests.
pub const SESSION_TIMEOUT: Duration = Duration::from_secs(20);
