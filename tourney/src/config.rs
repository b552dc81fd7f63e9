//! Configuration for the tourney runner.
//!
//! Every value has a compile-time default and can be overridden at runtime
//! via a dedicated environment variable. Game manager tunables live in
//! [`arena::config`].

use std::path::PathBuf;

/// Default number of games played in parallel.
const DEFAULT_CONCURRENCY: usize = 1;

/// Default time an engine gets to finish its handshake (in milliseconds).
const DEFAULT_HANDSHAKE_TIMEOUT_MS: u64 = 10_000;

/// Default interval between progress reports (in seconds).
const DEFAULT_PROGRESS_INTERVAL_SECS: u64 = 30;

/// Get the number of games played in parallel when neither the command line
/// nor the tournament file sets one.
///
/// Priority:
/// 1. `TOURNEY_CONCURRENCY` env variable if set (falls back to default
///    if the value cannot be parsed as a positive `usize`)
/// 2. `1` as fallback
pub fn get_default_concurrency() -> usize {
    if let Ok(value) = std::env::var("TOURNEY_CONCURRENCY") {
        return value
            .parse()
            .ok()
            .filter(|n| *n > 0)
            .unwrap_or(DEFAULT_CONCURRENCY);
    }

    DEFAULT_CONCURRENCY
}

/// Get the engine handshake timeout in milliseconds.
///
/// Priority:
/// 1. `TOURNEY_HANDSHAKE_TIMEOUT_MS` env variable if set
/// 2. `10000` ms as fallback
pub fn get_handshake_timeout_ms() -> u64 {
    if let Ok(timeout) = std::env::var("TOURNEY_HANDSHAKE_TIMEOUT_MS") {
        return timeout.parse().unwrap_or(DEFAULT_HANDSHAKE_TIMEOUT_MS);
    }

    DEFAULT_HANDSHAKE_TIMEOUT_MS
}

/// Get the progress report interval in seconds. Not overridable.
pub fn get_progress_interval_secs() -> u64 {
    DEFAULT_PROGRESS_INTERVAL_SECS
}

/// Get the directory for rolling log files.
///
/// Priority:
/// 1. `TOURNEY_LOG_DIR` env variable if set
/// 2. `None`: logs go to stderr
pub fn get_log_dir() -> Option<PathBuf> {
    std::env::var("TOURNEY_LOG_DIR").ok().map(PathBuf::from)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_default_concurrency() {
        let concurrency = get_default_concurrency();
        match std::env::var("TOURNEY_CONCURRENCY") {
            Ok(_) => assert!(concurrency > 0),
            Err(_) => assert_eq!(concurrency, DEFAULT_CONCURRENCY),
        }
    }

    #[test]
    fn test_get_handshake_timeout_ms_default() {
        if std::env::var("TOURNEY_HANDSHAKE_TIMEOUT_MS").is_err() {
            assert_eq!(get_handshake_timeout_ms(), DEFAULT_HANDSHAKE_TIMEOUT_MS);
        }
    }

    #[test]
    fn test_get_progress_interval_secs() {
        assert_eq!(get_progress_interval_secs(), DEFAULT_PROGRESS_INTERVAL_SECS);
    }

    #[test]
    fn test_get_log_dir() {
        match std::env::var("TOURNEY_LOG_DIR") {
            Ok(val) => assert_eq!(get_log_dir(), Some(PathBuf::from(val))),
            Err(_) => assert_eq!(get_log_dir(), None),
        }
    }
}
