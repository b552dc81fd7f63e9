//! Runtime tunables for game managers.
//!
//! Every value has a compile-time default and can be overridden at runtime
//! via a dedicated `TOURNEY_*` environment variable.

use std::time::Duration;

/// Extra time an engine gets beyond its allotted time before it is considered hung.
const DEFAULT_ENGINE_GRACE_MS: u64 = 2000;

/// How long to wait for a readiness acknowledgement.
const DEFAULT_READY_TIMEOUT_MS: u64 = 5000;

/// How long to wait for a stop acknowledgement before forcing a restart.
const DEFAULT_CANCEL_TIMEOUT_MS: u64 = 1000;

/// Interval of the manager's timeout check.
const DEFAULT_TICK_INTERVAL_MS: u64 = 100;

/// Capacity of the per-manager engine event queue.
const DEFAULT_EVENT_QUEUE_CAPACITY: usize = 256;

/// Games longer than this many plies are adjudicated a draw. 0 disables.
const DEFAULT_MAX_PLIES: usize = 600;

/// Tasks failing back to back before a manager gives up on its assignment.
const DEFAULT_MAX_CONSECUTIVE_FAILURES: usize = 5;

fn env_u64(name: &str, default: u64) -> u64 {
    match std::env::var(name) {
        Ok(value) => value.parse().unwrap_or(default),
        Err(_) => default,
    }
}

fn env_bool(name: &str, default: bool) -> bool {
    match std::env::var(name) {
        Ok(value) => match value.to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => true,
            "0" | "false" | "no" | "off" => false,
            _ => default,
        },
        Err(_) => default,
    }
}

/// Get the engine grace period in milliseconds.
///
/// Priority:
/// 1. `TOURNEY_ENGINE_GRACE_MS` env variable if set (falls back to default
///    if the value cannot be parsed as a `u64`)
/// 2. `2000` ms as fallback
pub fn get_engine_grace_ms() -> u64 {
    env_u64("TOURNEY_ENGINE_GRACE_MS", DEFAULT_ENGINE_GRACE_MS)
}

/// Get the ready-check timeout in milliseconds (`TOURNEY_READY_TIMEOUT_MS`).
pub fn get_ready_timeout_ms() -> u64 {
    env_u64("TOURNEY_READY_TIMEOUT_MS", DEFAULT_READY_TIMEOUT_MS)
}

/// Get the stop acknowledgement timeout in milliseconds (`TOURNEY_CANCEL_TIMEOUT_MS`).
pub fn get_cancel_timeout_ms() -> u64 {
    env_u64("TOURNEY_CANCEL_TIMEOUT_MS", DEFAULT_CANCEL_TIMEOUT_MS)
}

/// Get the timeout check interval in milliseconds (`TOURNEY_TICK_INTERVAL_MS`).
pub fn get_tick_interval_ms() -> u64 {
    env_u64("TOURNEY_TICK_INTERVAL_MS", DEFAULT_TICK_INTERVAL_MS).max(1)
}

/// Get the engine event queue capacity (`TOURNEY_EVENT_QUEUE_CAPACITY`).
pub fn get_event_queue_capacity() -> usize {
    env_u64(
        "TOURNEY_EVENT_QUEUE_CAPACITY",
        DEFAULT_EVENT_QUEUE_CAPACITY as u64,
    )
    .max(1) as usize
}

/// Get the adjudication ply limit (`TOURNEY_MAX_PLIES`, 0 disables).
pub fn get_max_plies() -> usize {
    env_u64("TOURNEY_MAX_PLIES", DEFAULT_MAX_PLIES as u64) as usize
}

/// Whether engines configured for pondering may ponder (`TOURNEY_PONDERING`).
pub fn get_pondering() -> bool {
    env_bool("TOURNEY_PONDERING", true)
}

/// Tunables shared by every manager of a pool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManagerSettings {
    pub engine_grace: Duration,
    pub ready_timeout: Duration,
    pub cancel_timeout: Duration,
    pub tick_interval: Duration,
    pub event_queue_capacity: usize,
    pub max_plies: usize,
    pub max_consecutive_failures: usize,
    pub pondering: bool,
}

impl ManagerSettings {
    /// Defaults overridden by `TOURNEY_*` environment variables.
    pub fn from_env() -> Self {
        Self {
            engine_grace: Duration::from_millis(get_engine_grace_ms()),
            ready_timeout: Duration::from_millis(get_ready_timeout_ms()),
            cancel_timeout: Duration::from_millis(get_cancel_timeout_ms()),
            tick_interval: Duration::from_millis(get_tick_interval_ms()),
            event_queue_capacity: get_event_queue_capacity(),
            max_plies: get_max_plies(),
            max_consecutive_failures: DEFAULT_MAX_CONSECUTIVE_FAILURES,
            pondering: get_pondering(),
        }
    }
}

impl Default for ManagerSettings {
    fn default() -> Self {
        Self {
            engine_grace: Duration::from_millis(DEFAULT_ENGINE_GRACE_MS),
            ready_timeout: Duration::from_millis(DEFAULT_READY_TIMEOUT_MS),
            cancel_timeout: Duration::from_millis(DEFAULT_CANCEL_TIMEOUT_MS),
            tick_interval: Duration::from_millis(DEFAULT_TICK_INTERVAL_MS),
            event_queue_capacity: DEFAULT_EVENT_QUEUE_CAPACITY,
            max_plies: DEFAULT_MAX_PLIES,
            max_consecutive_failures: DEFAULT_MAX_CONSECUTIVE_FAILURES,
            pondering: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_engine_grace_ms() {
        let grace = get_engine_grace_ms();
        match std::env::var("TOURNEY_ENGINE_GRACE_MS") {
            Ok(val) => assert_eq!(grace, val.parse().unwrap_or(DEFAULT_ENGINE_GRACE_MS)),
            Err(_) => assert_eq!(grace, DEFAULT_ENGINE_GRACE_MS),
        }
    }

    #[test]
    fn test_env_u64_falls_back_on_garbage() {
        std::env::set_var("TOURNEY_TEST_GARBAGE_MS", "soon");
        assert_eq!(env_u64("TOURNEY_TEST_GARBAGE_MS", 7), 7);
        std::env::set_var("TOURNEY_TEST_GARBAGE_MS", "42");
        assert_eq!(env_u64("TOURNEY_TEST_GARBAGE_MS", 7), 42);
        std::env::remove_var("TOURNEY_TEST_GARBAGE_MS");
    }

    #[test]
    fn test_env_bool() {
        std::env::set_var("TOURNEY_TEST_FLAG", "off");
        assert!(!env_bool("TOURNEY_TEST_FLAG", true));
        std::env::set_var("TOURNEY_TEST_FLAG", "maybe");
        assert!(env_bool("TOURNEY_TEST_FLAG", true));
        std::env::remove_var("TOURNEY_TEST_FLAG");
    }

    #[test]
    fn test_default_settings() {
        let settings = ManagerSettings::default();
        assert_eq!(settings.cancel_timeout, Duration::from_millis(1000));
        assert_eq!(settings.event_queue_capacity, 256);
        assert!(settings.pondering);
    }
}
