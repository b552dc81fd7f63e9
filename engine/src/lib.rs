//! Engine process handles.
//!
//! The orchestration core talks to engines only through [`EngineWorker`]:
//! commands go in through async methods, everything the engine says comes
//! back as [`EngineEvent`]s on the sink installed with
//! [`EngineWorker::set_event_sink`]. Every event carries the worker's
//! generation, which is bumped on each restart so consumers can drop output
//! that belongs to a process instance that no longer exists.

pub mod config;
#[cfg(any(test, feature = "mock"))]
pub mod mock;
pub mod process;
pub mod protocol;
pub mod uci;
pub mod xboard;

pub use config::EngineConfig;
pub use process::{ProcessEngine, ProcessEngineFactory};
pub use protocol::{EngineProtocol, ProtocolLine};

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

/// Where an engine delivers its events. Bounded; one per game manager.
pub type EventSink = mpsc::Sender<EngineEvent>;

/// An event produced by an engine's I/O task.
#[derive(Debug, Clone)]
pub struct EngineEvent {
    /// Identifier of the worker that produced the event.
    pub identifier: String,
    /// Process generation the event belongs to.
    pub generation: u64,
    /// Monotonic time at which the line was read.
    pub timestamp: Instant,
    pub kind: EngineEventKind,
}

#[derive(Debug, Clone)]
pub enum EngineEventKind {
    Info(SearchInfo),
    BestMove { mv: String, ponder: Option<String> },
    /// Ends the search like a best move, conceding the game.
    Resign,
    ReadyAck,
    Disconnect,
}

impl EngineEvent {
    pub fn new(identifier: impl Into<String>, generation: u64, kind: EngineEventKind) -> Self {
        Self {
            identifier: identifier.into(),
            generation,
            timestamp: Instant::now(),
            kind,
        }
    }
}

/// Engine analysis information
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SearchInfo {
    pub depth: Option<u32>,
    pub seldepth: Option<u32>,
    pub time_ms: Option<u64>,
    pub nodes: Option<u64>,
    pub score: Option<Score>,
    /// Principal variation, in the engine's move notation.
    pub pv: Vec<String>,
    pub multipv: Option<u32>,
    pub currmove: Option<String>,
    pub hashfull: Option<u16>,
    pub nps: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Score {
    Centipawns(i32),
    Mate(i32), // Negative for being mated
}

/// Per-move resource budget handed to an engine for one search.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GoLimits {
    pub wtime_ms: u64,
    pub btime_ms: u64,
    pub winc_ms: u64,
    pub binc_ms: u64,
    /// Moves left in the current time-control segment, 0 for sudden death.
    pub moves_to_go: u32,
    pub move_time_ms: Option<u64>,
    pub depth: Option<u32>,
    pub nodes: Option<u64>,
    pub mate: Option<u32>,
    pub infinite: bool,
    pub has_time_control: bool,
}

impl GoLimits {
    /// Remaining clock time of the given side.
    pub fn time_left_ms(&self, white: bool) -> u64 {
        if white {
            self.wtime_ms
        } else {
            self.btime_ms
        }
    }

    /// Increment of the given side.
    pub fn increment_ms(&self, white: bool) -> u64 {
        if white {
            self.winc_ms
        } else {
            self.binc_ms
        }
    }

    /// True when the side has a running clock (not fixed move time, depth or infinite).
    pub fn has_clock(&self) -> bool {
        self.has_time_control
            && self.move_time_ms.is_none()
            && !self.infinite
            && (self.wtime_ms > 0 || self.btime_ms > 0 || self.winc_ms > 0 || self.binc_ms > 0)
    }
}

/// Position handed to an engine: start FEN plus the moves played from it,
/// already written in the notation the engine's protocol requires.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PositionSetup {
    pub start_fen: String,
    pub moves: Vec<String>,
}

impl PositionSetup {
    pub fn is_standard_start(&self) -> bool {
        chess::fen::is_starting_fen(&self.start_fen)
    }

    /// Side to move after all moves, derived from the FEN's active color.
    pub fn white_to_move(&self) -> bool {
        let white_starts = self.start_fen.split_whitespace().nth(1) != Some("b");
        white_starts == (self.moves.len() % 2 == 0)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Engine has no stdin")]
    NoStdin,
    #[error("Engine has no stdout")]
    NoStdout,
    #[error("Failed to spawn {command}: {source}")]
    Spawn {
        command: String,
        source: std::io::Error,
    },
    #[error("Engine did not finish its handshake within {0:?}")]
    HandshakeTimeout(Duration),
    #[error("Engine closed before finishing its handshake")]
    HandshakeClosed,
    #[error("Engine process is not running")]
    NotRunning,
    #[error("Malformed engine output: {0}")]
    Malformed(String),
    #[error("Operation not supported by {0} engines")]
    Unsupported(&'static str),
}

/// Contract of one engine process handle.
///
/// Implementations own their I/O tasks and must be callable from any thread.
#[async_trait]
pub trait EngineWorker: Send + Sync {
    /// Unique identifier, stamped on every event.
    fn identifier(&self) -> &str;

    fn config(&self) -> &EngineConfig;

    fn protocol(&self) -> EngineProtocol {
        self.config().protocol
    }

    /// Current process generation; bumped by every restart.
    fn generation(&self) -> u64;

    /// Install the sink that receives this engine's events.
    fn set_event_sink(&self, sink: EventSink);

    /// Prepare a new game from `setup`.
    async fn new_game(&self, setup: &PositionSetup, engine_is_white: bool)
        -> Result<(), EngineError>;

    /// Start searching `setup`. With `analyze` the search is unbounded.
    async fn compute_move(
        &self,
        setup: &PositionSetup,
        limits: &GoLimits,
        analyze: bool,
    ) -> Result<(), EngineError>;

    /// Start a speculative search. `setup` already contains the expected reply.
    async fn ponder(&self, setup: &PositionSetup, limits: &GoLimits) -> Result<(), EngineError>;

    /// The expected reply was played; turn the ponder search into a real one.
    async fn ponder_hit(&self) -> Result<(), EngineError>;

    /// Ask for the current best move right away.
    async fn move_now(&self, force: bool) -> Result<(), EngineError>;

    /// Stop a running search and wait up to `timeout` for its best move.
    /// Returns whether the engine acknowledged.
    async fn stop(&self, timeout: Duration) -> bool;

    /// Round-trip a readiness check, waiting up to `timeout`.
    async fn request_ready(&self, timeout: Duration) -> bool;

    /// Kill and respawn the process. Bumps the generation.
    async fn restart(&self) -> Result<(), EngineError>;

    /// Terminate the process for good.
    async fn shutdown(&self);
}

/// Creates engine workers. The pool uses it whenever a manager needs engines.
#[async_trait]
pub trait EngineFactory: Send + Sync {
    async fn create(
        &self,
        config: &EngineConfig,
        identifier: String,
    ) -> Result<Arc<dyn EngineWorker>, EngineError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_go_limits_clock_detection() {
        let clock = GoLimits {
            wtime_ms: 1000,
            btime_ms: 1000,
            has_time_control: true,
            ..Default::default()
        };
        assert!(clock.has_clock());
        assert_eq!(clock.time_left_ms(false), 1000);

        let fixed = GoLimits {
            move_time_ms: Some(100),
            has_time_control: true,
            ..Default::default()
        };
        assert!(!fixed.has_clock());
    }
}
