use chess::{FenError, MoveError, Side};
use engine::EngineError;

use crate::time_control::TimeControlError;

#[derive(Debug, thiserror::Error)]
pub enum ArenaError {
    #[error("Engine error: {0}")]
    Engine(#[from] EngineError),
    #[error("Move error: {0}")]
    Move(#[from] MoveError),
    #[error("FEN error: {0}")]
    Fen(#[from] FenError),
    #[error("Invalid time control: {0}")]
    TimeControl(#[from] TimeControlError),
    #[error("A game needs one or two engines, got {0}")]
    EngineCount(usize),
    #[error("No engine bound to this player")]
    NoEngine,
    #[error("No task in progress")]
    NoTask,
    #[error("Engine playing {0} ran out of time")]
    EngineTimeout(Side),
    #[error("Engine {0} disconnected")]
    Disconnected(String),
    #[error("Engine {0} resigned instead of moving")]
    Resigned(String),
    #[error("Failed to start manager thread: {0}")]
    Thread(std::io::Error),
    #[error("Failed to read {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
    #[error("Invalid tournament file: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Invalid tournament: {0}")]
    InvalidTournament(String),
}

#[derive(Debug, thiserror::Error)]
pub enum PoolError {
    #[error("{0} game manager(s) still running")]
    StillRunning(usize),
    #[error("Pool has been shut down")]
    ShutDown,
    #[error(transparent)]
    Arena(#[from] ArenaError),
}
