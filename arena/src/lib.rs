//! Engine match orchestration.
//!
//! A [`GameManagerPool`] runs a resizable set of [`GameManager`]s, each on its
//! own consumer thread, each driving one game at a time between engine
//! processes. Work comes from [`TaskSource`]s such as the pairings of a
//! [`Tournament`].

pub mod config;
pub mod context;
pub mod error;
pub mod manager;
pub mod player;
pub mod pool;
pub mod record;
pub mod task;
pub mod time_control;
pub mod tournament;

pub use config::ManagerSettings;
pub use context::GameContext;
pub use error::{ArenaError, PoolError};
pub use manager::{Assignment, AssignmentProvider, EngineRecord, GameManager, ManagerState, UiCommand};
pub use player::{BestMoveOutcome, ComputeState, PlayerContext};
pub use pool::{AssignmentStrategy, Fifo, GameManagerPool, RoundRobin};
pub use record::{GameRecord, MoveRecord, SharedRecord};
pub use task::{GameTask, TaskKind, TaskQueue, TaskSource};
pub use time_control::{create_go_limits, TimeControl, TimeControlError, TimeSegment};
pub use tournament::{Standing, Tournament, TournamentConfig, TournamentFormat};
