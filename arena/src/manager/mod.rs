//! Game managers: one consumer thread each, driving one game at a time.
//!
//! A [`GameManager`] is a cheap control-plane handle. The game itself lives on
//! a dedicated OS thread that blocks on the tokio runtime and serializes
//! everything that touches the game: control messages, engine events and the
//! periodic timeout check. Control calls only enqueue, so they are safe from
//! any thread, including the manager's own callbacks into task sources.

mod actor;
mod commands;

pub use commands::{UiCommand, UnknownCommand};

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use chess::Side;
use engine::{EngineConfig, EngineFactory};
use tokio::runtime::Handle;
use tokio::sync::{mpsc, watch};

use crate::config::ManagerSettings;
use crate::error::ArenaError;
use crate::player::ComputeState;
use crate::record::{GameRecord, SharedRecord};
use crate::task::TaskSource;
use actor::ManagerActor;
use commands::Control;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ManagerState {
    Idle,
    Running,
    /// Halted at a task boundary.
    Paused,
    /// Out of work, retired or aborted. Can be started again.
    Finished,
    /// Engines shut down and the consumer thread exited.
    TornDown,
}

impl ManagerState {
    /// Holds or will pick up a task.
    pub fn is_active(self) -> bool {
        matches!(self, Self::Running | Self::Paused)
    }
}

/// Work bound to the engines that should carry it out.
#[derive(Clone)]
pub struct Assignment {
    pub source: Arc<dyn TaskSource>,
    pub engines: Vec<EngineConfig>,
}

impl Assignment {
    pub fn new(source: Arc<dyn TaskSource>, engines: Vec<EngineConfig>) -> Self {
        Self { source, engines }
    }
}

impl fmt::Debug for Assignment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Assignment")
            .field("source", &self.source.name())
            .field(
                "engines",
                &self.engines.iter().map(|e| e.name.as_str()).collect::<Vec<_>>(),
            )
            .finish()
    }
}

/// Hands a manager new work once its assignment is exhausted.
pub trait AssignmentProvider: Send + Sync {
    fn next_assignment(&self, manager_id: usize) -> Option<Assignment>;
}

/// Snapshot of one engine bound to a manager.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineRecord {
    pub identifier: String,
    pub name: String,
    /// `None` when the engine plays both sides.
    pub side: Option<Side>,
    pub generation: u64,
    pub compute_state: ComputeState,
}

/// State visible to the control plane. Written by the consumer thread, except
/// that [`GameManager::start`] claims `state` up front and the handle owns
/// `retiring`.
pub(crate) struct ManagerShared {
    pub(crate) state: watch::Sender<ManagerState>,
    pub(crate) record: SharedRecord,
    pub(crate) engines: Mutex<Vec<EngineRecord>>,
    pub(crate) retiring: AtomicBool,
}

impl ManagerShared {
    pub(crate) fn set_engines(&self, records: Vec<EngineRecord>) {
        *self
            .engines
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = records;
    }
}

pub struct GameManager {
    id: usize,
    control_tx: mpsc::UnboundedSender<Control>,
    shared: Arc<ManagerShared>,
    thread: Mutex<Option<std::thread::JoinHandle<()>>>,
}

impl GameManager {
    /// Spawn the consumer thread. `runtime` must be a multi-thread runtime:
    /// the thread blocks on it while engine I/O runs on its workers.
    pub fn spawn(
        id: usize,
        runtime: Handle,
        factory: Arc<dyn EngineFactory>,
        settings: ManagerSettings,
        provider: Weak<dyn AssignmentProvider>,
    ) -> Result<Self, ArenaError> {
        let (control_tx, control_rx) = mpsc::unbounded_channel();
        let (state_tx, _) = watch::channel(ManagerState::Idle);
        let shared = Arc::new(ManagerShared {
            state: state_tx,
            record: SharedRecord::default(),
            engines: Mutex::new(Vec::new()),
            retiring: AtomicBool::new(false),
        });

        let actor = ManagerActor::new(id, control_rx, shared.clone(), factory, settings, provider);
        let thread = std::thread::Builder::new()
            .name(format!("game-manager-{}", id))
            .spawn(move || runtime.block_on(actor.run()))
            .map_err(ArenaError::Thread)?;

        Ok(Self {
            id,
            control_tx,
            shared,
            thread: Mutex::new(Some(thread)),
        })
    }

    pub fn id(&self) -> usize {
        self.id
    }

    fn send(&self, control: Control) {
        if self.control_tx.send(control).is_err() {
            tracing::debug!(manager = self.id, "Control message after teardown");
        }
    }

    /// Begin working on `assignment`. Returns false if already running or
    /// the source has nothing to hand out.
    pub fn start(&self, assignment: Assignment) -> bool {
        if !assignment.source.has_tasks() {
            return false;
        }
        let claimed = self.shared.state.send_if_modified(|state| {
            if state.is_active() || *state == ManagerState::TornDown {
                return false;
            }
            *state = ManagerState::Running;
            true
        });
        if claimed {
            self.shared.retiring.store(false, Ordering::SeqCst);
            self.send(Control::Start(assignment));
        }
        claimed
    }

    /// Bind engines and a position for interactive use through [`UiCommand`]s.
    pub fn load(&self, engines: Vec<EngineConfig>, record: GameRecord) {
        self.send(Control::Load { engines, record });
    }

    /// Abandon the current task and the assignment, and shut the engines down.
    pub fn stop(&self) {
        self.send(Control::Stop);
    }

    pub fn move_now(&self) {
        self.send(Control::MoveNow);
    }

    /// Halt at the next task boundary.
    pub fn pause(&self) {
        self.send(Control::Pause);
    }

    pub fn resume(&self) {
        self.send(Control::Resume);
    }

    /// Finish the current game, then stop taking work.
    pub fn retire(&self) {
        self.shared.retiring.store(true, Ordering::SeqCst);
        self.send(Control::Retire);
    }

    pub fn is_retiring(&self) -> bool {
        self.shared.retiring.load(Ordering::SeqCst)
    }

    /// Abandon the current game right away.
    pub fn abort(&self) {
        self.send(Control::Abort);
    }

    /// Shut the engines down and end the consumer thread.
    pub fn teardown(&self) {
        self.send(Control::Teardown);
    }

    pub fn execute(&self, command: UiCommand) {
        self.send(Control::Ui(command));
    }

    pub fn state(&self) -> ManagerState {
        *self.shared.state.borrow()
    }

    pub fn is_running(&self) -> bool {
        self.state().is_active()
    }

    pub fn get_engine_records(&self) -> Vec<EngineRecord> {
        self.shared
            .engines
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Run `f` on the live game record under its lock.
    pub fn with_game_record<R>(&self, f: impl FnOnce(&GameRecord) -> R) -> R {
        self.shared.record.read(f)
    }

    /// Wait until the manager reaches `target`. Returns false on timeout.
    pub async fn wait_for_state(&self, target: ManagerState, timeout: Duration) -> bool {
        self.wait_until(|state| state == target, timeout).await
    }

    /// Wait until the manager holds no task.
    pub async fn wait_until_inactive(&self, timeout: Duration) -> bool {
        self.wait_until(|state| !state.is_active(), timeout).await
    }

    async fn wait_until(&self, condition: impl Fn(ManagerState) -> bool, timeout: Duration) -> bool {
        let mut rx = self.shared.state.subscribe();
        let reached = tokio::time::timeout(timeout, rx.wait_for(|state| condition(*state))).await;
        matches!(reached, Ok(Ok(_)))
    }

    /// Block until the consumer thread has exited. Call after [`teardown`](Self::teardown),
    /// never from inside the runtime's async context.
    pub fn join(&self) {
        let handle = self
            .thread
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        if let Some(handle) = handle {
            if handle.join().is_err() {
                tracing::error!(manager = self.id, "Manager thread panicked");
            }
        }
    }
}

impl Drop for GameManager {
    fn drop(&mut self) {
        let _ = self.control_tx.send(Control::Teardown);
    }
}

impl fmt::Debug for GameManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GameManager")
            .field("id", &self.id)
            .field("state", &self.state())
            .finish()
    }
}
