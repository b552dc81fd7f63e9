//! A resizable set of game managers sharing a list of assignments.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;

use engine::{EngineConfig, EngineFactory};
use tokio::runtime::Handle;

use crate::config::ManagerSettings;
use crate::error::{ArenaError, PoolError};
use crate::manager::{Assignment, AssignmentProvider, GameManager, ManagerState};
use crate::task::TaskSource;

const TEARDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// Chooses which assignment a manager works on next.
pub trait AssignmentStrategy: Send {
    /// Index into `assignments` of one that still has work, if any.
    fn pick(&mut self, assignments: &[Assignment], manager_id: usize) -> Option<usize>;
}

/// Earliest registered assignment with work left.
#[derive(Debug, Default)]
pub struct Fifo;

impl AssignmentStrategy for Fifo {
    fn pick(&mut self, assignments: &[Assignment], _manager_id: usize) -> Option<usize> {
        assignments.iter().position(|a| a.source.has_tasks())
    }
}

/// Rotates over the assignments with work left.
#[derive(Debug, Default)]
pub struct RoundRobin {
    next: usize,
}

impl AssignmentStrategy for RoundRobin {
    fn pick(&mut self, assignments: &[Assignment], _manager_id: usize) -> Option<usize> {
        let count = assignments.len();
        let index = (0..count)
            .map(|offset| (self.next + offset) % count)
            .find(|&i| assignments[i].source.has_tasks())?;
        self.next = index + 1;
        Some(index)
    }
}

struct WorkState {
    assignments: Vec<Assignment>,
    strategy: Box<dyn AssignmentStrategy>,
}

struct PoolWork {
    state: Mutex<WorkState>,
}

impl PoolWork {
    fn lock(&self) -> MutexGuard<'_, WorkState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl AssignmentProvider for PoolWork {
    fn next_assignment(&self, manager_id: usize) -> Option<Assignment> {
        let mut guard = self.lock();
        let state = &mut *guard;
        let index = state.strategy.pick(&state.assignments, manager_id)?;
        Some(state.assignments[index].clone())
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Owns the managers, the engine factory and the registered work.
///
/// All methods take `&self`; share the pool behind an `Arc` to drive it from
/// several tasks.
pub struct GameManagerPool {
    runtime: Handle,
    factory: Arc<dyn EngineFactory>,
    settings: ManagerSettings,
    work: Arc<PoolWork>,
    managers: Mutex<Vec<Arc<GameManager>>>,
    /// Shrunk away nicely; torn down once their current game is over.
    retiring: Mutex<Vec<Arc<GameManager>>>,
    next_id: AtomicUsize,
    shut_down: AtomicBool,
}

impl GameManagerPool {
    /// `runtime` must be a multi-thread runtime.
    pub fn new(runtime: Handle, factory: Arc<dyn EngineFactory>, settings: ManagerSettings) -> Self {
        Self::with_strategy(runtime, factory, settings, Box::new(Fifo))
    }

    pub fn with_strategy(
        runtime: Handle,
        factory: Arc<dyn EngineFactory>,
        settings: ManagerSettings,
        strategy: Box<dyn AssignmentStrategy>,
    ) -> Self {
        Self {
            runtime,
            factory,
            settings,
            work: Arc::new(PoolWork {
                state: Mutex::new(WorkState {
                    assignments: Vec::new(),
                    strategy,
                }),
            }),
            managers: Mutex::new(Vec::new()),
            retiring: Mutex::new(Vec::new()),
            next_id: AtomicUsize::new(0),
            shut_down: AtomicBool::new(false),
        }
    }

    pub fn settings(&self) -> &ManagerSettings {
        &self.settings
    }

    /// Register work to be played by `engines` (one or two).
    pub fn add_assignment(
        &self,
        source: Arc<dyn TaskSource>,
        engines: Vec<EngineConfig>,
    ) -> Result<(), PoolError> {
        if self.shut_down.load(Ordering::SeqCst) {
            return Err(PoolError::ShutDown);
        }
        if engines.is_empty() || engines.len() > 2 {
            return Err(ArenaError::EngineCount(engines.len()).into());
        }
        tracing::info!(source = source.name(), "Assignment added");
        self.work.lock().assignments.push(Assignment::new(source, engines));
        Ok(())
    }

    fn spawn_manager(&self) -> Result<Arc<GameManager>, PoolError> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let provider: Arc<dyn AssignmentProvider> = self.work.clone();
        let provider: Weak<dyn AssignmentProvider> = Arc::downgrade(&provider);
        let manager = GameManager::spawn(
            id,
            self.runtime.clone(),
            self.factory.clone(),
            self.settings.clone(),
            provider,
        )?;
        Ok(Arc::new(manager))
    }

    fn start_manager(&self, manager: &GameManager) -> bool {
        match self.work.next_assignment(manager.id()) {
            Some(assignment) => manager.start(assignment),
            None => false,
        }
    }

    /// Grow or shrink to `count` managers. A nice shrink lets excess managers
    /// finish their game; otherwise they are aborted.
    pub fn set_concurrency(
        &self,
        count: usize,
        nice: bool,
        start_immediately: bool,
    ) -> Result<(), PoolError> {
        if self.shut_down.load(Ordering::SeqCst) {
            return Err(PoolError::ShutDown);
        }
        let mut managers = lock(&self.managers);

        while managers.len() < count {
            let manager = self.spawn_manager()?;
            if start_immediately {
                self.start_manager(&manager);
            }
            managers.push(manager);
        }

        while managers.len() > count {
            // Idle managers go first.
            let index = managers
                .iter()
                .rposition(|m| !m.is_running())
                .unwrap_or(managers.len() - 1);
            let manager = managers.remove(index);
            if nice && manager.is_running() {
                manager.retire();
                lock(&self.retiring).push(manager);
            } else {
                manager.abort();
                manager.teardown();
            }
        }

        tracing::info!(count, nice, "Concurrency set");
        Ok(())
    }

    fn all_managers(&self) -> Vec<Arc<GameManager>> {
        let mut all = lock(&self.managers).clone();
        all.extend(lock(&self.retiring).iter().cloned());
        all
    }

    /// Tear down retired managers that finished their game.
    fn reap(&self) {
        lock(&self.retiring).retain(|manager| {
            if manager.is_running() {
                return true;
            }
            manager.teardown();
            false
        });
    }

    /// Start every idle manager on available work. Returns how many started.
    pub fn start_all(&self) -> usize {
        let managers = lock(&self.managers).clone();
        managers
            .iter()
            .filter(|m| !m.is_running() && self.start_manager(m))
            .count()
    }

    pub fn pause_all(&self) {
        for manager in self.all_managers() {
            manager.pause();
        }
    }

    pub fn resume_all(&self) {
        for manager in self.all_managers() {
            manager.resume();
        }
    }

    pub fn stop_all(&self) {
        for manager in self.all_managers() {
            manager.stop();
        }
    }

    /// Tear down every manager, releasing its engine processes, and forget
    /// all assignments. Fails while any manager is still running.
    pub async fn clear_all(&self) -> Result<(), PoolError> {
        let running = self.active_count();
        if running > 0 {
            return Err(PoolError::StillRunning(running));
        }
        let managers = self.take_managers();
        let count = managers.len();
        self.teardown_managers(managers).await;
        self.work.lock().assignments.clear();
        tracing::info!(managers = count, "Pool cleared");
        Ok(())
    }

    fn take_managers(&self) -> Vec<Arc<GameManager>> {
        let mut managers: Vec<_> = lock(&self.managers).drain(..).collect();
        managers.extend(lock(&self.retiring).drain(..));
        managers
    }

    /// Tear `managers` down and join their threads.
    async fn teardown_managers(&self, managers: Vec<Arc<GameManager>>) {
        for manager in &managers {
            manager.teardown();
        }
        let mut torn_down = Vec::with_capacity(managers.len());
        for manager in managers {
            if manager
                .wait_for_state(ManagerState::TornDown, TEARDOWN_TIMEOUT)
                .await
            {
                torn_down.push(manager);
            } else {
                tracing::warn!(manager = manager.id(), "Manager did not tear down in time");
            }
        }
        // Joining blocks; keep it off the async workers.
        let joined = self
            .runtime
            .spawn_blocking(move || {
                for manager in &torn_down {
                    manager.join();
                }
            })
            .await;
        if let Err(e) = joined {
            tracing::error!("Failed to join manager threads: {}", e);
        }
    }

    /// Wait until no manager holds a task. Returns false on timeout.
    pub async fn wait_for_completion(&self, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        for manager in self.all_managers() {
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            if !manager.wait_until_inactive(remaining).await {
                return false;
            }
        }
        self.reap();
        true
    }

    pub fn is_running(&self) -> bool {
        self.all_managers().iter().any(|m| m.is_running())
    }

    pub fn has_tasks_scheduled(&self) -> bool {
        self.work
            .lock()
            .assignments
            .iter()
            .any(|a| a.source.has_tasks())
    }

    /// Managers counting towards the concurrency; retiring ones excluded.
    pub fn manager_count(&self) -> usize {
        self.reap();
        lock(&self.managers).len()
    }

    pub fn retiring_count(&self) -> usize {
        self.reap();
        lock(&self.retiring).len()
    }

    /// Managers currently holding or about to pick up a task.
    pub fn active_count(&self) -> usize {
        self.reap();
        self.all_managers().iter().filter(|m| m.is_running()).count()
    }

    pub fn managers(&self) -> Vec<Arc<GameManager>> {
        lock(&self.managers).clone()
    }

    /// Abort everything and tear every manager down.
    pub async fn shutdown(&self) {
        self.shut_down.store(true, Ordering::SeqCst);
        let managers = self.take_managers();
        for manager in &managers {
            manager.abort();
        }
        self.teardown_managers(managers).await;
        tracing::info!("Pool shut down");
    }
}
