use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Weak};

use chess::{GameEndCause, GameResult, Side};
use engine::{EngineConfig, EngineEvent, EngineEventKind, EngineFactory, EngineWorker};
use futures::FutureExt;
use tokio::sync::mpsc;
use tokio::time;
use tracing::Instrument;

use super::commands::{Control, UiCommand};
use super::{Assignment, AssignmentProvider, EngineRecord, ManagerShared, ManagerState};
use crate::config::ManagerSettings;
use crate::context::GameContext;
use crate::error::ArenaError;
use crate::player::BestMoveOutcome;
use crate::record::GameRecord;
use crate::task::{GameTask, TaskKind};
use crate::time_control::create_go_limits;

type Panic = Box<dyn Any + Send>;

struct ActiveTask {
    task: GameTask,
    /// Started by a [`UiCommand`]; not reported to any source.
    interactive: bool,
}

/// Owns one game and everything that mutates it.
pub(crate) struct ManagerActor {
    id: usize,
    control_rx: mpsc::UnboundedReceiver<Control>,
    event_tx: mpsc::Sender<EngineEvent>,
    event_rx: mpsc::Receiver<EngineEvent>,
    shared: Arc<ManagerShared>,
    factory: Arc<dyn EngineFactory>,
    settings: ManagerSettings,
    provider: Weak<dyn AssignmentProvider>,
    assignment: Option<Assignment>,
    bound_engines: Vec<EngineConfig>,
    context: GameContext,
    current: Option<ActiveTask>,
    pause_requested: bool,
    retiring: bool,
    failures: usize,
    engine_seq: u64,
}

impl ManagerActor {
    pub(crate) fn new(
        id: usize,
        control_rx: mpsc::UnboundedReceiver<Control>,
        shared: Arc<ManagerShared>,
        factory: Arc<dyn EngineFactory>,
        settings: ManagerSettings,
        provider: Weak<dyn AssignmentProvider>,
    ) -> Self {
        let (event_tx, event_rx) = mpsc::channel(settings.event_queue_capacity);
        let context = GameContext::new(shared.record.clone(), settings.clone());
        Self {
            id,
            control_rx,
            event_tx,
            event_rx,
            shared,
            factory,
            settings,
            provider,
            assignment: None,
            bound_engines: Vec::new(),
            context,
            current: None,
            pause_requested: false,
            retiring: false,
            failures: 0,
            engine_seq: 0,
        }
    }

    pub(crate) async fn run(self) {
        let id = self.id;
        self.run_inner()
            .instrument(tracing::info_span!("game_manager", id))
            .await;
    }

    async fn run_inner(mut self) {
        tracing::info!("Game manager started");

        let mut tick = time::interval(self.settings.tick_interval);
        tick.set_missed_tick_behavior(time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                biased;

                control = self.control_rx.recv() => {
                    match control {
                        Some(Control::Teardown) | None => {
                            self.teardown().await;
                            break;
                        }
                        Some(control) => {
                            tracing::debug!("Control: {:?}", control);
                            let result = AssertUnwindSafe(self.on_control(control)).catch_unwind().await;
                            self.settle(result).await;
                        }
                    }
                }

                Some(event) = self.event_rx.recv() => {
                    let result = AssertUnwindSafe(self.on_engine_event(event)).catch_unwind().await;
                    self.settle(result).await;
                }

                _ = tick.tick() => {
                    let result = AssertUnwindSafe(self.on_tick()).catch_unwind().await;
                    self.settle(result).await;
                }
            }
        }

        tracing::info!("Game manager exited");
    }

    fn state(&self) -> ManagerState {
        *self.shared.state.borrow()
    }

    fn set_state(&self, state: ManagerState) {
        let previous = self.shared.state.send_replace(state);
        if previous != state {
            tracing::debug!("State {:?} -> {:?}", previous, state);
        }
    }

    /// Turn a failed or panicked handler into a failed task and move on.
    async fn settle(&mut self, result: Result<Result<(), ArenaError>, Panic>) {
        let reason = match result {
            Ok(Ok(())) => return,
            Ok(Err(e)) => e.to_string(),
            Err(panic) => format!("panic: {}", panic_message(&panic)),
        };
        tracing::error!("Task failed: {}", reason);

        match self.current.take() {
            Some(active) => {
                self.context.cancel_compute().await;
                if active.interactive {
                    self.set_state(ManagerState::Idle);
                } else {
                    self.report_failure(&active.task, &reason);
                    self.begin_next_task().await;
                }
            }
            None if self.state() == ManagerState::Running && self.assignment.is_some() => {
                self.begin_next_task().await;
            }
            None => {}
        }
    }

    async fn on_control(&mut self, control: Control) -> Result<(), ArenaError> {
        match control {
            Control::Start(assignment) => {
                if self.current.as_ref().is_some_and(|a| !a.interactive) {
                    tracing::warn!("Start ignored, a task is running");
                    return Ok(());
                }
                self.abandon_current("replaced").await;
                tracing::info!(source = assignment.source.name(), "Starting assignment");
                self.assignment = Some(assignment);
                self.failures = 0;
                self.pause_requested = false;
                self.retiring = false;
                self.set_state(ManagerState::Running);
                self.begin_next_task().await;
            }
            Control::Load { engines, record } => {
                if self.current.as_ref().is_some_and(|a| !a.interactive) {
                    tracing::warn!("Load ignored, a task is running");
                    return Ok(());
                }
                self.abandon_current("replaced").await;
                self.bind_engines(&engines).await?;
                self.context.set_switched(false);
                self.context.set_position(record)?;
                self.context.new_game().await?;
                self.refresh_engine_records();
            }
            Control::Stop => self.stop().await,
            Control::MoveNow => self.move_now().await?,
            Control::Pause => {
                if self.state() == ManagerState::Running {
                    self.pause_requested = true;
                }
            }
            Control::Resume => {
                self.pause_requested = false;
                if self.state() == ManagerState::Paused {
                    self.set_state(ManagerState::Running);
                    self.begin_next_task().await;
                }
            }
            Control::Retire => {
                self.retiring = true;
                let between_tasks = self.current.as_ref().map_or(true, |a| a.interactive);
                if between_tasks {
                    self.abandon_current("retired").await;
                    self.assignment = None;
                    self.set_state(ManagerState::Finished);
                }
            }
            Control::Abort => {
                if self.current.is_some() {
                    self.context.cancel_compute().await;
                    self.context
                        .set_game_end(GameEndCause::Aborted, GameResult::Unterminated);
                }
                self.abandon_current("aborted").await;
                self.assignment = None;
                self.set_state(ManagerState::Finished);
            }
            Control::Teardown => self.teardown().await,
            Control::Ui(command) => self.on_ui_command(command).await?,
        }
        Ok(())
    }

    async fn on_ui_command(&mut self, command: UiCommand) -> Result<(), ArenaError> {
        let scheduled = self.current.as_ref().is_some_and(|a| !a.interactive);
        if scheduled && !matches!(command, UiCommand::Stop | UiCommand::Now | UiCommand::Manual) {
            tracing::warn!("Ignoring '{}' while a scheduled task runs", command);
            return Ok(());
        }

        match command {
            UiCommand::Stop | UiCommand::Manual => self.stop().await,
            UiCommand::Now => self.move_now().await?,
            UiCommand::New => {
                self.abandon_current("reset").await;
                self.reset_position()?;
                self.set_state(ManagerState::Idle);
            }
            UiCommand::Newgame => {
                self.abandon_current("new game").await;
                self.reset_position()?;
                self.context.new_game().await?;
                self.set_state(ManagerState::Idle);
            }
            UiCommand::Play => self.start_interactive(TaskKind::Compute).await?,
            UiCommand::Analyze => self.start_interactive(TaskKind::Analyze).await?,
            UiCommand::Auto => self.start_interactive(TaskKind::Play).await?,
        }
        Ok(())
    }

    fn reset_position(&mut self) -> Result<(), ArenaError> {
        let current = self.context.record().snapshot();
        let mut record = GameRecord::new(&current.start_fen);
        record.tags = current.tags;
        record.white_tc = current.white_tc;
        record.black_tc = current.black_tc;
        record.white_name = current.white_name;
        record.black_name = current.black_name;
        record.round = current.round;
        self.context.set_position(record)
    }

    async fn start_interactive(&mut self, kind: TaskKind) -> Result<(), ArenaError> {
        if !self.context.has_players() {
            tracing::warn!("No engines loaded");
            return Ok(());
        }
        self.abandon_current("replaced").await;

        let record = self.context.record().snapshot();
        if record.is_finished() {
            tracing::info!("Game is over: {}", record.result);
            return Ok(());
        }
        self.current = Some(ActiveTask {
            task: GameTask::new(0, kind, record),
            interactive: true,
        });
        self.set_state(ManagerState::Running);
        self.request_compute().await
    }

    async fn stop(&mut self) {
        self.abandon_current("stopped").await;
        self.assignment = None;
        self.pause_requested = false;
        self.release_engines().await;
        self.set_state(ManagerState::Idle);
    }

    async fn move_now(&mut self) -> Result<(), ArenaError> {
        if self.current.is_none() {
            return Ok(());
        }
        let side = self.context.record().read(|r| r.side_to_move());
        if let Some(player) = self.context.player(side) {
            player.move_now().await?;
        }
        Ok(())
    }

    async fn teardown(&mut self) {
        self.abandon_current("torn down").await;
        self.assignment = None;
        self.release_engines().await;
        self.set_state(ManagerState::TornDown);
    }

    /// Shut the bound engines down; the next task binds new ones.
    async fn release_engines(&mut self) {
        self.context.shutdown().await;
        self.bound_engines.clear();
        self.refresh_engine_records();
    }

    /// Drop the current task, reporting it as failed unless it was interactive.
    async fn abandon_current(&mut self, reason: &str) {
        let Some(active) = self.current.take() else {
            return;
        };
        self.context.cancel_compute().await;
        if !active.interactive {
            self.report_failure(&active.task, reason);
        }
    }

    fn report_failure(&mut self, task: &GameTask, reason: &str) {
        if let Some(assignment) = &self.assignment {
            assignment.source.task_failed(task, reason);
        }
        self.failures += 1;
    }

    /// Pull tasks until one is running or there is no more work.
    async fn begin_next_task(&mut self) {
        loop {
            if self.retiring {
                tracing::info!("Retired");
                self.assignment = None;
                self.set_state(ManagerState::Finished);
                return;
            }
            if self.pause_requested {
                self.pause_requested = false;
                self.set_state(ManagerState::Paused);
                return;
            }
            if self.failures >= self.settings.max_consecutive_failures {
                tracing::error!("{} tasks failed in a row, giving up on the assignment", self.failures);
                self.assignment = None;
                self.set_state(ManagerState::Finished);
                return;
            }

            let Some(assignment) = self.assignment.clone() else {
                self.set_state(ManagerState::Finished);
                return;
            };
            let task = assignment.source.next_task(self.id);
            if task.is_none() {
                match self.provider.upgrade().and_then(|p| p.next_assignment(self.id)) {
                    Some(next) => {
                        tracing::info!(source = next.source.name(), "Switching assignment");
                        self.assignment = Some(next);
                        self.failures = 0;
                        continue;
                    }
                    None => {
                        tracing::info!("No work left");
                        self.assignment = None;
                        self.set_state(ManagerState::Finished);
                        return;
                    }
                }
            }

            let started = AssertUnwindSafe(self.start_task(task.clone(), &assignment))
                .catch_unwind()
                .await;
            let reason = match started {
                Ok(Ok(())) => {
                    if self.mark_game_end() {
                        self.close_task().await;
                        continue;
                    }
                    return;
                }
                Ok(Err(e)) => e.to_string(),
                Err(panic) => format!("panic: {}", panic_message(&panic)),
            };
            tracing::error!(task = task.id, "Could not start task: {}", reason);
            self.current = None;
            self.context.cancel_compute().await;
            self.report_failure(&task, &reason);
        }
    }

    async fn start_task(&mut self, task: GameTask, assignment: &Assignment) -> Result<(), ArenaError> {
        tracing::info!(task = task.id, kind = ?task.kind, "Starting task");
        self.bind_engines(&assignment.engines).await?;
        self.context.set_switched(task.switch_side);

        let mut record = task.start.clone();
        if record.white_name.is_empty() {
            record.white_name = self.engine_name(Side::White);
        }
        if record.black_name.is_empty() {
            record.black_name = self.engine_name(Side::Black);
        }
        self.context.set_position(record)?;
        self.context.new_game().await?;
        self.refresh_engine_records();

        self.current = Some(ActiveTask {
            task,
            interactive: false,
        });
        if self.context.check_game_end().is_none() {
            self.request_compute().await?;
        }
        Ok(())
    }

    fn engine_name(&self, side: Side) -> String {
        self.context
            .player(side)
            .and_then(|p| p.engine())
            .map(|e| e.config().name.clone())
            .unwrap_or_default()
    }

    /// Create engines for `configs` unless the bound ones already match.
    async fn bind_engines(&mut self, configs: &[EngineConfig]) -> Result<(), ArenaError> {
        if self.context.has_players() && self.bound_engines == configs {
            return Ok(());
        }
        if configs.is_empty() || configs.len() > 2 {
            return Err(ArenaError::EngineCount(configs.len()));
        }
        self.context.shutdown().await;
        self.bound_engines.clear();

        let mut engines: Vec<Arc<dyn EngineWorker>> = Vec::with_capacity(configs.len());
        for config in configs {
            self.engine_seq += 1;
            let identifier = format!("{}#m{}-{}", config.name, self.id, self.engine_seq);
            let engine = self.factory.create(config, identifier).await?;
            engine.set_event_sink(self.event_tx.clone());
            engines.push(engine);
        }
        self.context.init_players(engines)?;
        self.bound_engines = configs.to_vec();
        Ok(())
    }

    /// Record the end of the game if the position is terminal. Returns
    /// whether the game is over.
    fn mark_game_end(&self) -> bool {
        if self.context.record().read(|r| r.is_finished()) {
            return true;
        }
        match self.context.check_game_end() {
            Some((cause, result)) => {
                self.context.set_game_end(cause, result);
                true
            }
            None => false,
        }
    }

    /// Report the current task as done.
    async fn close_task(&mut self) {
        let Some(active) = self.current.take() else {
            return;
        };
        self.context.cancel_compute().await;
        let record = self.context.record().snapshot();
        tracing::info!(
            task = active.task.id,
            plies = record.half_moves_played(),
            "Task finished: {} ({})",
            record.result,
            record.end_cause
        );
        if !active.interactive {
            if let Some(assignment) = &self.assignment {
                assignment.source.task_completed(&active.task, &record);
            }
            self.failures = 0;
        }
    }

    /// Close the current task and continue with the next one.
    async fn complete_and_continue(&mut self) {
        let interactive = self.current.as_ref().is_some_and(|a| a.interactive);
        self.close_task().await;
        if interactive {
            self.set_state(ManagerState::Idle);
        } else {
            self.begin_next_task().await;
        }
    }

    async fn request_compute(&mut self) -> Result<(), ArenaError> {
        let Some(active) = &self.current else {
            return Err(ArenaError::NoTask);
        };
        let analyze = active.task.kind == TaskKind::Analyze;
        let record = self.context.record().snapshot();
        let limits = create_go_limits(
            &record.white_tc,
            &record.black_tc,
            record.half_moves_played(),
            record.time_used_ms(Side::White),
            record.time_used_ms(Side::Black),
            record.white_to_move(),
        );
        let player = self
            .context
            .player_mut(record.side_to_move())
            .ok_or(ArenaError::NoEngine)?;
        player.compute_move(&record, limits, analyze).await
    }

    /// Let the player that just moved search on its opponent's time.
    async fn maybe_ponder(&mut self, mover: Side, ponder_move: Option<&str>) -> Result<(), ArenaError> {
        if self.context.is_unique() {
            return Ok(());
        }
        let record = self.context.record().snapshot();
        let limits = create_go_limits(
            &record.white_tc,
            &record.black_tc,
            record.half_moves_played(),
            record.time_used_ms(Side::White),
            record.time_used_ms(Side::Black),
            record.white_to_move(),
        );
        if let Some(player) = self.context.player_mut(mover) {
            player.allow_ponder(&record, limits, ponder_move).await?;
        }
        Ok(())
    }

    async fn on_engine_event(&mut self, event: EngineEvent) -> Result<(), ArenaError> {
        let Some(index) = self.context.player_index_for(&event) else {
            tracing::trace!(engine = %event.identifier, "Event from an unbound engine");
            return Ok(());
        };

        match &event.kind {
            EngineEventKind::Info(info) => {
                let side = self.context.side_of(index);
                let current = self
                    .context
                    .player_at_mut(index)
                    .is_some_and(|p| p.handle_info(&event));
                if let (true, Some(active), Some(assignment)) = (current, &self.current, &self.assignment) {
                    if !active.interactive {
                        assignment.source.on_info(&active.task, side, info);
                    }
                }
            }
            EngineEventKind::BestMove { .. } => self.on_best_move(index, &event).await?,
            EngineEventKind::Resign => self.on_resign(index, &event).await?,
            EngineEventKind::ReadyAck => {}
            EngineEventKind::Disconnect => self.on_disconnect(index, &event).await?,
        }
        self.refresh_engine_records();
        Ok(())
    }

    async fn on_best_move(&mut self, index: usize, event: &EngineEvent) -> Result<(), ArenaError> {
        let mover = self.context.side_of(index);
        let outcome = match self.context.player_at_mut(index) {
            Some(player) => player.handle_best_move(event),
            None => return Ok(()),
        };
        let Some(kind) = self.current.as_ref().map(|a| a.task.kind) else {
            return Ok(());
        };

        match outcome {
            BestMoveOutcome::Discarded => Ok(()),
            BestMoveOutcome::Illegal { text } => {
                if kind == TaskKind::Play {
                    self.context
                        .set_game_end(GameEndCause::IllegalMove, GameResult::loss_for(mover));
                    self.complete_and_continue().await;
                    Ok(())
                } else {
                    Err(chess::MoveError::Illegal(text).into())
                }
            }
            BestMoveOutcome::Accepted(record) => {
                if kind == TaskKind::Analyze {
                    self.complete_and_continue().await;
                    return Ok(());
                }
                let ponder_move = record.ponder_move.clone();
                self.context.add_move(record)?;

                if kind == TaskKind::Compute {
                    self.complete_and_continue().await;
                    return Ok(());
                }
                if self.mark_game_end() {
                    self.complete_and_continue().await;
                    return Ok(());
                }
                self.request_compute().await?;
                if let Err(e) = self.maybe_ponder(mover, ponder_move.as_deref()).await {
                    tracing::warn!("Could not start pondering: {}", e);
                }
                Ok(())
            }
        }
    }

    async fn on_resign(&mut self, index: usize, event: &EngineEvent) -> Result<(), ArenaError> {
        let side = self.context.side_of(index);
        let resigned = self
            .context
            .player_at_mut(index)
            .is_some_and(|p| p.handle_resign(event));
        let Some(kind) = self.current.as_ref().map(|a| a.task.kind) else {
            return Ok(());
        };
        if !resigned {
            return Ok(());
        }

        tracing::info!(engine = %event.identifier, "Engine playing {} resigned", side);
        if kind == TaskKind::Play {
            self.context
                .set_game_end(GameEndCause::Resignation, GameResult::loss_for(side));
            self.complete_and_continue().await;
            Ok(())
        } else {
            Err(ArenaError::Resigned(event.identifier.clone()))
        }
    }

    async fn on_disconnect(&mut self, index: usize, event: &EngineEvent) -> Result<(), ArenaError> {
        let side = self.context.side_of(index);
        let Some(player) = self.context.player_at_mut(index) else {
            return Ok(());
        };
        let current_generation = player.engine().map(|e| e.generation());
        if current_generation != Some(event.generation) {
            tracing::debug!(engine = %event.identifier, "Ignoring disconnect of an old process");
            return Ok(());
        }

        let Some(kind) = self.current.as_ref().map(|a| a.task.kind) else {
            tracing::warn!(engine = %event.identifier, "Idle engine disconnected, restarting");
            return player.restart_engine().await;
        };
        player.handle_disconnect(side.is_white()).await?;
        if kind == TaskKind::Play {
            self.complete_and_continue().await;
            Ok(())
        } else {
            Err(ArenaError::Disconnected(event.identifier.clone()))
        }
    }

    async fn on_tick(&mut self) -> Result<(), ArenaError> {
        let Some(kind) = self.current.as_ref().map(|a| a.task.kind) else {
            return Ok(());
        };
        let Some(side) = self.context.check_for_timeouts_and_restart().await? else {
            return Ok(());
        };

        // The engine has been restarted; the task is replanned by its source.
        tracing::warn!(?kind, "Engine playing {} timed out, abandoning the task", side);
        Err(ArenaError::EngineTimeout(side))
    }

    fn refresh_engine_records(&self) {
        let unique = self.context.is_unique();
        let records = self
            .context
            .players()
            .iter()
            .enumerate()
            .filter_map(|(index, player)| {
                let engine = player.engine()?;
                Some(EngineRecord {
                    identifier: engine.identifier().to_string(),
                    name: engine.config().name.clone(),
                    side: (!unique).then(|| self.context.side_of(index)),
                    generation: engine.generation(),
                    compute_state: player.state(),
                })
            })
            .collect();
        self.shared.set_engines(records);
    }
}

fn panic_message(panic: &Panic) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
