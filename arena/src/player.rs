//! One engine's view of a game: its process handle, a shadow position used to
//! validate what the engine says, and the compute/ponder state machine.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chess::{GameEndCause, GameResult, Move, MoveNotation, Position, Side};
use engine::{EngineEvent, EngineEventKind, EngineWorker, GoLimits, PositionSetup, Score};

use crate::config::ManagerSettings;
use crate::error::ArenaError;
use crate::record::{GameRecord, MoveRecord, SharedRecord};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComputeState {
    Idle,
    ComputingMove,
    /// Searching speculatively on the opponent's time.
    Pondering,
    /// The opponent played the pondered move; the ponder search now counts.
    PonderHit,
    /// The opponent played something else; the ponder search must be stopped.
    PonderMiss,
}

impl ComputeState {
    /// States whose best move answers a real compute request.
    pub fn is_move_producing(self) -> bool {
        matches!(self, Self::ComputingMove | Self::PonderHit)
    }
}

/// What became of a best move event.
#[derive(Debug, Clone, PartialEq)]
pub enum BestMoveOutcome {
    /// Stale, duplicate or unsolicited.
    Discarded,
    /// Not legal in the current position. Nothing was changed.
    Illegal { text: String },
    Accepted(MoveRecord),
}

impl BestMoveOutcome {
    /// The move to apply, if any.
    pub fn resolved_move(&self) -> Option<&MoveRecord> {
        match self {
            Self::Accepted(record) => Some(record),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Default)]
struct SearchTelemetry {
    depth: Option<u32>,
    score: Option<Score>,
    pv: Vec<String>,
}

pub struct PlayerContext {
    engine: Option<Arc<dyn EngineWorker>>,
    notation: MoveNotation,
    /// Side this engine plays; `None` when it plays both.
    side: Option<Side>,
    position: Position,
    state: ComputeState,
    record: SharedRecord,
    settings: ManagerSettings,
    search: SearchTelemetry,
    compute_start: Option<Instant>,
    budget: Option<Duration>,
    limits: GoLimits,
    mover_is_white: bool,
    analyzing: bool,
    ponder_move: Option<Move>,
    /// Best moves still owed by searches that were stopped.
    stale_best_moves: u32,
}

impl PlayerContext {
    pub fn new(record: SharedRecord, settings: ManagerSettings) -> Self {
        Self {
            engine: None,
            notation: MoveNotation::default(),
            side: None,
            position: Position::new(),
            state: ComputeState::Idle,
            record,
            settings,
            search: SearchTelemetry::default(),
            compute_start: None,
            budget: None,
            limits: GoLimits::default(),
            mover_is_white: true,
            analyzing: false,
            ponder_move: None,
            stale_best_moves: 0,
        }
    }

    /// Bind a process handle. The move notation follows its protocol.
    pub fn set_engine(&mut self, engine: Arc<dyn EngineWorker>) {
        self.notation = engine.protocol().required_notation();
        self.engine = Some(engine);
        self.reset_search();
    }

    pub fn engine(&self) -> Option<&Arc<dyn EngineWorker>> {
        self.engine.as_ref()
    }

    fn engine_handle(&self) -> Result<Arc<dyn EngineWorker>, ArenaError> {
        self.engine.clone().ok_or(ArenaError::NoEngine)
    }

    pub fn identifier(&self) -> Option<&str> {
        self.engine.as_deref().map(|e| e.identifier())
    }

    pub fn notation(&self) -> MoveNotation {
        self.notation
    }

    pub fn set_side(&mut self, side: Option<Side>) {
        self.side = side;
    }

    pub fn state(&self) -> ComputeState {
        self.state
    }

    pub fn position(&self) -> &Position {
        &self.position
    }

    pub fn is_analyzing(&self) -> bool {
        self.analyzing
    }

    /// Rebuild the shadow position from `record`.
    pub fn set_position(&mut self, record: &GameRecord) -> Result<(), ArenaError> {
        self.position = Position::from_moves(&record.start_fen, &record.lan_moves())?;
        Ok(())
    }

    /// Advance the shadow position. Resolves a running ponder search.
    pub fn do_move(&mut self, mv: Move) -> Result<(), ArenaError> {
        self.position.play(mv)?;
        if self.state == ComputeState::Pondering {
            self.state = if self.ponder_move == Some(mv) {
                ComputeState::PonderHit
            } else {
                ComputeState::PonderMiss
            };
            tracing::debug!(engine = ?self.identifier(), "Ponder resolved: {:?}", self.state);
        }
        Ok(())
    }

    /// The position of `record` as the engine expects it.
    pub fn setup_for(&self, record: &GameRecord) -> PositionSetup {
        PositionSetup {
            start_fen: record.start_fen.clone(),
            moves: match self.notation {
                MoveNotation::Lan => record.lan_moves(),
                MoveNotation::San => record.san_moves(),
            },
        }
    }

    pub async fn new_game(
        &mut self,
        record: &GameRecord,
        engine_is_white: bool,
    ) -> Result<(), ArenaError> {
        let engine = self.engine_handle()?;
        // Best moves owed by searches stopped in the previous game are still queued.
        self.clear_search();
        self.set_position(record)?;
        engine
            .new_game(&self.setup_for(record), engine_is_white)
            .await?;
        Ok(())
    }

    /// Start the search for the side to move of `record`.
    pub async fn compute_move(
        &mut self,
        record: &GameRecord,
        limits: GoLimits,
        analyze: bool,
    ) -> Result<(), ArenaError> {
        let engine = self.engine_handle()?;

        match self.state {
            ComputeState::PonderHit if !analyze => {
                engine.ponder_hit().await?;
                self.begin_compute(limits, false, record.white_to_move());
                tracing::debug!(engine = %engine.identifier(), "Ponder hit");
                return Ok(());
            }
            ComputeState::Idle => {}
            _ => {
                self.cancel_compute().await;
            }
        }

        let setup = self.setup_for(record);
        engine.compute_move(&setup, &limits, analyze).await?;
        self.state = ComputeState::ComputingMove;
        self.begin_compute(limits, analyze, record.white_to_move());
        Ok(())
    }

    fn begin_compute(&mut self, limits: GoLimits, analyze: bool, mover_is_white: bool) {
        if self.state != ComputeState::PonderHit {
            self.state = ComputeState::ComputingMove;
        }
        self.analyzing = analyze || limits.infinite;
        self.search = SearchTelemetry::default();
        self.ponder_move = None;
        self.budget = if self.analyzing {
            None
        } else if let Some(move_time) = limits.move_time_ms {
            Some(Duration::from_millis(move_time))
        } else if limits.has_clock() {
            Some(Duration::from_millis(limits.time_left_ms(mover_is_white)))
        } else {
            None
        };
        self.limits = limits;
        self.mover_is_white = mover_is_white;
        self.set_compute_start(Instant::now());
    }

    /// Record when the search started. An earlier timestamp than the stored
    /// one lost a race and is ignored.
    pub fn set_compute_start(&mut self, timestamp: Instant) {
        match self.compute_start {
            Some(current) if timestamp < current => {
                tracing::trace!("Ignoring earlier compute start timestamp");
            }
            _ => self.compute_start = Some(timestamp),
        }
    }

    pub fn compute_start(&self) -> Option<Instant> {
        self.compute_start
    }

    /// Speculatively search `ponder_move` while the opponent thinks.
    /// Returns whether a ponder search was started.
    pub async fn allow_ponder(
        &mut self,
        record: &GameRecord,
        limits: GoLimits,
        ponder_move: Option<&str>,
    ) -> Result<bool, ArenaError> {
        if !self.settings.pondering || self.state != ComputeState::Idle {
            return Ok(false);
        }
        let Some(engine) = self.engine.clone() else {
            return Ok(false);
        };
        if !engine.config().ponder || !engine.protocol().supports_ponder() {
            return Ok(false);
        }
        let Some(text) = ponder_move else {
            return Ok(false);
        };
        let Some(mv) = self.position.resolve_move(text).mv else {
            tracing::debug!(engine = %engine.identifier(), "Ignoring illegal ponder move {}", text);
            return Ok(false);
        };

        let mut setup = self.setup_for(record);
        setup.moves.push(self.position.format_move(mv, self.notation));
        engine.ponder(&setup, &limits).await?;

        self.state = ComputeState::Pondering;
        self.ponder_move = Some(mv);
        self.search = SearchTelemetry::default();
        self.limits = limits;
        Ok(true)
    }

    /// Stop whatever the engine is searching. Waits a bounded time for the
    /// acknowledgement and restarts the engine without one. Returns whether
    /// the engine acknowledged.
    pub async fn cancel_compute(&mut self) -> bool {
        if self.state == ComputeState::Idle {
            return true;
        }
        let Some(engine) = self.engine.clone() else {
            self.reset_search();
            return true;
        };

        let analyzing = self.analyzing;
        let acknowledged = engine.stop(self.settings.cancel_timeout).await;
        if acknowledged {
            if !analyzing || engine.protocol().analysis_yields_move() {
                self.stale_best_moves += 1;
            }
            self.finish_search();
        } else {
            tracing::warn!(engine = %engine.identifier(), "Engine did not acknowledge stop, restarting");
            if let Err(e) = self.restart_engine().await {
                tracing::error!(engine = %engine.identifier(), "Restart failed: {}", e);
                self.reset_search();
            }
        }
        acknowledged
    }

    /// Ask the engine for its current best move.
    pub async fn move_now(&self) -> Result<(), ArenaError> {
        if !self.state.is_move_producing() {
            return Ok(());
        }
        self.engine_handle()?.move_now(true).await?;
        Ok(())
    }

    /// Restart the engine if it overran its time plus the grace period.
    /// Returns true when it did; the running task must be abandoned.
    pub async fn check_engine_timeout(&mut self) -> Result<bool, ArenaError> {
        if !self.state.is_move_producing() {
            return Ok(false);
        }
        let (Some(start), Some(budget)) = (self.compute_start, self.budget) else {
            return Ok(false);
        };
        if start.elapsed() <= budget + self.settings.engine_grace {
            return Ok(false);
        }

        tracing::warn!(
            engine = ?self.identifier(),
            "Engine exceeded {:?} by more than {:?}, restarting",
            budget,
            self.settings.engine_grace
        );
        self.restart_engine().await?;
        Ok(true)
    }

    /// Restart the process and resynchronize from the canonical record.
    pub async fn restart_engine(&mut self) -> Result<(), ArenaError> {
        let engine = self.engine_handle()?;
        self.reset_search();
        engine.restart().await?;

        let record = self.record.snapshot();
        self.set_position(&record)?;
        let engine_is_white = match self.side {
            Some(side) => side.is_white(),
            None => record.white_to_move(),
        };
        engine
            .new_game(&self.setup_for(&record), engine_is_white)
            .await?;
        if !engine.request_ready(self.settings.ready_timeout).await {
            tracing::warn!(engine = %engine.identifier(), "Engine not ready after restart");
        }
        Ok(())
    }

    /// Whether a search-ending event answers the search in progress. Events of
    /// an older process, a stopped search or an idle player do not.
    fn answers_current_search(&mut self, event: &EngineEvent, what: &str) -> bool {
        let Some(engine) = &self.engine else {
            return false;
        };
        if event.generation != engine.generation() {
            tracing::debug!(
                engine = %engine.identifier(),
                "Discarding {} from generation {} (current {})",
                what,
                event.generation,
                engine.generation()
            );
            return false;
        }
        if self.stale_best_moves > 0 {
            self.stale_best_moves -= 1;
            tracing::debug!(engine = %engine.identifier(), "Discarding {} of a stopped search", what);
            return false;
        }
        if !self.state.is_move_producing() {
            tracing::debug!(engine = %engine.identifier(), "Discarding {} in state {:?}", what, self.state);
            return false;
        }
        true
    }

    /// Validate a best move against the shadow position.
    pub fn handle_best_move(&mut self, event: &EngineEvent) -> BestMoveOutcome {
        let EngineEventKind::BestMove { mv, ponder } = &event.kind else {
            return BestMoveOutcome::Discarded;
        };
        if !self.answers_current_search(event, &format!("best move {}", mv)) {
            return BestMoveOutcome::Discarded;
        }
        let Some(engine) = &self.engine else {
            return BestMoveOutcome::Discarded;
        };

        let Some(chess_move) = self.position.resolve_move(mv).mv else {
            tracing::warn!(engine = %engine.identifier(), "Engine played illegal move {:?}", mv);
            self.finish_search();
            return BestMoveOutcome::Illegal { text: mv.clone() };
        };

        let elapsed_ms = self
            .compute_start
            .map(|start| event.timestamp.saturating_duration_since(start).as_millis() as u64)
            .unwrap_or(0);
        let record = MoveRecord {
            lan: self.position.move_to_lan(chess_move),
            san: self.position.move_to_san(chess_move),
            elapsed_ms,
            depth: self.search.depth,
            score: self.search.score,
            pv: self.check_pv(chess_move),
            ponder_move: ponder.clone(),
            comment: self.check_time(elapsed_ms),
        };
        self.finish_search();
        BestMoveOutcome::Accepted(record)
    }

    /// Returns whether the resignation ends the running search.
    pub fn handle_resign(&mut self, event: &EngineEvent) -> bool {
        if !matches!(event.kind, EngineEventKind::Resign) {
            return false;
        }
        if !self.answers_current_search(event, "resignation") {
            return false;
        }
        self.finish_search();
        true
    }

    /// Keep the telemetry of the running search. Returns whether the info
    /// belongs to it.
    pub fn handle_info(&mut self, event: &EngineEvent) -> bool {
        let EngineEventKind::Info(info) = &event.kind else {
            return false;
        };
        let current = self
            .engine
            .as_ref()
            .is_some_and(|e| e.generation() == event.generation);
        if !current || !self.state.is_move_producing() {
            return false;
        }

        if info.depth.is_some() {
            self.search.depth = info.depth;
        }
        if info.score.is_some() {
            self.search.score = info.score;
        }
        if !info.pv.is_empty() {
            self.search.pv = info.pv.clone();
        }
        true
    }

    /// The last reported PV in LAN if it starts with `mv` and is legal from
    /// the shadow position. Empty otherwise.
    pub fn check_pv(&self, mv: Move) -> Vec<String> {
        if self.search.pv.is_empty() {
            return Vec::new();
        }

        let mut position = self.position.clone();
        let mut lan = Vec::with_capacity(self.search.pv.len());
        for (i, text) in self.search.pv.iter().enumerate() {
            let Some(pv_move) = position.resolve_move(text).mv else {
                tracing::warn!(engine = ?self.identifier(), "PV move {} is not legal, dropping PV", text);
                return Vec::new();
            };
            if i == 0 && pv_move != mv {
                tracing::warn!(
                    engine = ?self.identifier(),
                    "PV starts with {} but {} was played, dropping PV",
                    text,
                    position.move_to_lan(mv)
                );
                return Vec::new();
            }
            lan.push(position.move_to_lan(pv_move));
            if position.play(pv_move).is_err() {
                return Vec::new();
            }
        }
        lan
    }

    /// Note on the move when the engine overstepped its declared limits.
    pub fn check_time(&self, elapsed_ms: u64) -> Option<String> {
        if let Some(move_time) = self.limits.move_time_ms {
            if elapsed_ms > move_time {
                return Some(format!(
                    "used {} ms of a {} ms move time",
                    elapsed_ms, move_time
                ));
            }
        }
        if self.limits.has_clock() {
            let left = self.limits.time_left_ms(self.mover_is_white);
            if elapsed_ms > left {
                return Some(format!(
                    "exceeded clock: {} ms used with {} ms left",
                    elapsed_ms, left
                ));
            }
        }
        None
    }

    /// The engine died. The game is lost for `is_white`'s side and the
    /// engine is restarted for future tasks.
    pub async fn handle_disconnect(&mut self, is_white: bool) -> Result<(), ArenaError> {
        let side = Side::from_is_white(is_white);
        tracing::warn!(engine = ?self.identifier(), "Engine playing {} disconnected", side);
        self.record
            .write(|r| r.set_game_end(GameEndCause::Disconnected, GameResult::loss_for(side)));
        self.restart_engine().await
    }

    pub async fn shutdown(&mut self) {
        if let Some(engine) = &self.engine {
            engine.shutdown().await;
        }
        self.reset_search();
    }

    fn finish_search(&mut self) {
        self.state = ComputeState::Idle;
        self.compute_start = None;
        self.budget = None;
        self.analyzing = false;
        self.ponder_move = None;
    }

    fn clear_search(&mut self) {
        self.finish_search();
        self.search = SearchTelemetry::default();
    }

    /// Forget everything, including owed best moves. Only valid when the old
    /// process output can no longer arrive with the current generation.
    fn reset_search(&mut self) {
        self.clear_search();
        self.stale_best_moves = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use engine::mock::{MockCall, MockReply, MockScript, ScriptedEngine};
    use engine::{EngineConfig, SearchInfo};
    use tokio::sync::mpsc;

    fn player_with(script: MockScript, ponder: bool) -> (PlayerContext, ScriptedEngine, mpsc::Receiver<EngineEvent>) {
        let engine = ScriptedEngine::new(
            "mock#1",
            EngineConfig::new("mock", "mock").with_ponder(ponder),
            script,
        );
        let (tx, rx) = mpsc::channel(64);
        engine.set_event_sink(tx);

        let settings = ManagerSettings {
            cancel_timeout: Duration::from_millis(20),
            engine_grace: Duration::from_millis(10),
            ready_timeout: Duration::from_millis(20),
            ..Default::default()
        };
        let mut player = PlayerContext::new(SharedRecord::default(), settings);
        player.set_engine(Arc::new(engine.clone()));
        (player, engine, rx)
    }

    async fn next_best_move(rx: &mut mpsc::Receiver<EngineEvent>) -> EngineEvent {
        loop {
            let event = tokio::time::timeout(Duration::from_secs(5), rx.recv())
                .await
                .expect("timed out")
                .expect("closed");
            if matches!(event.kind, EngineEventKind::BestMove { .. }) {
                return event;
            }
        }
    }

    fn best_move(engine: &ScriptedEngine, mv: &str) -> EngineEvent {
        EngineEvent::new(
            engine.identifier(),
            engine.generation(),
            EngineEventKind::BestMove {
                mv: mv.to_string(),
                ponder: None,
            },
        )
    }

    #[tokio::test]
    async fn test_cancel_compute_is_idempotent_when_idle() {
        let (mut player, engine, _rx) = player_with(MockScript::default(), false);
        assert!(player.cancel_compute().await);
        assert!(player.cancel_compute().await);
        assert_eq!(player.state(), ComputeState::Idle);
        assert_eq!(engine.count_calls(|c| *c == MockCall::Stop), 0);
    }

    #[tokio::test]
    async fn test_accepts_legal_best_move() {
        let (mut player, _engine, mut rx) = player_with(MockScript::default(), false);
        let record = GameRecord::default();
        player.set_position(&record).unwrap();
        player
            .compute_move(&record, GoLimits::default(), false)
            .await
            .unwrap();
        assert_eq!(player.state(), ComputeState::ComputingMove);

        let event = next_best_move(&mut rx).await;
        let outcome = player.handle_best_move(&event);
        let accepted = outcome.resolved_move().expect("move accepted");
        assert_eq!(accepted.lan.len(), 4);
        assert_eq!(player.state(), ComputeState::Idle);

        // Delivered once, never twice.
        assert_eq!(player.handle_best_move(&event), BestMoveOutcome::Discarded);
    }

    #[tokio::test]
    async fn test_illegal_best_move_changes_nothing() {
        let script = MockScript::default().then(MockReply::Move("e2e5".to_string()));
        let (mut player, _engine, mut rx) = player_with(script, false);
        let record = GameRecord::default();
        player.set_position(&record).unwrap();
        player
            .compute_move(&record, GoLimits::default(), false)
            .await
            .unwrap();

        let event = next_best_move(&mut rx).await;
        let outcome = player.handle_best_move(&event);
        assert_eq!(
            outcome,
            BestMoveOutcome::Illegal {
                text: "e2e5".to_string()
            }
        );
        assert!(outcome.resolved_move().is_none());
        assert_eq!(player.position().ply(), 0);
        assert_eq!(player.record.read(|r| r.half_moves_played()), 0);
    }

    #[tokio::test]
    async fn test_stale_generation_is_discarded() {
        let script = MockScript::default().then(MockReply::Hang);
        let (mut player, engine, _rx) = player_with(script, false);
        let record = GameRecord::default();
        player
            .compute_move(&record, GoLimits::default(), false)
            .await
            .unwrap();

        let mut stale = best_move(&engine, "e2e4");
        stale.generation += 1;
        assert_eq!(player.handle_best_move(&stale), BestMoveOutcome::Discarded);
        assert_eq!(player.state(), ComputeState::ComputingMove);
    }

    #[tokio::test]
    async fn test_best_move_of_cancelled_search_is_discarded() {
        let script = MockScript::default()
            .then(MockReply::Hang)
            .think_time(Duration::from_secs(60));
        let (mut player, engine, _rx) = player_with(script, false);
        let record = GameRecord::default();
        player
            .compute_move(&record, GoLimits::default(), false)
            .await
            .unwrap();

        // Hung engine: stop is not acknowledged, the engine is restarted.
        assert!(!player.cancel_compute().await);
        assert_eq!(engine.generation(), 1);
        assert_eq!(player.state(), ComputeState::Idle);

        // Next search answers stop; its best move is owed and then dropped.
        player
            .compute_move(&record, GoLimits::default(), false)
            .await
            .unwrap();
        assert!(player.cancel_compute().await);
        assert_eq!(player.handle_best_move(&best_move(&engine, "e2e4")), BestMoveOutcome::Discarded);
    }

    #[tokio::test]
    async fn test_resignation_ends_only_the_running_search() {
        let script = MockScript::default().then(MockReply::Hang);
        let (mut player, engine, _rx) = player_with(script, false);
        let resign = EngineEvent::new(engine.identifier(), engine.generation(), EngineEventKind::Resign);
        assert!(!player.handle_resign(&resign));

        let record = GameRecord::default();
        player
            .compute_move(&record, GoLimits::default(), false)
            .await
            .unwrap();
        let mut stale = resign.clone();
        stale.generation += 1;
        assert!(!player.handle_resign(&stale));
        assert_eq!(player.state(), ComputeState::ComputingMove);

        assert!(player.handle_resign(&resign));
        assert_eq!(player.state(), ComputeState::Idle);
    }

    #[tokio::test]
    async fn test_pv_mismatch_drops_pv() {
        let script = MockScript::default().then(MockReply::Hang);
        let (mut player, engine, _rx) = player_with(script, false);
        let record = GameRecord::default();
        player.set_position(&record).unwrap();
        player
            .compute_move(&record, GoLimits::default(), false)
            .await
            .unwrap();

        let info = EngineEvent::new(
            engine.identifier(),
            engine.generation(),
            EngineEventKind::Info(SearchInfo {
                depth: Some(7),
                pv: vec!["d2d4".to_string(), "d7d5".to_string()],
                ..Default::default()
            }),
        );
        assert!(player.handle_info(&info));

        let outcome = player.handle_best_move(&best_move(&engine, "e2e4"));
        let accepted = outcome.resolved_move().unwrap();
        assert_eq!(accepted.lan, "e2e4");
        assert_eq!(accepted.depth, Some(7));
        assert!(accepted.pv.is_empty());
    }

    #[tokio::test]
    async fn test_pv_kept_when_consistent() {
        let script = MockScript::default().then(MockReply::Hang);
        let (mut player, engine, _rx) = player_with(script, false);
        let record = GameRecord::default();
        player.set_position(&record).unwrap();
        player
            .compute_move(&record, GoLimits::default(), false)
            .await
            .unwrap();
        player.handle_info(&EngineEvent::new(
            engine.identifier(),
            engine.generation(),
            EngineEventKind::Info(SearchInfo {
                pv: vec!["e2e4".to_string(), "e7e5".to_string()],
                ..Default::default()
            }),
        ));

        let outcome = player.handle_best_move(&best_move(&engine, "e2e4"));
        assert_eq!(outcome.resolved_move().unwrap().pv, vec!["e2e4", "e7e5"]);
    }

    #[tokio::test]
    async fn test_timeout_restarts_and_resyncs() {
        let script = MockScript::default().then(MockReply::Hang);
        let (mut player, engine, _rx) = player_with(script, false);
        let record = GameRecord::default();
        player.set_position(&record).unwrap();
        let limits = GoLimits {
            move_time_ms: Some(10),
            has_time_control: true,
            ..Default::default()
        };
        player.compute_move(&record, limits, false).await.unwrap();
        assert!(!player.check_engine_timeout().await.unwrap());

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(player.check_engine_timeout().await.unwrap());
        assert_eq!(engine.generation(), 1);
        assert_eq!(player.state(), ComputeState::Idle);
        assert!(engine.calls().contains(&MockCall::Restart));
    }

    #[tokio::test]
    async fn test_analysis_has_no_deadline() {
        let (mut player, _engine, _rx) = player_with(MockScript::default(), false);
        let record = GameRecord::default();
        player
            .compute_move(&record, GoLimits::default(), true)
            .await
            .unwrap();
        assert!(player.is_analyzing());
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(!player.check_engine_timeout().await.unwrap());
    }

    #[tokio::test]
    async fn test_ponder_hit() {
        let (mut player, engine, _rx) = player_with(MockScript::default(), true);
        let mut record = GameRecord::default();
        player.set_position(&record).unwrap();

        // After 1. e4 the engine ponders on 1... e5.
        let e4 = player.position().parse_move("e2e4").unwrap();
        player.do_move(e4).unwrap();
        record.add_move(MoveRecord {
            lan: "e2e4".to_string(),
            san: "e4".to_string(),
            ..Default::default()
        });
        assert!(player
            .allow_ponder(&record, GoLimits::default(), Some("e7e5"))
            .await
            .unwrap());
        assert_eq!(player.state(), ComputeState::Pondering);

        let e5 = player.position().parse_move("e7e5").unwrap();
        player.do_move(e5).unwrap();
        assert_eq!(player.state(), ComputeState::PonderHit);
        record.add_move(MoveRecord {
            lan: "e7e5".to_string(),
            san: "e5".to_string(),
            ..Default::default()
        });
        player
            .compute_move(&record, GoLimits::default(), false)
            .await
            .unwrap();
        assert!(engine.calls().contains(&MockCall::PonderHit));
        assert!(player.state().is_move_producing());
    }

    #[tokio::test]
    async fn test_ponder_miss_stops_the_ponder_search() {
        let (mut player, engine, _rx) = player_with(MockScript::default(), true);
        let mut record = GameRecord::default();
        player.set_position(&record).unwrap();

        let e4 = player.position().parse_move("e2e4").unwrap();
        player.do_move(e4).unwrap();
        record.add_move(MoveRecord {
            lan: "e2e4".to_string(),
            san: "e4".to_string(),
            ..Default::default()
        });
        player
            .allow_ponder(&record, GoLimits::default(), Some("e7e5"))
            .await
            .unwrap();

        let d5 = player.position().parse_move("d7d5").unwrap();
        player.do_move(d5).unwrap();
        assert_eq!(player.state(), ComputeState::PonderMiss);
        record.add_move(MoveRecord {
            lan: "d7d5".to_string(),
            san: "d5".to_string(),
            ..Default::default()
        });
        player
            .compute_move(&record, GoLimits::default(), false)
            .await
            .unwrap();
        assert!(engine.calls().contains(&MockCall::Stop));
        assert!(!engine.calls().contains(&MockCall::PonderHit));
        assert_eq!(player.state(), ComputeState::ComputingMove);
    }

    #[tokio::test]
    async fn test_ponder_refused_without_engine_support() {
        let (mut player, _engine, _rx) = player_with(MockScript::default(), false);
        let record = GameRecord::default();
        player.set_position(&record).unwrap();
        assert!(!player
            .allow_ponder(&record, GoLimits::default(), Some("e2e4"))
            .await
            .unwrap());
        assert_eq!(player.state(), ComputeState::Idle);
    }

    #[test]
    fn test_compute_start_never_regresses() {
        let mut player = PlayerContext::new(SharedRecord::default(), ManagerSettings::default());
        let later = Instant::now();
        let earlier = later - Duration::from_millis(5);
        player.set_compute_start(later);
        player.set_compute_start(earlier);
        assert_eq!(player.compute_start(), Some(later));
    }

    #[test]
    fn test_check_time_annotates_overrun() {
        let mut player = PlayerContext::new(SharedRecord::default(), ManagerSettings::default());
        player.limits = GoLimits {
            move_time_ms: Some(100),
            has_time_control: true,
            ..Default::default()
        };
        assert!(player.check_time(50).is_none());
        assert!(player.check_time(150).unwrap().contains("100 ms"));
    }
}
