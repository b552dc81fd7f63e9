//! Scripted in-memory engine for testing without a real engine binary.
//!
//! Enable with `features = ["mock"]` in dev-dependencies.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use chess::Position;

use crate::{
    EngineConfig, EngineError, EngineEvent, EngineEventKind, EngineFactory, EngineWorker,
    EventSink, GoLimits, PositionSetup, Score, SearchInfo,
};

/// How the engine answers one search.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockReply {
    /// The first legal move, written in the protocol's notation.
    FirstLegal,
    /// A fixed move text, legal or not.
    Move(String),
    /// Never answer and ignore stop requests.
    Hang,
    /// The process dies mid-search.
    Disconnect,
    /// Concede instead of moving.
    Resign,
    /// Unresponsive, then answers after the delay with the generation the
    /// search started in, even if the engine was restarted meanwhile.
    Stall(Duration),
}

/// Behaviour of a [`ScriptedEngine`]. Replies are consumed one per search;
/// `fallback` answers once they run out.
#[derive(Debug, Clone)]
pub struct MockScript {
    pub replies: VecDeque<MockReply>,
    pub fallback: MockReply,
    pub think_time: Duration,
    /// Attach a ponder move to best moves.
    pub ponder_move: bool,
    /// Answer readiness checks.
    pub ready: bool,
}

impl Default for MockScript {
    fn default() -> Self {
        Self {
            replies: VecDeque::new(),
            fallback: MockReply::FirstLegal,
            think_time: Duration::from_millis(5),
            ponder_move: false,
            ready: true,
        }
    }
}

impl MockScript {
    pub fn then(mut self, reply: MockReply) -> Self {
        self.replies.push_back(reply);
        self
    }

    pub fn fallback(mut self, reply: MockReply) -> Self {
        self.fallback = reply;
        self
    }

    pub fn think_time(mut self, think_time: Duration) -> Self {
        self.think_time = think_time;
        self
    }

    pub fn with_ponder_move(mut self) -> Self {
        self.ponder_move = true;
        self
    }

    pub fn unresponsive(mut self) -> Self {
        self.ready = false;
        self
    }

    fn next_reply(&mut self) -> MockReply {
        self.replies
            .pop_front()
            .unwrap_or_else(|| self.fallback.clone())
    }
}

/// Recorded engine call for test assertions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockCall {
    NewGame { engine_is_white: bool },
    Compute { moves: Vec<String>, analyze: bool },
    Ponder { moves: Vec<String> },
    PonderHit,
    MoveNow,
    Stop,
    Ready,
    Restart,
    Shutdown,
}

#[derive(Debug, Clone)]
struct ActiveSearch {
    serial: u64,
    setup: PositionSetup,
    reply: MockReply,
    analyze: bool,
    pondering: bool,
}

impl ActiveSearch {
    fn unresponsive(&self) -> bool {
        matches!(self.reply, MockReply::Hang | MockReply::Stall(_))
    }
}

struct Inner {
    identifier: String,
    config: EngineConfig,
    generation: AtomicU64,
    serial: AtomicU64,
    shut_down: AtomicBool,
    sink: Mutex<Option<EventSink>>,
    script: Mutex<MockScript>,
    calls: Mutex<Vec<MockCall>>,
    search: Mutex<Option<ActiveSearch>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl Inner {
    fn record(&self, call: MockCall) {
        lock(&self.calls).push(call);
    }

    async fn emit(&self, generation: u64, kind: EngineEventKind) {
        let sink = lock(&self.sink).clone();
        if let Some(sink) = sink {
            let _ = sink
                .send(EngineEvent::new(&self.identifier, generation, kind))
                .await;
        }
    }

    /// Best move for `setup` according to `reply`, plus an optional ponder move.
    fn answer(&self, setup: &PositionSetup, reply: &MockReply) -> (String, Option<String>) {
        let notation = self.config.protocol.required_notation();
        let Ok(position) = Position::from_moves(&setup.start_fen, &setup.moves) else {
            return (String::new(), None);
        };

        let mv = match reply {
            MockReply::Move(text) => return (text.clone(), None),
            _ => match position.legal_moves().first() {
                Some(mv) => *mv,
                None => return (String::new(), None),
            },
        };
        let text = position.format_move(mv, notation);

        let ponder = if lock(&self.script).ponder_move {
            let mut after = position.clone();
            after
                .play(mv)
                .ok()
                .and_then(|_| after.legal_moves().first().map(|r| after.format_move(*r, notation)))
        } else {
            None
        };
        (text, ponder)
    }

    fn take_search(&self, serial: u64) -> Option<ActiveSearch> {
        let mut search = lock(&self.search);
        if search.as_ref().is_some_and(|s| s.serial == serial) {
            search.take()
        } else {
            None
        }
    }

    async fn emit_best_move(&self, generation: u64, setup: &PositionSetup, reply: &MockReply) {
        let (mv, ponder) = self.answer(setup, reply);
        let info = SearchInfo {
            depth: Some(1),
            score: Some(Score::Centipawns(0)),
            pv: if mv.is_empty() { Vec::new() } else { vec![mv.clone()] },
            ..Default::default()
        };
        self.emit(generation, EngineEventKind::Info(info)).await;
        self.emit(generation, EngineEventKind::BestMove { mv, ponder })
            .await;
    }
}

/// In-memory engine following a [`MockScript`].
#[derive(Clone)]
pub struct ScriptedEngine {
    inner: Arc<Inner>,
}

impl ScriptedEngine {
    pub fn new(identifier: impl Into<String>, config: EngineConfig, script: MockScript) -> Self {
        Self {
            inner: Arc::new(Inner {
                identifier: identifier.into(),
                config,
                generation: AtomicU64::new(0),
                serial: AtomicU64::new(0),
                shut_down: AtomicBool::new(false),
                sink: Mutex::new(None),
                script: Mutex::new(script),
                calls: Mutex::new(Vec::new()),
                search: Mutex::new(None),
            }),
        }
    }

    /// All calls made so far, in order.
    pub fn calls(&self) -> Vec<MockCall> {
        lock(&self.inner.calls).clone()
    }

    pub fn count_calls(&self, predicate: impl Fn(&MockCall) -> bool) -> usize {
        lock(&self.inner.calls).iter().filter(|c| predicate(c)).count()
    }

    pub fn is_searching(&self) -> bool {
        lock(&self.inner.search).is_some()
    }

    pub fn is_shut_down(&self) -> bool {
        self.inner.shut_down.load(Ordering::SeqCst)
    }

    /// Replace the remaining script.
    pub fn set_script(&self, script: MockScript) {
        *lock(&self.inner.script) = script;
    }

    fn begin(&self, setup: &PositionSetup, reply: MockReply, analyze: bool, pondering: bool) {
        let serial = self.inner.serial.fetch_add(1, Ordering::SeqCst) + 1;
        *lock(&self.inner.search) = Some(ActiveSearch {
            serial,
            setup: setup.clone(),
            reply,
            analyze,
            pondering,
        });
    }

    /// Schedule the answer of the current search.
    fn schedule(&self) {
        let Some(search) = lock(&self.inner.search).clone() else {
            return;
        };
        if search.analyze || search.pondering {
            return;
        }

        let inner = self.inner.clone();
        let generation = inner.generation.load(Ordering::SeqCst);
        let think_time = lock(&inner.script).think_time;

        tokio::spawn(async move {
            match search.reply {
                MockReply::Hang => {}
                MockReply::Disconnect => {
                    tokio::time::sleep(think_time).await;
                    if inner.take_search(search.serial).is_some() {
                        inner.emit(generation, EngineEventKind::Disconnect).await;
                    }
                }
                MockReply::Resign => {
                    tokio::time::sleep(think_time).await;
                    if inner.take_search(search.serial).is_some() {
                        inner.emit(generation, EngineEventKind::Resign).await;
                    }
                }
                MockReply::Stall(delay) => {
                    tokio::time::sleep(delay).await;
                    inner.take_search(search.serial);
                    inner
                        .emit_best_move(generation, &search.setup, &MockReply::FirstLegal)
                        .await;
                }
                ref reply => {
                    tokio::time::sleep(think_time).await;
                    if inner.generation.load(Ordering::SeqCst) != generation {
                        return;
                    }
                    if inner.take_search(search.serial).is_some() {
                        inner.emit_best_move(generation, &search.setup, reply).await;
                    }
                }
            }
        });
    }

    /// Answer the running search right away. Returns false if it cannot.
    async fn answer_now(&self) -> bool {
        let Some(search) = lock(&self.inner.search).clone() else {
            return true;
        };
        if search.unresponsive() {
            return false;
        }
        if self.inner.take_search(search.serial).is_none() {
            return true;
        }
        if search.analyze && !self.inner.config.protocol.analysis_yields_move() {
            return true;
        }
        let generation = self.inner.generation.load(Ordering::SeqCst);
        let reply = match search.reply {
            MockReply::Move(text) => MockReply::Move(text),
            _ => MockReply::FirstLegal,
        };
        self.inner
            .emit_best_move(generation, &search.setup, &reply)
            .await;
        true
    }
}

#[async_trait]
impl EngineWorker for ScriptedEngine {
    fn identifier(&self) -> &str {
        &self.inner.identifier
    }

    fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    fn generation(&self) -> u64 {
        self.inner.generation.load(Ordering::SeqCst)
    }

    fn set_event_sink(&self, sink: EventSink) {
        *lock(&self.inner.sink) = Some(sink);
    }

    async fn new_game(
        &self,
        _setup: &PositionSetup,
        engine_is_white: bool,
    ) -> Result<(), EngineError> {
        self.inner.record(MockCall::NewGame { engine_is_white });
        Ok(())
    }

    async fn compute_move(
        &self,
        setup: &PositionSetup,
        limits: &GoLimits,
        analyze: bool,
    ) -> Result<(), EngineError> {
        if self.is_shut_down() {
            return Err(EngineError::NotRunning);
        }
        let analyze = analyze || limits.infinite;
        self.inner.record(MockCall::Compute {
            moves: setup.moves.clone(),
            analyze,
        });

        let reply = lock(&self.inner.script).next_reply();
        self.begin(setup, reply, analyze, false);
        if analyze {
            let (mv, _) = self.inner.answer(setup, &MockReply::FirstLegal);
            let info = SearchInfo {
                depth: Some(1),
                pv: vec![mv],
                ..Default::default()
            };
            self.inner
                .emit(self.generation(), EngineEventKind::Info(info))
                .await;
        }
        self.schedule();
        Ok(())
    }

    async fn ponder(&self, setup: &PositionSetup, _limits: &GoLimits) -> Result<(), EngineError> {
        if !self.inner.config.protocol.supports_ponder() {
            return Err(EngineError::Unsupported(self.inner.config.protocol.as_str()));
        }
        self.inner.record(MockCall::Ponder {
            moves: setup.moves.clone(),
        });
        self.begin(setup, MockReply::FirstLegal, false, true);
        Ok(())
    }

    async fn ponder_hit(&self) -> Result<(), EngineError> {
        self.inner.record(MockCall::PonderHit);
        let reply = lock(&self.inner.script).next_reply();
        {
            let mut search = lock(&self.inner.search);
            match search.as_mut() {
                Some(active) if active.pondering => {
                    active.pondering = false;
                    active.reply = reply;
                }
                _ => return Ok(()),
            }
        }
        self.schedule();
        Ok(())
    }

    async fn move_now(&self, _force: bool) -> Result<(), EngineError> {
        self.inner.record(MockCall::MoveNow);
        self.answer_now().await;
        Ok(())
    }

    async fn stop(&self, timeout: Duration) -> bool {
        self.inner.record(MockCall::Stop);
        if self.answer_now().await {
            return true;
        }
        tokio::time::sleep(timeout).await;
        false
    }

    async fn request_ready(&self, timeout: Duration) -> bool {
        self.inner.record(MockCall::Ready);
        if !lock(&self.inner.script).ready || self.is_shut_down() {
            tokio::time::sleep(timeout).await;
            return false;
        }
        self.inner
            .emit(self.generation(), EngineEventKind::ReadyAck)
            .await;
        true
    }

    async fn restart(&self) -> Result<(), EngineError> {
        self.inner.record(MockCall::Restart);
        self.inner.generation.fetch_add(1, Ordering::SeqCst);
        lock(&self.inner.search).take();
        self.inner.shut_down.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn shutdown(&self) {
        self.inner.record(MockCall::Shutdown);
        lock(&self.inner.search).take();
        self.inner.shut_down.store(true, Ordering::SeqCst);
    }
}

/// Creates [`ScriptedEngine`]s, scripted per engine name.
#[derive(Default)]
pub struct MockEngineFactory {
    default_script: MockScript,
    scripts: Mutex<HashMap<String, MockScript>>,
    created: Mutex<Vec<ScriptedEngine>>,
}

impl MockEngineFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_default_script(script: MockScript) -> Self {
        Self {
            default_script: script,
            ..Default::default()
        }
    }

    /// Script used for engines created from a config with this name.
    pub fn set_script(&self, engine_name: impl Into<String>, script: MockScript) {
        lock(&self.scripts).insert(engine_name.into(), script);
    }

    /// Every engine created so far.
    pub fn engines(&self) -> Vec<ScriptedEngine> {
        lock(&self.created).clone()
    }

    pub fn created_count(&self) -> usize {
        lock(&self.created).len()
    }
}

#[async_trait]
impl EngineFactory for MockEngineFactory {
    async fn create(
        &self,
        config: &EngineConfig,
        identifier: String,
    ) -> Result<Arc<dyn EngineWorker>, EngineError> {
        let script = lock(&self.scripts)
            .get(&config.name)
            .cloned()
            .unwrap_or_else(|| self.default_script.clone());
        let engine = ScriptedEngine::new(identifier, config.clone(), script);
        lock(&self.created).push(engine.clone());
        Ok(Arc::new(engine))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    fn start_setup() -> PositionSetup {
        PositionSetup {
            start_fen: chess::STARTING_FEN.to_string(),
            moves: Vec::new(),
        }
    }

    #[tokio::test]
    async fn test_first_legal_reply() {
        let engine = ScriptedEngine::new("m#1", EngineConfig::new("m", "mock"), MockScript::default());
        let (tx, mut rx) = mpsc::channel(8);
        engine.set_event_sink(tx);

        engine
            .compute_move(&start_setup(), &GoLimits::default(), false)
            .await
            .unwrap();
        assert!(matches!(rx.recv().await.unwrap().kind, EngineEventKind::Info(_)));
        let best = rx.recv().await.unwrap();
        let EngineEventKind::BestMove { mv, .. } = best.kind else {
            panic!("expected best move");
        };
        assert!(Position::new().resolve_move(&mv).mv.is_some());
        assert!(!engine.is_searching());
    }

    #[tokio::test]
    async fn test_hang_does_not_ack_stop() {
        let engine = ScriptedEngine::new(
            "m#2",
            EngineConfig::new("m", "mock"),
            MockScript::default().then(MockReply::Hang),
        );
        engine
            .compute_move(&start_setup(), &GoLimits::default(), false)
            .await
            .unwrap();
        assert!(!engine.stop(Duration::from_millis(10)).await);

        engine.restart().await.unwrap();
        assert_eq!(engine.generation(), 1);
        assert!(!engine.is_searching());
        assert!(engine.stop(Duration::from_millis(10)).await);
    }

    #[tokio::test]
    async fn test_factory_uses_named_script() {
        let factory = MockEngineFactory::new();
        factory.set_script("hung", MockScript::default().unresponsive());
        let engine = factory
            .create(&EngineConfig::new("hung", "mock"), "hung#1".to_string())
            .await
            .unwrap();
        assert!(!engine.request_ready(Duration::from_millis(5)).await);
        assert_eq!(factory.created_count(), 1);
    }
}
