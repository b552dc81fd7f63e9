use std::process::Stdio;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::{
    EngineConfig, EngineError, EngineEvent, EngineEventKind, EngineFactory, EngineProtocol,
    EngineWorker, EventSink, GoLimits, PositionSetup, ProtocolLine,
};

/// How long an engine may take to answer `uci` / `protover 2`.
pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);
const QUIT_TIMEOUT: Duration = Duration::from_secs(1);

/// State shared between the handle and its I/O tasks.
struct Shared {
    identifier: String,
    protocol: EngineProtocol,
    generation: AtomicU64,
    /// Set while the process is being killed on purpose, so EOF is not a disconnect.
    expecting_exit: AtomicBool,
    sink: Mutex<Option<EventSink>>,
    searching: watch::Sender<bool>,
    analyzing: AtomicBool,
    ready_acks: watch::Sender<u64>,
    ready_token: AtomicU32,
}

impl Shared {
    fn is_current(&self, generation: u64) -> bool {
        self.generation.load(Ordering::SeqCst) == generation
    }

    fn sink(&self) -> Option<EventSink> {
        self.sink
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    async fn emit(&self, generation: u64, kind: EngineEventKind) {
        let Some(sink) = self.sink() else {
            tracing::trace!(engine = %self.identifier, "No event sink, dropping {:?}", kind);
            return;
        };
        if sink
            .send(EngineEvent::new(&self.identifier, generation, kind))
            .await
            .is_err()
        {
            tracing::debug!(engine = %self.identifier, "Event sink closed");
        }
    }

    /// Queue an event only if there is room; used for output that may be lost.
    fn try_emit(&self, generation: u64, kind: EngineEventKind) {
        let Some(sink) = self.sink() else {
            return;
        };
        if let Err(mpsc::error::TrySendError::Full(event)) =
            sink.try_send(EngineEvent::new(&self.identifier, generation, kind))
        {
            tracing::trace!(engine = %self.identifier, "Event queue full, dropping {:?}", event.kind);
        }
    }

    fn set_searching(&self, searching: bool, analyzing: bool) {
        self.analyzing.store(analyzing, Ordering::SeqCst);
        self.searching.send_replace(searching);
    }
}

struct Running {
    child: Child,
    stdin_tx: mpsc::Sender<String>,
    reader: JoinHandle<()>,
    writer: JoinHandle<()>,
}

impl Running {
    async fn kill(mut self) {
        self.reader.abort();
        self.writer.abort();
        if let Err(e) = self.child.kill().await {
            tracing::debug!("Failed to kill engine process: {}", e);
        }
    }

    async fn quit(mut self, quit_command: &str) {
        let _ = self.stdin_tx.send(quit_command.to_string()).await;
        drop(self.stdin_tx);
        let _ = tokio::time::timeout(QUIT_TIMEOUT, self.child.wait()).await;
        let _ = self.child.kill().await;
        self.reader.abort();
        self.writer.abort();
    }
}

/// An engine running as a child process, spoken to over stdin/stdout.
pub struct ProcessEngine {
    config: EngineConfig,
    shared: Arc<Shared>,
    running: tokio::sync::Mutex<Option<Running>>,
    handshake_timeout: Duration,
}

impl ProcessEngine {
    pub async fn spawn(config: EngineConfig, identifier: String) -> Result<Self, EngineError> {
        Self::spawn_with_timeout(config, identifier, DEFAULT_HANDSHAKE_TIMEOUT).await
    }

    /// Spawn the process and complete the protocol handshake.
    #[tracing::instrument(level = "info", skip(config), fields(command = %config.command))]
    pub async fn spawn_with_timeout(
        config: EngineConfig,
        identifier: String,
        handshake_timeout: Duration,
    ) -> Result<Self, EngineError> {
        let (searching, _) = watch::channel(false);
        let (ready_acks, _) = watch::channel(0);
        let shared = Arc::new(Shared {
            identifier,
            protocol: config.protocol,
            generation: AtomicU64::new(0),
            expecting_exit: AtomicBool::new(false),
            sink: Mutex::new(None),
            searching,
            analyzing: AtomicBool::new(false),
            ready_acks,
            ready_token: AtomicU32::new(0),
        });

        let engine = Self {
            config,
            shared,
            running: tokio::sync::Mutex::new(None),
            handshake_timeout,
        };
        let running = engine.start_process().await?;
        *engine.running.lock().await = Some(running);

        tracing::info!(
            "Engine {} ({}) spawned and initialized",
            engine.config.name,
            engine.config.protocol
        );
        Ok(engine)
    }

    async fn start_process(&self) -> Result<Running, EngineError> {
        let config = &self.config;
        let protocol = config.protocol;
        let generation = self.shared.generation.load(Ordering::SeqCst);

        let mut command = Command::new(&config.command);
        command
            .args(&config.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true);
        if let Some(dir) = &config.working_dir {
            command.current_dir(dir);
        }

        let mut child = command.spawn().map_err(|source| {
            tracing::error!("Failed to spawn {}: {}", config.command, source);
            EngineError::Spawn {
                command: config.command.clone(),
                source,
            }
        })?;
        let mut stdin = child.stdin.take().ok_or(EngineError::NoStdin)?;
        let stdout = child.stdout.take().ok_or(EngineError::NoStdout)?;
        let mut lines = BufReader::new(stdout).lines();

        let handshake = tokio::time::timeout(
            self.handshake_timeout,
            handshake(&self.shared, &mut stdin, &mut lines),
        )
        .await;
        let handshake = match handshake {
            Ok(result) => result,
            Err(_) => Err(EngineError::HandshakeTimeout(self.handshake_timeout)),
        };
        if let Err(e) = handshake {
            tracing::error!(engine = %self.shared.identifier, "Engine initialization failed: {}", e);
            let _ = child.kill().await;
            return Err(e);
        }

        for option in protocol.option_commands(config) {
            tracing::debug!(engine = %self.shared.identifier, "Setting option: {}", option);
            write_line(&mut stdin, &option).await?;
        }

        let (stdin_tx, mut stdin_rx) = mpsc::channel::<String>(64);
        let writer_id = self.shared.identifier.clone();
        let writer = tokio::spawn(async move {
            while let Some(cmd) = stdin_rx.recv().await {
                if let Err(e) = write_line(&mut stdin, &cmd).await {
                    tracing::error!(engine = %writer_id, "Failed to write to stdin: {}", e);
                    break;
                }
            }
            tracing::debug!(engine = %writer_id, "Stdin writer task exiting");
        });

        let reader = tokio::spawn(read_loop(self.shared.clone(), generation, lines));

        Ok(Running {
            child,
            stdin_tx,
            reader,
            writer,
        })
    }

    async fn send(&self, commands: Vec<String>) -> Result<(), EngineError> {
        let guard = self.running.lock().await;
        let running = guard.as_ref().ok_or(EngineError::NotRunning)?;
        for cmd in commands {
            running
                .stdin_tx
                .send(cmd)
                .await
                .map_err(|_| EngineError::NotRunning)?;
        }
        Ok(())
    }

    /// Start a search and mark the engine busy until its best move arrives.
    async fn start_search(&self, commands: Vec<String>, analyzing: bool) -> Result<(), EngineError> {
        self.shared.set_searching(true, analyzing);
        if let Err(e) = self.send(commands).await {
            self.shared.set_searching(false, false);
            return Err(e);
        }
        Ok(())
    }
}

async fn write_line(stdin: &mut ChildStdin, cmd: &str) -> std::io::Result<()> {
    tracing::trace!(">> {}", cmd);
    stdin.write_all(cmd.as_bytes()).await?;
    stdin.write_all(b"\n").await?;
    stdin.flush().await
}

async fn handshake(
    shared: &Shared,
    stdin: &mut ChildStdin,
    lines: &mut Lines<BufReader<ChildStdout>>,
) -> Result<(), EngineError> {
    let protocol = shared.protocol;
    for cmd in protocol.handshake_commands() {
        write_line(stdin, &cmd).await?;
    }

    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        tracing::trace!(engine = %shared.identifier, "<< {}", line);
        for reply in protocol.handshake_replies(line) {
            write_line(stdin, &reply).await?;
        }
        match protocol.parse_line(line) {
            ProtocolLine::HandshakeDone => {
                tracing::debug!(engine = %shared.identifier, "Handshake complete");
                return Ok(());
            }
            ProtocolLine::Id { name, value } => {
                tracing::debug!(engine = %shared.identifier, "id {} {}", name, value);
            }
            _ => {}
        }
    }
    Err(EngineError::HandshakeClosed)
}

async fn read_loop(shared: Arc<Shared>, generation: u64, mut lines: Lines<BufReader<ChildStdout>>) {
    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => {
                tracing::debug!(engine = %shared.identifier, "Engine stdout EOF");
                break;
            }
            Err(e) => {
                tracing::error!(engine = %shared.identifier, "Error reading engine stdout: {}", e);
                break;
            }
        };

        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        tracing::trace!(engine = %shared.identifier, "<< {}", trimmed);

        match shared.protocol.parse_line(trimmed) {
            ProtocolLine::BestMove { mv, ponder } => {
                tracing::debug!(engine = %shared.identifier, "Received best move {:?}", mv);
                // Cleared before queueing: the consumer may be the one waiting in stop().
                if shared.is_current(generation) {
                    shared.set_searching(false, false);
                }
                shared
                    .emit(generation, EngineEventKind::BestMove { mv, ponder })
                    .await;
            }
            ProtocolLine::Resign => {
                tracing::info!(engine = %shared.identifier, "Engine resigned");
                if shared.is_current(generation) {
                    shared.set_searching(false, false);
                }
                shared.emit(generation, EngineEventKind::Resign).await;
            }
            ProtocolLine::Info(info) => {
                shared.try_emit(generation, EngineEventKind::Info(info));
            }
            ProtocolLine::ReadyOk => {
                if shared.is_current(generation) {
                    shared.ready_acks.send_modify(|n| *n += 1);
                }
                shared.emit(generation, EngineEventKind::ReadyAck).await;
            }
            ProtocolLine::Complaint(text) => {
                tracing::warn!(engine = %shared.identifier, "Engine complained: {}", text);
            }
            ProtocolLine::Features(_) | ProtocolLine::HandshakeDone | ProtocolLine::Id { .. } => {}
            ProtocolLine::Ignored => {
                tracing::trace!(engine = %shared.identifier, "Ignoring line: {}", trimmed);
            }
        }
    }

    if shared.is_current(generation) && !shared.expecting_exit.load(Ordering::SeqCst) {
        tracing::warn!(engine = %shared.identifier, "Engine process exited unexpectedly");
        shared.set_searching(false, false);
        shared.emit(generation, EngineEventKind::Disconnect).await;
    }
}

#[async_trait]
impl EngineWorker for ProcessEngine {
    fn identifier(&self) -> &str {
        &self.shared.identifier
    }

    fn config(&self) -> &EngineConfig {
        &self.config
    }

    fn generation(&self) -> u64 {
        self.shared.generation.load(Ordering::SeqCst)
    }

    fn set_event_sink(&self, sink: EventSink) {
        *self
            .shared
            .sink
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(sink);
    }

    async fn new_game(
        &self,
        setup: &PositionSetup,
        engine_is_white: bool,
    ) -> Result<(), EngineError> {
        tracing::debug!(
            engine = %self.shared.identifier,
            "New game, engine plays {}",
            if engine_is_white { "white" } else { "black" }
        );
        self.send(self.config.protocol.new_game_commands(setup)).await
    }

    async fn compute_move(
        &self,
        setup: &PositionSetup,
        limits: &GoLimits,
        analyze: bool,
    ) -> Result<(), EngineError> {
        let commands =
            self.config
                .protocol
                .search_commands(setup, limits, setup.white_to_move(), analyze);
        self.start_search(commands, analyze || limits.infinite).await
    }

    async fn ponder(&self, setup: &PositionSetup, limits: &GoLimits) -> Result<(), EngineError> {
        let protocol = self.config.protocol;
        let commands = protocol
            .ponder_commands(setup, limits)
            .ok_or(EngineError::Unsupported(protocol.as_str()))?;
        self.start_search(commands, false).await
    }

    async fn ponder_hit(&self) -> Result<(), EngineError> {
        let protocol = self.config.protocol;
        let command = protocol
            .ponder_hit_command()
            .ok_or(EngineError::Unsupported(protocol.as_str()))?;
        self.send(vec![command.to_string()]).await
    }

    async fn move_now(&self, force: bool) -> Result<(), EngineError> {
        let searching = *self.shared.searching.borrow();
        if !searching && !force {
            return Ok(());
        }
        let analyzing = self.shared.analyzing.load(Ordering::SeqCst);
        let command = self.config.protocol.move_now_command(analyzing);
        self.send(vec![command.to_string()]).await
    }

    async fn stop(&self, timeout: Duration) -> bool {
        let searching = *self.shared.searching.borrow();
        if !searching {
            return true;
        }

        let protocol = self.config.protocol;
        let analyzing = self.shared.analyzing.load(Ordering::SeqCst);
        let mut rx = self.shared.searching.subscribe();
        if self
            .send(vec![protocol.move_now_command(analyzing).to_string()])
            .await
            .is_err()
        {
            return false;
        }
        if analyzing && !protocol.analysis_yields_move() {
            self.shared.set_searching(false, false);
            return true;
        }

        let stopped = tokio::time::timeout(timeout, rx.wait_for(|searching| !*searching)).await;
        match stopped {
            Ok(Ok(_)) => true,
            _ => {
                tracing::warn!(engine = %self.shared.identifier, "Engine did not acknowledge stop within {:?}", timeout);
                false
            }
        }
    }

    async fn request_ready(&self, timeout: Duration) -> bool {
        let mut rx = self.shared.ready_acks.subscribe();
        let start = *rx.borrow_and_update();
        let token = self.shared.ready_token.fetch_add(1, Ordering::SeqCst) + 1;
        if self
            .send(vec![self.config.protocol.ready_command(token)])
            .await
            .is_err()
        {
            return false;
        }

        let acked = tokio::time::timeout(timeout, rx.wait_for(|acks| *acks > start)).await;
        match acked {
            Ok(Ok(_)) => true,
            _ => {
                tracing::warn!(engine = %self.shared.identifier, "No ready acknowledgement within {:?}", timeout);
                false
            }
        }
    }

    async fn restart(&self) -> Result<(), EngineError> {
        let mut guard = self.running.lock().await;
        self.shared.expecting_exit.store(true, Ordering::SeqCst);
        let generation = self.shared.generation.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some(old) = guard.take() {
            old.kill().await;
        }
        self.shared.set_searching(false, false);

        let result = self.start_process().await;
        self.shared.expecting_exit.store(false, Ordering::SeqCst);
        *guard = Some(result?);
        tracing::info!(engine = %self.shared.identifier, "Engine restarted, generation {}", generation);
        Ok(())
    }

    async fn shutdown(&self) {
        self.shared.expecting_exit.store(true, Ordering::SeqCst);
        let running = self.running.lock().await.take();
        if let Some(running) = running {
            tracing::info!(engine = %self.shared.identifier, "Shutting down engine");
            running.quit(self.config.protocol.quit_command()).await;
        }
        self.shared.set_searching(false, false);
    }
}

/// Spawns real engine processes.
#[derive(Debug, Clone)]
pub struct ProcessEngineFactory {
    handshake_timeout: Duration,
}

impl ProcessEngineFactory {
    pub fn new(handshake_timeout: Duration) -> Self {
        Self { handshake_timeout }
    }
}

impl Default for ProcessEngineFactory {
    fn default() -> Self {
        Self::new(DEFAULT_HANDSHAKE_TIMEOUT)
    }
}

#[async_trait]
impl EngineFactory for ProcessEngineFactory {
    async fn create(
        &self,
        config: &EngineConfig,
        identifier: String,
    ) -> Result<Arc<dyn EngineWorker>, EngineError> {
        let engine =
            ProcessEngine::spawn_with_timeout(config.clone(), identifier, self.handshake_timeout)
                .await?;
        Ok(Arc::new(engine))
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    const FAKE_UCI: &str = r#"
while read line; do
  case "$line" in
    uci) echo "id name Fake"; echo "uciok" ;;
    isready) echo "readyok" ;;
    go*) echo "info depth 1 score cp 12 pv e2e4"; echo "bestmove e2e4" ;;
    crash) exit 3 ;;
    quit) exit 0 ;;
  esac
done
"#;

    fn fake_config() -> EngineConfig {
        let mut config = EngineConfig::new("fake", "sh");
        config.args = vec!["-c".to_string(), FAKE_UCI.to_string()];
        config
    }

    async fn next_event(rx: &mut mpsc::Receiver<EngineEvent>) -> EngineEvent {
        tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("timed out waiting for event")
            .expect("sink closed")
    }

    #[tokio::test]
    async fn test_search_round_trip() {
        let engine = ProcessEngine::spawn(fake_config(), "fake#1".to_string())
            .await
            .unwrap();
        let (tx, mut rx) = mpsc::channel(16);
        engine.set_event_sink(tx);

        assert!(engine.request_ready(Duration::from_secs(5)).await);
        assert!(matches!(next_event(&mut rx).await.kind, EngineEventKind::ReadyAck));

        let setup = PositionSetup {
            start_fen: chess::STARTING_FEN.to_string(),
            moves: Vec::new(),
        };
        engine
            .compute_move(&setup, &GoLimits::default(), false)
            .await
            .unwrap();

        let info = next_event(&mut rx).await;
        assert!(matches!(info.kind, EngineEventKind::Info(_)));
        let best = next_event(&mut rx).await;
        assert_eq!(best.identifier, "fake#1");
        assert_eq!(best.generation, 0);
        assert!(matches!(best.kind, EngineEventKind::BestMove { ref mv, .. } if mv == "e2e4"));

        engine.shutdown().await;
    }

    #[tokio::test]
    async fn test_restart_bumps_generation() {
        let engine = ProcessEngine::spawn(fake_config(), "fake#2".to_string())
            .await
            .unwrap();
        let (tx, mut rx) = mpsc::channel(16);
        engine.set_event_sink(tx);

        engine.restart().await.unwrap();
        assert_eq!(engine.generation(), 1);
        assert!(engine.request_ready(Duration::from_secs(5)).await);
        let ack = next_event(&mut rx).await;
        assert_eq!(ack.generation, 1);

        engine.shutdown().await;
    }

    #[tokio::test]
    async fn test_unexpected_exit_emits_disconnect() {
        let engine = ProcessEngine::spawn(fake_config(), "fake#3".to_string())
            .await
            .unwrap();
        let (tx, mut rx) = mpsc::channel(16);
        engine.set_event_sink(tx);

        engine.send(vec!["crash".to_string()]).await.unwrap();
        let event = next_event(&mut rx).await;
        assert!(matches!(event.kind, EngineEventKind::Disconnect));
    }

    const CHATTY_UCI: &str = r#"
while read line; do
  case "$line" in
    uci) echo "uciok" ;;
    isready) echo "readyok" ;;
    go*) for depth in 1 2 3 4 5 6 7 8; do echo "info depth $depth pv e2e4"; done ;;
    stop) echo "bestmove e2e4" ;;
    quit) exit 0 ;;
  esac
done
"#;

    #[tokio::test]
    async fn test_stop_acknowledged_while_event_queue_is_full() {
        let mut config = EngineConfig::new("chatty", "sh");
        config.args = vec!["-c".to_string(), CHATTY_UCI.to_string()];
        let engine = ProcessEngine::spawn(config, "chatty#1".to_string())
            .await
            .unwrap();
        let (tx, mut rx) = mpsc::channel(2);
        engine.set_event_sink(tx);

        let setup = PositionSetup {
            start_fen: chess::STARTING_FEN.to_string(),
            moves: Vec::new(),
        };
        engine
            .compute_move(&setup, &GoLimits::default(), false)
            .await
            .unwrap();
        // Nobody drains the queue while the engine floods it with info.
        tokio::time::sleep(Duration::from_millis(200)).await;

        assert!(engine.stop(Duration::from_secs(5)).await);

        let mut best = None;
        while best.is_none() {
            if let EngineEventKind::BestMove { mv, .. } = next_event(&mut rx).await.kind {
                best = Some(mv);
            }
        }
        assert_eq!(best.as_deref(), Some("e2e4"));

        engine.shutdown().await;
    }

    #[tokio::test]
    async fn test_spawn_failure() {
        let config = EngineConfig::new("missing", "/nonexistent/engine-binary");
        let result = ProcessEngine::spawn(config, "missing#1".to_string()).await;
        assert!(matches!(result, Err(EngineError::Spawn { .. })));
    }
}
