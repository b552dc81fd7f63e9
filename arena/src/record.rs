use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};

use chess::{GameEndCause, GameResult, Side, STARTING_FEN};
use engine::Score;
use serde::{Deserialize, Serialize};

use crate::time_control::TimeControl;

/// One ply as played.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MoveRecord {
    pub lan: String,
    pub san: String,
    pub elapsed_ms: u64,
    pub depth: Option<u32>,
    pub score: Option<Score>,
    /// Principal variation in LAN, starting with this move.
    pub pv: Vec<String>,
    pub ponder_move: Option<String>,
    pub comment: Option<String>,
}

/// The moves of one game and everything known about how it ended.
///
/// Moves past `next_move_index` are kept for navigation until the next
/// [`GameRecord::add_move`] truncates them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GameRecord {
    pub start_fen: String,
    moves: Vec<MoveRecord>,
    next_move_index: usize,
    pub tags: BTreeMap<String, String>,
    pub end_cause: GameEndCause,
    pub result: GameResult,
    pub white_tc: TimeControl,
    pub black_tc: TimeControl,
    pub white_name: String,
    pub black_name: String,
    pub round: u32,
}

impl Default for GameRecord {
    fn default() -> Self {
        Self::new(STARTING_FEN)
    }
}

impl GameRecord {
    pub fn new(start_fen: &str) -> Self {
        Self {
            start_fen: start_fen.trim().to_string(),
            moves: Vec::new(),
            next_move_index: 0,
            tags: BTreeMap::new(),
            end_cause: GameEndCause::Ongoing,
            result: GameResult::Unterminated,
            white_tc: TimeControl::default(),
            black_tc: TimeControl::default(),
            white_name: String::new(),
            black_name: String::new(),
            round: 0,
        }
    }

    pub fn with_time_control(mut self, tc: TimeControl) -> Self {
        self.white_tc = tc.clone();
        self.black_tc = tc;
        self
    }

    /// Every stored move, including those past the write pointer.
    pub fn moves(&self) -> &[MoveRecord] {
        &self.moves
    }

    /// Moves up to the write pointer.
    pub fn played_moves(&self) -> &[MoveRecord] {
        &self.moves[..self.next_move_index]
    }

    pub fn next_move_index(&self) -> usize {
        self.next_move_index
    }

    /// Move the write pointer, clamped to the number of stored moves.
    pub fn set_next_move_index(&mut self, index: usize) {
        self.next_move_index = index.min(self.moves.len());
    }

    /// Append at the write pointer. Later moves are dropped and the game is
    /// ongoing again.
    pub fn add_move(&mut self, mv: MoveRecord) {
        self.moves.truncate(self.next_move_index);
        self.moves.push(mv);
        self.next_move_index = self.moves.len();
        self.end_cause = GameEndCause::Ongoing;
        self.result = GameResult::Unterminated;
    }

    pub fn last_move(&self) -> Option<&MoveRecord> {
        self.played_moves().last()
    }

    pub fn set_game_end(&mut self, cause: GameEndCause, result: GameResult) {
        self.end_cause = cause;
        self.result = result;
    }

    pub fn is_finished(&self) -> bool {
        self.result.is_terminal()
    }

    pub fn half_moves_played(&self) -> usize {
        self.next_move_index
    }

    pub fn white_starts(&self) -> bool {
        self.start_fen.split_whitespace().nth(1) != Some("b")
    }

    pub fn white_to_move(&self) -> bool {
        self.white_starts() == (self.next_move_index % 2 == 0)
    }

    pub fn side_to_move(&self) -> Side {
        Side::from_is_white(self.white_to_move())
    }

    /// Milliseconds `side` spent on its moves up to the write pointer.
    pub fn time_used_ms(&self, side: Side) -> u64 {
        let first = if self.white_starts() == side.is_white() { 0 } else { 1 };
        self.played_moves()
            .iter()
            .skip(first)
            .step_by(2)
            .map(|m| m.elapsed_ms)
            .sum()
    }

    pub fn lan_moves(&self) -> Vec<String> {
        self.played_moves().iter().map(|m| m.lan.clone()).collect()
    }

    pub fn san_moves(&self) -> Vec<String> {
        self.played_moves().iter().map(|m| m.san.clone()).collect()
    }

    pub fn set_tag(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.tags.insert(name.into(), value.into());
    }

    pub fn tag(&self, name: &str) -> Option<&str> {
        self.tags.get(name).map(String::as_str)
    }

    pub fn name_of(&self, side: Side) -> &str {
        match side {
            Side::White => &self.white_name,
            Side::Black => &self.black_name,
        }
    }
}

/// The game record shared between its writer and concurrent readers.
///
/// Access is scoped: callbacks run under the lock and must stay short.
#[derive(Debug, Clone, Default)]
pub struct SharedRecord {
    inner: Arc<Mutex<GameRecord>>,
}

impl SharedRecord {
    pub fn new(record: GameRecord) -> Self {
        Self {
            inner: Arc::new(Mutex::new(record)),
        }
    }

    fn lock(&self) -> MutexGuard<'_, GameRecord> {
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Run `f` with read access to the record.
    pub fn read<R>(&self, f: impl FnOnce(&GameRecord) -> R) -> R {
        f(&self.lock())
    }

    pub(crate) fn write<R>(&self, f: impl FnOnce(&mut GameRecord) -> R) -> R {
        f(&mut self.lock())
    }

    /// Clone of the current record.
    pub fn snapshot(&self) -> GameRecord {
        self.lock().clone()
    }

    pub(crate) fn replace(&self, record: GameRecord) {
        *self.lock() = record;
    }
}
