use std::sync::Arc;

use chess::{GameEndCause, GameResult, Side};
use engine::{EngineEvent, EngineWorker};

use crate::config::ManagerSettings;
use crate::error::ArenaError;
use crate::player::PlayerContext;
use crate::record::{GameRecord, MoveRecord, SharedRecord};

/// The players of one game and the record they share.
///
/// Holds either one engine playing both sides or two engines, one per side.
/// With `switched` the second engine plays white.
pub struct GameContext {
    players: Vec<PlayerContext>,
    switched: bool,
    record: SharedRecord,
    settings: ManagerSettings,
}

impl GameContext {
    pub fn new(record: SharedRecord, settings: ManagerSettings) -> Self {
        Self {
            players: Vec::new(),
            switched: false,
            record,
            settings,
        }
    }

    pub fn init_players(&mut self, engines: Vec<Arc<dyn EngineWorker>>) -> Result<(), ArenaError> {
        if engines.is_empty() || engines.len() > 2 {
            return Err(ArenaError::EngineCount(engines.len()));
        }
        self.players = engines
            .into_iter()
            .map(|engine| {
                let mut player = PlayerContext::new(self.record.clone(), self.settings.clone());
                player.set_engine(engine);
                player
            })
            .collect();
        self.assign_sides();
        Ok(())
    }

    pub fn set_switched(&mut self, switched: bool) {
        self.switched = switched;
        self.assign_sides();
    }

    pub fn is_switched(&self) -> bool {
        self.switched
    }

    fn assign_sides(&mut self) {
        if self.is_unique() {
            for player in &mut self.players {
                player.set_side(None);
            }
            return;
        }
        let white = self.white_index();
        for (i, player) in self.players.iter_mut().enumerate() {
            player.set_side(Some(if i == white { Side::White } else { Side::Black }));
        }
    }

    /// One engine playing both sides.
    pub fn is_unique(&self) -> bool {
        self.players.len() == 1
    }

    pub fn has_players(&self) -> bool {
        !self.players.is_empty()
    }

    fn white_index(&self) -> usize {
        usize::from(self.players.len() == 2 && self.switched)
    }

    fn black_index(&self) -> usize {
        usize::from(self.players.len() == 2 && !self.switched)
    }

    pub fn index_of(&self, side: Side) -> usize {
        match side {
            Side::White => self.white_index(),
            Side::Black => self.black_index(),
        }
    }

    /// Side played by the player at `index`. A unique engine plays whoever
    /// is to move.
    pub fn side_of(&self, index: usize) -> Side {
        if self.is_unique() {
            self.record.read(|r| r.side_to_move())
        } else if index == self.white_index() {
            Side::White
        } else {
            Side::Black
        }
    }

    pub fn player(&self, side: Side) -> Option<&PlayerContext> {
        self.players.get(self.index_of(side))
    }

    pub fn player_mut(&mut self, side: Side) -> Option<&mut PlayerContext> {
        let index = self.index_of(side);
        self.players.get_mut(index)
    }

    pub fn white(&self) -> Option<&PlayerContext> {
        self.player(Side::White)
    }

    pub fn black(&self) -> Option<&PlayerContext> {
        self.player(Side::Black)
    }

    pub fn players(&self) -> &[PlayerContext] {
        &self.players
    }

    pub fn player_at_mut(&mut self, index: usize) -> Option<&mut PlayerContext> {
        self.players.get_mut(index)
    }

    pub fn record(&self) -> &SharedRecord {
        &self.record
    }

    /// Replace the record and resynchronize every shadow position.
    pub fn set_position(&mut self, record: GameRecord) -> Result<(), ArenaError> {
        for player in &mut self.players {
            player.set_position(&record)?;
        }
        self.record.replace(record);
        Ok(())
    }

    /// Tell every engine a new game starts from the current record.
    pub async fn new_game(&mut self) -> Result<(), ArenaError> {
        let record = self.record.snapshot();
        let white = self.white_index();
        let unique = self.is_unique();
        for (i, player) in self.players.iter_mut().enumerate() {
            let engine_is_white = if unique {
                record.white_to_move()
            } else {
                i == white
            };
            player.new_game(&record, engine_is_white).await?;
        }

        for player in &self.players {
            if let Some(engine) = player.engine() {
                if !engine.request_ready(self.settings.ready_timeout).await {
                    tracing::warn!(engine = %engine.identifier(), "Engine not ready for new game");
                }
            }
        }
        Ok(())
    }

    /// Apply a validated move to every shadow position and the record.
    pub fn add_move(&mut self, mv: MoveRecord) -> Result<(), ArenaError> {
        let chess_move = self
            .players
            .first()
            .ok_or(ArenaError::NoEngine)?
            .position()
            .parse_move(&mv.lan)?;
        for player in &mut self.players {
            player.do_move(chess_move)?;
        }
        self.record.write(|r| r.add_move(mv));
        Ok(())
    }

    pub fn set_game_end(&self, cause: GameEndCause, result: GameResult) {
        tracing::info!("Game over: {} ({})", result, cause);
        self.record.write(|r| r.set_game_end(cause, result));
    }

    pub fn with_game_record<R>(&self, f: impl FnOnce(&GameRecord) -> R) -> R {
        self.record.read(f)
    }

    /// Terminal state of the current position, or the ply-limit adjudication.
    pub fn check_game_end(&self) -> Option<(GameEndCause, GameResult)> {
        let position = self.players.first()?.position();
        let (cause, result) = position.game_result();
        if cause != GameEndCause::Ongoing {
            return Some((cause, result));
        }
        if self.settings.max_plies > 0 && position.ply() >= self.settings.max_plies {
            return Some((GameEndCause::Adjudication, GameResult::Draw));
        }
        None
    }

    /// Restart every engine that overran its time. Returns the side of the
    /// first one that did.
    pub async fn check_for_timeouts_and_restart(&mut self) -> Result<Option<Side>, ArenaError> {
        for index in 0..self.players.len() {
            let side = self.side_of(index);
            if self.players[index].check_engine_timeout().await? {
                return Ok(Some(side));
            }
        }
        Ok(None)
    }

    /// Stop every running search. Returns whether all engines acknowledged.
    pub async fn cancel_compute(&mut self) -> bool {
        let mut acknowledged = true;
        for player in &mut self.players {
            acknowledged &= player.cancel_compute().await;
        }
        acknowledged
    }

    /// Index of the player whose engine produced `event`.
    pub fn player_index_for(&self, event: &EngineEvent) -> Option<usize> {
        self.players
            .iter()
            .position(|p| p.identifier() == Some(event.identifier.as_str()))
    }

    pub async fn shutdown(&mut self) {
        for player in &mut self.players {
            player.shutdown().await;
        }
        self.players.clear();
    }
}
