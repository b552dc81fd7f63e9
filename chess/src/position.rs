use cozy_chess::{Board, Color, Move, Piece};

use crate::fen::{format_fen, parse_fen, FenError, STARTING_FEN};
use crate::result::{GameEndCause, GameResult};
use crate::san::{format_san, has_legal_moves, legal_moves, match_moves};
use crate::types::{MoveNotation, Side};
use crate::uci::format_lan;

/// A position together with the moves that led to it.
///
/// Keeps the hash of every position reached so repetition can be detected
/// without replaying the game.
#[derive(Debug, Clone)]
pub struct Position {
    board: Board,
    start_fen: String,
    moves: Vec<Move>,
    hashes: Vec<u64>,
}

/// Result of resolving a loosely specified move against a position.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MoveResolution {
    /// The unique legal move, if the text resolved to exactly one.
    pub mv: Option<Move>,
    /// More than one legal move matched.
    pub ambiguous: bool,
    /// The text names a promotion (with or without the promotion piece).
    pub is_promotion: bool,
}

impl MoveResolution {
    pub fn is_empty(&self) -> bool {
        self.mv.is_none()
    }
}

impl Position {
    /// The standard starting position.
    pub fn new() -> Self {
        let board = Board::default();
        let hash = board.hash();
        Self {
            board,
            start_fen: STARTING_FEN.to_string(),
            moves: Vec::new(),
            hashes: vec![hash],
        }
    }

    /// Create a position from a FEN string
    pub fn from_fen(fen: &str) -> Result<Self, FenError> {
        let board = parse_fen(fen)?;
        let hash = board.hash();
        Ok(Self {
            board,
            start_fen: fen.trim().to_string(),
            moves: Vec::new(),
            hashes: vec![hash],
        })
    }

    /// Replay `moves` (SAN or LAN) from `start_fen`.
    pub fn from_moves<S: AsRef<str>>(start_fen: &str, moves: &[S]) -> Result<Self, MoveError> {
        let mut position = Self::from_fen(start_fen)?;
        for text in moves {
            let mv = position.parse_move(text.as_ref())?;
            position.play(mv)?;
        }
        Ok(position)
    }

    pub fn board(&self) -> &Board {
        &self.board
    }

    pub fn start_fen(&self) -> &str {
        &self.start_fen
    }

    pub fn moves(&self) -> &[Move] {
        &self.moves
    }

    /// Number of half-moves played since the start position.
    pub fn ply(&self) -> usize {
        self.moves.len()
    }

    pub fn last_move(&self) -> Option<Move> {
        self.moves.last().copied()
    }

    pub fn side_to_move(&self) -> Side {
        Side::from(self.board.side_to_move())
    }

    pub fn to_fen(&self) -> String {
        format_fen(&self.board)
    }

    pub fn legal_moves(&self) -> Vec<Move> {
        legal_moves(&self.board)
    }

    pub fn is_legal(&self, mv: Move) -> bool {
        self.board.is_legal(mv)
    }

    pub fn is_in_check(&self) -> bool {
        !self.board.checkers().is_empty()
    }

    /// Play a move on the board
    pub fn play(&mut self, mv: Move) -> Result<(), MoveError> {
        if !self.board.is_legal(mv) {
            return Err(MoveError::Illegal(format_lan(&self.board, mv)));
        }
        self.board.play_unchecked(mv);
        self.moves.push(mv);
        self.hashes.push(self.board.hash());
        Ok(())
    }

    /// Resolve and play a move given as text.
    pub fn play_text(&mut self, text: &str) -> Result<Move, MoveError> {
        let mv = self.parse_move(text)?;
        self.play(mv)?;
        Ok(mv)
    }

    /// Resolve `text` to exactly one legal move.
    pub fn parse_move(&self, text: &str) -> Result<Move, MoveError> {
        let resolution = self.resolve_move(text);
        match resolution.mv {
            Some(mv) => Ok(mv),
            None if resolution.ambiguous => Err(MoveError::Ambiguous(text.to_string())),
            None if resolution.is_promotion => {
                Err(MoveError::MissingPromotion(text.to_string()))
            }
            None => Err(MoveError::Illegal(text.to_string())),
        }
    }

    /// Resolve a partial move specification (SAN or LAN).
    pub fn resolve_move(&self, text: &str) -> MoveResolution {
        let Ok(matches) = match_moves(&self.board, text) else {
            return MoveResolution::default();
        };

        if matches.promotion_missing {
            return MoveResolution {
                mv: None,
                ambiguous: false,
                is_promotion: true,
            };
        }

        match matches.moves.as_slice() {
            [mv] => MoveResolution {
                mv: Some(*mv),
                ambiguous: false,
                is_promotion: mv.promotion.is_some(),
            },
            [] => MoveResolution::default(),
            _ => MoveResolution {
                mv: None,
                ambiguous: true,
                is_promotion: false,
            },
        }
    }

    pub fn move_to_san(&self, mv: Move) -> String {
        format_san(&self.board, mv)
    }

    pub fn move_to_lan(&self, mv: Move) -> String {
        format_lan(&self.board, mv)
    }

    pub fn format_move(&self, mv: Move, notation: MoveNotation) -> String {
        match notation {
            MoveNotation::Lan => self.move_to_lan(mv),
            MoveNotation::San => self.move_to_san(mv),
        }
    }

    /// How often the current position has occurred.
    pub fn repetition_count(&self) -> usize {
        let current = self.board.hash();
        self.hashes.iter().filter(|h| **h == current).count()
    }

    /// Neither side can possibly deliver mate.
    pub fn is_insufficient_material(&self) -> bool {
        let board = &self.board;
        let heavy = board.pieces(Piece::Pawn) | board.pieces(Piece::Rook) | board.pieces(Piece::Queen);
        if !heavy.is_empty() {
            return false;
        }

        let knights = board.pieces(Piece::Knight);
        let bishops = board.pieces(Piece::Bishop);
        let minors = knights.len() + bishops.len();
        if minors <= 1 {
            return true;
        }
        if !knights.is_empty() {
            return false;
        }

        // Only bishops left: drawn when all of them share one square color.
        let mut colors = bishops
            .into_iter()
            .map(|sq| (sq.file() as u8 + sq.rank() as u8) % 2);
        let first = colors.next();
        colors.all(|c| Some(c) == first)
    }

    /// Terminal state of the position, `(Ongoing, Unterminated)` if play continues.
    pub fn game_result(&self) -> (GameEndCause, GameResult) {
        if !has_legal_moves(&self.board) {
            if self.is_in_check() {
                let loser = Side::from(self.board.side_to_move());
                return (GameEndCause::Checkmate, GameResult::loss_for(loser));
            }
            return (GameEndCause::Stalemate, GameResult::Draw);
        }
        if self.is_insufficient_material() {
            return (GameEndCause::InsufficientMaterial, GameResult::Draw);
        }
        if self.board.halfmove_clock() >= 100 {
            return (GameEndCause::FiftyMoveRule, GameResult::Draw);
        }
        if self.repetition_count() >= 3 {
            return (GameEndCause::ThreefoldRepetition, GameResult::Draw);
        }
        (GameEndCause::Ongoing, GameResult::Unterminated)
    }

    pub fn white_to_move(&self) -> bool {
        self.board.side_to_move() == Color::White
    }
}

impl Default for Position {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum MoveError {
    #[error("Illegal move: {0}")]
    Illegal(String),
    #[error("Ambiguous move: {0}")]
    Ambiguous(String),
    #[error("Promotion piece missing: {0}")]
    MissingPromotion(String),
    #[error("FEN parse error: {0}")]
    Fen(#[from] FenError),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn play_all(position: &mut Position, moves: &[&str]) {
        for m in moves {
            position.play_text(m).unwrap();
        }
    }

    #[test]
    fn test_fools_mate_is_checkmate() {
        let mut position = Position::new();
        play_all(&mut position, &["f3", "e5", "g4", "Qh4"]);
        assert!(position.is_in_check());
        assert_eq!(
            position.game_result(),
            (GameEndCause::Checkmate, GameResult::BlackWins)
        );
    }

    #[test]
    fn test_stalemate() {
        let position = Position::from_fen("k7/8/1Q6/8/8/8/8/2K5 b - - 0 1").unwrap();
        assert_eq!(
            position.game_result(),
            (GameEndCause::Stalemate, GameResult::Draw)
        );
    }

    #[test]
    fn test_insufficient_material() {
        let kk = Position::from_fen("8/8/8/4k3/8/4K3/8/8 w - - 0 1").unwrap();
        assert!(kk.is_insufficient_material());
        let kbk = Position::from_fen("8/8/8/4k3/8/4KB2/8/8 w - - 0 1").unwrap();
        assert!(kbk.is_insufficient_material());
        // c8 and f1 are both light squares.
        let same_color_bishops =
            Position::from_fen("2b5/8/8/4k3/8/4K3/8/5B2 w - - 0 1").unwrap();
        assert!(same_color_bishops.is_insufficient_material());
        let opposite_color_bishops =
            Position::from_fen("2b5/8/8/4k3/8/4K3/8/2B5 w - - 0 1").unwrap();
        assert!(!opposite_color_bishops.is_insufficient_material());
        let krk = Position::from_fen("8/8/8/4k3/8/4K3/8/4R3 w - - 0 1").unwrap();
        assert!(!krk.is_insufficient_material());
    }

    #[test]
    fn test_fifty_move_rule() {
        let position = Position::from_fen("8/8/8/4k3/8/4K3/8/4R3 w - - 100 60").unwrap();
        assert_eq!(position.game_result().0, GameEndCause::FiftyMoveRule);
    }

    #[test]
    fn test_threefold_repetition() {
        let mut position = Position::new();
        play_all(
            &mut position,
            &["Nf3", "Nf6", "Ng1", "Ng8", "Nf3", "Nf6", "Ng1", "Ng8"],
        );
        assert_eq!(position.repetition_count(), 3);
        assert_eq!(
            position.game_result(),
            (GameEndCause::ThreefoldRepetition, GameResult::Draw)
        );
    }

    #[test]
    fn test_resolve_move_variants() {
        let position = Position::new();
        let lan = position.resolve_move("e2e4");
        let san = position.resolve_move("e4");
        assert!(lan.mv.is_some());
        assert_eq!(lan, san);

        let illegal = position.resolve_move("e2e5");
        assert!(illegal.is_empty());
        assert!(!illegal.ambiguous);
    }

    #[test]
    fn test_resolve_move_ambiguous() {
        let position = Position::from_fen("4k3/8/8/8/8/8/4K3/R6R w - - 0 1").unwrap();
        let resolution = position.resolve_move("Rd1");
        assert!(resolution.ambiguous);
        assert!(resolution.mv.is_none());
    }

    #[test]
    fn test_resolve_move_promotion() {
        let position = Position::from_fen("8/P7/8/8/8/8/8/4K2k w - - 0 1").unwrap();
        let missing = position.resolve_move("a7a8");
        assert!(missing.is_promotion);
        assert!(missing.mv.is_none());

        let queen = position.resolve_move("a8=Q");
        assert!(queen.is_promotion);
        assert!(queen.mv.is_some());
    }

    #[test]
    fn test_illegal_play_does_not_mutate() {
        let mut position = Position::new();
        let before = position.to_fen();
        assert!(position.play_text("e2e5").is_err());
        assert_eq!(position.to_fen(), before);
        assert_eq!(position.ply(), 0);
    }

    #[test]
    fn test_from_moves_replays_lan_and_san() {
        let position = Position::from_moves(STARTING_FEN, &["e2e4", "e5", "g1f3"]).unwrap();
        assert_eq!(position.ply(), 3);
        assert_eq!(position.side_to_move(), Side::Black);
    }

    mod properties {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn notation_resolves_back_along_random_games(
                choices in proptest::collection::vec(any::<usize>(), 0..40)
            ) {
                let mut position = Position::new();
                for choice in choices {
                    let legal = position.legal_moves();
                    if legal.is_empty() {
                        break;
                    }
                    for &mv in &legal {
                        prop_assert_eq!(position.parse_move(&position.move_to_san(mv)).ok(), Some(mv));
                        prop_assert_eq!(position.parse_move(&position.move_to_lan(mv)).ok(), Some(mv));
                    }
                    position.play(legal[choice % legal.len()]).unwrap();
                }
            }
        }
    }
}
