use serde::{Deserialize, Serialize};

use crate::types::Side;

/// Outcome of a game as written in a PGN `Result` tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum GameResult {
    #[default]
    Unterminated,
    WhiteWins,
    BlackWins,
    Draw,
}

/// Why a game ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum GameEndCause {
    #[default]
    Ongoing,
    Checkmate,
    Stalemate,
    InsufficientMaterial,
    FiftyMoveRule,
    ThreefoldRepetition,
    TimeForfeit,
    Resignation,
    IllegalMove,
    Disconnected,
    Adjudication,
    Aborted,
}

impl GameResult {
    /// The result where `side` wins.
    pub fn win_for(side: Side) -> Self {
        match side {
            Side::White => Self::WhiteWins,
            Side::Black => Self::BlackWins,
        }
    }

    /// The result where `side` loses.
    pub fn loss_for(side: Side) -> Self {
        Self::win_for(side.opposite())
    }

    pub fn is_terminal(self) -> bool {
        self != Self::Unterminated
    }

    /// Score of the white player (1, 0.5, 0). `None` while unterminated.
    pub fn white_score(self) -> Option<f64> {
        match self {
            Self::WhiteWins => Some(1.0),
            Self::BlackWins => Some(0.0),
            Self::Draw => Some(0.5),
            Self::Unterminated => None,
        }
    }

    pub fn as_pgn(self) -> &'static str {
        match self {
            Self::Unterminated => "*",
            Self::WhiteWins => "1-0",
            Self::BlackWins => "0-1",
            Self::Draw => "1/2-1/2",
        }
    }
}

impl GameEndCause {
    pub fn describe(self) -> &'static str {
        match self {
            Self::Ongoing => "ongoing",
            Self::Checkmate => "checkmate",
            Self::Stalemate => "stalemate",
            Self::InsufficientMaterial => "insufficient material",
            Self::FiftyMoveRule => "fifty-move rule",
            Self::ThreefoldRepetition => "threefold repetition",
            Self::TimeForfeit => "time forfeit",
            Self::Resignation => "resignation",
            Self::IllegalMove => "illegal move",
            Self::Disconnected => "engine disconnected",
            Self::Adjudication => "adjudication",
            Self::Aborted => "aborted",
        }
    }
}

impl std::fmt::Display for GameResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_pgn())
    }
}

impl std::fmt::Display for GameEndCause {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.describe())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_loss_for_and_scores() {
        assert_eq!(GameResult::loss_for(Side::White), GameResult::BlackWins);
        assert_eq!(GameResult::loss_for(Side::Black).white_score(), Some(1.0));
        assert_eq!(GameResult::Unterminated.white_score(), None);
        assert!(!GameResult::Unterminated.is_terminal());
    }

    #[test]
    fn test_end_cause_display() {
        assert_eq!(GameEndCause::Resignation.to_string(), "resignation");
        assert_eq!(GameEndCause::FiftyMoveRule.to_string(), "fifty-move rule");
        let json = serde_json::to_string(&GameEndCause::Resignation).unwrap();
        assert_eq!(json, "\"Resignation\"");
    }
}
