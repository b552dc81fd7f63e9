use cozy_chess::Board;

/// FEN of the standard starting position.
pub const STARTING_FEN: &str = "rnbqkbnr/pppppppp/8/8/8/8/PPPPPPPP/RNBQKBNR w KQkq - 0 1";

/// Parse a FEN string into a Board
pub fn parse_fen(fen: &str) -> Result<Board, FenError> {
    let trimmed = fen.trim();
    if trimmed.is_empty() {
        return Err(FenError::Empty);
    }

    trimmed
        .parse()
        .map_err(|_| FenError::InvalidFormat(trimmed.to_string()))
}

/// Format a Board as a FEN string
pub fn format_fen(board: &Board) -> String {
    board.to_string()
}

/// True when the FEN describes the standard starting position.
pub fn is_starting_fen(fen: &str) -> bool {
    fen.trim() == STARTING_FEN
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum FenError {
    #[error("Empty FEN")]
    Empty,
    #[error("Invalid FEN: {0}")]
    InvalidFormat(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_starting_fen_round_trips() {
        let board = parse_fen(STARTING_FEN).unwrap();
        assert_eq!(format_fen(&board), STARTING_FEN);
        assert!(is_starting_fen(&format_fen(&board)));
    }

    #[test]
    fn test_rejects_garbage() {
        assert!(matches!(parse_fen("  "), Err(FenError::Empty)));
        assert!(matches!(
            parse_fen("not a fen"),
            Err(FenError::InvalidFormat(_))
        ));
    }
}
