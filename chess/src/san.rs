//! Standard Algebraic Notation: formatting and lenient parsing.

use cozy_chess::{Board, File, Move, Piece, Rank, Square};

use crate::types::PieceKind;
use crate::uci::{
    convert_uci_castling_to_cozy, file_from_char, file_to_char, format_square, is_castling,
    parse_square, parse_uci_move, rank_from_char, rank_to_char,
};

/// Legal moves that match a textual move specification.
#[derive(Debug, Clone, Default)]
pub struct SanMatches {
    pub moves: Vec<Move>,
    /// The text named a pawn move to the last rank without a promotion piece.
    pub promotion_missing: bool,
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum SanError {
    #[error("Empty move text")]
    Empty,
    #[error("Invalid format: {0}")]
    InvalidFormat(String),
    #[error("Invalid square: {0}")]
    InvalidSquare(String),
    #[error("Invalid promotion: {0}")]
    InvalidPromotion(String),
}

pub(crate) fn legal_moves(board: &Board) -> Vec<Move> {
    let mut moves = Vec::new();
    board.generate_moves(|mvs| {
        moves.extend(mvs);
        false
    });
    moves
}

pub(crate) fn has_legal_moves(board: &Board) -> bool {
    board.generate_moves(|_| true)
}

/// Format a legal move as SAN, including disambiguation and check markers.
pub fn format_san(board: &Board, mv: Move) -> String {
    let Some(piece) = board.piece_on(mv.from) else {
        return crate::uci::format_lan(board, mv);
    };

    let mut san = String::new();
    if is_castling(board, mv) {
        if (mv.to.file() as u8) > (mv.from.file() as u8) {
            san.push_str("O-O");
        } else {
            san.push_str("O-O-O");
        }
    } else {
        let is_capture = board.piece_on(mv.to).is_some()
            || (piece == Piece::Pawn && mv.from.file() != mv.to.file());

        if piece == Piece::Pawn {
            if is_capture {
                san.push(file_to_char(mv.from.file()));
            }
        } else {
            san.push(PieceKind::from(piece).to_char_upper());
            san.push_str(&disambiguation(board, mv, piece));
        }

        if is_capture {
            san.push('x');
        }
        san.push_str(&format_square(mv.to));

        if let Some(promo) = mv.promotion {
            san.push('=');
            san.push(PieceKind::from(promo).to_char_upper());
        }
    }

    let mut after = board.clone();
    after.play_unchecked(mv);
    if !after.checkers().is_empty() {
        san.push(if has_legal_moves(&after) { '+' } else { '#' });
    }

    san
}

fn disambiguation(board: &Board, mv: Move, piece: Piece) -> String {
    let mut others: Vec<Square> = legal_moves(board)
        .into_iter()
        .filter(|m| {
            m.to == mv.to
                && m.from != mv.from
                && board.piece_on(m.from) == Some(piece)
                && !is_castling(board, *m)
        })
        .map(|m| m.from)
        .collect();
    others.dedup();

    if others.is_empty() {
        String::new()
    } else if others.iter().all(|sq| sq.file() != mv.from.file()) {
        file_to_char(mv.from.file()).to_string()
    } else if others.iter().all(|sq| sq.rank() != mv.from.rank()) {
        rank_to_char(mv.from.rank()).to_string()
    } else {
        format_square(mv.from)
    }
}

/// Find the legal moves matching `text`, which may be SAN (`Nbd7`, `exd5`,
/// `e8=Q`, `O-O`) or coordinate notation (`e2e4`, `e7e8q`, `e1g1`).
pub fn match_moves(board: &Board, text: &str) -> Result<SanMatches, SanError> {
    let cleaned = text
        .trim()
        .trim_end_matches(|c| matches!(c, '+' | '#' | '!' | '?'));
    if cleaned.is_empty() {
        return Err(SanError::Empty);
    }

    let legal = legal_moves(board);

    if let Some(kingside) = castling_side(cleaned) {
        let moves = legal
            .into_iter()
            .filter(|m| {
                is_castling(board, *m)
                    && ((m.to.file() as u8) > (m.from.file() as u8)) == kingside
            })
            .collect();
        return Ok(SanMatches {
            moves,
            promotion_missing: false,
        });
    }

    let compact: String = cleaned.chars().filter(|c| !matches!(c, '-' | '=')).collect();
    if let Some(lan) = parse_uci_move(&compact) {
        let lan = convert_uci_castling_to_cozy(lan, &legal);
        let candidates: Vec<Move> = legal
            .into_iter()
            .filter(|m| m.from == lan.from && m.to == lan.to)
            .collect();
        return Ok(select_promotion(candidates, lan.promotion));
    }

    let spec = parse_san_spec(cleaned)?;
    let candidates: Vec<Move> = legal
        .into_iter()
        .filter(|m| {
            board.piece_on(m.from) == Some(spec.piece)
                && m.to == spec.to
                && !is_castling(board, *m)
                && spec.from_file.is_none_or(|f| m.from.file() == f)
                && spec.from_rank.is_none_or(|r| m.from.rank() == r)
        })
        .collect();
    Ok(select_promotion(candidates, spec.promotion))
}

fn castling_side(text: &str) -> Option<bool> {
    match text {
        "O-O" | "0-0" => Some(true),
        "O-O-O" | "0-0-0" => Some(false),
        _ => None,
    }
}

fn select_promotion(candidates: Vec<Move>, promotion: Option<Piece>) -> SanMatches {
    match promotion {
        Some(piece) => SanMatches {
            moves: candidates
                .into_iter()
                .filter(|m| m.promotion == Some(piece))
                .collect(),
            promotion_missing: false,
        },
        None => {
            let promotion_missing =
                !candidates.is_empty() && candidates.iter().all(|m| m.promotion.is_some());
            let moves = if promotion_missing {
                candidates
            } else {
                candidates
                    .into_iter()
                    .filter(|m| m.promotion.is_none())
                    .collect()
            };
            SanMatches {
                moves,
                promotion_missing,
            }
        }
    }
}

struct SanSpec {
    piece: Piece,
    from_file: Option<File>,
    from_rank: Option<Rank>,
    to: Square,
    promotion: Option<Piece>,
}

fn parse_san_spec(text: &str) -> Result<SanSpec, SanError> {
    let mut body: Vec<char> = text.chars().filter(|c| !matches!(c, 'x' | ':' | '-')).collect();

    let piece = match body.first() {
        Some(c) if matches!(c, 'K' | 'Q' | 'R' | 'B' | 'N') => {
            let kind = PieceKind::from_char(*c)
                .ok_or_else(|| SanError::InvalidFormat(text.to_string()))?;
            body.remove(0);
            Piece::from(kind)
        }
        _ => Piece::Pawn,
    };

    let mut promotion = None;
    if let Some(eq) = body.iter().position(|c| *c == '=') {
        let promo = body
            .get(eq + 1)
            .copied()
            .ok_or_else(|| SanError::InvalidPromotion(text.to_string()))?;
        promotion = Some(promotion_piece(promo, text)?);
        body.truncate(eq);
    } else if piece == Piece::Pawn && body.len() >= 3 {
        let last = body[body.len() - 1];
        let before = body[body.len() - 2];
        if last.is_ascii_alphabetic() && before.is_ascii_digit() {
            promotion = Some(promotion_piece(last, text)?);
            body.pop();
        }
    }

    if body.len() < 2 || body.len() > 4 {
        return Err(SanError::InvalidFormat(text.to_string()));
    }

    let dest: String = body[body.len() - 2..].iter().collect();
    let to = parse_square(&dest).ok_or_else(|| SanError::InvalidSquare(dest.clone()))?;

    let mut from_file = None;
    let mut from_rank = None;
    for c in &body[..body.len() - 2] {
        if let Some(f) = file_from_char(*c) {
            from_file = Some(f);
        } else if let Some(r) = rank_from_char(*c) {
            from_rank = Some(r);
        } else {
            return Err(SanError::InvalidFormat(text.to_string()));
        }
    }

    Ok(SanSpec {
        piece,
        from_file,
        from_rank,
        to,
        promotion,
    })
}

fn promotion_piece(c: char, text: &str) -> Result<Piece, SanError> {
    match PieceKind::from_char(c) {
        Some(PieceKind::Queen) => Ok(Piece::Queen),
        Some(PieceKind::Rook) => Ok(Piece::Rook),
        Some(PieceKind::Bishop) => Ok(Piece::Bishop),
        Some(PieceKind::Knight) => Ok(Piece::Knight),
        _ => Err(SanError::InvalidPromotion(text.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const START_FEN: &str = "rnbqkbnr/pppppppp/8/8/8/8/PPPPPPPP/RNBQKBNR w KQkq - 0 1";

    fn board(fen: &str) -> Board {
        fen.parse().unwrap()
    }

    fn san_of(fen: &str, uci: &str) -> String {
        let b = board(fen);
        let mv = convert_uci_castling_to_cozy(parse_uci_move(uci).unwrap(), &legal_moves(&b));
        format_san(&b, mv)
    }

    #[test]
    fn test_san_pawn_push() {
        assert_eq!(san_of(START_FEN, "e2e4"), "e4");
    }

    #[test]
    fn test_san_knight() {
        assert_eq!(san_of(START_FEN, "g1f3"), "Nf3");
    }

    #[test]
    fn test_san_capture() {
        let fen = "rnbqkbnr/ppp1pppp/8/3p4/4P3/8/PPPP1PPP/RNBQKBNR w KQkq d6 0 2";
        assert_eq!(san_of(fen, "e4d5"), "exd5");
    }

    #[test]
    fn test_san_castling() {
        let fen = "rnbqkbnr/pppppppp/8/8/8/8/PPPPPPPP/R3K2R w KQkq - 0 1";
        assert_eq!(san_of(fen, "e1g1"), "O-O");
        assert_eq!(san_of(fen, "e1c1"), "O-O-O");
    }

    #[test]
    fn test_san_promotion() {
        let fen = "8/P7/8/8/8/8/7k/4K3 w - - 0 1";
        assert_eq!(san_of(fen, "a7a8q"), "a8=Q");
        assert_eq!(san_of(fen, "a7a8n"), "a8=N");
        // The new queen sees the king along the long diagonal.
        let checking = "8/P7/8/8/8/8/8/4K2k w - - 0 1";
        assert_eq!(san_of(checking, "a7a8q"), "a8=Q+");
    }

    #[test]
    fn test_san_disambiguation_by_file() {
        let fen = "4k3/8/8/8/8/8/4K3/R6R w - - 0 1";
        assert_eq!(san_of(fen, "a1d1"), "Rad1");
    }

    #[test]
    fn test_san_checkmate_marker() {
        let fen = "7k/5Q2/5K2/8/8/8/8/8 w - - 0 1";
        assert_eq!(san_of(fen, "f7g7"), "Qg7#");
    }

    #[test]
    fn test_match_san_and_lan_agree() {
        let b = board(START_FEN);
        let san = match_moves(&b, "Nf3").unwrap();
        let lan = match_moves(&b, "g1f3").unwrap();
        assert_eq!(san.moves.len(), 1);
        assert_eq!(san.moves, lan.moves);
    }

    #[test]
    fn test_match_missing_promotion() {
        let b = board("8/P7/8/8/8/8/8/4K2k w - - 0 1");
        let matches = match_moves(&b, "a8").unwrap();
        assert!(matches.promotion_missing);
        assert_eq!(matches.moves.len(), 4);
    }

    #[test]
    fn test_match_rejects_garbage() {
        let b = board(START_FEN);
        assert!(match_moves(&b, "").is_err());
        assert!(match_moves(&b, "Zz9").is_err());
        assert!(match_moves(&b, "e5").unwrap().moves.is_empty());
    }
}
