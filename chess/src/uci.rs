//! Coordinate (UCI / LAN) move utilities

use cozy_chess::{Board, File, Move, Piece, Rank, Square};

use crate::types::PieceKind;

const FILES: [File; 8] = [
    File::A,
    File::B,
    File::C,
    File::D,
    File::E,
    File::F,
    File::G,
    File::H,
];

const RANKS: [Rank; 8] = [
    Rank::First,
    Rank::Second,
    Rank::Third,
    Rank::Fourth,
    Rank::Fifth,
    Rank::Sixth,
    Rank::Seventh,
    Rank::Eighth,
];

pub(crate) fn file_from_char(c: char) -> Option<File> {
    let idx = (c as u32).checked_sub('a' as u32)? as usize;
    FILES.get(idx).copied()
}

pub(crate) fn rank_from_char(c: char) -> Option<Rank> {
    let idx = (c as u32).checked_sub('1' as u32)? as usize;
    RANKS.get(idx).copied()
}

pub(crate) fn file_to_char(file: File) -> char {
    (b'a' + file as u8) as char
}

pub(crate) fn rank_to_char(rank: Rank) -> char {
    (b'1' + rank as u8) as char
}

/// Parse a square such as `e4`.
pub fn parse_square(s: &str) -> Option<Square> {
    let mut chars = s.chars();
    let file = file_from_char(chars.next()?)?;
    let rank = rank_from_char(chars.next()?)?;
    if chars.next().is_some() {
        return None;
    }
    Some(Square::new(file, rank))
}

/// Format a square such as `e4`.
pub fn format_square(sq: Square) -> String {
    format!("{}{}", file_to_char(sq.file()), rank_to_char(sq.rank()))
}

/// Parse UCI move format (e2e4, e7e8q). Castling stays in the king-two-squares
/// form; see [`convert_uci_castling_to_cozy`].
pub fn parse_uci_move(s: &str) -> Option<Move> {
    if !s.is_ascii() || !(4..=5).contains(&s.len()) {
        return None;
    }

    let from = parse_square(&s[0..2])?;
    let to = parse_square(&s[2..4])?;
    let promotion = match s.chars().nth(4) {
        Some(c) => match PieceKind::from_char(c)? {
            PieceKind::Pawn | PieceKind::King => return None,
            kind => Some(Piece::from(kind)),
        },
        None => None,
    };

    Some(Move {
        from,
        to,
        promotion,
    })
}

/// Convert UCI castling notation to cozy_chess notation
///
/// UCI uses standard notation (king moves 2 squares): e1g1, e1c1, e8g8, e8c8
/// cozy_chess uses king-to-rook notation: e1h1, e1a1, e8h8, e8a8
pub fn convert_uci_castling_to_cozy(mv: Move, legal_moves: &[Move]) -> Move {
    let is_rank_1_or_8 = matches!(mv.from.rank(), Rank::First | Rank::Eighth);
    let is_e_file = matches!(mv.from.file(), File::E);
    let is_g_or_c_file = matches!(mv.to.file(), File::G | File::C);

    if is_rank_1_or_8 && is_e_file && is_g_or_c_file && mv.promotion.is_none() {
        let target_square = match mv.to.file() {
            File::G => Square::new(File::H, mv.from.rank()),
            _ => Square::new(File::A, mv.from.rank()),
        };

        let converted = Move {
            from: mv.from,
            to: target_square,
            promotion: None,
        };

        // A king really moving two squares is never legal, so only the
        // converted form can be in the list.
        if !legal_moves.contains(&mv) && legal_moves.contains(&converted) {
            return converted;
        }
    }

    mv
}

/// True when `mv` is a castling move in cozy-chess (king takes own rook) form.
pub fn is_castling(board: &Board, mv: Move) -> bool {
    board.piece_on(mv.from) == Some(Piece::King)
        && board.piece_on(mv.to) == Some(Piece::Rook)
        && board.color_on(mv.to) == board.color_on(mv.from)
}

/// Format a legal move in standard UCI notation, writing castling as the
/// king's two-square move.
pub fn format_lan(board: &Board, mv: Move) -> String {
    let to = if is_castling(board, mv) {
        let file = if (mv.to.file() as u8) > (mv.from.file() as u8) {
            File::G
        } else {
            File::C
        };
        Square::new(file, mv.from.rank())
    } else {
        mv.to
    };

    let mut s = format!("{}{}", format_square(mv.from), format_square(to));
    if let Some(promo) = mv.promotion {
        s.push(PieceKind::from(promo).to_char_lower());
    }
    s
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_uci_move() {
        let mv = parse_uci_move("e2e4").unwrap();
        assert_eq!(mv.from, Square::new(File::E, Rank::Second));
        assert_eq!(mv.to, Square::new(File::E, Rank::Fourth));
        assert!(mv.promotion.is_none());
    }

    #[test]
    fn test_parse_uci_move_with_promotion() {
        let mv = parse_uci_move("e7e8q").unwrap();
        assert_eq!(mv.promotion, Some(Piece::Queen));
    }

    #[test]
    fn test_parse_uci_move_rejects_garbage() {
        assert!(parse_uci_move("zz").is_none());
        assert!(parse_uci_move("e7e8k").is_none());
        assert!(parse_uci_move("i2i4").is_none());
        assert!(parse_uci_move("e2e4e5").is_none());
    }

    #[test]
    fn test_castling_round_trip() {
        let board: Board = "rnbqkbnr/pppppppp/8/8/8/8/PPPPPPPP/RNBQK2R w KQkq - 0 1"
            .parse()
            .unwrap();
        let mut legal = Vec::new();
        board.generate_moves(|mvs| {
            legal.extend(mvs);
            false
        });

        let uci = parse_uci_move("e1g1").unwrap();
        let cozy = convert_uci_castling_to_cozy(uci, &legal);
        assert_eq!(cozy.to, Square::new(File::H, Rank::First));
        assert_eq!(format_lan(&board, cozy), "e1g1");
    }
}
