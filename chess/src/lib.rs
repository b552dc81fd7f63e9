//! Rules collaborator for the match orchestrator.
//!
//! Everything the orchestration core needs to know about chess goes through
//! the narrow query surface of [`Position`]: legal move enumeration, check
//! detection, terminal-state detection, SAN/LAN conversion and resolution of
//! loosely specified moves. cozy-chess types stay an implementation detail
//! except for [`cozy_chess::Move`], which is re-exported.

pub mod fen;
pub mod position;
pub mod result;
pub mod san;
pub mod types;
pub mod uci;

pub use cozy_chess::Move;
pub use fen::{FenError, STARTING_FEN};
pub use position::{MoveError, MoveResolution, Position};
pub use result::{GameEndCause, GameResult};
pub use types::{MoveNotation, PieceKind, Side};
pub use uci::{convert_uci_castling_to_cozy, format_square, parse_square, parse_uci_move};
