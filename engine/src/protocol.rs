//! Protocol flavours. Everything that differs between UCI and xboard engines
//! is dispatched here, so the process adapter stays flavour-agnostic.

use chess::MoveNotation;
use serde::{Deserialize, Serialize};

use crate::uci::{self, UciMessage};
use crate::xboard::{self, XBoardMessage};
use crate::{EngineConfig, GoLimits, PositionSetup, SearchInfo};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineProtocol {
    #[default]
    Uci,
    #[serde(alias = "winboard", alias = "cecp")]
    XBoard,
}

/// One engine output line, normalized across flavours.
#[derive(Debug, Clone, PartialEq)]
pub enum ProtocolLine {
    /// `uciok`, or an xboard `feature` list containing `done=1`.
    HandshakeDone,
    /// xboard features that need an accept/reject reply.
    Features(Vec<(String, String)>),
    ReadyOk,
    BestMove { mv: String, ponder: Option<String> },
    /// The engine gives up the game instead of moving.
    Resign,
    Info(SearchInfo),
    Id { name: String, value: String },
    /// Engine complained about something we sent.
    Complaint(String),
    Ignored,
}

impl EngineProtocol {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Uci => "uci",
            Self::XBoard => "xboard",
        }
    }

    /// Move notation the engine reads and writes.
    pub fn required_notation(self) -> MoveNotation {
        match self {
            Self::Uci => MoveNotation::Lan,
            Self::XBoard => MoveNotation::San,
        }
    }

    /// Whether the flavour has a ponder/ponderhit round trip.
    pub fn supports_ponder(self) -> bool {
        matches!(self, Self::Uci)
    }

    /// Whether stopping an analysis search yields a best move.
    pub fn analysis_yields_move(self) -> bool {
        matches!(self, Self::Uci)
    }

    pub fn handshake_commands(self) -> Vec<String> {
        match self {
            Self::Uci => vec!["uci".to_string()],
            Self::XBoard => xboard::handshake_commands(),
        }
    }

    pub fn option_commands(self, config: &EngineConfig) -> Vec<String> {
        match self {
            Self::Uci => uci::option_commands(config),
            Self::XBoard => {
                let mut commands = Vec::new();
                if let Some(threads) = config.clamped_threads() {
                    commands.push(format!("cores {}", threads));
                }
                if let Some(hash_mb) = config.clamped_hash_mb() {
                    commands.push(format!("memory {}", hash_mb));
                }
                commands.extend(
                    config
                        .options
                        .iter()
                        .map(|(name, value)| format!("option {}={}", name, value)),
                );
                commands
            }
        }
    }

    pub fn new_game_commands(self, setup: &PositionSetup) -> Vec<String> {
        match self {
            Self::Uci => vec!["ucinewgame".to_string(), uci::position_command(setup)],
            Self::XBoard => {
                let mut commands = xboard::new_game_commands();
                commands.extend(xboard::position_commands(setup));
                commands
            }
        }
    }

    /// Commands that start a search on `setup`.
    pub fn search_commands(
        self,
        setup: &PositionSetup,
        limits: &GoLimits,
        white_to_move: bool,
        analyze: bool,
    ) -> Vec<String> {
        match self {
            Self::Uci => vec![
                uci::position_command(setup),
                uci::go_command(limits, analyze, false),
            ],
            Self::XBoard => {
                let mut commands = xboard::position_commands(setup);
                commands.extend(xboard::search_commands(limits, white_to_move, analyze));
                commands
            }
        }
    }

    /// Commands that start a ponder search. `None` when unsupported.
    pub fn ponder_commands(self, setup: &PositionSetup, limits: &GoLimits) -> Option<Vec<String>> {
        match self {
            Self::Uci => Some(vec![
                uci::position_command(setup),
                uci::go_command(limits, false, true),
            ]),
            Self::XBoard => None,
        }
    }

    pub fn ponder_hit_command(self) -> Option<&'static str> {
        match self {
            Self::Uci => Some("ponderhit"),
            Self::XBoard => None,
        }
    }

    /// Command that makes a running search answer immediately.
    pub fn move_now_command(self, analyzing: bool) -> &'static str {
        match (self, analyzing) {
            (Self::Uci, _) => "stop",
            (Self::XBoard, true) => "exit",
            (Self::XBoard, false) => "?",
        }
    }

    pub fn ready_command(self, token: u32) -> String {
        match self {
            Self::Uci => "isready".to_string(),
            Self::XBoard => format!("ping {}", token),
        }
    }

    pub fn quit_command(self) -> &'static str {
        "quit"
    }

    /// Parse one line of engine output.
    pub fn parse_line(self, line: &str) -> ProtocolLine {
        match self {
            Self::Uci => match uci::parse_uci_message(line) {
                Ok(UciMessage::UciOk) => ProtocolLine::HandshakeDone,
                Ok(UciMessage::ReadyOk) => ProtocolLine::ReadyOk,
                Ok(UciMessage::BestMove { mv, ponder }) => ProtocolLine::BestMove { mv, ponder },
                Ok(UciMessage::Info(info)) => ProtocolLine::Info(info),
                Ok(UciMessage::Id { name, value }) => ProtocolLine::Id { name, value },
                Err(_) => ProtocolLine::Ignored,
            },
            Self::XBoard => match xboard::parse_xboard_message(line) {
                Some(XBoardMessage::Feature(features)) if xboard::features_done(&features) => {
                    ProtocolLine::HandshakeDone
                }
                Some(XBoardMessage::Feature(features)) => ProtocolLine::Features(features),
                Some(XBoardMessage::Pong(_)) => ProtocolLine::ReadyOk,
                Some(XBoardMessage::Move(mv)) => ProtocolLine::BestMove { mv, ponder: None },
                Some(XBoardMessage::Thinking(info)) => ProtocolLine::Info(info),
                Some(XBoardMessage::Complaint(text)) => ProtocolLine::Complaint(text),
                Some(XBoardMessage::Resign) => ProtocolLine::Resign,
                None => ProtocolLine::Ignored,
            },
        }
    }

    /// Replies owed for a handshake line (xboard feature negotiation).
    pub fn handshake_replies(self, line: &str) -> Vec<String> {
        match (self, xboard::parse_xboard_message(line)) {
            (Self::XBoard, Some(XBoardMessage::Feature(features))) => {
                xboard::feature_replies(&features)
            }
            _ => Vec::new(),
        }
    }
}

impl std::fmt::Display for EngineProtocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_required_notation() {
        assert_eq!(EngineProtocol::Uci.required_notation(), MoveNotation::Lan);
        assert_eq!(EngineProtocol::XBoard.required_notation(), MoveNotation::San);
    }

    #[test]
    fn test_parse_line_normalizes_flavours() {
        assert_eq!(
            EngineProtocol::Uci.parse_line("bestmove e2e4"),
            ProtocolLine::BestMove {
                mv: "e2e4".to_string(),
                ponder: None
            }
        );
        assert_eq!(
            EngineProtocol::XBoard.parse_line("move e4"),
            ProtocolLine::BestMove {
                mv: "e4".to_string(),
                ponder: None
            }
        );
        assert_eq!(EngineProtocol::XBoard.parse_line("pong 3"), ProtocolLine::ReadyOk);
        assert_eq!(
            EngineProtocol::XBoard.parse_line("feature done=1"),
            ProtocolLine::HandshakeDone
        );
        assert_eq!(EngineProtocol::Uci.parse_line("uciok"), ProtocolLine::HandshakeDone);
        assert_eq!(EngineProtocol::XBoard.parse_line("resign"), ProtocolLine::Resign);
    }

    #[test]
    fn test_ponder_only_for_uci() {
        let setup = PositionSetup::default();
        let limits = GoLimits::default();
        assert!(EngineProtocol::Uci.ponder_commands(&setup, &limits).is_some());
        assert!(EngineProtocol::XBoard.ponder_commands(&setup, &limits).is_none());
    }

    #[test]
    fn test_serde_alias() {
        let protocol: EngineProtocol = serde_json::from_str("\"winboard\"").unwrap();
        assert_eq!(protocol, EngineProtocol::XBoard);
    }
}
