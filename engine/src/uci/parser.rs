use crate::{Score, SearchInfo};

/// Incoming message from UCI engine
#[derive(Debug, Clone, PartialEq)]
pub enum UciMessage {
    Id { name: String, value: String },
    UciOk,
    ReadyOk,
    /// `bestmove (none)` and `bestmove 0000` carry an empty move.
    BestMove { mv: String, ponder: Option<String> },
    Info(SearchInfo),
}

/// Parse a UCI message line
pub fn parse_uci_message(line: &str) -> Result<UciMessage, crate::uci::UciError> {
    let tokens: Vec<&str> = line.split_whitespace().collect();

    match tokens.first() {
        Some(&"uciok") => Ok(UciMessage::UciOk),
        Some(&"readyok") => Ok(UciMessage::ReadyOk),

        Some(&"id") => {
            if tokens.len() < 3 {
                return Err(crate::uci::UciError::MalformedMessage(line.to_string()));
            }
            let name = tokens[1].to_string();
            let value = tokens[2..].join(" ");
            Ok(UciMessage::Id { name, value })
        }

        Some(&"bestmove") => {
            let Some(&raw) = tokens.get(1) else {
                return Err(crate::uci::UciError::MalformedMessage(line.to_string()));
            };
            let mv = match raw {
                "(none)" | "0000" => String::new(),
                other => other.to_string(),
            };
            let ponder = if tokens.len() >= 4 && tokens[2] == "ponder" {
                Some(tokens[3].to_string()).filter(|p| p != "(none)" && p != "0000")
            } else {
                None
            };
            Ok(UciMessage::BestMove { mv, ponder })
        }

        Some(&"info") => Ok(UciMessage::Info(parse_info_line(&tokens[1..]))),

        _ => Err(crate::uci::UciError::UnknownMessage(line.to_string())),
    }
}

/// Parse an "info" line from the engine
fn parse_info_line(tokens: &[&str]) -> SearchInfo {
    let mut info = SearchInfo::default();
    let mut i = 0;

    while i < tokens.len() {
        match tokens[i] {
            "depth" => {
                i += 1;
                info.depth = tokens.get(i).and_then(|s| s.parse().ok());
            }
            "seldepth" => {
                i += 1;
                info.seldepth = tokens.get(i).and_then(|s| s.parse().ok());
            }
            "time" => {
                i += 1;
                info.time_ms = tokens.get(i).and_then(|s| s.parse().ok());
            }
            "nodes" => {
                i += 1;
                info.nodes = tokens.get(i).and_then(|s| s.parse().ok());
            }
            "nps" => {
                i += 1;
                info.nps = tokens.get(i).and_then(|s| s.parse().ok());
            }
            "score" => {
                i += 1;
                if let Some(&score_type) = tokens.get(i) {
                    i += 1;
                    if let Some(value_str) = tokens.get(i) {
                        info.score = match score_type {
                            "cp" => value_str.parse().ok().map(Score::Centipawns),
                            "mate" => value_str.parse().ok().map(Score::Mate),
                            _ => None,
                        };
                    }
                }
            }
            "pv" => {
                // Collect all moves until next keyword
                i += 1;
                while i < tokens.len() && !is_keyword(tokens[i]) {
                    info.pv.push(tokens[i].to_string());
                    i += 1;
                }
                continue;
            }
            "multipv" => {
                i += 1;
                info.multipv = tokens.get(i).and_then(|s| s.parse().ok());
            }
            "currmove" => {
                i += 1;
                info.currmove = tokens.get(i).map(|s| s.to_string());
            }
            "hashfull" => {
                i += 1;
                info.hashfull = tokens.get(i).and_then(|s| s.parse().ok());
            }
            // Free text runs to the end of the line.
            "string" => break,
            _ => {}
        }
        i += 1;
    }

    info
}

fn is_keyword(token: &str) -> bool {
    matches!(
        token,
        "depth"
            | "seldepth"
            | "time"
            | "nodes"
            | "score"
            | "pv"
            | "multipv"
            | "currmove"
            | "currmovenumber"
            | "hashfull"
            | "nps"
            | "tbhits"
            | "cpuload"
            | "string"
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_bestmove() {
        let msg = parse_uci_message("bestmove e2e4 ponder e7e5").unwrap();
        assert_eq!(
            msg,
            UciMessage::BestMove {
                mv: "e2e4".to_string(),
                ponder: Some("e7e5".to_string()),
            }
        );
    }

    #[test]
    fn test_parse_bestmove_none() {
        let msg = parse_uci_message("bestmove (none)").unwrap();
        assert_eq!(
            msg,
            UciMessage::BestMove {
                mv: String::new(),
                ponder: None,
            }
        );
    }

    #[test]
    fn test_parse_info() {
        let msg = parse_uci_message("info depth 12 score cp 35 nodes 15234 pv e2e4 e7e5").unwrap();
        match msg {
            UciMessage::Info(info) => {
                assert_eq!(info.depth, Some(12));
                assert!(matches!(info.score, Some(Score::Centipawns(35))));
                assert_eq!(info.nodes, Some(15234));
                assert_eq!(info.pv, vec!["e2e4", "e7e5"]);
            }
            _ => panic!("Wrong message type"),
        }
    }

    #[test]
    fn test_parse_info_string_is_ignored() {
        let msg = parse_uci_message("info string depth 3 is not a depth").unwrap();
        assert_eq!(msg, UciMessage::Info(SearchInfo::default()));
    }

    #[test]
    fn test_unknown_message() {
        assert!(parse_uci_message("option name Hash type spin").is_err());
    }
}
