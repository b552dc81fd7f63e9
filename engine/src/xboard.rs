//! Chess Engine Communication Protocol (xboard / winboard, protover 2)

use crate::{GoLimits, PositionSetup, Score, SearchInfo};

/// Scores at or beyond this magnitude encode a mate distance.
const MATE_SCORE: i32 = 100_000;

/// Incoming message from an xboard engine
#[derive(Debug, Clone, PartialEq)]
pub enum XBoardMessage {
    /// `feature` line, as (name, value) pairs.
    Feature(Vec<(String, String)>),
    Pong(u32),
    Move(String),
    /// Thinking output: `ply score time nodes pv...`
    Thinking(SearchInfo),
    /// `Illegal move` and `Error` replies.
    Complaint(String),
    Resign,
}

/// Parse one engine line.
pub fn parse_xboard_message(line: &str) -> Option<XBoardMessage> {
    let line = line.trim();
    let mut tokens = line.split_whitespace();
    let first = tokens.next()?;

    match first {
        "feature" => Some(XBoardMessage::Feature(parse_features(&line["feature".len()..]))),
        "pong" => tokens.next()?.parse().ok().map(XBoardMessage::Pong),
        "move" => tokens.next().map(|mv| XBoardMessage::Move(mv.to_string())),
        "resign" => Some(XBoardMessage::Resign),
        _ if first.starts_with("Illegal") || first.starts_with("Error") => {
            Some(XBoardMessage::Complaint(line.to_string()))
        }
        _ if first.starts_with(|c: char| c.is_ascii_digit()) => {
            parse_thinking(line).map(XBoardMessage::Thinking)
        }
        _ => None,
    }
}

/// True when a `feature` list ends the handshake.
pub fn features_done(features: &[(String, String)]) -> bool {
    features.iter().any(|(name, value)| name == "done" && value == "1")
}

/// Reply to each announced feature. `usermove` is the one we do not speak.
pub fn feature_replies(features: &[(String, String)]) -> Vec<String> {
    features
        .iter()
        .filter(|(name, _)| name != "done")
        .map(|(name, _)| {
            if name == "usermove" {
                format!("rejected {}", name)
            } else {
                format!("accepted {}", name)
            }
        })
        .collect()
}

fn parse_features(rest: &str) -> Vec<(String, String)> {
    let mut features = Vec::new();
    let mut chars = rest.chars().peekable();

    loop {
        while chars.peek().is_some_and(|c| c.is_whitespace()) {
            chars.next();
        }
        let name: String = chars.by_ref().take_while(|c| *c != '=').collect();
        if name.trim().is_empty() {
            break;
        }

        let value = if chars.peek() == Some(&'"') {
            chars.next();
            chars.by_ref().take_while(|c| *c != '"').collect()
        } else {
            chars.by_ref().take_while(|c| !c.is_whitespace()).collect()
        };
        features.push((name.trim().to_string(), value));
    }

    features
}

fn parse_thinking(line: &str) -> Option<SearchInfo> {
    let mut tokens = line.split_whitespace();
    let ply = tokens
        .next()?
        .trim_end_matches(['.', '&'])
        .parse()
        .ok()?;
    let score: i32 = tokens.next()?.parse().ok()?;
    let centiseconds: u64 = tokens.next()?.parse().ok()?;
    let nodes: u64 = tokens.next()?.parse().ok()?;

    let score = if score.abs() >= MATE_SCORE {
        let plies = MATE_SCORE + 1000 - score.abs();
        let moves = (plies.max(1) + 1) / 2;
        Score::Mate(if score > 0 { moves } else { -moves })
    } else {
        Score::Centipawns(score)
    };

    let pv = tokens
        .filter(|t| !t.ends_with('.') && !t.starts_with('('))
        .map(|t| t.to_string())
        .collect();

    Some(SearchInfo {
        depth: Some(ply),
        time_ms: Some(centiseconds * 10),
        nodes: Some(nodes),
        score: Some(score),
        pv,
        ..Default::default()
    })
}

pub fn handshake_commands() -> Vec<String> {
    vec!["xboard".to_string(), "protover 2".to_string()]
}

/// Commands that start a fresh game in force mode.
pub fn new_game_commands() -> Vec<String> {
    vec![
        "new".to_string(),
        "force".to_string(),
        "post".to_string(),
        "easy".to_string(),
    ]
}

/// Commands that load `setup` into an engine sitting in force mode.
pub fn position_commands(setup: &PositionSetup) -> Vec<String> {
    let mut commands = vec![
        "force".to_string(),
        format!("setboard {}", setup.start_fen.trim()),
    ];
    commands.extend(setup.moves.iter().cloned());
    commands
}

/// Commands that start one search on the side to move.
pub fn search_commands(limits: &GoLimits, white_to_move: bool, analyze: bool) -> Vec<String> {
    if analyze || limits.infinite {
        return vec!["post".to_string(), "analyze".to_string()];
    }

    let mut commands = Vec::new();
    if let Some(movetime) = limits.move_time_ms {
        // `st` takes whole seconds.
        commands.push(format!("st {}", movetime.div_ceil(1000).max(1)));
    } else if limits.has_clock() {
        let own = limits.time_left_ms(white_to_move);
        let other = limits.time_left_ms(!white_to_move);
        let inc = limits.increment_ms(white_to_move);
        commands.push(format!(
            "level {} 0 {}",
            limits.moves_to_go,
            format_seconds(inc)
        ));
        commands.push(format!("time {}", own / 10));
        commands.push(format!("otim {}", other / 10));
    } else if limits.depth.is_none() {
        commands.push(format!(
            "st {}",
            crate::uci::DEFAULT_MOVE_TIME_MS.div_ceil(1000)
        ));
    }
    if let Some(depth) = limits.depth {
        commands.push(format!("sd {}", depth));
    }
    commands.push("go".to_string());
    commands
}

fn format_seconds(ms: u64) -> String {
    if ms % 1000 == 0 {
        (ms / 1000).to_string()
    } else {
        format!("{:.1}", ms as f64 / 1000.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_features() {
        let msg = parse_xboard_message(r#"feature myname="Crafty 25.2" setboard=1 done=1"#).unwrap();
        let XBoardMessage::Feature(features) = msg else {
            panic!("Wrong message type");
        };
        assert_eq!(features[0], ("myname".to_string(), "Crafty 25.2".to_string()));
        assert_eq!(features[1], ("setboard".to_string(), "1".to_string()));
        assert!(features_done(&features));
        assert_eq!(
            feature_replies(&features),
            vec!["accepted myname", "accepted setboard"]
        );
    }

    #[test]
    fn test_parse_move_and_pong() {
        assert_eq!(
            parse_xboard_message("move Nf3"),
            Some(XBoardMessage::Move("Nf3".to_string()))
        );
        assert_eq!(parse_xboard_message("pong 7"), Some(XBoardMessage::Pong(7)));
    }

    #[test]
    fn test_parse_thinking() {
        let msg = parse_xboard_message("9 156 1084 48000 Nf3 Nc6 Nc3").unwrap();
        let XBoardMessage::Thinking(info) = msg else {
            panic!("Wrong message type");
        };
        assert_eq!(info.depth, Some(9));
        assert_eq!(info.score, Some(Score::Centipawns(156)));
        assert_eq!(info.time_ms, Some(10840));
        assert_eq!(info.pv, vec!["Nf3", "Nc6", "Nc3"]);
    }

    #[test]
    fn test_complaints() {
        assert!(matches!(
            parse_xboard_message("Illegal move: e2e5"),
            Some(XBoardMessage::Complaint(_))
        ));
        assert_eq!(parse_xboard_message("tellics hello"), None);
    }

    #[test]
    fn test_search_commands_clock() {
        let limits = GoLimits {
            wtime_ms: 60_000,
            btime_ms: 30_000,
            winc_ms: 1500,
            binc_ms: 1500,
            has_time_control: true,
            ..Default::default()
        };
        assert_eq!(
            search_commands(&limits, false, false),
            vec!["level 0 0 1.5", "time 3000", "otim 6000", "go"]
        );
    }
}
