pub mod parser;

pub use parser::{parse_uci_message, UciMessage};

use crate::{EngineConfig, GoLimits, PositionSetup};

/// Search time used when a compute request carries no limit at all.
pub const DEFAULT_MOVE_TIME_MS: u64 = 1000;

#[derive(Debug, thiserror::Error)]
pub enum UciError {
    #[error("Malformed UCI message: {0}")]
    MalformedMessage(String),
    #[error("Unknown UCI message: {0}")]
    UnknownMessage(String),
}

/// `setoption` commands for the configured options.
pub fn option_commands(config: &EngineConfig) -> Vec<String> {
    let mut commands = Vec::new();
    if let Some(threads) = config.clamped_threads() {
        commands.push(format!("setoption name Threads value {}", threads));
    }
    if let Some(hash_mb) = config.clamped_hash_mb() {
        commands.push(format!("setoption name Hash value {}", hash_mb));
    }
    if config.ponder {
        commands.push("setoption name Ponder value true".to_string());
    }
    for (name, value) in &config.options {
        if value.is_empty() {
            commands.push(format!("setoption name {}", name));
        } else {
            commands.push(format!("setoption name {} value {}", name, value));
        }
    }
    commands
}

pub fn position_command(setup: &PositionSetup) -> String {
    let mut cmd = if setup.is_standard_start() {
        "position startpos".to_string()
    } else {
        format!("position fen {}", setup.start_fen.trim())
    };
    if !setup.moves.is_empty() {
        cmd.push_str(" moves");
        for mv in &setup.moves {
            cmd.push(' ');
            cmd.push_str(mv);
        }
    }
    cmd
}

/// `go` command for one search. `ponder` prefixes the limits with `ponder`.
pub fn go_command(limits: &GoLimits, analyze: bool, ponder: bool) -> String {
    if analyze || limits.infinite {
        return "go infinite".to_string();
    }

    let mut cmd = "go".to_string();
    if ponder {
        cmd.push_str(" ponder");
    }

    let mut limited = false;
    if let Some(movetime) = limits.move_time_ms {
        cmd.push_str(&format!(" movetime {}", movetime));
        limited = true;
    } else if limits.has_clock() {
        cmd.push_str(&format!(
            " wtime {} btime {} winc {} binc {}",
            limits.wtime_ms, limits.btime_ms, limits.winc_ms, limits.binc_ms
        ));
        if limits.moves_to_go > 0 {
            cmd.push_str(&format!(" movestogo {}", limits.moves_to_go));
        }
        limited = true;
    }
    if let Some(depth) = limits.depth {
        cmd.push_str(&format!(" depth {}", depth));
        limited = true;
    }
    if let Some(nodes) = limits.nodes {
        cmd.push_str(&format!(" nodes {}", nodes));
        limited = true;
    }
    if let Some(mate) = limits.mate {
        cmd.push_str(&format!(" mate {}", mate));
        limited = true;
    }
    if !limited {
        cmd.push_str(&format!(" movetime {}", DEFAULT_MOVE_TIME_MS));
    }
    cmd
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_position_command() {
        let setup = PositionSetup {
            start_fen: chess::STARTING_FEN.to_string(),
            moves: vec!["e2e4".to_string(), "e7e5".to_string()],
        };
        assert_eq!(position_command(&setup), "position startpos moves e2e4 e7e5");

        let custom = PositionSetup {
            start_fen: "8/8/8/4k3/8/4K3/8/4R3 w - - 0 1".to_string(),
            moves: Vec::new(),
        };
        assert_eq!(
            position_command(&custom),
            "position fen 8/8/8/4k3/8/4K3/8/4R3 w - - 0 1"
        );
    }

    #[test]
    fn test_go_command_clock() {
        let limits = GoLimits {
            wtime_ms: 300_000,
            btime_ms: 290_000,
            winc_ms: 2000,
            binc_ms: 2000,
            moves_to_go: 40,
            has_time_control: true,
            ..Default::default()
        };
        assert_eq!(
            go_command(&limits, false, false),
            "go wtime 300000 btime 290000 winc 2000 binc 2000 movestogo 40"
        );
        assert!(go_command(&limits, false, true).starts_with("go ponder wtime"));
        assert_eq!(go_command(&limits, true, false), "go infinite");
    }

    #[test]
    fn test_go_command_without_limits_uses_default() {
        assert_eq!(
            go_command(&GoLimits::default(), false, false),
            format!("go movetime {}", DEFAULT_MOVE_TIME_MS)
        );
    }

    #[test]
    fn test_option_commands() {
        let mut config = EngineConfig::new("sf", "stockfish").with_option("Skill Level", "5");
        config.threads = Some(4);
        let commands = option_commands(&config);
        assert_eq!(commands[0], "setoption name Threads value 4");
        assert_eq!(commands[1], "setoption name Skill Level value 5");
    }
}
