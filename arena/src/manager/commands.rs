use std::fmt;
use std::str::FromStr;

use engine::EngineConfig;

use super::Assignment;
use crate::record::GameRecord;

/// Command vocabulary of an interactive front end.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UiCommand {
    /// Reset the position to the start of the current game.
    New,
    Stop,
    /// Play the current best move right away.
    Now,
    /// Reset the position and tell the engines a new game starts.
    Newgame,
    /// The engine plays the side to move once.
    Play,
    /// Infinite analysis of the current position.
    Analyze,
    /// The engines play both sides until the game ends.
    Auto,
    /// Hand the board back to the user.
    Manual,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Unknown command: {0}")]
pub struct UnknownCommand(pub String);

impl FromStr for UiCommand {
    type Err = UnknownCommand;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "new" => Ok(Self::New),
            "stop" => Ok(Self::Stop),
            "now" => Ok(Self::Now),
            "newgame" => Ok(Self::Newgame),
            "play" => Ok(Self::Play),
            "analyze" => Ok(Self::Analyze),
            "auto" => Ok(Self::Auto),
            "manual" => Ok(Self::Manual),
            _ => Err(UnknownCommand(s.to_string())),
        }
    }
}

impl fmt::Display for UiCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::New => "new",
            Self::Stop => "stop",
            Self::Now => "now",
            Self::Newgame => "newgame",
            Self::Play => "play",
            Self::Analyze => "analyze",
            Self::Auto => "auto",
            Self::Manual => "manual",
        };
        f.write_str(name)
    }
}

/// Messages from the control plane to a manager's consumer loop.
pub(crate) enum Control {
    Start(Assignment),
    /// Bind engines and a position without a task source.
    Load {
        engines: Vec<EngineConfig>,
        record: GameRecord,
    },
    Stop,
    MoveNow,
    Pause,
    Resume,
    Retire,
    Abort,
    Teardown,
    Ui(UiCommand),
}

impl fmt::Debug for Control {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Start(assignment) => write!(f, "Start({})", assignment.source.name()),
            Self::Load { engines, .. } => write!(f, "Load({} engines)", engines.len()),
            Self::Stop => f.write_str("Stop"),
            Self::MoveNow => f.write_str("MoveNow"),
            Self::Pause => f.write_str("Pause"),
            Self::Resume => f.write_str("Resume"),
            Self::Retire => f.write_str("Retire"),
            Self::Abort => f.write_str("Abort"),
            Self::Teardown => f.write_str("Teardown"),
            Self::Ui(command) => write!(f, "Ui({})", command),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_is_case_insensitive() {
        assert_eq!("NewGame".parse::<UiCommand>().unwrap(), UiCommand::Newgame);
        assert_eq!(" ANALYZE ".parse::<UiCommand>().unwrap(), UiCommand::Analyze);
        assert_eq!("manual".parse::<UiCommand>().unwrap(), UiCommand::Manual);
    }

    #[test]
    fn test_unknown_command() {
        let err = "resign".parse::<UiCommand>().unwrap_err();
        assert_eq!(err, UnknownCommand("resign".to_string()));
    }

    #[test]
    fn test_display_parses_back() {
        for command in [UiCommand::New, UiCommand::Now, UiCommand::Auto, UiCommand::Stop] {
            assert_eq!(command.to_string().parse::<UiCommand>().unwrap(), command);
        }
    }
}
