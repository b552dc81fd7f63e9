use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::protocol::EngineProtocol;

/// How to launch and configure one engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Display name, also used in game record tags and standings.
    pub name: String,
    /// Executable to spawn.
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub working_dir: Option<PathBuf>,
    #[serde(default)]
    pub protocol: EngineProtocol,
    /// Extra engine options, sent verbatim after the handshake.
    #[serde(default)]
    pub options: BTreeMap<String, String>,
    /// Allow speculative search during the opponent's time.
    #[serde(default)]
    pub ponder: bool,
    #[serde(default)]
    pub threads: Option<u32>,
    #[serde(default)]
    pub hash_mb: Option<u32>,
}

impl EngineConfig {
    pub fn new(name: impl Into<String>, command: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            command: command.into(),
            args: Vec::new(),
            working_dir: None,
            protocol: EngineProtocol::default(),
            options: BTreeMap::new(),
            ponder: false,
            threads: None,
            hash_mb: None,
        }
    }

    pub fn with_protocol(mut self, protocol: EngineProtocol) -> Self {
        self.protocol = protocol;
        self
    }

    pub fn with_ponder(mut self, ponder: bool) -> Self {
        self.ponder = ponder;
        self
    }

    pub fn with_option(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.options.insert(name.into(), value.into());
        self
    }

    /// Thread count clamped to what engines commonly accept.
    pub fn clamped_threads(&self) -> Option<u32> {
        self.threads.map(|t| t.clamp(1, 512))
    }

    /// Hash size in MB clamped to a sane range.
    pub fn clamped_hash_mb(&self) -> Option<u32> {
        self.hash_mb.map(|h| h.clamp(1, 65536))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deserialize_minimal() {
        let config: EngineConfig =
            serde_json::from_str(r#"{"name": "sf", "command": "stockfish"}"#).unwrap();
        assert_eq!(config.protocol, EngineProtocol::Uci);
        assert!(!config.ponder);
        assert!(config.options.is_empty());
    }

    #[test]
    fn test_deserialize_xboard_with_options() {
        let config: EngineConfig = serde_json::from_str(
            r#"{"name": "crafty", "command": "crafty", "protocol": "xboard",
                "options": {"Style": "Aggressive"}, "threads": 0}"#,
        )
        .unwrap();
        assert_eq!(config.protocol, EngineProtocol::XBoard);
        assert_eq!(config.options.get("Style").map(String::as_str), Some("Aggressive"));
        assert_eq!(config.clamped_threads(), Some(1));
    }
}
