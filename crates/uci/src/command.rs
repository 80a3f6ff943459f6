//! UCI command formatting.

use serde::{Deserialize, Serialize};

/// Termination policy for a search.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GoLimit {
    /// Search for exactly this many milliseconds.
    MoveTime(u64),
    /// Search to this depth in plies.
    Depth(u32),
}

/// Commands sent from GUI to engine.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineCommand {
    /// Initialize UCI mode.
    Uci,
    /// Check if engine is ready.
    IsReady,
    /// Clear internal state (hash tables) for a new game.
    NewGame,
    /// Set an engine option.
    SetOption { name: String, value: String },
    /// Set up a position from a FEN string.
    Position { fen: String },
    /// Start calculating.
    Go(GoLimit),
    /// Abort the current search.
    Stop,
    /// Quit the engine.
    Quit,
}

impl EngineCommand {
    /// Convenience constructor for `setoption`.
    pub fn set_option(name: &str, value: impl ToString) -> Self {
        EngineCommand::SetOption {
            name: name.to_string(),
            value: value.to_string(),
        }
    }

    /// Format the command as one UCI wire line (without trailing newline).
    pub fn to_uci(&self) -> String {
        match self {
            EngineCommand::Uci => "uci".to_string(),
            EngineCommand::IsReady => "isready".to_string(),
            EngineCommand::NewGame => "ucinewgame".to_string(),
            EngineCommand::SetOption { name, value } => {
                format!("setoption name {} value {}", name, value)
            }
            EngineCommand::Position { fen } => format!("position fen {}", fen),
            EngineCommand::Go(GoLimit::MoveTime(ms)) => format!("go movetime {}", ms),
            EngineCommand::Go(GoLimit::Depth(plies)) => format!("go depth {}", plies),
            EngineCommand::Stop => "stop".to_string(),
            EngineCommand::Quit => "quit".to_string(),
        }
    }
}

impl std::fmt::Display for EngineCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.to_uci())
    }
}
