//! UCI (Universal Chess Interface) protocol types for driving analysis engines.
//!
//! This crate provides the GUI side of the UCI protocol: formatting commands
//! sent to an engine subprocess and parsing the line-oriented output the
//! engine streams back.
//!
//! # Commands sent to the engine
//!
//! - `uci` - Initialize engine, get id
//! - `isready` / `readyok` - Synchronization
//! - `ucinewgame` - Clear engine internal state
//! - `setoption name <name> value <value>` - Configure engine
//! - `position fen <fen>` - Set position
//! - `go [movetime <ms>] [depth <d>]` - Start search
//! - `stop` - Abort search
//! - `quit` - Exit engine
//!
//! # Output parsed from the engine
//!
//! `id name`, `uciok`, `readyok`, `info ...` progress lines, and the terminal
//! `bestmove` line. Parsing is tolerant: unrecognized lines yield `None` and
//! malformed fields are skipped, since a single garbled line must not abort
//! an otherwise healthy search.

mod command;
mod info;

pub use command::{EngineCommand, GoLimit};
pub use info::{EngineInfo, Score};

/// Messages sent from engine to GUI.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineMessage {
    /// Engine identification.
    Id { name: String },
    /// UCI initialization complete.
    UciOk,
    /// Engine is ready.
    ReadyOk,
    /// Search information.
    Info(EngineInfo),
    /// Best move found; terminates a search.
    BestMove { mv: String, ponder: Option<String> },
}

impl EngineMessage {
    /// Parse one line of engine output.
    ///
    /// Returns `None` for lines this crate does not understand (option
    /// listings, copyright banners, debug strings). Callers are expected to
    /// skip those.
    pub fn parse(line: &str) -> Option<Self> {
        let line = line.trim();

        if line == "uciok" {
            return Some(EngineMessage::UciOk);
        }
        if line == "readyok" {
            return Some(EngineMessage::ReadyOk);
        }
        if let Some(name) = line.strip_prefix("id name ") {
            return Some(EngineMessage::Id {
                name: name.trim().to_string(),
            });
        }
        if let Some(rest) = line.strip_prefix("bestmove ") {
            let mut parts = rest.split_whitespace();
            let mv = parts.next()?.to_string();
            let ponder = match (parts.next(), parts.next()) {
                (Some("ponder"), Some(p)) => Some(p.to_string()),
                _ => None,
            };
            return Some(EngineMessage::BestMove { mv, ponder });
        }
        if line.starts_with("info") {
            return EngineInfo::parse(line).map(EngineMessage::Info);
        }

        None
    }
}
