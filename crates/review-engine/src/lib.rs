//! Engine process management and analysis session control.
//!
//! This crate owns the hard part of driving a UCI analysis engine: a
//! long-lived external process whose liveness cannot be guaranteed, a single
//! shared stdin/stdout pair that concurrent analysis requests must be
//! serialized against, and a stream of partial, interleaved progress lines
//! that have to be folded into coherent snapshots.
//!
//! # Overview
//!
//! - [`EngineProcess`] - process lifecycle and the line-oriented transport
//!   with bounded, cancellation-aware reads
//! - [`ResultAggregator`] - folds streamed `info` lines into
//!   [`AnalysisResult`] snapshots published through a watch channel
//! - [`AnalysisSession`] - the session controller: handshake, configuration
//!   clamping, at-most-one-in-flight analysis, restart and shutdown
//!
//! Every wait in this crate has an explicit ceiling. An unresponsive or dead
//! engine process surfaces as a timeout or a `Crashed` state, never as a
//! caller hanging forever.
//!
//! # Example
//!
//! ```ignore
//! use review_engine::{AnalysisRequest, AnalysisSession, SafetyLimits};
//! use uci::GoLimit;
//!
//! let session = AnalysisSession::new(None, SafetyLimits::default());
//! session.initialize().await?;
//! session.analyze(AnalysisRequest {
//!     fen: "rnbqkbnr/pppppppp/8/8/8/8/PPPPPPPP/RNBQKBNR w KQkq - 0 1".into(),
//!     limit: GoLimit::MoveTime(1000),
//! });
//! session.wait_for_completion(std::time::Duration::from_secs(2)).await;
//! println!("{:?}", session.latest_result());
//! ```

pub mod config;
pub mod process;
pub mod result;
pub mod session;

pub use config::{EngineConfig, SafetyLimits};
pub use process::{locate_engine, EngineError, EngineProcess, ReadEvent};
pub use result::{AnalysisResult, PvLine, ResultAggregator, MATE_SCORE, MAX_PV_MOVES};
pub use session::{AnalysisRequest, AnalysisSession, SessionState};
