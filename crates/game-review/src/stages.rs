//! The three analysis-scheduling regimes.
//!
//! A game review runs in stages over one shared [`AnalysisSession`]:
//!
//! 1. [`forward_scan`]: every position from the first move to the last,
//!    time-bounded, uninterruptible.
//! 2. [`backward_scan`]: the same positions from the last move back to
//!    the first with a longer budget, interruptible between moves.
//! 3. [`LiveAnalysis`]: depth-bounded continuous analysis of whichever
//!    position the user is looking at.

use std::time::Duration;

use review_engine::{AnalysisRequest, AnalysisResult, AnalysisSession};
use serde::Serialize;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use uci::GoLimit;

/// Slack past the per-position time bound before a scan gives up waiting.
const COMPLETION_GRACE: Duration = Duration::from_secs(10);

/// Settled evaluation of a single position in the game.
#[derive(Debug, Clone, Serialize)]
pub struct PositionEval {
    /// Zero-based index into the scanned position list.
    pub index: usize,
    /// Evaluation in pawns from the side to move, mate mapped to its
    /// sentinel value.
    pub score: f32,
    pub is_mate: bool,
    /// Mate distance in plies when `is_mate`.
    pub mate_in: Option<i32>,
    pub best_line: Vec<String>,
    pub depth: u32,
}

impl PositionEval {
    fn from_result(index: usize, result: &AnalysisResult) -> Option<Self> {
        let line = result.best_line()?;
        Some(Self {
            index,
            score: line.score,
            is_mate: line.is_mate,
            mate_in: line.mate_in,
            best_line: line.moves.clone(),
            depth: result.depth,
        })
    }
}

/// Outcome of a [`backward_scan`].
#[derive(Debug, Clone, Serialize)]
pub struct BackwardOutcome {
    /// Completed evaluations, sorted by position index.
    pub evals: Vec<PositionEval>,
    /// True when the scan stopped early on request.
    pub interrupted: bool,
    /// Index of the position with the largest evaluation swing among the
    /// positions analyzed so far. The natural place to land after an
    /// interrupted scan.
    pub jump_to: Option<usize>,
}

/// First-pass scan: analyzes every position from the first move to the
/// last with a fixed time budget per position.
///
/// Runs to completion once started. Positions that fail to settle are
/// skipped rather than aborting the scan.
pub async fn forward_scan(
    session: &AnalysisSession,
    fens: &[String],
    movetime_ms: u64,
) -> Vec<PositionEval> {
    let mut evals = Vec::with_capacity(fens.len());
    for (index, fen) in fens.iter().enumerate() {
        if let Some(eval) = analyze_position(session, index, fen, movetime_ms).await {
            evals.push(eval);
        }
    }
    evals
}

/// Deep scan: analyzes the positions from the last move back to the
/// first. An interrupt stops the scan after the position in flight
/// settles; the outcome then points at the biggest swing seen so far.
pub async fn backward_scan(
    session: &AnalysisSession,
    fens: &[String],
    movetime_ms: u64,
    interrupt: &CancellationToken,
) -> BackwardOutcome {
    let mut evals: Vec<PositionEval> = Vec::with_capacity(fens.len());
    let mut interrupted = false;
    for (index, fen) in fens.iter().enumerate().rev() {
        if interrupt.is_cancelled() {
            tracing::info!(remaining = index + 1, "backward scan interrupted");
            interrupted = true;
            break;
        }
        if let Some(eval) = analyze_position(session, index, fen, movetime_ms).await {
            evals.push(eval);
        }
    }
    evals.sort_by_key(|e| e.index);
    let jump_to = biggest_swing(&evals);
    BackwardOutcome {
        evals,
        interrupted,
        jump_to,
    }
}

/// Position index after the largest absolute evaluation change between
/// consecutive positions. Expects `evals` sorted by index. Pairs with an
/// index gap (a skipped position in between) are not compared, since a
/// delta across the gap is not a single move's swing. `None` without at
/// least one adjacent pair; ties keep the earliest.
pub fn biggest_swing(evals: &[PositionEval]) -> Option<usize> {
    let mut best: Option<(usize, f32)> = None;
    for pair in evals.windows(2) {
        if pair[1].index != pair[0].index + 1 {
            continue;
        }
        let delta = (pair[1].score - pair[0].score).abs();
        match best {
            Some((_, best_delta)) if delta <= best_delta => {}
            _ => best = Some((pair[1].index, delta)),
        }
    }
    best.map(|(index, _)| index)
}

async fn analyze_position(
    session: &AnalysisSession,
    index: usize,
    fen: &str,
    movetime_ms: u64,
) -> Option<PositionEval> {
    if !session.is_ready() {
        tracing::warn!(index, "skipping position: session not ready");
        return None;
    }
    session.analyze(AnalysisRequest {
        fen: fen.to_string(),
        limit: GoLimit::MoveTime(movetime_ms),
    });
    let deadline = Duration::from_millis(movetime_ms) + COMPLETION_GRACE;
    if !session.wait_for_completion(deadline).await {
        tracing::warn!(index, "position analysis did not settle in time");
        session.stop();
        return None;
    }
    PositionEval::from_result(index, &session.latest_result())
}

/// Continuous interactive regime: depth-bounded analysis of one position
/// at a time, re-invoked as the user navigates.
///
/// Each [`goto`](Self::goto) supersedes the previous search, so rapid
/// navigation never queues work behind stale positions.
pub struct LiveAnalysis<'a> {
    session: &'a AnalysisSession,
    depth: u32,
}

impl<'a> LiveAnalysis<'a> {
    pub fn new(session: &'a AnalysisSession, depth: u32) -> Self {
        Self { session, depth }
    }

    /// Switches analysis to `fen`, cancelling whatever was in flight.
    pub fn goto(&self, fen: &str) {
        self.session.analyze(AnalysisRequest {
            fen: fen.to_string(),
            limit: GoLimit::Depth(self.depth),
        });
    }

    /// Stream of partial result snapshots for the current position.
    pub fn results(&self) -> watch::Receiver<AnalysisResult> {
        self.session.results()
    }

    pub fn stop(&self) {
        self.session.stop();
    }
}
