//! Result aggregation: streamed `info` lines into analysis snapshots.
//!
//! Engines in MultiPV mode interleave lines for different variation ranks at
//! different depths. The aggregator keeps one line per rank, replacing on
//! arrival, so readers always see a monotonically refining picture of the
//! current search.

use std::collections::BTreeMap;
use std::sync::Mutex;

use serde::Serialize;
use tokio::sync::watch;
use uci::{EngineInfo, Score};

/// Maximum moves kept per principal variation, purely for display.
pub const MAX_PV_MOVES: usize = 8;

/// Saturating score in pawns assigned to mate lines, signed by the mating side.
pub const MATE_SCORE: f32 = 100.0;

/// One principal variation at a given rank.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PvLine {
    /// Variation rank, 1-based. Unique within a snapshot.
    pub rank: u32,
    /// Evaluation in pawns; mate lines saturate at [`MATE_SCORE`].
    pub score: f32,
    /// Whether this line ends in forced mate.
    pub is_mate: bool,
    /// Exact mate distance in plies when `is_mate`, sign = side with the mate.
    pub mate_in: Option<i32>,
    /// Move sequence, truncated to [`MAX_PV_MOVES`].
    pub moves: Vec<String>,
}

impl PvLine {
    fn from_info(info: &EngineInfo, score: Score) -> Self {
        let (score, is_mate, mate_in) = match score {
            Score::Cp(cp) => (cp as f32 / 100.0, false, None),
            Score::Mate(m) => {
                let sentinel = if m >= 0 { MATE_SCORE } else { -MATE_SCORE };
                (sentinel, true, Some(m))
            }
        };
        Self {
            rank: info.multipv.unwrap_or(1),
            score,
            is_mate,
            mate_in,
            moves: info.pv.iter().take(MAX_PV_MOVES).cloned().collect(),
        }
    }
}

/// Immutable snapshot of an in-flight or completed search.
#[derive(Debug, Clone, Default, Serialize)]
pub struct AnalysisResult {
    /// Search depth from the most recently parsed line.
    pub depth: u32,
    /// Total nodes searched, last known value.
    pub nodes: u64,
    /// Nodes per second, last known value.
    pub nps: u64,
    /// One line per rank seen so far, sorted by rank.
    pub lines: Vec<PvLine>,
}

impl AnalysisResult {
    /// The rank-1 line, when one has been reported.
    pub fn best_line(&self) -> Option<&PvLine> {
        self.lines.first()
    }

    /// No progress lines folded in yet.
    pub fn is_empty(&self) -> bool {
        self.lines.is_empty() && self.depth == 0
    }
}

#[derive(Default)]
struct AggState {
    depth: u32,
    nodes: u64,
    nps: u64,
    lines: BTreeMap<u32, PvLine>,
}

impl AggState {
    fn snapshot(&self) -> AnalysisResult {
        AnalysisResult {
            depth: self.depth,
            nodes: self.nodes,
            nps: self.nps,
            lines: self.lines.values().cloned().collect(),
        }
    }
}

/// Folds parsed progress lines into snapshots and publishes them.
///
/// Mutation of the rank map and emission of the new snapshot happen under one
/// critical section, independent of the search lock, so a reader never blocks
/// on an in-progress search.
pub struct ResultAggregator {
    state: Mutex<AggState>,
    tx: watch::Sender<AnalysisResult>,
}

impl Default for ResultAggregator {
    fn default() -> Self {
        Self::new()
    }
}

impl ResultAggregator {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(AnalysisResult::default());
        Self {
            state: Mutex::new(AggState::default()),
            tx,
        }
    }

    /// Fold one parsed line into the current search's state.
    ///
    /// Depth, nodes, and nps retain their last known values when absent from
    /// a line. A line carrying a score replaces the stored line at its rank
    /// (rank defaults to 1 when the engine omits `multipv`).
    pub fn apply(&self, info: &EngineInfo) {
        let snapshot = {
            let mut state = self.state.lock().expect("aggregator lock poisoned");
            if let Some(depth) = info.depth {
                state.depth = depth;
            }
            if let Some(nodes) = info.nodes {
                state.nodes = nodes;
            }
            if let Some(nps) = info.nps {
                state.nps = nps;
            }
            if let Some(score) = info.score {
                let line = PvLine::from_info(info, score);
                state.lines.insert(line.rank, line);
            }
            state.snapshot()
        };
        self.tx.send_replace(snapshot);
    }

    /// Reset for a new search and publish an empty snapshot.
    pub fn clear(&self) {
        let mut state = self.state.lock().expect("aggregator lock poisoned");
        *state = AggState::default();
        self.tx.send_replace(AnalysisResult::default());
    }

    /// Observe every published snapshot.
    pub fn subscribe(&self) -> watch::Receiver<AnalysisResult> {
        self.tx.subscribe()
    }

    /// The most recently published snapshot.
    pub fn latest(&self) -> AnalysisResult {
        self.tx.borrow().clone()
    }
}
