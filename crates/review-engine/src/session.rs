//! Analysis session controller.
//!
//! The session is the only component that talks to the engine process during
//! an active search. It owns the handshake state machine, guarantees at most
//! one in-flight analysis regardless of how many requests arrive, and exposes
//! the stream of refining snapshots through the aggregator's watch channel.
//!
//! Serialization works through two cooperating mechanisms: the engine mutex
//! is held by a search task for its full duration (readiness sync, transmit,
//! stream-read), and a cancellation token per task is cancelled before its
//! successor is spawned. A superseded task observes cancellation at its next
//! poll boundary, unwinds, and releases the mutex to the queued successor.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use tokio::sync::{watch, Mutex};
use tokio_util::sync::CancellationToken;
use uci::{EngineCommand, EngineMessage, GoLimit};

use crate::config::{EngineConfig, SafetyLimits};
use crate::process::{
    locate_engine, CommandSender, EngineError, EngineProcess, ReadEvent, POLL_INTERVAL,
};
use crate::result::{AnalysisResult, ResultAggregator};

/// Lifecycle state of the engine session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// No process running.
    Uninitialized,
    /// Process spawned, UCI handshake in progress.
    Handshaking,
    /// Handshake complete, accepting analysis requests.
    Ready,
    /// A search is streaming results.
    Analyzing,
    /// The process stopped producing output. Never auto-healed; requires an
    /// explicit [`AnalysisSession::restart`].
    Crashed,
}

/// One analysis request: a position and a termination policy.
#[derive(Debug, Clone)]
pub struct AnalysisRequest {
    /// Position descriptor in FEN notation.
    pub fen: String,
    /// Time-bounded or depth-bounded search.
    pub limit: GoLimit,
}

/// Poll ceiling on the readiness acknowledgement wait.
pub const READY_POLL_LIMIT: u32 = 50;

// Extra quiet polls granted after readyok for a trailing bestmove
const BESTMOVE_DRAIN_POLLS: u32 = 5;

const HANDSHAKE_POLL: Duration = Duration::from_millis(100);
// Cold engine starts (NNUE net load) can take several seconds
const HANDSHAKE_POLL_LIMIT: u32 = 100;
// Ceiling on lines read while waiting for a handshake token
const HANDSHAKE_LINE_LIMIT: u32 = 1000;
const TERMINATE_GRACE: Duration = Duration::from_secs(1);
const RESTART_SETTLE: Duration = Duration::from_millis(300);
// Slack past the requested movetime before a silent engine is considered stalled
const IDLE_GRACE: Duration = Duration::from_secs(10);
const DEPTH_IDLE_LIMIT: Duration = Duration::from_secs(60);

struct SessionInner {
    configured_path: Option<PathBuf>,
    limits: SafetyLimits,
    /// The analysis lock: held by one search task for its full duration.
    engine: Mutex<Option<EngineProcess>>,
    /// Lock-free transmit path for `stop()` and `configure()`.
    sender: StdMutex<Option<CommandSender>>,
    state_tx: watch::Sender<SessionState>,
    aggregator: ResultAggregator,
    current: StdMutex<Option<CancellationToken>>,
    /// Count of live analysis tasks. Lives inside the watch so that
    /// increment, decrement, and publication are each one atomic step.
    active_tx: watch::Sender<usize>,
    /// A search was abandoned without its terminal `bestmove` being read;
    /// the next readiness sync must consume that line if it still arrives.
    stale_bestmove: AtomicBool,
    engine_name: StdMutex<Option<String>>,
}

impl SessionInner {
    fn set_state(&self, state: SessionState) {
        self.state_tx.send_replace(state);
    }

    fn state(&self) -> SessionState {
        *self.state_tx.borrow()
    }
}

/// Controller for one engine process and its analysis requests.
///
/// Cheap to clone via the internal `Arc` would be possible, but ownership is
/// deliberately single: collaborators reach the session by reference and the
/// process dies with it.
pub struct AnalysisSession {
    inner: Arc<SessionInner>,
}

impl AnalysisSession {
    /// Create a session. No process is spawned until [`initialize`](Self::initialize).
    ///
    /// `configured_path` overrides engine discovery; `None` probes known
    /// install locations and `PATH`.
    pub fn new(configured_path: Option<PathBuf>, limits: SafetyLimits) -> Self {
        let (state_tx, _) = watch::channel(SessionState::Uninitialized);
        let (active_tx, _) = watch::channel(0usize);
        Self {
            inner: Arc::new(SessionInner {
                configured_path,
                limits,
                engine: Mutex::new(None),
                sender: StdMutex::new(None),
                state_tx,
                aggregator: ResultAggregator::new(),
                current: StdMutex::new(None),
                active_tx,
                stale_bestmove: AtomicBool::new(false),
                engine_name: StdMutex::new(None),
            }),
        }
    }

    /// Locate, spawn, and handshake the engine process.
    ///
    /// On success the session is `Ready`. Spawn and handshake failures leave
    /// it `Uninitialized` (recoverable: the caller may retry or surface "not
    /// installed" to the user). A `Crashed` session is refused; it heals only
    /// through [`restart`](Self::restart).
    pub async fn initialize(&self) -> Result<(), EngineError> {
        if self.inner.state() == SessionState::Crashed {
            return Err(EngineError::InitFailed(
                "session crashed, explicit restart required".to_string(),
            ));
        }
        let mut engine_slot = self.inner.engine.lock().await;
        if engine_slot.is_some() {
            return Ok(());
        }

        let path = locate_engine(self.inner.configured_path.as_deref())?;
        self.inner.set_state(SessionState::Handshaking);

        let mut engine = match EngineProcess::spawn(&path) {
            Ok(engine) => engine,
            Err(e) => {
                tracing::warn!(error = %e, path = %path.display(), "engine spawn failed");
                self.inner.set_state(SessionState::Uninitialized);
                return Err(e);
            }
        };
        tracing::info!(path = %path.display(), "engine process spawned");

        let none = CancellationToken::new();

        // uci -> uciok, capturing the engine's reported name
        engine.send(&EngineCommand::Uci);
        let mut polls = 0;
        let mut lines_read = 0;
        loop {
            match engine.read_line_within(HANDSHAKE_POLL, &none).await {
                ReadEvent::Line(line) => {
                    lines_read += 1;
                    if lines_read > HANDSHAKE_LINE_LIMIT {
                        return self.fail_handshake(engine, "too many lines without uciok").await;
                    }
                    match EngineMessage::parse(&line) {
                        Some(EngineMessage::Id { name }) => {
                            *self
                                .inner
                                .engine_name
                                .lock()
                                .expect("engine name lock poisoned") = Some(name);
                        }
                        Some(EngineMessage::UciOk) => break,
                        _ => {}
                    }
                }
                ReadEvent::Timeout => {
                    polls += 1;
                    if polls > HANDSHAKE_POLL_LIMIT {
                        return self.fail_handshake(engine, "no uciok").await;
                    }
                }
                ReadEvent::Closed => {
                    return self.fail_handshake(engine, "eof before uciok").await;
                }
                ReadEvent::Cancelled => unreachable!("handshake token is never cancelled"),
            }
        }

        // isready -> readyok
        engine.send(&EngineCommand::IsReady);
        let mut polls = 0;
        let mut lines_read = 0;
        loop {
            match engine.read_line_within(HANDSHAKE_POLL, &none).await {
                ReadEvent::Line(line) => {
                    lines_read += 1;
                    if lines_read > HANDSHAKE_LINE_LIMIT {
                        return self
                            .fail_handshake(engine, "too many lines without readyok")
                            .await;
                    }
                    if let Some(EngineMessage::ReadyOk) = EngineMessage::parse(&line) {
                        break;
                    }
                }
                ReadEvent::Timeout => {
                    polls += 1;
                    if polls > HANDSHAKE_POLL_LIMIT {
                        return self.fail_handshake(engine, "no readyok").await;
                    }
                }
                ReadEvent::Closed => {
                    return self.fail_handshake(engine, "eof before readyok").await;
                }
                ReadEvent::Cancelled => unreachable!("handshake token is never cancelled"),
            }
        }

        *self.inner.sender.lock().expect("sender lock poisoned") = Some(engine.sender());
        *engine_slot = Some(engine);
        self.inner.set_state(SessionState::Ready);
        tracing::info!(name = ?self.engine_name(), "engine ready");
        Ok(())
    }

    async fn fail_handshake(
        &self,
        engine: EngineProcess,
        reason: &str,
    ) -> Result<(), EngineError> {
        tracing::warn!(reason, "engine handshake failed");
        engine.terminate(TERMINATE_GRACE).await;
        self.inner.set_state(SessionState::Uninitialized);
        Err(EngineError::InitFailed(reason.to_string()))
    }

    /// Apply engine options, clamped to the session's safety limits.
    ///
    /// Issues `stop` first so configuration never races a running search,
    /// then `ucinewgame` so stale hash entries cannot leak between games.
    pub fn configure(&self, config: &EngineConfig) {
        let clamped = self.inner.limits.clamp(config);
        let sender = self.inner.sender.lock().expect("sender lock poisoned");
        let Some(sender) = sender.as_ref() else {
            tracing::warn!("configure ignored: no engine process");
            return;
        };

        sender.send(&EngineCommand::Stop);
        sender.send(&EngineCommand::set_option("Threads", clamped.threads));
        sender.send(&EngineCommand::set_option("Hash", clamped.hash_mb));
        sender.send(&EngineCommand::set_option("MultiPV", clamped.multi_pv));
        sender.send(&EngineCommand::set_option("Use NNUE", clamped.use_nnue));
        sender.send(&EngineCommand::NewGame);
    }

    /// Start analyzing a position, superseding any in-flight request.
    ///
    /// A logged no-op unless the session is `Ready` (or already `Analyzing`,
    /// in which case the previous search is cancelled first). The spawned
    /// task queues on the engine lock behind the task it just cancelled, so
    /// two rapid calls never transmit concurrently.
    pub fn analyze(&self, request: AnalysisRequest) {
        let state = self.inner.state();
        if !matches!(state, SessionState::Ready | SessionState::Analyzing) {
            tracing::warn!(state = ?state, "analyze rejected: session not ready");
            return;
        }

        let token = CancellationToken::new();
        {
            let mut current = self.inner.current.lock().expect("token lock poisoned");
            if let Some(previous) = current.take() {
                previous.cancel();
            }
            *current = Some(token.clone());
        }

        // Busy until the *last* task exits; a superseded task unwinding after
        // its successor started must not drop the count to zero. send_modify
        // updates and publishes under the watch lock, so a decrement can
        // never interleave with a concurrent increment.
        self.inner.active_tx.send_modify(|active| *active += 1);

        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            run_search(&inner, request, token).await;
            inner.active_tx.send_modify(|active| *active -= 1);
        });
    }

    /// Cancel the in-flight analysis and send the engine's abort command.
    ///
    /// Idempotent; safe to call with no search running.
    pub fn stop(&self) {
        if let Some(token) = self
            .inner
            .current
            .lock()
            .expect("token lock poisoned")
            .take()
        {
            token.cancel();
        }
        if let Some(sender) = self
            .inner
            .sender
            .lock()
            .expect("sender lock poisoned")
            .as_ref()
        {
            sender.send(&EngineCommand::Stop);
        }
    }

    /// Wait for the in-flight analysis task to finish.
    ///
    /// Returns `true` if the task completed within `timeout`, `false`
    /// otherwise. Never takes the analysis lock, so it cannot deadlock with a
    /// running search.
    pub async fn wait_for_completion(&self, timeout: Duration) -> bool {
        let mut rx = self.inner.active_tx.subscribe();
        tokio::time::timeout(timeout, rx.wait_for(|active| *active == 0))
            .await
            .map(|result| result.is_ok())
            .unwrap_or(false)
    }

    /// Tear down the process and bring up a fresh one.
    ///
    /// Cancels in-flight work, terminates and reaps the process (graceful
    /// quit, bounded grace, then kill), clears session state, waits a settle
    /// delay, and re-runs initialization.
    pub async fn restart(&self) -> Result<(), EngineError> {
        tracing::info!("restarting engine session");
        self.teardown().await;
        tokio::time::sleep(RESTART_SETTLE).await;
        self.initialize().await
    }

    /// Terminal shutdown: cancel work and release the process for good.
    pub async fn shutdown(&self) {
        tracing::info!("shutting down engine session");
        self.teardown().await;
    }

    async fn teardown(&self) {
        if let Some(token) = self
            .inner
            .current
            .lock()
            .expect("token lock poisoned")
            .take()
        {
            token.cancel();
        }
        // The cancelled task releases the engine lock at its next poll
        let mut engine_slot = self.inner.engine.lock().await;
        *self.inner.sender.lock().expect("sender lock poisoned") = None;
        *self
            .inner
            .engine_name
            .lock()
            .expect("engine name lock poisoned") = None;
        if let Some(engine) = engine_slot.take() {
            engine.terminate(TERMINATE_GRACE).await;
        }
        self.inner.stale_bestmove.store(false, Ordering::SeqCst);
        self.inner.aggregator.clear();
        self.inner.set_state(SessionState::Uninitialized);
    }

    /// Current lifecycle state.
    pub fn state(&self) -> SessionState {
        self.inner.state()
    }

    /// Observe state transitions.
    pub fn subscribe_state(&self) -> watch::Receiver<SessionState> {
        self.inner.state_tx.subscribe()
    }

    /// Whether the session accepts analysis requests right now.
    pub fn is_ready(&self) -> bool {
        matches!(
            self.inner.state(),
            SessionState::Ready | SessionState::Analyzing
        )
    }

    /// Observe every published analysis snapshot.
    pub fn results(&self) -> watch::Receiver<AnalysisResult> {
        self.inner.aggregator.subscribe()
    }

    /// The most recent analysis snapshot.
    pub fn latest_result(&self) -> AnalysisResult {
        self.inner.aggregator.latest()
    }

    /// The engine's name as reported during the handshake.
    pub fn engine_name(&self) -> Option<String> {
        self.inner
            .engine_name
            .lock()
            .expect("engine name lock poisoned")
            .clone()
    }
}

enum SyncOutcome {
    Ready,
    TimedOut,
    Cancelled,
    Closed,
}

/// Readiness re-synchronization before a new search.
///
/// Sends `stop` (a cancelled depth-bounded search may still be running
/// engine-side and would never answer the ping otherwise) and `isready`,
/// then drains whatever stale progress lines are still in flight until the
/// matching `readyok`. Quiet polls are bounded by [`READY_POLL_LIMIT`];
/// arriving lines do not count against the ceiling since they are progress.
async fn sync_ready(
    inner: &SessionInner,
    engine: &mut EngineProcess,
    token: &CancellationToken,
) -> SyncOutcome {
    engine.send(&EngineCommand::Stop);
    engine.send(&EngineCommand::IsReady);

    let mut quiet_polls = 0;
    let mut lines_read = 0;
    loop {
        match engine.read_line_within(HANDSHAKE_POLL, token).await {
            ReadEvent::Line(line) => {
                lines_read += 1;
                if lines_read > HANDSHAKE_LINE_LIMIT {
                    return SyncOutcome::TimedOut;
                }
                match EngineMessage::parse(&line) {
                    Some(EngineMessage::ReadyOk) => break,
                    Some(EngineMessage::BestMove { .. }) => {
                        // terminal line of the search the `stop` aborted
                        inner.stale_bestmove.store(false, Ordering::SeqCst);
                    }
                    // stale info from a superseded search, discarded
                    _ => {}
                }
            }
            ReadEvent::Timeout => {
                quiet_polls += 1;
                if quiet_polls >= READY_POLL_LIMIT {
                    return SyncOutcome::TimedOut;
                }
            }
            ReadEvent::Cancelled => return SyncOutcome::Cancelled,
            ReadEvent::Closed => return SyncOutcome::Closed,
        }
    }

    // An engine answers isready from its main thread, so readyok can beat
    // the stopped search thread's bestmove onto the wire. Consume that
    // trailing bestmove now or it would terminate the next stream-read
    // with an empty snapshot.
    if inner.stale_bestmove.load(Ordering::SeqCst) {
        let mut quiet_polls = 0;
        loop {
            match engine.read_line_within(HANDSHAKE_POLL, token).await {
                ReadEvent::Line(line) => {
                    lines_read += 1;
                    if lines_read > HANDSHAKE_LINE_LIMIT {
                        return SyncOutcome::TimedOut;
                    }
                    if let Some(EngineMessage::BestMove { .. }) = EngineMessage::parse(&line) {
                        break;
                    }
                }
                ReadEvent::Timeout => {
                    quiet_polls += 1;
                    if quiet_polls >= BESTMOVE_DRAIN_POLLS {
                        // never materialized; do not hold the next search up
                        break;
                    }
                }
                ReadEvent::Cancelled => return SyncOutcome::Cancelled,
                ReadEvent::Closed => return SyncOutcome::Closed,
            }
        }
        inner.stale_bestmove.store(false, Ordering::SeqCst);
    }

    SyncOutcome::Ready
}

async fn run_search(inner: &SessionInner, request: AnalysisRequest, token: CancellationToken) {
    let mut engine_slot = inner.engine.lock().await;
    if token.is_cancelled() {
        return;
    }
    let Some(engine) = engine_slot.as_mut() else {
        tracing::warn!("analysis task found no engine process");
        return;
    };

    inner.aggregator.clear();

    match sync_ready(inner, engine, &token).await {
        SyncOutcome::Ready => {}
        SyncOutcome::Cancelled => return,
        SyncOutcome::TimedOut => {
            // Non-fatal: this request is lost, the session stays Ready
            tracing::warn!("engine did not acknowledge readiness, aborting request");
            return;
        }
        SyncOutcome::Closed => {
            tracing::error!("engine closed its output during readiness sync");
            inner.set_state(SessionState::Crashed);
            return;
        }
    }

    tracing::debug!(fen = %request.fen, limit = ?request.limit, "starting search");
    engine.send(&EngineCommand::Position {
        fen: request.fen.clone(),
    });
    engine.send(&EngineCommand::Go(request.limit));
    inner.set_state(SessionState::Analyzing);

    let idle_limit = match request.limit {
        GoLimit::MoveTime(ms) => Duration::from_millis(ms) + IDLE_GRACE,
        GoLimit::Depth(_) => DEPTH_IDLE_LIMIT,
    };
    let mut last_output = tokio::time::Instant::now();

    loop {
        match engine.read_line_within(POLL_INTERVAL, &token).await {
            ReadEvent::Line(line) => {
                last_output = tokio::time::Instant::now();
                match EngineMessage::parse(&line) {
                    Some(EngineMessage::Info(info)) => inner.aggregator.apply(&info),
                    Some(EngineMessage::BestMove { mv, .. }) => {
                        tracing::debug!(best_move = %mv, "search complete");
                        break;
                    }
                    _ => {}
                }
            }
            ReadEvent::Timeout => {
                if last_output.elapsed() > idle_limit {
                    tracing::warn!(limit = ?idle_limit, "engine idle past limit, stopping search");
                    engine.send(&EngineCommand::Stop);
                    inner.stale_bestmove.store(true, Ordering::SeqCst);
                    break;
                }
            }
            ReadEvent::Cancelled => {
                // Superseded or stopped; exit before the new task transmits.
                // The bestmove this search still owes is drained by the
                // successor's readiness sync.
                inner.stale_bestmove.store(true, Ordering::SeqCst);
                inner.set_state(SessionState::Ready);
                return;
            }
            ReadEvent::Closed => {
                tracing::error!("engine closed its output mid-search");
                inner.set_state(SessionState::Crashed);
                return;
            }
        }
    }

    inner.set_state(SessionState::Ready);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn analyze_rejected_when_uninitialized() {
        let session = AnalysisSession::new(None, SafetyLimits::default());
        assert_eq!(session.state(), SessionState::Uninitialized);

        session.analyze(AnalysisRequest {
            fen: "8/8/8/8/8/8/8/8 w - - 0 1".to_string(),
            limit: GoLimit::Depth(5),
        });

        // No task spawned: completion is immediate and state unchanged
        assert!(session.wait_for_completion(Duration::from_millis(50)).await);
        assert_eq!(session.state(), SessionState::Uninitialized);
        assert!(session.latest_result().is_empty());
    }

    #[tokio::test]
    async fn stop_is_idempotent_without_a_search() {
        let session = AnalysisSession::new(None, SafetyLimits::default());
        session.stop();
        session.stop();
        assert_eq!(session.state(), SessionState::Uninitialized);
    }

    #[tokio::test]
    async fn initialize_fails_recoverably_when_not_installed() {
        let session = AnalysisSession::new(
            Some(PathBuf::from("/nonexistent/engine")),
            SafetyLimits::default(),
        );

        let result = session.initialize().await;
        assert!(matches!(result, Err(EngineError::NotInstalled)));
        assert_eq!(session.state(), SessionState::Uninitialized);
    }

    #[tokio::test]
    async fn configure_without_engine_is_a_noop() {
        let session = AnalysisSession::new(None, SafetyLimits::default());
        session.configure(&EngineConfig::default());
        assert_eq!(session.state(), SessionState::Uninitialized);
    }

    #[tokio::test]
    async fn wait_for_completion_is_immediate_when_idle() {
        let session = AnalysisSession::new(None, SafetyLimits::default());
        assert!(session.wait_for_completion(Duration::from_millis(10)).await);
    }
}
