//! Engine process handle and line-oriented protocol channel.
//!
//! Spawns the engine subprocess with a writer task owning stdin and a reader
//! task pumping stdout lines into a channel. All reads go through
//! [`EngineProcess::read_line_within`], a polling loop with a fixed short
//! interval that observes cancellation and never blocks past its timeout.
//! That single primitive is what keeps every higher layer safe against a
//! stalled or dead process.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TryRecvError;
use tokio_util::sync::CancellationToken;
use uci::EngineCommand;

/// Interval between input-availability checks in [`EngineProcess::read_line_within`].
pub const POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Well-known install locations probed when no path is configured.
const KNOWN_LOCATIONS: &[&str] = &[
    "/usr/games/stockfish",
    "/usr/bin/stockfish",
    "/usr/local/bin/stockfish",
    "/opt/homebrew/bin/stockfish",
];

/// Errors from process discovery, spawn, and initialization.
#[derive(Error, Debug)]
pub enum EngineError {
    /// No engine executable found at the configured path, the known install
    /// locations, or on `PATH`. Recoverable: surface to the user, do not retry.
    #[error("No analysis engine installed")]
    NotInstalled,
    /// Failed to spawn the engine process.
    #[error("Failed to spawn engine: {0}")]
    Spawn(#[from] std::io::Error),
    /// The engine process is not running.
    #[error("Engine process is not running")]
    NotRunning,
    /// The engine did not complete the UCI handshake.
    #[error("Engine initialization failed: {0}")]
    InitFailed(String),
}

/// Outcome of a bounded read from the engine's output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadEvent {
    /// A complete line of output.
    Line(String),
    /// No data arrived within the timeout. Not an error.
    Timeout,
    /// The engine closed its output (EOF). The process is dead or dying.
    Closed,
    /// The caller's cancellation token fired; nothing was consumed.
    Cancelled,
}

/// Locate the engine executable.
///
/// Checks the configured path first, then well-known install locations, then
/// scans `PATH` for a `stockfish` binary. Absence is the recoverable
/// [`EngineError::NotInstalled`] condition, not a crash.
pub fn locate_engine(configured: Option<&Path>) -> Result<PathBuf, EngineError> {
    if let Some(path) = configured {
        if path.exists() {
            return Ok(path.to_path_buf());
        }
        tracing::warn!(path = %path.display(), "configured engine path does not exist");
        return Err(EngineError::NotInstalled);
    }

    for location in KNOWN_LOCATIONS {
        let candidate = Path::new(location);
        if candidate.exists() {
            return Ok(candidate.to_path_buf());
        }
    }

    if let Some(paths) = std::env::var_os("PATH") {
        for dir in std::env::split_paths(&paths) {
            let candidate = dir.join("stockfish");
            if candidate.is_file() {
                return Ok(candidate);
            }
        }
    }

    Err(EngineError::NotInstalled)
}

/// Cloneable handle for transmitting commands without holding the process.
///
/// Lets `stop()` and configuration reach the engine's stdin while an analysis
/// task owns the [`EngineProcess`] itself.
#[derive(Clone)]
pub struct CommandSender {
    tx: mpsc::UnboundedSender<String>,
}

impl CommandSender {
    /// Enqueue one command line for the writer task.
    ///
    /// Failures are logged, not propagated: a broken pipe is detected by the
    /// next read returning [`ReadEvent::Closed`], which is where the session
    /// reacts to a dead process.
    pub fn send(&self, command: &EngineCommand) {
        tracing::debug!(command = %command, "engine <-");
        if self.tx.send(command.to_uci()).is_err() {
            tracing::warn!(command = %command, "engine stdin closed, command dropped");
        }
    }
}

/// A running engine subprocess with its protocol channel.
pub struct EngineProcess {
    child: Child,
    cmd_tx: mpsc::UnboundedSender<String>,
    lines: mpsc::UnboundedReceiver<String>,
    path: PathBuf,
}

impl EngineProcess {
    /// Spawn the engine process at `path`.
    ///
    /// Stdin is owned by a writer task fed through a channel; stdout lines are
    /// pumped by a reader task into the receiver drained by
    /// [`read_line_within`](Self::read_line_within). Stderr is discarded.
    /// `kill_on_drop` guarantees no zombie survives the handle.
    pub fn spawn(path: &Path) -> Result<Self, EngineError> {
        let mut child = Command::new(path)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()?;

        let mut stdin = child.stdin.take().ok_or(EngineError::NotRunning)?;
        let stdout = child.stdout.take().ok_or(EngineError::NotRunning)?;

        let (cmd_tx, mut cmd_rx) = mpsc::unbounded_channel::<String>();
        let (line_tx, line_rx) = mpsc::unbounded_channel::<String>();

        // Writer task: owns stdin until the channel or the pipe closes.
        tokio::spawn(async move {
            while let Some(cmd) = cmd_rx.recv().await {
                let write = async {
                    stdin.write_all(cmd.as_bytes()).await?;
                    stdin.write_all(b"\n").await?;
                    stdin.flush().await
                };
                if let Err(e) = write.await {
                    tracing::warn!(error = %e, "write to engine stdin failed");
                    break;
                }
            }
        });

        // Reader task: ends on EOF, which closes the line channel.
        tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                tracing::trace!(line = %line, "engine ->");
                if line_tx.send(line).is_err() {
                    break;
                }
            }
        });

        Ok(Self {
            child,
            cmd_tx,
            lines: line_rx,
            path: path.to_path_buf(),
        })
    }

    /// Path the process was spawned from.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Transmit one command.
    pub fn send(&self, command: &EngineCommand) {
        self.sender().send(command);
    }

    /// A cloneable sender for transmitting without borrowing the process.
    pub fn sender(&self) -> CommandSender {
        CommandSender {
            tx: self.cmd_tx.clone(),
        }
    }

    /// Read one line of output, waiting at most `timeout`.
    ///
    /// Polls for available input every [`POLL_INTERVAL`] until a line arrives,
    /// the token is cancelled, or the timeout elapses. Cancellation is checked
    /// at every poll boundary and returns without consuming the stream.
    /// A timeout is "no data", not an error.
    pub async fn read_line_within(
        &mut self,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> ReadEvent {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if cancel.is_cancelled() {
                return ReadEvent::Cancelled;
            }
            match self.lines.try_recv() {
                Ok(line) => return ReadEvent::Line(line),
                Err(TryRecvError::Disconnected) => return ReadEvent::Closed,
                Err(TryRecvError::Empty) => {}
            }
            if tokio::time::Instant::now() >= deadline {
                return ReadEvent::Timeout;
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    /// Whether the process is still running.
    pub fn is_alive(&mut self) -> bool {
        matches!(self.child.try_wait(), Ok(None))
    }

    /// Terminate the process: graceful `quit`, bounded grace period, then kill.
    ///
    /// Always reaps the child so no zombie is left behind.
    pub async fn terminate(mut self, grace: Duration) {
        self.send(&EngineCommand::Quit);
        match tokio::time::timeout(grace, self.child.wait()).await {
            Ok(_) => {}
            Err(_) => {
                tracing::warn!(grace = ?grace, "engine ignored quit, killing");
                let _ = self.child.start_kill();
                let _ = self.child.wait().await;
            }
        }
    }
}
