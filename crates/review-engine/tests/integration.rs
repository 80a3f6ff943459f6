//! Integration tests for the analysis session.
//!
//! These run against a scripted `/bin/sh` fake engine, so the handshake,
//! streaming, cancellation, crash, and restart paths execute without a real
//! Stockfish installation.

use std::io::Write;
use std::os::unix::fs::PermissionsExt;
use std::path::PathBuf;
use std::time::Duration;

use review_engine::{
    AnalysisRequest, AnalysisSession, EngineConfig, EngineError, SafetyLimits, SessionState,
};
use uci::GoLimit;

/// Write an executable shell script acting as a UCI engine.
fn fake_engine(dir: &tempfile::TempDir, body: &str) -> PathBuf {
    let path = dir.path().join("fake-engine.sh");
    let mut file = std::fs::File::create(&path).expect("create fake engine");
    writeln!(file, "#!/bin/sh").unwrap();
    file.write_all(body.as_bytes()).unwrap();
    drop(file);

    let mut perms = std::fs::metadata(&path).unwrap().permissions();
    perms.set_mode(0o755);
    std::fs::set_permissions(&path, perms).unwrap();
    path
}

/// A well-behaved engine: answers the handshake and every `go` instantly.
const RESPONSIVE: &str = r#"
while read -r line; do
  case "$line" in
    uci)
      echo "id name FakeFish 1.0"
      echo "uciok"
      ;;
    isready)
      echo "readyok"
      ;;
    go*)
      echo "info depth 10 nodes 4000 nps 80000 multipv 1 score cp 35 pv e2e4 e7e5"
      echo "info depth 10 multipv 2 score cp 12 pv d2d4 d7d5"
      echo "bestmove e2e4"
      ;;
    quit)
      exit 0
      ;;
  esac
done
"#;

/// An engine that dies the moment a search starts.
const CRASH_ON_GO: &str = r#"
while read -r line; do
  case "$line" in
    uci)
      echo "id name FakeFish 1.0"
      echo "uciok"
      ;;
    isready)
      echo "readyok"
      ;;
    go*)
      exit 1
      ;;
    quit)
      exit 0
      ;;
  esac
done
"#;

fn start_fen() -> String {
    "rnbqkbnr/pppppppp/8/8/8/8/PPPPPPPP/RNBQKBNR w KQkq - 0 1".to_string()
}

#[tokio::test]
async fn handshake_reaches_ready() {
    let dir = tempfile::tempdir().unwrap();
    let path = fake_engine(&dir, RESPONSIVE);
    let session = AnalysisSession::new(Some(path), SafetyLimits::default());

    session.initialize().await.expect("initialize");

    assert_eq!(session.state(), SessionState::Ready);
    assert!(session.is_ready());
    assert_eq!(session.engine_name(), Some("FakeFish 1.0".to_string()));

    session.shutdown().await;
    assert_eq!(session.state(), SessionState::Uninitialized);
}

#[tokio::test]
async fn analyze_streams_a_sorted_snapshot() {
    let dir = tempfile::tempdir().unwrap();
    let path = fake_engine(&dir, RESPONSIVE);
    let session = AnalysisSession::new(Some(path), SafetyLimits::default());
    session.initialize().await.expect("initialize");

    session.analyze(AnalysisRequest {
        fen: start_fen(),
        limit: GoLimit::MoveTime(100),
    });

    assert!(session.wait_for_completion(Duration::from_secs(5)).await);
    assert_eq!(session.state(), SessionState::Ready);

    let result = session.latest_result();
    assert_eq!(result.depth, 10);
    assert_eq!(result.nodes, 4000);
    assert_eq!(result.nps, 80000);
    assert_eq!(result.lines.len(), 2);
    assert_eq!(result.lines[0].rank, 1);
    assert_eq!(result.lines[0].score, 0.35);
    assert_eq!(result.lines[1].rank, 2);

    session.shutdown().await;
}

#[tokio::test]
async fn rapid_analyze_calls_supersede_each_other() {
    let dir = tempfile::tempdir().unwrap();
    let path = fake_engine(&dir, RESPONSIVE);
    let session = AnalysisSession::new(Some(path), SafetyLimits::default());
    session.initialize().await.expect("initialize");

    // Each call cancels its predecessor; the last one wins
    for _ in 0..3 {
        session.analyze(AnalysisRequest {
            fen: start_fen(),
            limit: GoLimit::MoveTime(100),
        });
    }

    assert!(session.wait_for_completion(Duration::from_secs(10)).await);
    assert_eq!(session.state(), SessionState::Ready);
    assert!(!session.latest_result().is_empty());

    session.shutdown().await;
}

#[tokio::test]
async fn eof_mid_search_flips_session_to_crashed() {
    let dir = tempfile::tempdir().unwrap();
    let path = fake_engine(&dir, CRASH_ON_GO);
    let session = AnalysisSession::new(Some(path), SafetyLimits::default());
    session.initialize().await.expect("initialize");

    session.analyze(AnalysisRequest {
        fen: start_fen(),
        limit: GoLimit::MoveTime(100),
    });
    assert!(session.wait_for_completion(Duration::from_secs(5)).await);
    assert_eq!(session.state(), SessionState::Crashed);

    // Crashed sessions reject further work until restarted
    session.analyze(AnalysisRequest {
        fen: start_fen(),
        limit: GoLimit::MoveTime(100),
    });
    assert!(session.wait_for_completion(Duration::from_millis(100)).await);
    assert_eq!(session.state(), SessionState::Crashed);

    session.shutdown().await;
}

#[tokio::test]
async fn completion_waits_for_the_last_of_overlapping_tasks() {
    let dir = tempfile::tempdir().unwrap();
    let path = fake_engine(&dir, RESPONSIVE);
    let session = AnalysisSession::new(Some(path), SafetyLimits::default());
    session.initialize().await.expect("initialize");

    // Back-to-back request pairs keep a superseded task unwinding while
    // its successor runs; completion must only report once the successor
    // is done, never when the cancelled task exits.
    for _ in 0..20 {
        session.analyze(AnalysisRequest {
            fen: start_fen(),
            limit: GoLimit::MoveTime(50),
        });
        session.analyze(AnalysisRequest {
            fen: start_fen(),
            limit: GoLimit::MoveTime(50),
        });
        assert!(session.wait_for_completion(Duration::from_secs(5)).await);
        assert_eq!(session.state(), SessionState::Ready);
        assert!(!session.latest_result().is_empty());
    }

    session.shutdown().await;
}

#[tokio::test]
async fn initialize_refuses_a_crashed_session() {
    let dir = tempfile::tempdir().unwrap();
    let path = fake_engine(&dir, CRASH_ON_GO);
    let session = AnalysisSession::new(Some(path), SafetyLimits::default());
    session.initialize().await.expect("initialize");

    session.analyze(AnalysisRequest {
        fen: start_fen(),
        limit: GoLimit::MoveTime(100),
    });
    assert!(session.wait_for_completion(Duration::from_secs(5)).await);
    assert_eq!(session.state(), SessionState::Crashed);

    // Plain initialize must not quietly resurrect (or mask) a crash
    let result = session.initialize().await;
    assert!(matches!(result, Err(EngineError::InitFailed(_))));
    assert_eq!(session.state(), SessionState::Crashed);

    session.restart().await.expect("restart");
    assert_eq!(session.state(), SessionState::Ready);

    session.shutdown().await;
}

#[tokio::test]
async fn restart_recovers_a_crashed_session() {
    let dir = tempfile::tempdir().unwrap();
    let path = fake_engine(&dir, CRASH_ON_GO);
    let session = AnalysisSession::new(Some(path), SafetyLimits::default());
    session.initialize().await.expect("initialize");

    session.analyze(AnalysisRequest {
        fen: start_fen(),
        limit: GoLimit::MoveTime(100),
    });
    assert!(session.wait_for_completion(Duration::from_secs(5)).await);
    assert_eq!(session.state(), SessionState::Crashed);

    session.restart().await.expect("restart");
    assert_eq!(session.state(), SessionState::Ready);

    session.shutdown().await;
}

#[tokio::test]
async fn stop_cancels_a_depth_bounded_search() {
    // An engine that streams forever once told to go
    let streaming = r#"
while read -r line; do
  case "$line" in
    uci)
      echo "id name FakeFish 1.0"
      echo "uciok"
      ;;
    isready)
      echo "readyok"
      ;;
    go*)
      while true; do
        echo "info depth 10 nodes 1000 score cp 5 pv e2e4"
        sleep 0.1
      done
      ;;
    quit)
      exit 0
      ;;
  esac
done
"#;
    let dir = tempfile::tempdir().unwrap();
    let path = fake_engine(&dir, streaming);
    let session = AnalysisSession::new(Some(path), SafetyLimits::default());
    session.initialize().await.expect("initialize");

    session.analyze(AnalysisRequest {
        fen: start_fen(),
        limit: GoLimit::Depth(30),
    });

    // Let some snapshots stream through
    let mut results = session.results();
    tokio::time::timeout(Duration::from_secs(5), results.wait_for(|r| !r.is_empty()))
        .await
        .expect("snapshot within bound")
        .expect("aggregator alive");

    session.stop();
    assert!(session.wait_for_completion(Duration::from_secs(5)).await);
    assert_eq!(session.state(), SessionState::Ready);
    assert_eq!(session.latest_result().depth, 10);

    // The script ignores quit while streaming; forceful kill reaps it
    session.shutdown().await;
}

#[tokio::test]
async fn bestmove_trailing_readyok_does_not_end_the_next_search() {
    // An engine whose readyok races ahead of the aborted search's bestmove:
    // the first go answers with info only; the bestmove it owes arrives
    // straight after the next readyok. The second go completes normally.
    let late_bestmove = r#"
gocount=0
searching=0
while read -r line; do
  case "$line" in
    uci)
      echo "id name FakeFish 1.0"
      echo "uciok"
      ;;
    isready)
      echo "readyok"
      if [ "$searching" = "1" ]; then
        echo "bestmove a2a3"
        searching=0
      fi
      ;;
    go*)
      gocount=$((gocount+1))
      if [ "$gocount" = "1" ]; then
        echo "info depth 5 score cp 10 pv e2e4"
        searching=1
      else
        echo "info depth 9 nodes 2000 nps 40000 score cp 42 pv d2d4"
        echo "bestmove d2d4"
      fi
      ;;
    quit)
      exit 0
      ;;
  esac
done
"#;
    let dir = tempfile::tempdir().unwrap();
    let path = fake_engine(&dir, late_bestmove);
    let session = AnalysisSession::new(Some(path), SafetyLimits::default());
    session.initialize().await.expect("initialize");

    session.analyze(AnalysisRequest {
        fen: start_fen(),
        limit: GoLimit::Depth(30),
    });
    // Make sure the first go went out before superseding it
    let mut results = session.results();
    tokio::time::timeout(Duration::from_secs(5), results.wait_for(|r| !r.is_empty()))
        .await
        .expect("snapshot within bound")
        .expect("aggregator alive");

    session.analyze(AnalysisRequest {
        fen: start_fen(),
        limit: GoLimit::MoveTime(100),
    });
    assert!(session.wait_for_completion(Duration::from_secs(5)).await);
    assert_eq!(session.state(), SessionState::Ready);

    // The stale "bestmove a2a3" must not have terminated the second search
    let result = session.latest_result();
    assert_eq!(result.depth, 9);
    assert_eq!(result.best_line().unwrap().score, 0.42);

    session.shutdown().await;
}

#[tokio::test]
async fn configure_transmits_clamped_values() {
    let dir = tempfile::tempdir().unwrap();
    let log = dir.path().join("wire.log");
    // Responsive engine that also logs every received line
    let body = format!(
        r#"
while read -r line; do
  echo "$line" >> {log}
  case "$line" in
    uci)
      echo "id name FakeFish 1.0"
      echo "uciok"
      ;;
    isready)
      echo "readyok"
      ;;
    quit)
      exit 0
      ;;
  esac
done
"#,
        log = log.display()
    );
    let path = fake_engine(&dir, &body);
    let session = AnalysisSession::new(Some(path), SafetyLimits::default());
    session.initialize().await.expect("initialize");

    session.configure(&EngineConfig {
        threads: 16,
        hash_mb: 999,
        multi_pv: 3,
        use_nnue: true,
    });

    // Give the writer task and the script time to flush
    let mut wire = String::new();
    for _ in 0..50 {
        tokio::time::sleep(Duration::from_millis(50)).await;
        wire = std::fs::read_to_string(&log).unwrap_or_default();
        if wire.contains("ucinewgame") {
            break;
        }
    }

    assert!(wire.contains("setoption name Threads value 4"), "wire: {wire}");
    assert!(wire.contains("setoption name Hash value 256"), "wire: {wire}");
    assert!(wire.contains("setoption name MultiPV value 3"), "wire: {wire}");
    assert!(wire.contains("setoption name Use NNUE value true"), "wire: {wire}");
    assert!(wire.contains("ucinewgame"), "wire: {wire}");

    session.shutdown().await;
}
