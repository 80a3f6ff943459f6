//! Command-line entry point for engine-backed game review.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use game_review::stages::{backward_scan, forward_scan, LiveAnalysis, PositionEval};
use game_review::ReviewConfig;
use review_engine::AnalysisSession;
use tokio_util::sync::CancellationToken;

#[derive(Parser)]
#[command(name = "game-review")]
#[command(about = "Engine-backed game analysis", version)]
struct Cli {
    /// Path to the configuration file
    #[arg(long, default_value = "review.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// First-pass scan of all positions, earliest to latest
    Scan {
        /// File with one FEN per line
        fens: PathBuf,
        /// Per-position thinking time in milliseconds
        #[arg(long)]
        movetime: Option<u64>,
        /// Emit results as JSON
        #[arg(long)]
        json: bool,
    },
    /// Deep scan from the last position backwards; ctrl+c stops after the
    /// current position and reports the biggest swing found so far
    Deep {
        /// File with one FEN per line
        fens: PathBuf,
        /// Per-position thinking time in milliseconds
        #[arg(long)]
        movetime: Option<u64>,
        /// Emit results as JSON
        #[arg(long)]
        json: bool,
    },
    /// Continuously analyze one position to a fixed depth, streaming
    /// snapshots as they arrive
    Watch {
        /// Position to analyze, as a FEN string
        fen: String,
        /// Search depth
        #[arg(long)]
        depth: Option<u32>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();
    let cli = Cli::parse();
    let config = ReviewConfig::load_or_default(&cli.config);

    let session = AnalysisSession::new(config.engine_path.clone(), config.limits);
    session
        .initialize()
        .await
        .context("failed to start the analysis engine")?;
    session.configure(&config.engine);
    if let Some(name) = session.engine_name() {
        tracing::info!(engine = %name, "engine ready");
    }

    match cli.command {
        Commands::Scan {
            fens,
            movetime,
            json,
        } => {
            let positions = read_fens(&fens)?;
            let movetime = movetime.unwrap_or(config.scan_movetime_ms);
            let evals = forward_scan(&session, &positions, movetime).await;
            if json {
                println!("{}", serde_json::to_string_pretty(&evals)?);
            } else {
                print_evals(&evals);
            }
        }
        Commands::Deep {
            fens,
            movetime,
            json,
        } => {
            let positions = read_fens(&fens)?;
            let movetime = movetime.unwrap_or(config.deep_movetime_ms);
            let interrupt = CancellationToken::new();
            let handler_token = interrupt.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    handler_token.cancel();
                }
            });
            let outcome = backward_scan(&session, &positions, movetime, &interrupt).await;
            if json {
                println!("{}", serde_json::to_string_pretty(&outcome)?);
            } else {
                print_evals(&outcome.evals);
                if outcome.interrupted {
                    println!("scan interrupted");
                }
                if let Some(index) = outcome.jump_to {
                    println!("biggest swing at position {}", index + 1);
                }
            }
        }
        Commands::Watch { fen, depth } => {
            let depth = depth.unwrap_or(config.watch_depth);
            watch_position(&session, &fen, depth).await;
        }
    }

    session.shutdown().await;
    Ok(())
}

async fn watch_position(session: &AnalysisSession, fen: &str, depth: u32) {
    let live = LiveAnalysis::new(session, depth);
    let mut results = live.results();
    live.goto(fen);
    loop {
        tokio::select! {
            changed = results.changed() => {
                if changed.is_err() {
                    break;
                }
                let snapshot = results.borrow_and_update().clone();
                if let Some(line) = snapshot.best_line() {
                    println!(
                        "depth {:2}  {:>7}  {}",
                        snapshot.depth,
                        format_score(line.score, line.mate_in),
                        line.moves.join(" ")
                    );
                }
            }
            _ = session.wait_for_completion(Duration::from_secs(3600)) => {
                break;
            }
        }
    }
}

fn read_fens(path: &Path) -> anyhow::Result<Vec<String>> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    let positions: Vec<String> = text
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(String::from)
        .collect();
    anyhow::ensure!(!positions.is_empty(), "no positions in {}", path.display());
    Ok(positions)
}

fn print_evals(evals: &[PositionEval]) {
    for eval in evals {
        println!(
            "position {:3}  {:>7}  depth {:2}  {}",
            eval.index + 1,
            format_score(eval.score, eval.mate_in),
            eval.depth,
            eval.best_line.join(" ")
        );
    }
}

fn format_score(score: f32, mate_in: Option<i32>) -> String {
    match mate_in {
        Some(plies) => format!("#{plies}"),
        None => format!("{score:+.2}"),
    }
}
