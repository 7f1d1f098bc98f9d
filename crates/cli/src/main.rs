//! envq - environment query engine demo.

mod demo;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use envquery_core::{ContextId, OwnerId, QueryRequest, RunMode};
use envquery_execution::{compile_template, EngineConfig, QueryEngine, QueryRequestExt};
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "envq")]
#[command(about = "Environment query engine demo", long_about = None)]
struct Cli {
    /// Engine configuration file (JSON)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Run every step to completion, ignoring the tick budget
    #[arg(long, global = true)]
    no_time_slicing: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Agents issue queries against an engine ticking at a fixed rate
    Simulate {
        /// Number of agents
        #[arg(long, default_value = "8")]
        agents: usize,
        /// Number of frames to run
        #[arg(long, default_value = "30")]
        frames: usize,
        /// Frame length in milliseconds
        #[arg(long, default_value = "16")]
        frame_ms: u64,
        /// Run mode (single, all, best5, best25, bestN)
        #[arg(long, default_value = "single")]
        mode: RunMode,
        /// Search range
        #[arg(long, default_value = "6")]
        range: f32,
    },
    /// Run one query to completion and print the result as JSON
    Instant {
        /// Querier X
        #[arg(long, default_value = "0")]
        x: f32,
        /// Querier Y
        #[arg(long, default_value = "0")]
        y: f32,
        /// Search range
        #[arg(long, default_value = "6")]
        range: f32,
        /// Run mode (single, all, best5, best25, bestN)
        #[arg(long, default_value = "single")]
        mode: RunMode,
    },
    /// Show the compiled test order of the demo query
    Inspect {
        /// Run mode (single, all, best5, best25, bestN)
        #[arg(long, default_value = "single")]
        mode: RunMode,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => EngineConfig::from_json_file(path)
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => EngineConfig::default(),
    };
    if cli.no_time_slicing {
        config.allow_time_slicing = false;
    }
    let engine = Arc::new(QueryEngine::new(ContextId(0), config));

    match cli.command {
        Commands::Simulate { agents, frames, frame_ms, mode, range } => {
            simulate(engine, agents, frames, Duration::from_millis(frame_ms), mode, range).await?;
        }
        Commands::Instant { x, y, range, mode } => {
            let request = QueryRequest::new(demo::find_cover(), OwnerId::new("cli"))
                .with_param("OriginX", x)
                .with_param("OriginY", y)
                .with_param("Range", range);
            let result = engine.run_instant_query(request, mode)?;
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
        Commands::Inspect { mode } => {
            let template = compile_template(&demo::find_cover(), mode)?;
            println!("{} ({})", template.query_name, template.mode);
            for option in &template.options {
                println!("  option {} [{}] {:?}", option.source_index, option.generator.name(), option.ordering);
                for test in &option.tests {
                    println!("    {:<12} {:?}/{:?}", test.name(), test.cost(), test.purpose());
                }
            }
            for diagnostic in &template.diagnostics {
                println!("  dropped: {}", diagnostic);
            }
        }
    }

    Ok(())
}

async fn simulate(
    engine: Arc<QueryEngine>,
    agents: usize,
    frames: usize,
    frame: Duration,
    mode: RunMode,
    range: f32,
) -> Result<()> {
    let definition = demo::find_cover();
    let finished = Arc::new(AtomicUsize::new(0));
    let mut interval = tokio::time::interval(frame);

    // One agent asks synchronously from a worker thread while the loop runs.
    let blocking = tokio::task::spawn_blocking({
        let engine = Arc::clone(&engine);
        let request = QueryRequest::new(Arc::clone(&definition), OwnerId::new("sentry"))
            .with_param("Range", range);
        move || engine.run_instant_query(request, RunMode::AllMatching)
    });

    for frame_index in 0..frames {
        interval.tick().await;

        for agent in 0..agents {
            if (frame_index + agent) % 5 != 0 {
                continue;
            }
            let owner = OwnerId::new(format!("agent-{}", agent));
            let request = QueryRequest::new(Arc::clone(&definition), owner.clone())
                .with_param("OriginX", agent as f32 * 3.0)
                .with_param("OriginY", frame_index as f32 * 0.5)
                .with_param("Range", range);
            let counter = Arc::clone(&finished);
            let id = request.execute(&engine, mode, move |result| {
                counter.fetch_add(1, Ordering::Relaxed);
                match result.best() {
                    Some(best) => info!(
                        "{} {} -> {:?} (score {:.2}, {})",
                        result.owner, result.query_id, best.value.location(), best.score, result.stats.describe()
                    ),
                    None => info!("{} {} -> {:?}", result.owner, result.query_id, result.status),
                }
            });
            if id.is_none() {
                warn!("{} could not start a query", owner);
            }
        }

        // Agent 0 leaves halfway through.
        if frame_index == frames / 2 {
            let removed = engine.abort_all_by_owner(&OwnerId::new("agent-0"), true);
            info!("agent-0 left, {} queries aborted", removed);
        }

        let report = engine.tick();
        debug!(
            "frame {}: {} steps, {} finished, {:?} work, {} running",
            frame_index, report.steps, report.finished, report.work_time, engine.running_query_count()
        );
    }

    let aborted = engine.on_world_cleanup();
    let sentry = blocking.await??;

    println!("Finished queries: {}", finished.load(Ordering::Relaxed));
    println!("Aborted at cleanup: {}", aborted);
    println!(
        "Sentry query: {:?}, {} items",
        sentry.status,
        sentry.items.len()
    );
    println!("Template cache: {:?}", engine.cache_stats());
    Ok(())
}
