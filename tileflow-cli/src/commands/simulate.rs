//! Simulate command - pan a viewport and watch the source cache work.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tileflow::config::TileflowConfig;
use tileflow::dispatcher::{Dispatcher, WorkerPool};
use tileflow::loader::{
    CachingFetcher, GzipDecoder, HttpFetcherConfig, HttpTileFetcher, MemoryFetcher, ResponseCache,
    TileFetcher, TileWorkerSetup,
};
use tileflow::logging::init_logging;
use tileflow::source::{GridCoverage, SourceCache, SourceCacheStats, Viewport};
use tokio_util::sync::CancellationToken;
use tracing::info;

use super::load_config;
use crate::error::CliError;

/// Template for the built-in synthetic source.
const SYNTHETIC_TEMPLATE: &str = "synthetic://{z}/{x}/{y}";

/// Simulated per-tile latency of the synthetic source.
const SYNTHETIC_LATENCY: Duration = Duration::from_millis(20);

/// Arguments for the simulate command.
pub struct SimulateArgs {
    pub config_path: Option<PathBuf>,
    pub url: Option<String>,
    pub steps: u32,
    pub zoom: f64,
    pub workers: Option<usize>,
    pub width: u32,
    pub height: u32,
    pub pan: f64,
    pub interval_ms: u64,
}

/// Run the simulate command.
pub fn run(args: SimulateArgs) -> Result<(), CliError> {
    let config = load_config(args.config_path.as_deref())?;
    let _logging = init_logging(&config.logging)?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    runtime.block_on(simulate(args, config))
}

async fn simulate(args: SimulateArgs, config: TileflowConfig) -> Result<(), CliError> {
    let url = args.url.clone().or_else(|| config.source.url.clone());
    let (fetcher, template): (Arc<dyn TileFetcher>, String) = match url {
        Some(url) => {
            let http = HttpTileFetcher::new(&HttpFetcherConfig::default())?;
            let cache = Arc::new(ResponseCache::new(&config.response_cache_config()));
            (Arc::new(CachingFetcher::new(http, cache)), url)
        }
        None => (
            Arc::new(MemoryFetcher::synthetic().with_latency(SYNTHETIC_LATENCY)),
            SYNTHETIC_TEMPLATE.to_string(),
        ),
    };

    let mut pool_config = config.worker_pool_config();
    if let Some(workers) = args.workers {
        pool_config = pool_config.with_size(workers);
    }
    let setup = TileWorkerSetup::new(fetcher, Arc::new(GzipDecoder::new()));
    let pool = WorkerPool::new(pool_config, Arc::new(setup));
    let dispatcher = Arc::new(Dispatcher::new(pool)?);
    let workers = dispatcher.size();

    let source_config = config.source_config("simulate", Some(&template));
    let mut source = SourceCache::new(source_config, dispatcher, Arc::new(GridCoverage))?;

    let cancel = CancellationToken::new();
    tokio::spawn({
        let cancel = cancel.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                cancel.cancel();
            }
        }
    });

    println!("Tileflow Simulation v{}", tileflow::VERSION);
    println!("========================");
    println!();
    println!("Source:   {}", template);
    println!("Workers:  {}", workers);
    println!(
        "Viewport: {}x{} @ z{:.1}, pan {} per step",
        args.width, args.height, args.zoom, args.pan
    );
    println!();
    println!(
        "{:>5} {:>8} {:>10} {:>9} {:>7} {:>7} {:>7} {:>8}",
        "step", "retained", "renderable", "in-flight", "errored", "cached", "loads", "hits"
    );

    let started = Instant::now();
    let budget = Duration::from_millis(args.interval_ms);
    let mut viewport = Viewport::new(0.5, 0.5, args.zoom, args.width, args.height);
    let mut completed = 0;

    for step in 0..args.steps {
        if cancel.is_cancelled() {
            break;
        }
        source.update(&viewport);

        let settle = async {
            while !source.loaded() {
                if source.next_event_ready().await == 0 {
                    break;
                }
            }
        };
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::timeout(budget, settle) => {}
        }

        print_row(step, &source.stats());
        viewport = viewport.panned_by(args.pan, 0.0);
        completed += 1;
    }

    if cancel.is_cancelled() {
        println!();
        println!("Interrupted.");
    }

    let stats = source.stats();
    info!(
        steps = completed,
        loads = stats.loads_issued,
        cache_hits = stats.cache_hits,
        elapsed_ms = started.elapsed().as_millis() as u64,
        "Simulation finished"
    );
    println!();
    println!(
        "{} steps in {:.1}s: {} loads issued, {} completed, {} failed, {} cancelled, {} cache hits",
        completed,
        started.elapsed().as_secs_f64(),
        stats.loads_issued,
        stats.loads_completed,
        stats.loads_failed,
        stats.loads_cancelled,
        stats.cache_hits
    );
    Ok(())
}

fn print_row(step: u32, stats: &SourceCacheStats) {
    println!(
        "{:>5} {:>8} {:>10} {:>9} {:>7} {:>7} {:>7} {:>8}",
        step,
        stats.retained,
        stats.renderable,
        stats.in_flight,
        stats.errored,
        format!("{}/{}", stats.cached, stats.cache_capacity),
        stats.loads_issued,
        stats.cache_hits
    );
}
