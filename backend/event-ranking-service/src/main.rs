//! Event Ranking Service - batch entry point
//!
//! # Modes
//! - `rebuild` (default): one index rebuild, exit code reflects the outcome
//! - `schedule`: rebuild every `REBUILD_INTERVAL_SECS`

use anyhow::Result;
use event_ranking_service::{Config, EventRankingEngine, RebuildOutcome};
use std::env;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Service run mode
#[derive(Debug, Clone, PartialEq)]
enum RunMode {
    Rebuild,
    Schedule,
}

impl RunMode {
    fn from_args() -> Self {
        let args: Vec<String> = env::args().collect();

        for i in 0..args.len() {
            if args[i] == "--mode" && i + 1 < args.len() {
                return match args[i + 1].as_str() {
                    "rebuild" => RunMode::Rebuild,
                    "schedule" => RunMode::Schedule,
                    other => {
                        warn!("Unknown mode '{}', using default 'rebuild'", other);
                        RunMode::Rebuild
                    }
                };
            }
        }

        RunMode::Rebuild
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "event_ranking_service=info,sqlx=warn,info".into());
    let json = env::var("LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();

    let mode = RunMode::from_args();

    let mut config = Config::from_env().map_err(|e| {
        error!("Failed to load configuration: {}", e);
        anyhow::anyhow!("Configuration error: {}", e)
    })?;
    config.batch.run_once = mode == RunMode::Rebuild;

    info!(
        "Starting {} in {:?} mode (max_features={}, num_trees={}, top_k={})",
        config.service.service_name,
        mode,
        config.index.max_features,
        config.index.num_trees,
        config.index.top_k_edges
    );

    let engine = EventRankingEngine::connect(&config).await?;

    match engine.run_rebuild_schedule().await {
        RebuildOutcome::Published(stats) => {
            info!(
                run_id = %stats.run_id,
                snapshot_id = stats.snapshot_id,
                candidates = stats.candidates,
                edges = stats.edges_written,
                duration_ms = stats.total_duration_ms,
                "Index rebuild finished"
            );
            Ok(())
        }
        RebuildOutcome::Skipped { candidates } => {
            info!(candidates = candidates, "Index rebuild skipped, not enough candidates");
            Ok(())
        }
        RebuildOutcome::Failed { candidates, error } => {
            error!(candidates = candidates, error = %error, "Index rebuild failed");
            Err(anyhow::anyhow!("index rebuild failed: {}", error))
        }
    }
}
