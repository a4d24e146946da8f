use anyhow::Result;
use alarmflow_alert::pipeline::AlarmPipeline;
use alarmflow_alert::shield::ShieldRuleSet;
use alarmflow_alert::worker::TaskWorker;
use alarmflow_alert::CheckerRegistry;
use alarmflow_common::strategy::Strategy;
use alarmflow_common::types::Record;
use chrono::Utc;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::signal;
use tokio::time::{interval, Duration};
use tracing_subscriber::EnvFilter;

use alarmflow_server::config::WorkerConfig;
use alarmflow_server::replay::{self, MemoryBackends, ReplayFile};

#[allow(clippy::print_stderr)]
fn print_usage() {
    eprintln!("Usage:");
    eprintln!("  alarmflow-server [config.toml]                        Start the workers, reading records from stdin");
    eprintln!("  alarmflow-server replay <config.toml> <replay.json>   Replay recorded records on a simulated clock");
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("alarmflow=info".parse()?))
        .init();

    let args: Vec<String> = std::env::args().collect();

    match args.get(1).map(|s| s.as_str()) {
        Some("replay") => {
            let config_path = args.get(2).ok_or_else(|| {
                print_usage();
                anyhow::anyhow!("replay requires <config.toml> and <replay.json> arguments")
            })?;
            let replay_path = args.get(3).ok_or_else(|| {
                print_usage();
                anyhow::anyhow!("replay requires <replay.json> argument")
            })?;
            run_replay(config_path, replay_path).await
        }
        Some("-h") | Some("--help") => {
            print_usage();
            Ok(())
        }
        other => run_workers(other.unwrap_or("config/worker.toml")).await,
    }
}

#[allow(clippy::print_stdout)]
async fn run_replay(config_path: &str, replay_path: &str) -> Result<()> {
    let config = WorkerConfig::load(config_path)?;
    alarmflow_common::id::init(config.machine_id, 1);

    let content = std::fs::read_to_string(replay_path)
        .map_err(|e| anyhow::anyhow!("Failed to read replay file '{replay_path}': {e}"))?;
    let file: ReplayFile = serde_json::from_str(&content)?;
    tracing::info!(
        strategies = file.strategies.len(),
        records = file.records.len(),
        "Replay loaded"
    );

    let summary = replay::replay(&config, file).await?;
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}

fn load_strategies(path: Option<&str>) -> Result<Vec<Strategy>> {
    let Some(path) = path else {
        tracing::warn!("No strategies_file configured, every record will be skipped");
        return Ok(Vec::new());
    };
    let content = std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("Failed to read strategies '{path}': {e}"))?;
    let strategies: Vec<Strategy> = serde_json::from_str(&content)?;
    tracing::info!(count = strategies.len(), path, "Strategies loaded");
    Ok(strategies)
}

async fn run_workers(config_path: &str) -> Result<()> {
    let config = WorkerConfig::load(config_path)?;
    alarmflow_common::id::init(config.machine_id, 1);

    let stores = MemoryBackends::new(load_strategies(config.strategies_file.as_deref())?);
    let shields = Arc::new(ShieldRuleSet::new(config.shields.clone()));
    let registry = CheckerRegistry::standard();
    let tick = Duration::from_secs(config.tick_secs.max(1));

    let mut handles = Vec::with_capacity(config.workers + 2);
    for index in 0..config.workers {
        let mut worker = TaskWorker::new(stores.backends(), shields.clone(), &registry, &config.core);
        let queue = stores.queue.clone();
        handles.push(tokio::spawn(async move {
            tracing::info!(index, session_id = %worker.session().session_id, "Worker started");
            let mut ticker = interval(tick);
            loop {
                ticker.tick().await;
                let handled = worker.run_due(&queue, Utc::now()).await;
                if handled > 0 {
                    tracing::debug!(index, handled, "Tasks handled");
                }
            }
        }));
    }

    // Live-alert scan
    let scanner = TaskWorker::new(stores.backends(), shields.clone(), &registry, &config.core);
    let scan_every = Duration::from_secs(config.scan_interval_secs.max(1));
    handles.push(tokio::spawn(async move {
        let mut ticker = interval(scan_every);
        loop {
            ticker.tick().await;
            match scanner.scan_active(Utc::now()).await {
                Ok(scheduled) if scheduled > 0 => tracing::info!(scheduled, "Live alerts scheduled"),
                Err(e) => tracing::error!(error = %e, "Live alert scan failed"),
                _ => {}
            }
        }
    }));

    // Record intake, one JSON record per line
    let mut pipeline = AlarmPipeline::new(stores.backends(), shields, &config.core);
    handles.push(tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        loop {
            let line = match lines.next_line().await {
                Ok(Some(line)) => line,
                Ok(None) => {
                    tracing::info!("Record intake closed");
                    return;
                }
                Err(e) => {
                    tracing::error!(error = %e, "Failed to read records");
                    return;
                }
            };
            if line.trim().is_empty() {
                continue;
            }
            let record: Record = match serde_json::from_str(&line) {
                Ok(record) => record,
                Err(e) => {
                    tracing::warn!(error = %e, "Malformed record skipped");
                    continue;
                }
            };
            if let Err(e) = pipeline.ingest(vec![record], Utc::now()).await {
                tracing::error!(error = %e, "Record ingestion failed");
            }
        }
    }));

    tracing::info!(workers = config.workers, "Alarm workers started");

    if let Err(e) = signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
    }
    tracing::info!("Shutting down gracefully");

    for h in handles {
        h.abort();
    }
    tracing::info!("Workers stopped");

    Ok(())
}
