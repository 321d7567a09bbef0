//! courier: run a local fleet of delivery workers against an in-memory queue.
//!
//! Every worker gets its own simulated transport; they compete for the same
//! seeded tasks exactly as devices would against the shared remote queue.

mod logging;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, bail};
use chrono::Utc;
use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing::{info, warn};

use courier_core::app::{StatsSnapshot, StatusCounts, WorkerBuilder, WorkerHandle};
use courier_core::domain::{AccountId, TaskDocument};
use courier_core::impls::{Behaviour, InMemoryQueueStore, SimulatedTransport, SlotSelector};
use courier_core::ports::{IdGenerator, SystemClock, Transport, UlidGenerator, report_channel};
use courier_core::{WorkerConfig, load_config};

/// Courier delivery workers.
#[derive(Parser)]
#[command(name = "courier", version, about)]
struct Cli {
    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Seed an in-memory queue and drain it with simulated workers.
    Run {
        /// Worker config (TOML). Defaults apply when omitted.
        #[arg(long)]
        config: Option<PathBuf>,

        /// Account to credit; overrides `account_id` from the config.
        #[arg(long)]
        account: Option<String>,

        #[arg(long, default_value_t = 3)]
        workers: usize,

        #[arg(long, default_value_t = 20)]
        tasks: usize,

        /// Make every n-th send on each transport fail (0 = never).
        #[arg(long, default_value_t = 0)]
        fail_every: u64,

        /// Give up waiting for the queue to drain after this many seconds.
        #[arg(long, default_value_t = 30)]
        timeout_secs: u64,
    },
    /// Load and validate a config file.
    Check {
        #[arg(long)]
        config: PathBuf,
    },
}

#[derive(Serialize)]
struct Summary {
    workers: Vec<WorkerSummary>,
    total: StatsSnapshot,
    remaining: StatusCounts,
    balance: f64,
    drained: bool,
}

#[derive(Serialize)]
struct WorkerSummary {
    worker_id: String,
    stats: StatsSnapshot,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    logging::init(cli.json_logs);

    match cli.command {
        Command::Run {
            config,
            account,
            workers,
            tasks,
            fail_every,
            timeout_secs,
        } => {
            let mut config = match config {
                Some(path) => load_config(&path)
                    .with_context(|| format!("failed to load {}", path.display()))?,
                None => WorkerConfig::default(),
            };
            if let Some(account) = account {
                config.account_id = Some(AccountId::new(account));
            }
            handle_run(config, workers, tasks, fail_every, Duration::from_secs(timeout_secs)).await
        }
        Command::Check { config } => {
            let config = load_config(&config)
                .with_context(|| format!("failed to load {}", config.display()))?;
            match &config.account_id {
                Some(account) => println!("config ok (account {account})"),
                None => println!("config ok (no account bound; workers will refuse to start)"),
            }
            Ok(())
        }
    }
}

async fn handle_run(
    config: WorkerConfig,
    workers: usize,
    tasks: usize,
    fail_every: u64,
    timeout: Duration,
) -> anyhow::Result<()> {
    if workers == 0 {
        bail!("--workers must be at least 1");
    }
    if workers > 1 && config.worker_id.is_some() {
        bail!("worker_id is fixed in the config; run a single worker or remove it");
    }
    let account = config
        .account_id
        .clone()
        .context("no account bound: pass --account or set account_id")?;

    let store = Arc::new(InMemoryQueueStore::new());
    seed(&store, tasks).await;
    info!(tasks, workers, "queue seeded");

    let behaviour = if fail_every > 0 {
        Behaviour::FailEvery(fail_every)
    } else {
        Behaviour::AlwaysOk
    };

    let mut handles: Vec<WorkerHandle> = Vec::with_capacity(workers);
    for _ in 0..workers {
        let (reports_tx, reports_rx) = report_channel();
        let transport: Arc<dyn Transport> =
            Arc::new(SimulatedTransport::new(0, reports_tx, behaviour.clone()));
        let worker = WorkerBuilder::new(config.clone())
            .store(store.clone())
            .selector(Arc::new(SlotSelector::single(transport)))
            .reports(reports_rx)
            .build()
            .context("failed to build worker")?;
        handles.push(worker.spawn());
    }

    let drained = tokio::select! {
        drained = wait_until_drained(&store, timeout) => drained,
        _ = tokio::signal::ctrl_c() => {
            warn!("interrupted");
            false
        }
    };

    let mut summaries = Vec::with_capacity(handles.len());
    let mut total = StatsSnapshot::default();
    for handle in handles {
        let worker_id = handle.identity().worker_id.to_string();
        let stats = handle.shutdown_and_join().await;
        total = total.merge(&stats);
        summaries.push(WorkerSummary { worker_id, stats });
    }

    let summary = Summary {
        workers: summaries,
        total,
        remaining: store.counts_by_status().await,
        balance: store.balance(&account).await,
        drained,
    };
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}

async fn seed(store: &InMemoryQueueStore, tasks: usize) {
    let ids = UlidGenerator::new(SystemClock);
    let start = Utc::now();
    for i in 0..tasks {
        let created_at = start + chrono::Duration::milliseconds(i64::try_from(i).unwrap_or(0));
        let task = TaskDocument::new_pending(
            ids.generate_task_id(),
            format!("+1555{:07}", i),
            format!("test message {i}"),
            created_at,
        );
        store.insert(task).await;
    }
}

/// Wait until nothing is left to deliver (only quarantined tasks may remain).
async fn wait_until_drained(store: &InMemoryQueueStore, timeout: Duration) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        let counts = store.counts_by_status().await;
        if counts.pending + counts.failed + counts.sending == 0 {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            warn!(?counts, "queue did not drain before timeout");
            return false;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
}
