use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use class_scheduler::config::{self, Config};
use class_scheduler::db::{self, Pool};
use class_scheduler::delivery;
use class_scheduler::report::RunReport;
use class_scheduler::{batches, scheduler, sessions};

/// Extra time granted after cancellation for in-flight items to finish.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

#[derive(Debug, Parser)]
#[command(author, version, about = "Create batches, generate sessions and send class reminders")]
struct Args {
    /// Path to YAML config file
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,

    /// Evaluate as of this instant (RFC 3339) instead of the current time
    #[arg(long, value_parser = parse_now)]
    now: Option<DateTime<Utc>>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Clone, Copy, Subcommand)]
enum Command {
    /// Open today's batch for every class starting today
    CreateBatches,
    /// Create today's sessions for every active batch
    GenerateSessions,
    /// Send reminders that are due
    DispatchNotifications,
    /// All three jobs in order
    RunAll,
}

fn parse_now(raw: &str) -> Result<DateTime<Utc>, String> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| format!("expected an RFC 3339 timestamp: {e}"))
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false)
        .compact()
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let cfg = config::load(Some(&args.config))
        .with_context(|| format!("failed to load {}", args.config.display()))?;
    cfg.ensure_dirs()?;

    let pool = db::init_pool(&cfg.database_url(), cfg.app.store_timeout()).await?;
    db::run_migrations(&pool).await?;

    let now = args.now.unwrap_or_else(Utc::now);
    let run_timeout = cfg.app.run_timeout();
    let cancel = CancellationToken::new();
    let timer = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(run_timeout).await;
            warn!(timeout_s = run_timeout.as_secs(), "run timeout reached; cancelling");
            cancel.cancel();
        })
    };

    info!(command = ?args.command, %now, "starting run");
    let reports = tokio::time::timeout(
        run_timeout + SHUTDOWN_GRACE,
        run(args.command, &pool, &cfg, now, &cancel),
    )
    .await
    .map_err(|_| anyhow!("run did not stop within the shutdown grace period"))??;
    timer.abort();

    let failed: usize = reports.iter().map(|r| r.failed).sum();
    println!("{}", serde_json::to_string_pretty(&reports)?);
    if failed > 0 {
        warn!(failed, "run finished with failed items");
    }
    Ok(())
}

async fn run(
    command: Command,
    pool: &Pool,
    cfg: &Config,
    now: DateTime<Utc>,
    cancel: &CancellationToken,
) -> Result<Vec<RunReport>> {
    let reports = match command {
        Command::CreateBatches => vec![batches::create_due_batches(pool, cfg, now, cancel).await?],
        Command::GenerateSessions => {
            vec![sessions::generate_sessions(pool, cfg, now, cancel).await?]
        }
        Command::DispatchNotifications => {
            let destinations = delivery::build_destinations(cfg);
            vec![scheduler::dispatch_notifications(pool, cfg, &destinations, now, cancel).await?]
        }
        Command::RunAll => {
            let destinations = delivery::build_destinations(cfg);
            vec![
                batches::create_due_batches(pool, cfg, now, cancel).await?,
                sessions::generate_sessions(pool, cfg, now, cancel).await?,
                scheduler::dispatch_notifications(pool, cfg, &destinations, now, cancel).await?,
            ]
        }
    };
    Ok(reports)
}
