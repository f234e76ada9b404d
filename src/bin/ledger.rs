use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;

use class_scheduler::model::NotificationStatus;
use class_scheduler::{config, db};

#[derive(Debug, Parser)]
#[command(author, version, about = "Print the notification ledger")]
struct Args {
    /// Path to YAML config file
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,

    /// Only show entries whose last attempt failed
    #[arg(long)]
    failed_only: bool,

    /// Emit JSON instead of one line per entry
    #[arg(long)]
    json: bool,
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
    let cfg = config::load(Some(&args.config))?;
    let pool = db::init_pool(&cfg.database_url(), cfg.app.store_timeout()).await?;
    db::run_migrations(&pool).await?;

    let filter = args.failed_only.then_some(NotificationStatus::Failed);
    let entries = db::list_notifications(&pool, filter).await?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&entries)?);
        return Ok(());
    }
    for entry in &entries {
        println!(
            "session:{} tier:{} status:{} attempts:{} scheduled_for:{} sent_at:{} destinations:[{}] error:{}",
            entry.session_id,
            entry.tier.as_str(),
            entry.status.as_str(),
            entry.attempts,
            entry.scheduled_for.to_rfc3339(),
            entry
                .sent_at
                .map(|t| t.to_rfc3339())
                .unwrap_or_else(|| "-".into()),
            entry.destinations.join(","),
            entry.error.as_deref().unwrap_or("-"),
        );
    }
    eprintln!("{} entries", entries.len());
    Ok(())
}
