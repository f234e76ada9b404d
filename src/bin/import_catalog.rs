use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use tracing::info;

use class_scheduler::{catalog, config, db};

#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about = "Load curricula and class definitions from a YAML catalog into the store"
)]
struct Args {
    /// Path to YAML config file
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,

    /// Path to YAML catalog file
    #[arg(long, default_value = "catalog.yaml")]
    catalog: PathBuf,

    /// Validate the catalog and exit without writing
    #[arg(long)]
    dry_run: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false)
        .compact()
        .init();

    let args = Args::parse();
    let entries = catalog::load(&args.catalog)
        .with_context(|| format!("failed to load {}", args.catalog.display()))?;
    if args.dry_run {
        info!(
            curricula = entries.curricula.len(),
            classes = entries.classes.len(),
            "catalog is valid"
        );
        return Ok(());
    }

    let cfg = config::load(Some(&args.config))?;
    cfg.ensure_dirs()?;
    let pool = db::init_pool(&cfg.database_url(), cfg.app.store_timeout()).await?;
    db::run_migrations(&pool).await?;

    let summary = catalog::import(&pool, &entries).await?;
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}
