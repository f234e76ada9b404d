//! Batch lifecycle: open today's batch for every class that starts today.

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, Utc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::calendar;
use crate::config::Config;
use crate::curriculum::{self, CurriculumError};
use crate::db::{self, InsertOutcome, NewBatch, Pool};
use crate::model::{BatchStatus, ClassDefinition};
use crate::report::{ItemReport, Job, RunReport, SkipReason};
use crate::workers;

fn class_key(class: &ClassDefinition) -> String {
    format!("class:{}", class.name)
}

/// Ensure exactly one batch starting today exists for every active class
/// whose start weekday is today's weekday in the reference offset.
#[instrument(skip_all, fields(now = %now))]
pub async fn create_due_batches(
    pool: &Pool,
    cfg: &Config,
    now: DateTime<Utc>,
    cancel: &CancellationToken,
) -> Result<RunReport> {
    let today = calendar::local_date(now, cfg.app.offset());
    let weekday = calendar::weekday_index(today);
    let classes = tokio::time::timeout(
        cfg.app.store_timeout(),
        db::classes_starting_on(pool, weekday),
    )
    .await
    .context("timed out listing classes")??;
    info!(%today, weekday, classes = classes.len(), "creating due batches");

    let mut report = RunReport::new(Job::CreateBatches, now);
    let items = workers::run_bounded(
        classes,
        cfg.app.worker_concurrency,
        cfg.app.item_timeout(),
        cancel,
        class_key,
        |class| async move { ensure_batch(pool, &class, today, now).await },
    )
    .await;
    report.extend(items);
    info!(
        run_id = %report.run_id,
        created = report.created,
        skipped = report.skipped,
        failed = report.failed,
        "batch creation finished"
    );
    Ok(report)
}

/// Create the batch for `class` starting on `today` unless it already exists.
///
/// A lost insert race surfaces as a unique-key conflict and is reported as
/// `already_exists`.
#[instrument(skip_all, fields(class = %class.name, today = %today))]
pub async fn ensure_batch(
    pool: &Pool,
    class: &ClassDefinition,
    today: NaiveDate,
    now: DateTime<Utc>,
) -> Result<Vec<ItemReport>> {
    let key = class_key(class);
    let curriculum = match curriculum::resolve_for_class(pool, class).await {
        Ok(c) => c,
        Err(CurriculumError::Store(err)) => return Err(err),
        Err(err) => {
            warn!(error = %err, "curriculum not resolvable; no batch created");
            return Ok(vec![ItemReport::failed(key, err.to_string())]);
        }
    };

    if let Some(existing) = db::find_batch(pool, class.id, today).await? {
        debug!(batch_id = existing.id, "batch already exists");
        return Ok(vec![ItemReport::skipped(key, SkipReason::AlreadyExists)
            .with_detail(format!("batch #{}", existing.batch_number))]);
    }

    let batch_number = db::last_batch_number(pool, class.id).await?.unwrap_or(0) + 1;
    let new_batch = NewBatch {
        class_id: class.id,
        curriculum_id: curriculum.id,
        batch_number,
        start_date: today,
        status: BatchStatus::Active,
    };
    match db::insert_batch(pool, &new_batch, now).await? {
        InsertOutcome::Inserted(batch_id) => {
            info!(batch_id, batch_number, curriculum = %curriculum.name, "batch created");
            Ok(vec![ItemReport::created(key).with_detail(format!("batch #{batch_number}"))])
        }
        InsertOutcome::Conflict => match db::find_batch(pool, class.id, today).await? {
            Some(existing) => {
                info!(batch_id = existing.id, "concurrent run created the batch first");
                Ok(vec![ItemReport::skipped(key, SkipReason::AlreadyExists)
                    .with_detail(format!("batch #{}", existing.batch_number))])
            }
            None => {
                warn!(batch_number, "batch number already taken");
                Ok(vec![ItemReport::failed(
                    key,
                    format!(
                        "batch number {batch_number} is already taken for class '{}'",
                        class.name
                    ),
                )])
            }
        },
    }
}
