//! Session generation: today's three slot sessions for every active batch.

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, Utc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument};

use crate::calendar;
use crate::config::Config;
use crate::curriculum::{self, ResolvedLesson};
use crate::db::{self, ActiveBatch, NewSession, Pool, SessionSetWrite};
use crate::model::Slot;
use crate::report::{ItemReport, Job, RunReport, SkipReason};
use crate::workers;

fn batch_key(batch: &ActiveBatch) -> String {
    format!("batch:{}#{}", batch.class_name, batch.batch_number)
}

/// Where a batch stands on a given day.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DayPlan {
    NotStarted,
    Session(i64),
    CurriculumComplete,
}

/// Curriculum position of `start_date`'s batch on `today`.
pub fn plan_day(start_date: NaiveDate, today: NaiveDate, total_sessions: i64) -> DayPlan {
    let n = calendar::session_number(start_date, today);
    if n < 1 {
        DayPlan::NotStarted
    } else if n > total_sessions {
        DayPlan::CurriculumComplete
    } else {
        DayPlan::Session(n)
    }
}

/// The day's session set: one session per slot, same lesson in each.
pub fn build_session_set(
    cfg: &Config,
    today: NaiveDate,
    session_number: i64,
    lesson: &ResolvedLesson,
) -> Vec<NewSession> {
    let offset = cfg.app.offset();
    Slot::ALL
        .iter()
        .map(|&slot| NewSession {
            session_number,
            title: lesson.title.clone(),
            lesson_ref: lesson.lesson_ref.clone(),
            slot,
            scheduled_at: calendar::local_instant(today, cfg.schedule.slot_time(slot), offset),
        })
        .collect()
}

/// Ensure today's sessions exist for every active batch.
#[instrument(skip_all, fields(now = %now))]
pub async fn generate_sessions(
    pool: &Pool,
    cfg: &Config,
    now: DateTime<Utc>,
    cancel: &CancellationToken,
) -> Result<RunReport> {
    let today = calendar::local_date(now, cfg.app.offset());
    let batches = tokio::time::timeout(cfg.app.store_timeout(), db::list_active_batches(pool))
        .await
        .context("timed out listing active batches")??;
    info!(%today, batches = batches.len(), "generating sessions");

    let mut report = RunReport::new(Job::GenerateSessions, now);
    let items = workers::run_bounded(
        batches,
        cfg.app.worker_concurrency,
        cfg.app.item_timeout(),
        cancel,
        batch_key,
        |batch| async move { ensure_sessions(pool, cfg, &batch, today, now).await },
    )
    .await;
    report.extend(items);
    info!(
        run_id = %report.run_id,
        created = report.created,
        skipped = report.skipped,
        failed = report.failed,
        "session generation finished"
    );
    Ok(report)
}

#[instrument(skip_all, fields(batch_id = batch.batch_id, today = %today))]
async fn ensure_sessions(
    pool: &Pool,
    cfg: &Config,
    batch: &ActiveBatch,
    today: NaiveDate,
    now: DateTime<Utc>,
) -> Result<Vec<ItemReport>> {
    let key = batch_key(batch);
    let session_number = match plan_day(batch.start_date, today, batch.total_sessions) {
        DayPlan::NotStarted => {
            debug!(start_date = %batch.start_date, "batch has not started");
            return Ok(vec![ItemReport::skipped(key, SkipReason::NotStarted)]);
        }
        DayPlan::CurriculumComplete => {
            if db::complete_batch(pool, batch.batch_id, now).await? {
                info!(total_sessions = batch.total_sessions, "curriculum finished; batch completed");
            }
            return Ok(vec![ItemReport::skipped(key, SkipReason::CurriculumComplete)]);
        }
        DayPlan::Session(n) => n,
    };

    // Cheap pre-check; the set write below re-checks inside its transaction.
    if db::count_sessions_on(pool, batch.batch_id, today).await? > 0 {
        debug!("sessions already generated");
        return Ok(vec![ItemReport::skipped(key, SkipReason::AlreadyExists)]);
    }

    let lesson = curriculum::lesson_for(pool, batch.curriculum_id, session_number).await?;
    let set = build_session_set(cfg, today, session_number, &lesson);
    match db::insert_session_set(pool, batch.batch_id, today, &set).await? {
        SessionSetWrite::Inserted(ids) => {
            info!(session_number, sessions = ids.len(), title = %lesson.title, "sessions generated");
            Ok(vec![ItemReport::created(key)
                .with_detail(format!("session {session_number}: {}", lesson.title))])
        }
        SessionSetWrite::AlreadyExists => {
            debug!("concurrent run generated the sessions first");
            Ok(vec![ItemReport::skipped(key, SkipReason::AlreadyExists)])
        }
    }
}
