use super::model::{
    ActiveBatch, InsertOutcome, NewBatch, NewSession, NotificationOutcome, SessionSetWrite,
    UpcomingSession,
};
use crate::model::{
    Batch, BatchStatus, ClassDefinition, Curriculum, Lesson, NotificationRecord,
    NotificationStatus, Session, SessionStatus, Slot, Tier,
};
use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow, SqliteSynchronous,
};
use sqlx::{Row, SqlitePool};
use std::str::FromStr;
use std::time::Duration;
use tracing::instrument;

pub type Pool = SqlitePool;

const FILE_POOL_SIZE: u32 = 8;

/// Open the store. `timeout` bounds both pool acquisition and SQLite's busy
/// wait, so no store call can block indefinitely on a lock.
pub async fn init_pool(database_url: &str, timeout: Duration) -> Result<Pool> {
    let normalized = prepare_sqlite_url(database_url);
    let in_memory = normalized.starts_with("sqlite::memory");
    let options = SqliteConnectOptions::from_str(&normalized)
        .with_context(|| format!("invalid database url {normalized}"))?
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .synchronous(SqliteSynchronous::Full)
        .busy_timeout(timeout)
        .foreign_keys(true);
    // Shared-cache memory databases report SQLITE_LOCKED instead of waiting,
    // so they get a single connection.
    let max_connections = if in_memory { 1 } else { FILE_POOL_SIZE };
    let pool = SqlitePoolOptions::new()
        .max_connections(max_connections)
        .acquire_timeout(timeout)
        .connect_with(options)
        .await?;
    Ok(pool)
}

/// Expand a leading `~/` in file-backed SQLite URLs and make sure the parent
/// directory exists. Other URLs pass through untouched.
fn prepare_sqlite_url(url: &str) -> String {
    let Some(rest) = url.strip_prefix("sqlite:") else {
        return url.to_string();
    };
    if rest.starts_with(":memory") {
        return url.to_string();
    }
    let rest = rest.strip_prefix("//").unwrap_or(rest);
    let (path, query) = match rest.split_once('?') {
        Some((p, q)) => (p, Some(q)),
        None => (rest, None),
    };
    if path.is_empty() {
        return url.to_string();
    }

    let path = match (path.strip_prefix("~/"), std::env::var("HOME")) {
        (Some(tail), Ok(home)) => format!("{}/{}", home.trim_end_matches('/'), tail),
        _ => path.to_string(),
    };
    if let Some(parent) = std::path::Path::new(&path).parent() {
        if !parent.as_os_str().is_empty() {
            let _ = std::fs::create_dir_all(parent);
        }
    }

    match query {
        Some(q) => format!("sqlite://{path}?{q}"),
        None => format!("sqlite://{path}"),
    }
}

pub async fn run_migrations(pool: &Pool) -> Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Class calendar and curriculum catalog
// ---------------------------------------------------------------------------

#[instrument(skip_all, fields(name = %name))]
pub async fn upsert_curriculum(pool: &Pool, name: &str, active: bool) -> Result<i64> {
    let id: i64 = sqlx::query_scalar(
        "INSERT INTO curricula (name, active) VALUES (?, ?) \
         ON CONFLICT (name) DO UPDATE SET active = excluded.active RETURNING id",
    )
    .bind(name)
    .bind(active)
    .fetch_one(pool)
    .await?;
    Ok(id)
}

/// Replace the ordered lesson list of a curriculum in one transaction.
#[instrument(skip_all, fields(curriculum_id = curriculum_id))]
pub async fn replace_lessons(pool: &Pool, curriculum_id: i64, lessons: &[Lesson]) -> Result<()> {
    let mut tx = pool.begin().await?;
    sqlx::query("DELETE FROM lessons WHERE curriculum_id = ?")
        .bind(curriculum_id)
        .execute(&mut *tx)
        .await?;
    for lesson in lessons {
        sqlx::query(
            "INSERT INTO lessons (curriculum_id, position, lesson_ref, title) VALUES (?, ?, ?, ?)",
        )
        .bind(curriculum_id)
        .bind(lesson.position)
        .bind(&lesson.lesson_ref)
        .bind(&lesson.title)
        .execute(&mut *tx)
        .await
        .with_context(|| format!("failed to insert lesson {}", lesson.position))?;
    }
    tx.commit().await?;
    Ok(())
}

#[instrument(skip_all, fields(name = %name))]
pub async fn upsert_class(
    pool: &Pool,
    name: &str,
    start_weekday: u32,
    curriculum_id: Option<i64>,
    total_sessions: i64,
    active: bool,
) -> Result<i64> {
    let id: i64 = sqlx::query_scalar(
        "INSERT INTO class_definitions (name, start_weekday, curriculum_id, total_sessions, active) \
         VALUES (?, ?, ?, ?, ?) \
         ON CONFLICT (name) DO UPDATE SET \
            start_weekday = excluded.start_weekday, \
            curriculum_id = excluded.curriculum_id, \
            total_sessions = excluded.total_sessions, \
            active = excluded.active \
         RETURNING id",
    )
    .bind(name)
    .bind(start_weekday)
    .bind(curriculum_id)
    .bind(total_sessions)
    .bind(active)
    .fetch_one(pool)
    .await?;
    Ok(id)
}

fn row_to_class(row: &SqliteRow) -> Result<ClassDefinition> {
    Ok(ClassDefinition {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        start_weekday: row.try_get("start_weekday")?,
        curriculum_id: row.try_get("curriculum_id")?,
        total_sessions: row.try_get("total_sessions")?,
        active: row.try_get("active")?,
    })
}

/// Active classes whose configured start weekday is `weekday` (0 = Sunday).
#[instrument(skip_all, fields(weekday = weekday))]
pub async fn classes_starting_on(pool: &Pool, weekday: u32) -> Result<Vec<ClassDefinition>> {
    let rows = sqlx::query(
        "SELECT id, name, start_weekday, curriculum_id, total_sessions, active \
         FROM class_definitions WHERE start_weekday = ? AND active = 1 ORDER BY id",
    )
    .bind(weekday)
    .fetch_all(pool)
    .await?;
    rows.iter().map(row_to_class).collect()
}

#[instrument(skip_all, fields(curriculum_id = curriculum_id))]
pub async fn fetch_curriculum(pool: &Pool, curriculum_id: i64) -> Result<Option<Curriculum>> {
    let row = sqlx::query(
        "SELECT c.id, c.name, c.active, \
                (SELECT COUNT(*) FROM lessons l WHERE l.curriculum_id = c.id) AS lesson_count \
         FROM curricula c WHERE c.id = ?",
    )
    .bind(curriculum_id)
    .fetch_optional(pool)
    .await?;
    let Some(row) = row else {
        return Ok(None);
    };
    Ok(Some(Curriculum {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        active: row.try_get("active")?,
        lesson_count: row.try_get("lesson_count")?,
    }))
}

#[instrument(skip_all, fields(curriculum_id = curriculum_id, position = position))]
pub async fn fetch_lesson(pool: &Pool, curriculum_id: i64, position: i64) -> Result<Option<Lesson>> {
    let row = sqlx::query(
        "SELECT position, lesson_ref, title FROM lessons WHERE curriculum_id = ? AND position = ?",
    )
    .bind(curriculum_id)
    .bind(position)
    .fetch_optional(pool)
    .await?;
    row.map(|row| {
        Ok(Lesson {
            position: row.try_get("position")?,
            lesson_ref: row.try_get("lesson_ref")?,
            title: row.try_get("title")?,
        })
    })
    .transpose()
}

// ---------------------------------------------------------------------------
// Batch store
// ---------------------------------------------------------------------------

fn row_to_batch(row: &SqliteRow) -> Result<Batch> {
    let status: String = row.try_get("status")?;
    let id: i64 = row.try_get("id")?;
    Ok(Batch {
        id,
        class_id: row.try_get("class_id")?,
        curriculum_id: row.try_get("curriculum_id")?,
        batch_number: row.try_get("batch_number")?,
        start_date: row.try_get("start_date")?,
        status: BatchStatus::parse_status(&status)
            .ok_or_else(|| anyhow!("batch {} has unknown status {}", id, status))?,
        created_at: row.try_get("created_at")?,
    })
}

/// Highest batch number issued for a class. Numbering is scoped per class.
#[instrument(skip_all, fields(class_id = class_id))]
pub async fn last_batch_number(pool: &Pool, class_id: i64) -> Result<Option<i64>> {
    let n: Option<i64> = sqlx::query_scalar(
        "SELECT batch_number FROM batches WHERE class_id = ? ORDER BY batch_number DESC LIMIT 1",
    )
    .bind(class_id)
    .fetch_optional(pool)
    .await?;
    Ok(n)
}

#[instrument(skip_all, fields(class_id = class_id, start_date = %start_date))]
pub async fn find_batch(pool: &Pool, class_id: i64, start_date: NaiveDate) -> Result<Option<Batch>> {
    let row = sqlx::query(
        "SELECT id, class_id, curriculum_id, batch_number, start_date, status, created_at \
         FROM batches WHERE class_id = ? AND start_date = ?",
    )
    .bind(class_id)
    .bind(start_date)
    .fetch_optional(pool)
    .await?;
    row.as_ref().map(row_to_batch).transpose()
}

#[instrument(skip_all)]
pub async fn list_batches(pool: &Pool, class_id: i64) -> Result<Vec<Batch>> {
    let rows = sqlx::query(
        "SELECT id, class_id, curriculum_id, batch_number, start_date, status, created_at \
         FROM batches WHERE class_id = ? ORDER BY batch_number",
    )
    .bind(class_id)
    .fetch_all(pool)
    .await?;
    rows.iter().map(row_to_batch).collect()
}

/// Insert a batch, treating any unique-key conflict as `Conflict`.
#[instrument(skip_all, fields(class_id = batch.class_id, batch_number = batch.batch_number))]
pub async fn insert_batch(pool: &Pool, batch: &NewBatch, now: DateTime<Utc>) -> Result<InsertOutcome> {
    let id: Option<i64> = sqlx::query_scalar(
        "INSERT INTO batches (class_id, curriculum_id, batch_number, start_date, status, created_at) \
         VALUES (?, ?, ?, ?, ?, ?) ON CONFLICT DO NOTHING RETURNING id",
    )
    .bind(batch.class_id)
    .bind(batch.curriculum_id)
    .bind(batch.batch_number)
    .bind(batch.start_date)
    .bind(batch.status.as_str())
    .bind(now)
    .fetch_optional(pool)
    .await?;
    Ok(match id {
        Some(id) => InsertOutcome::Inserted(id),
        None => InsertOutcome::Conflict,
    })
}

#[instrument(skip_all)]
pub async fn list_active_batches(pool: &Pool) -> Result<Vec<ActiveBatch>> {
    let rows = sqlx::query(
        "SELECT b.id AS batch_id, b.class_id, c.name AS class_name, b.curriculum_id, \
                b.batch_number, b.start_date, c.total_sessions \
         FROM batches b JOIN class_definitions c ON c.id = b.class_id \
         WHERE b.status = 'active' ORDER BY b.id",
    )
    .fetch_all(pool)
    .await?;
    rows.iter()
        .map(|row| {
            Ok(ActiveBatch {
                batch_id: row.try_get("batch_id")?,
                class_id: row.try_get("class_id")?,
                class_name: row.try_get("class_name")?,
                curriculum_id: row.try_get("curriculum_id")?,
                batch_number: row.try_get("batch_number")?,
                start_date: row.try_get("start_date")?,
                total_sessions: row.try_get("total_sessions")?,
            })
        })
        .collect()
}

/// Move an active batch to `completed`. Returns false when it was not active.
#[instrument(skip_all, fields(batch_id = batch_id))]
pub async fn complete_batch(pool: &Pool, batch_id: i64, now: DateTime<Utc>) -> Result<bool> {
    let res = sqlx::query(
        "UPDATE batches SET status = 'completed', completed_at = ? WHERE id = ? AND status = 'active'",
    )
    .bind(now)
    .bind(batch_id)
    .execute(pool)
    .await?;
    Ok(res.rows_affected() == 1)
}

// ---------------------------------------------------------------------------
// Session store
// ---------------------------------------------------------------------------

fn row_to_session(row: &SqliteRow) -> Result<Session> {
    let id: i64 = row.try_get("id")?;
    let slot: String = row.try_get("slot")?;
    let status: String = row.try_get("status")?;
    Ok(Session {
        id,
        batch_id: row.try_get("batch_id")?,
        session_number: row.try_get("session_number")?,
        title: row.try_get("title")?,
        lesson_ref: row.try_get("lesson_ref")?,
        slot: Slot::parse_slot(&slot)
            .ok_or_else(|| anyhow!("session {} has unknown slot {}", id, slot))?,
        scheduled_date: row.try_get("scheduled_date")?,
        scheduled_at: row.try_get("scheduled_at")?,
        status: SessionStatus::parse_status(&status)
            .ok_or_else(|| anyhow!("session {} has unknown status {}", id, status))?,
    })
}

#[instrument(skip_all, fields(batch_id = batch_id, date = %date))]
pub async fn count_sessions_on(pool: &Pool, batch_id: i64, date: NaiveDate) -> Result<i64> {
    let n: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM sessions WHERE batch_id = ? AND scheduled_date = ?")
            .bind(batch_id)
            .bind(date)
            .fetch_one(pool)
            .await?;
    Ok(n)
}

/// Write a day's session set for one batch as a unit.
///
/// If any session already exists for `(batch_id, date)`, or a concurrent
/// writer wins any slot, nothing is written and `AlreadyExists` is returned.
#[instrument(skip_all, fields(batch_id = batch_id, date = %date, slots = sessions.len()))]
pub async fn insert_session_set(
    pool: &Pool,
    batch_id: i64,
    date: NaiveDate,
    sessions: &[NewSession],
) -> Result<SessionSetWrite> {
    let mut tx = pool.begin().await?;
    let existing: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM sessions WHERE batch_id = ? AND scheduled_date = ?")
            .bind(batch_id)
            .bind(date)
            .fetch_one(&mut *tx)
            .await?;
    if existing > 0 {
        tx.rollback().await?;
        return Ok(SessionSetWrite::AlreadyExists);
    }

    let mut ids = Vec::with_capacity(sessions.len());
    for s in sessions {
        let id: Option<i64> = sqlx::query_scalar(
            "INSERT INTO sessions \
                (batch_id, session_number, title, lesson_ref, slot, scheduled_date, scheduled_at, status) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?) \
             ON CONFLICT (batch_id, scheduled_date, slot) DO NOTHING RETURNING id",
        )
        .bind(batch_id)
        .bind(s.session_number)
        .bind(&s.title)
        .bind(s.lesson_ref.as_deref())
        .bind(s.slot.as_str())
        .bind(date)
        .bind(s.scheduled_at)
        .bind(SessionStatus::Scheduled.as_str())
        .fetch_optional(&mut *tx)
        .await?;
        match id {
            Some(id) => ids.push(id),
            None => {
                tx.rollback().await?;
                return Ok(SessionSetWrite::AlreadyExists);
            }
        }
    }
    tx.commit().await?;
    Ok(SessionSetWrite::Inserted(ids))
}

#[instrument(skip_all)]
pub async fn list_sessions(pool: &Pool, batch_id: i64) -> Result<Vec<Session>> {
    let rows = sqlx::query(
        "SELECT id, batch_id, session_number, title, lesson_ref, slot, scheduled_date, scheduled_at, status \
         FROM sessions WHERE batch_id = ? ORDER BY scheduled_date, id",
    )
    .bind(batch_id)
    .fetch_all(pool)
    .await?;
    rows.iter().map(row_to_session).collect()
}

/// Scheduled sessions with `from < scheduled_at <= until`.
#[instrument(skip_all, fields(from = %from, until = %until))]
pub async fn upcoming_sessions(
    pool: &Pool,
    from: DateTime<Utc>,
    until: DateTime<Utc>,
) -> Result<Vec<UpcomingSession>> {
    let rows = sqlx::query(
        "SELECT s.id AS session_id, s.session_number, s.title, s.slot, s.scheduled_at, \
                b.batch_number, c.name AS class_name \
         FROM sessions s \
         JOIN batches b ON b.id = s.batch_id \
         JOIN class_definitions c ON c.id = b.class_id \
         WHERE s.status = 'scheduled' \
           AND datetime(s.scheduled_at) > datetime(?) \
           AND datetime(s.scheduled_at) <= datetime(?) \
         ORDER BY datetime(s.scheduled_at), s.id",
    )
    .bind(from)
    .bind(until)
    .fetch_all(pool)
    .await?;
    rows.iter()
        .map(|row| {
            let session_id: i64 = row.try_get("session_id")?;
            let slot: String = row.try_get("slot")?;
            Ok(UpcomingSession {
                session_id,
                session_number: row.try_get("session_number")?,
                title: row.try_get("title")?,
                slot: Slot::parse_slot(&slot)
                    .ok_or_else(|| anyhow!("session {} has unknown slot {}", session_id, slot))?,
                scheduled_at: row.try_get("scheduled_at")?,
                batch_number: row.try_get("batch_number")?,
                class_name: row.try_get("class_name")?,
            })
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Notification ledger
// ---------------------------------------------------------------------------

const NOTIFICATION_COLUMNS: &str = "id, session_id, tier, scheduled_for, status, claimed_at, \
     attempted_at, sent_at, destinations, error, attempts";

fn row_to_notification(row: &SqliteRow) -> Result<NotificationRecord> {
    let id: i64 = row.try_get("id")?;
    let tier: String = row.try_get("tier")?;
    let status: String = row.try_get("status")?;
    let destinations: String = row.try_get("destinations")?;
    Ok(NotificationRecord {
        id,
        session_id: row.try_get("session_id")?,
        tier: Tier::parse_tier(&tier)
            .ok_or_else(|| anyhow!("notification {} has unknown tier {}", id, tier))?,
        scheduled_for: row.try_get("scheduled_for")?,
        status: NotificationStatus::parse_status(&status)
            .ok_or_else(|| anyhow!("notification {} has unknown status {}", id, status))?,
        claimed_at: row.try_get("claimed_at")?,
        attempted_at: row.try_get("attempted_at")?,
        sent_at: row.try_get("sent_at")?,
        destinations: serde_json::from_str(&destinations)
            .with_context(|| format!("notification {} has malformed destinations", id))?,
        error: row.try_get("error")?,
        attempts: row.try_get("attempts")?,
    })
}

#[instrument(skip_all, fields(session_id = session_id, tier = tier.as_str()))]
pub async fn find_notification(
    pool: &Pool,
    session_id: i64,
    tier: Tier,
) -> Result<Option<NotificationRecord>> {
    let sql = format!(
        "SELECT {NOTIFICATION_COLUMNS} FROM notifications WHERE session_id = ? AND tier = ?"
    );
    let row = sqlx::query(&sql)
        .bind(session_id)
        .bind(tier.as_str())
        .fetch_optional(pool)
        .await?;
    row.as_ref().map(row_to_notification).transpose()
}

/// Take ownership of sending `(session_id, tier)`.
///
/// Succeeds when no ledger entry exists yet, when the entry is `failed` and
/// its last attempt is at or before `retry_after`, or when it is `pending`
/// with a claim at or before `stale_before`. Exactly one of several racing
/// callers gets `true`.
#[instrument(skip_all, fields(session_id = session_id, tier = tier.as_str()))]
pub async fn claim_notification(
    pool: &Pool,
    session_id: i64,
    tier: Tier,
    scheduled_for: DateTime<Utc>,
    now: DateTime<Utc>,
    retry_after: DateTime<Utc>,
    stale_before: DateTime<Utc>,
) -> Result<bool> {
    let res = sqlx::query(
        "INSERT INTO notifications (session_id, tier, scheduled_for, status, claimed_at) \
         VALUES (?, ?, ?, 'pending', ?) \
         ON CONFLICT (session_id, tier) DO UPDATE SET \
            status = 'pending', \
            claimed_at = excluded.claimed_at, \
            scheduled_for = excluded.scheduled_for \
         WHERE (notifications.status = 'failed' \
                AND (notifications.attempted_at IS NULL \
                     OR datetime(notifications.attempted_at) <= datetime(?))) \
            OR (notifications.status = 'pending' \
                AND (notifications.claimed_at IS NULL \
                     OR datetime(notifications.claimed_at) <= datetime(?)))",
    )
    .bind(session_id)
    .bind(tier.as_str())
    .bind(scheduled_for)
    .bind(now)
    .bind(retry_after)
    .bind(stale_before)
    .execute(pool)
    .await?;
    Ok(res.rows_affected() == 1)
}

/// Upsert the outcome of a delivery attempt keyed on `(session_id, tier)`.
/// A `sent` entry is never downgraded by a later failed attempt.
#[instrument(skip_all, fields(session_id = outcome.session_id, tier = outcome.tier.as_str(), status = outcome.status.as_str()))]
pub async fn record_notification_outcome(pool: &Pool, outcome: &NotificationOutcome) -> Result<()> {
    let destinations = serde_json::to_string(&outcome.destinations)?;
    let sent_at = (outcome.status == NotificationStatus::Sent).then_some(outcome.attempted_at);
    sqlx::query(
        "INSERT INTO notifications \
            (session_id, tier, scheduled_for, status, attempted_at, sent_at, destinations, error, attempts) \
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, 1) \
         ON CONFLICT (session_id, tier) DO UPDATE SET \
            status = excluded.status, \
            scheduled_for = excluded.scheduled_for, \
            attempted_at = excluded.attempted_at, \
            sent_at = COALESCE(excluded.sent_at, notifications.sent_at), \
            destinations = excluded.destinations, \
            error = excluded.error, \
            attempts = notifications.attempts + 1, \
            claimed_at = NULL \
         WHERE notifications.status <> 'sent' OR excluded.status = 'sent'",
    )
    .bind(outcome.session_id)
    .bind(outcome.tier.as_str())
    .bind(outcome.scheduled_for)
    .bind(outcome.status.as_str())
    .bind(outcome.attempted_at)
    .bind(sent_at)
    .bind(destinations)
    .bind(outcome.error.as_deref())
    .execute(pool)
    .await
    .context("failed to persist notification outcome")?;
    Ok(())
}

#[instrument(skip_all)]
pub async fn list_notifications(
    pool: &Pool,
    status: Option<NotificationStatus>,
) -> Result<Vec<NotificationRecord>> {
    let rows = match status {
        Some(status) => {
            let sql = format!(
                "SELECT {NOTIFICATION_COLUMNS} FROM notifications WHERE status = ? ORDER BY id"
            );
            sqlx::query(&sql).bind(status.as_str()).fetch_all(pool).await?
        }
        None => {
            let sql = format!("SELECT {NOTIFICATION_COLUMNS} FROM notifications ORDER BY id");
            sqlx::query(&sql).fetch_all(pool).await?
        }
    };
    rows.iter().map(row_to_notification).collect()
}
