//! Notification scheduling: decide which tiers are due for upcoming sessions
//! and dispatch each one at most once through the ledger.

use anyhow::{Context, Result};
use chrono::{DateTime, FixedOffset, Utc};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::config::Config;
use crate::db::{self, NotificationOutcome, Pool, UpcomingSession};
use crate::delivery::{self, Destination, FanOutResult, RetryPolicy};
use crate::model::{NotificationStatus, Tier};
use crate::report::{ItemReport, Job, RunReport, SkipReason};
use crate::tiers::{self, TierDecision, TierPolicy};
use crate::workers;

fn session_key(session: &UpcomingSession) -> String {
    format!("session:{}", session.session_id)
}

fn tier_key(session: &UpcomingSession, tier: Tier) -> String {
    format!("session:{}/{}", session.session_id, tier.as_str())
}

/// Reminder text for one tier of one session.
pub fn render_message(session: &UpcomingSession, tier: Tier, offset: FixedOffset) -> String {
    let local = session.scheduled_at.with_timezone(&offset);
    format!(
        "Reminder: {} (batch #{}) session {} \"{}\" starts {}, {} at {}.",
        session.class_name,
        session.batch_number,
        session.session_number,
        session.title,
        tier.lead_phrase(),
        local.format("%a %d %b"),
        local.format("%H:%M"),
    )
}

/// Dispatch every due, not-yet-sent tier for sessions starting within the
/// configured horizon after `now`.
#[instrument(skip_all, fields(now = %now))]
pub async fn dispatch_notifications(
    pool: &Pool,
    cfg: &Config,
    destinations: &[Arc<dyn Destination>],
    now: DateTime<Utc>,
    cancel: &CancellationToken,
) -> Result<RunReport> {
    let until = now + cfg.schedule.horizon();
    let sessions = tokio::time::timeout(
        cfg.app.store_timeout(),
        db::upcoming_sessions(pool, now, until),
    )
    .await
    .context("timed out listing upcoming sessions")??;
    info!(%until, sessions = sessions.len(), "dispatching notifications");

    let mut report = RunReport::new(Job::DispatchNotifications, now);
    let items = workers::run_bounded(
        sessions,
        cfg.app.worker_concurrency,
        cfg.app.item_timeout(),
        cancel,
        session_key,
        |session| async move { notify_session(pool, cfg, destinations, &session, now).await },
    )
    .await;
    report.extend(items);
    info!(
        run_id = %report.run_id,
        sent = report.created,
        skipped = report.skipped,
        failed = report.failed,
        "notification dispatch finished"
    );
    Ok(report)
}

#[instrument(skip_all, fields(session_id = session.session_id))]
async fn notify_session(
    pool: &Pool,
    cfg: &Config,
    destinations: &[Arc<dyn Destination>],
    session: &UpcomingSession,
    now: DateTime<Utc>,
) -> Result<Vec<ItemReport>> {
    let policy = TierPolicy::from_schedule(&cfg.schedule);
    let mut reports = Vec::new();
    for &tier in cfg.schedule.tiers() {
        if !tiers::is_tier_due(now, session.scheduled_at, tier.lead_time(), policy.tolerance) {
            continue;
        }
        let key = tier_key(session, tier);
        let report = match notify_tier(pool, cfg, destinations, session, tier, &policy, now).await {
            Ok(Some(report)) => report,
            Ok(None) => continue,
            Err(err) => {
                warn!(tier = tier.as_str(), error = %format!("{err:#}"), "tier dispatch failed");
                ItemReport::failed(key, format!("{err:#}"))
            }
        };
        reports.push(report);
    }
    Ok(reports)
}

async fn notify_tier(
    pool: &Pool,
    cfg: &Config,
    destinations: &[Arc<dyn Destination>],
    session: &UpcomingSession,
    tier: Tier,
    policy: &TierPolicy,
    now: DateTime<Utc>,
) -> Result<Option<ItemReport>> {
    let key = tier_key(session, tier);
    let entry = db::find_notification(pool, session.session_id, tier).await?;
    match tiers::evaluate(now, session.scheduled_at, tier, entry.as_ref(), policy) {
        TierDecision::Past | TierDecision::NotDue => return Ok(None),
        TierDecision::AlreadySent => {
            debug!(tier = tier.as_str(), "already sent");
            return Ok(Some(ItemReport::skipped(key, SkipReason::AlreadySent)));
        }
        TierDecision::CoolingDown => {
            debug!(tier = tier.as_str(), "last attempt failed recently");
            return Ok(Some(ItemReport::skipped(key, SkipReason::CoolingDown)));
        }
        TierDecision::InFlight => {
            return Ok(Some(ItemReport::skipped(key, SkipReason::ClaimedElsewhere)));
        }
        TierDecision::Due => {}
    }

    let scheduled_for = session.scheduled_at - tier.lead_time();
    let claimed = db::claim_notification(
        pool,
        session.session_id,
        tier,
        scheduled_for,
        now,
        now - policy.retry_cooldown,
        now - policy.claim_ttl,
    )
    .await?;
    if !claimed {
        debug!(tier = tier.as_str(), "another run claimed this tier");
        return Ok(Some(ItemReport::skipped(key, SkipReason::ClaimedElsewhere)));
    }

    // Once claimed, delivery and its ledger write run on their own task so
    // an item timeout cannot drop a half-finished fan-out.
    let delivery = tokio::spawn(deliver_and_record(
        pool.clone(),
        destinations.to_vec(),
        render_message(session, tier, cfg.app.offset()),
        RetryPolicy::from(&cfg.delivery),
        session.session_id,
        tier,
        scheduled_for,
        now,
    ));
    let result = delivery.await.context("delivery task aborted")??;
    let error = result.error_summary();

    let report = match result.status {
        NotificationStatus::Sent => {
            info!(tier = tier.as_str(), delivered = ?result.delivered, "notification sent");
            let mut detail = format!("delivered to {}", result.delivered.join(", "));
            if let Some(error) = error {
                detail.push_str(&format!("; failed: {error}"));
            }
            ItemReport::created(key).with_detail(detail)
        }
        _ => {
            warn!(tier = tier.as_str(), error = ?error, "notification failed at every destination");
            ItemReport::failed(key, error.unwrap_or_else(|| "no destination accepted".into()))
        }
    };
    Ok(Some(report))
}

/// Fan out one claimed tier and persist whatever was reached.
#[allow(clippy::too_many_arguments)]
#[instrument(skip_all, fields(session_id = session_id, tier = tier.as_str()))]
async fn deliver_and_record(
    pool: Pool,
    destinations: Vec<Arc<dyn Destination>>,
    message: String,
    policy: RetryPolicy,
    session_id: i64,
    tier: Tier,
    scheduled_for: DateTime<Utc>,
    now: DateTime<Utc>,
) -> Result<FanOutResult> {
    let result = delivery::fan_out(&destinations, &message, &policy).await;
    db::record_notification_outcome(
        &pool,
        &NotificationOutcome {
            session_id,
            tier,
            scheduled_for,
            status: result.status,
            attempted_at: now,
            destinations: result.delivered.clone(),
            error: result.error_summary(),
        },
    )
    .await?;
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Slot;
    use chrono::TimeZone;

    #[test]
    fn message_uses_local_time() {
        let session = UpcomingSession {
            session_id: 9,
            session_number: 1,
            title: "Ownership".into(),
            slot: Slot::Afternoon,
            scheduled_at: Utc.with_ymd_and_hms(2026, 10, 22, 7, 30, 0).unwrap(),
            batch_number: 3,
            class_name: "Rust Evenings".into(),
        };
        let offset = FixedOffset::east_opt(330 * 60).unwrap();
        let text = render_message(&session, Tier::ThreeHours, offset);
        assert_eq!(
            text,
            "Reminder: Rust Evenings (batch #3) session 1 \"Ownership\" starts in 3 hours, Thu 22 Oct at 13:00."
        );
    }
}
