//! Pure notification timing rules.
//!
//! Given the same inputs these functions always return the same decision, so
//! a scheduler re-run over the same instant behaves identically.

use chrono::{DateTime, Duration, Utc};

use crate::config::Schedule;
use crate::model::{NotificationRecord, NotificationStatus, Tier};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TierPolicy {
    pub tolerance: Duration,
    pub retry_cooldown: Duration,
    pub claim_ttl: Duration,
}

impl TierPolicy {
    pub fn from_schedule(schedule: &Schedule) -> Self {
        Self {
            tolerance: schedule.tolerance(),
            retry_cooldown: schedule.retry_cooldown(),
            claim_ttl: schedule.claim_ttl(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TierDecision {
    /// Session already started.
    Past,
    /// Outside the tier's tolerance window.
    NotDue,
    /// Send now.
    Due,
    AlreadySent,
    /// Last attempt failed within the retry cooldown.
    CoolingDown,
    /// Another run holds a fresh claim on this tier.
    InFlight,
}

/// True when `session_at - now` lies within `tolerance` of `lead` and the
/// session is still in the future.
pub fn is_tier_due(
    now: DateTime<Utc>,
    session_at: DateTime<Utc>,
    lead: Duration,
    tolerance: Duration,
) -> bool {
    let until = session_at - now;
    if until <= Duration::zero() {
        return false;
    }
    let drift = until - lead;
    drift <= tolerance && drift >= -tolerance
}

/// True when `last` happened less than `cooldown` before `now`.
pub fn within_cooldown(now: DateTime<Utc>, last: Option<DateTime<Utc>>, cooldown: Duration) -> bool {
    match last {
        Some(last) => now - last < cooldown,
        None => false,
    }
}

/// Decide what to do with `tier` for a session starting at `session_at`,
/// given the ledger entry for that pair (if any).
pub fn evaluate(
    now: DateTime<Utc>,
    session_at: DateTime<Utc>,
    tier: Tier,
    entry: Option<&NotificationRecord>,
    policy: &TierPolicy,
) -> TierDecision {
    if session_at <= now {
        return TierDecision::Past;
    }
    if !is_tier_due(now, session_at, tier.lead_time(), policy.tolerance) {
        return TierDecision::NotDue;
    }
    let Some(entry) = entry else {
        return TierDecision::Due;
    };
    match entry.status {
        NotificationStatus::Sent => TierDecision::AlreadySent,
        NotificationStatus::Failed => {
            let last = entry.attempted_at.or(entry.claimed_at);
            if within_cooldown(now, last, policy.retry_cooldown) {
                TierDecision::CoolingDown
            } else {
                TierDecision::Due
            }
        }
        NotificationStatus::Pending => {
            if within_cooldown(now, entry.claimed_at, policy.claim_ttl) {
                TierDecision::InFlight
            } else {
                TierDecision::Due
            }
        }
    }
}
