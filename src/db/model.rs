//! Database view models and write payloads used by repositories.
//!
//! Keep these structs focused on the data moved by queries. Business logic
//! should live in higher layers.

use chrono::{DateTime, NaiveDate, Utc};

use crate::model::{BatchStatus, NotificationStatus, Slot, Tier};

/// Active batch joined with the class facts the session generator needs.
#[derive(Debug, Clone)]
pub struct ActiveBatch {
    pub batch_id: i64,
    pub class_id: i64,
    pub class_name: String,
    pub curriculum_id: i64,
    pub batch_number: i64,
    pub start_date: NaiveDate,
    pub total_sessions: i64,
}

/// Insert payload for a new batch.
#[derive(Debug, Clone)]
pub struct NewBatch {
    pub class_id: i64,
    pub curriculum_id: i64,
    pub batch_number: i64,
    pub start_date: NaiveDate,
    pub status: BatchStatus,
}

/// Result of a conflict-tolerant insert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted(i64),
    Conflict,
}

/// One slot of a day's session set.
#[derive(Debug, Clone)]
pub struct NewSession {
    pub session_number: i64,
    pub title: String,
    pub lesson_ref: Option<String>,
    pub slot: Slot,
    pub scheduled_at: DateTime<Utc>,
}

/// Result of writing a day's session set for one batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionSetWrite {
    Inserted(Vec<i64>),
    AlreadyExists,
}

/// Session slice used by the notification scheduler.
#[derive(Debug, Clone)]
pub struct UpcomingSession {
    pub session_id: i64,
    pub session_number: i64,
    pub title: String,
    pub slot: Slot,
    pub scheduled_at: DateTime<Utc>,
    pub batch_number: i64,
    pub class_name: String,
}

/// Final state of one (session, tier) delivery attempt.
#[derive(Debug, Clone)]
pub struct NotificationOutcome {
    pub session_id: i64,
    pub tier: Tier,
    pub scheduled_for: DateTime<Utc>,
    pub status: NotificationStatus,
    pub attempted_at: DateTime<Utc>,
    pub destinations: Vec<String>,
    pub error: Option<String>,
}
