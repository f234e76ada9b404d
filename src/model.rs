use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum BatchStatus {
    Active,
    Completed,
    Cancelled,
}

impl BatchStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BatchStatus::Active => "active",
            BatchStatus::Completed => "completed",
            BatchStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse_status(s: &str) -> Option<Self> {
        match s {
            "active" => Some(BatchStatus::Active),
            "completed" => Some(BatchStatus::Completed),
            "cancelled" => Some(BatchStatus::Cancelled),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Scheduled,
    InProgress,
    Completed,
    Cancelled,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Scheduled => "scheduled",
            SessionStatus::InProgress => "in_progress",
            SessionStatus::Completed => "completed",
            SessionStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse_status(s: &str) -> Option<Self> {
        match s {
            "scheduled" => Some(SessionStatus::Scheduled),
            "in_progress" => Some(SessionStatus::InProgress),
            "completed" => Some(SessionStatus::Completed),
            "cancelled" => Some(SessionStatus::Cancelled),
            _ => None,
        }
    }
}

/// One of the three fixed daily time windows.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum Slot {
    Morning,
    Afternoon,
    Evening,
}

impl Slot {
    pub const ALL: [Slot; 3] = [Slot::Morning, Slot::Afternoon, Slot::Evening];

    pub fn as_str(&self) -> &'static str {
        match self {
            Slot::Morning => "morning",
            Slot::Afternoon => "afternoon",
            Slot::Evening => "evening",
        }
    }

    pub fn parse_slot(s: &str) -> Option<Self> {
        match s {
            "morning" => Some(Slot::Morning),
            "afternoon" => Some(Slot::Afternoon),
            "evening" => Some(Slot::Evening),
            _ => None,
        }
    }
}

/// Named lead time before a session at which a reminder fires.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum Tier {
    #[serde(rename = "5_days")]
    FiveDays,
    #[serde(rename = "48_hours")]
    FortyEightHours,
    #[serde(rename = "24_hours")]
    TwentyFourHours,
    #[serde(rename = "3_hours")]
    ThreeHours,
    #[serde(rename = "30_minutes")]
    ThirtyMinutes,
}

impl Tier {
    /// Every tier, farthest lead time first.
    pub const FULL: [Tier; 5] = [
        Tier::FiveDays,
        Tier::FortyEightHours,
        Tier::TwentyFourHours,
        Tier::ThreeHours,
        Tier::ThirtyMinutes,
    ];

    pub const SIMPLIFIED: [Tier; 1] = [Tier::TwentyFourHours];

    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::FiveDays => "5_days",
            Tier::FortyEightHours => "48_hours",
            Tier::TwentyFourHours => "24_hours",
            Tier::ThreeHours => "3_hours",
            Tier::ThirtyMinutes => "30_minutes",
        }
    }

    pub fn parse_tier(s: &str) -> Option<Self> {
        Tier::FULL.into_iter().find(|t| t.as_str() == s)
    }

    pub fn lead_time(&self) -> Duration {
        match self {
            Tier::FiveDays => Duration::days(5),
            Tier::FortyEightHours => Duration::hours(48),
            Tier::TwentyFourHours => Duration::hours(24),
            Tier::ThreeHours => Duration::hours(3),
            Tier::ThirtyMinutes => Duration::minutes(30),
        }
    }

    /// Human phrase used in rendered reminders.
    pub fn lead_phrase(&self) -> &'static str {
        match self {
            Tier::FiveDays => "in 5 days",
            Tier::FortyEightHours => "in 48 hours",
            Tier::TwentyFourHours => "tomorrow",
            Tier::ThreeHours => "in 3 hours",
            Tier::ThirtyMinutes => "in 30 minutes",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum NotificationStatus {
    /// Claimed by a running dispatcher; not yet attempted.
    Pending,
    Sent,
    Failed,
}

impl NotificationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationStatus::Pending => "pending",
            NotificationStatus::Sent => "sent",
            NotificationStatus::Failed => "failed",
        }
    }

    pub fn parse_status(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(NotificationStatus::Pending),
            "sent" => Some(NotificationStatus::Sent),
            "failed" => Some(NotificationStatus::Failed),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassDefinition {
    pub id: i64,
    pub name: String,
    /// 0 = Sunday .. 6 = Saturday.
    pub start_weekday: u32,
    pub curriculum_id: Option<i64>,
    pub total_sessions: i64,
    pub active: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Curriculum {
    pub id: i64,
    pub name: String,
    pub active: bool,
    pub lesson_count: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Lesson {
    pub position: i64,
    pub lesson_ref: String,
    pub title: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Batch {
    pub id: i64,
    pub class_id: i64,
    pub curriculum_id: i64,
    pub batch_number: i64,
    pub start_date: NaiveDate,
    pub status: BatchStatus,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: i64,
    pub batch_id: i64,
    pub session_number: i64,
    pub title: String,
    pub lesson_ref: Option<String>,
    pub slot: Slot,
    pub scheduled_date: NaiveDate,
    pub scheduled_at: DateTime<Utc>,
    pub status: SessionStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationRecord {
    pub id: i64,
    pub session_id: i64,
    pub tier: Tier,
    pub scheduled_for: DateTime<Utc>,
    pub status: NotificationStatus,
    pub claimed_at: Option<DateTime<Utc>>,
    pub attempted_at: Option<DateTime<Utc>>,
    pub sent_at: Option<DateTime<Utc>>,
    pub destinations: Vec<String>,
    pub error: Option<String>,
    pub attempts: i64,
}
