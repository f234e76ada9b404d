//! Structured run summaries returned by every entry point.

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Job {
    CreateBatches,
    GenerateSessions,
    DispatchNotifications,
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    AlreadyExists,
    NotStarted,
    CurriculumComplete,
    AlreadySent,
    CoolingDown,
    ClaimedElsewhere,
    Cancelled,
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(tag = "outcome", content = "reason", rename_all = "snake_case")]
pub enum Outcome {
    Created,
    Skipped(SkipReason),
    Failed,
}

/// Result for one class, batch or (session, tier).
#[derive(Debug, Clone, Serialize)]
pub struct ItemReport {
    pub key: String,
    #[serde(flatten)]
    pub outcome: Outcome,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl ItemReport {
    pub fn created(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            outcome: Outcome::Created,
            detail: None,
        }
    }

    pub fn skipped(key: impl Into<String>, reason: SkipReason) -> Self {
        Self {
            key: key.into(),
            outcome: Outcome::Skipped(reason),
            detail: None,
        }
    }

    pub fn failed(key: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            outcome: Outcome::Failed,
            detail: Some(detail.into()),
        }
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub job: Job,
    pub now: DateTime<Utc>,
    pub created: usize,
    pub skipped: usize,
    pub failed: usize,
    pub items: Vec<ItemReport>,
}

impl RunReport {
    pub fn new(job: Job, now: DateTime<Utc>) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            job,
            now,
            created: 0,
            skipped: 0,
            failed: 0,
            items: Vec::new(),
        }
    }

    pub fn push(&mut self, item: ItemReport) {
        match item.outcome {
            Outcome::Created => self.created += 1,
            Outcome::Skipped(_) => self.skipped += 1,
            Outcome::Failed => self.failed += 1,
        }
        self.items.push(item);
    }

    pub fn extend(&mut self, items: impl IntoIterator<Item = ItemReport>) {
        for item in items {
            self.push(item);
        }
    }

    pub fn count_skipped(&self, reason: SkipReason) -> usize {
        self.items
            .iter()
            .filter(|i| i.outcome == Outcome::Skipped(reason))
            .count()
    }

    pub fn find(&self, key: &str) -> Option<&ItemReport> {
        self.items.iter().find(|i| i.key == key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_follow_outcomes() {
        let mut report = RunReport::new(Job::CreateBatches, Utc::now());
        report.extend([
            ItemReport::created("class:1"),
            ItemReport::skipped("class:2", SkipReason::AlreadyExists),
            ItemReport::failed("class:3", "no curriculum"),
        ]);
        assert_eq!((report.created, report.skipped, report.failed), (1, 1, 1));
        assert_eq!(report.count_skipped(SkipReason::AlreadyExists), 1);
        assert_eq!(report.find("class:3").unwrap().detail.as_deref(), Some("no curriculum"));
    }

    #[test]
    fn items_serialize_flat() {
        let item = ItemReport::skipped("batch:7", SkipReason::NotStarted);
        let json = serde_json::to_value(&item).unwrap();
        assert_eq!(json["key"], "batch:7");
        assert_eq!(json["outcome"], "skipped");
        assert_eq!(json["reason"], "not_started");
        assert!(json.get("detail").is_none());
    }
}
