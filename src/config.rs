//! Configuration loader and validator for the class scheduling pipeline.
use chrono::{FixedOffset, NaiveTime, Offset, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

use crate::model::{Slot, Tier};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("YAML parse error: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(&'static str),
}

/// Root configuration struct mirroring the YAML schema exactly.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Config {
    pub app: App,
    pub schedule: Schedule,
    pub delivery: Delivery,
    #[serde(default)]
    pub destinations: Vec<DestinationConfig>,
}

/// App-level settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct App {
    pub data_dir: String,
    /// Offset of the deployment's reference timezone from UTC.
    pub utc_offset_minutes: i32,
    pub worker_concurrency: usize,
    pub store_timeout_ms: u64,
    pub item_timeout_ms: u64,
    pub run_timeout_seconds: u64,
}

/// Session slots and notification timing.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Schedule {
    pub slots: Slots,
    pub tiers: TierSet,
    pub horizon_days: i64,
    pub tolerance_minutes: i64,
    pub retry_cooldown_minutes: i64,
    pub claim_ttl_minutes: i64,
}

/// Local start times, "HH:MM".
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Slots {
    pub morning: String,
    pub afternoon: String,
    pub evening: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TierSet {
    Full,
    Simplified,
}

/// Per-destination retry and fan-out limits.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Delivery {
    pub fanout_concurrency: usize,
    pub send_timeout_ms: u64,
    pub max_attempts: u32,
    pub backoff_base_ms: u64,
    pub max_backoff_ms: u64,
}

/// One messaging destination. Credentials may be blank; such a destination is
/// reported as failed at send time instead of rejecting the whole file.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DestinationConfig {
    Telegram {
        name: String,
        bot_token: String,
        chat_id: String,
    },
    Webhook {
        name: String,
        url: String,
        #[serde(default)]
        headers: Vec<(String, String)>,
    },
}

impl DestinationConfig {
    pub fn name(&self) -> &str {
        match self {
            DestinationConfig::Telegram { name, .. } => name,
            DestinationConfig::Webhook { name, .. } => name,
        }
    }
}

impl Config {
    /// Ensure required directories exist (creates `app.data_dir` if missing).
    pub fn ensure_dirs(&self) -> Result<(), std::io::Error> {
        if self.app.data_dir.trim().is_empty() {
            return Ok(());
        }
        fs::create_dir_all(&self.app.data_dir)
    }

    pub fn database_url(&self) -> String {
        std::env::var("DATABASE_URL")
            .unwrap_or_else(|_| format!("sqlite://{}/scheduler.db", self.app.data_dir))
    }
}

impl App {
    pub fn offset(&self) -> FixedOffset {
        offset_from_minutes(self.utc_offset_minutes).unwrap_or_else(|| Utc.fix())
    }

    pub fn store_timeout(&self) -> Duration {
        Duration::from_millis(self.store_timeout_ms)
    }

    pub fn item_timeout(&self) -> Duration {
        Duration::from_millis(self.item_timeout_ms)
    }

    pub fn run_timeout(&self) -> Duration {
        Duration::from_secs(self.run_timeout_seconds)
    }
}

impl Schedule {
    /// Slot start times; values were checked by `validate`, unparsable ones
    /// fall back to midnight.
    pub fn slot_time(&self, slot: Slot) -> NaiveTime {
        let raw = match slot {
            Slot::Morning => &self.slots.morning,
            Slot::Afternoon => &self.slots.afternoon,
            Slot::Evening => &self.slots.evening,
        };
        parse_hhmm(raw).unwrap_or(NaiveTime::MIN)
    }

    pub fn tiers(&self) -> &'static [Tier] {
        match self.tiers {
            TierSet::Full => &Tier::FULL,
            TierSet::Simplified => &Tier::SIMPLIFIED,
        }
    }

    pub fn horizon(&self) -> chrono::Duration {
        chrono::Duration::days(self.horizon_days)
    }

    pub fn tolerance(&self) -> chrono::Duration {
        chrono::Duration::minutes(self.tolerance_minutes)
    }

    pub fn retry_cooldown(&self) -> chrono::Duration {
        chrono::Duration::minutes(self.retry_cooldown_minutes)
    }

    pub fn claim_ttl(&self) -> chrono::Duration {
        chrono::Duration::minutes(self.claim_ttl_minutes)
    }
}

impl Delivery {
    pub fn send_timeout(&self) -> Duration {
        Duration::from_millis(self.send_timeout_ms)
    }

    /// Longest one destination can take: every attempt timing out plus the
    /// backoff between them.
    pub fn worst_case_send(&self) -> Duration {
        let base = Duration::from_millis(self.backoff_base_ms);
        let cap = Duration::from_millis(self.max_backoff_ms);
        let attempts = self.max_attempts.max(1);
        let backoff: Duration = (1..attempts)
            .map(|attempt| crate::delivery::backoff_delay(attempt, base, cap))
            .sum();
        self.send_timeout().saturating_mul(attempts) + backoff
    }

    /// Longest a fan-out to `destinations` can take at the configured
    /// concurrency.
    pub fn fanout_budget(&self, destinations: usize) -> Duration {
        let rounds = destinations.max(1).div_ceil(self.fanout_concurrency.max(1));
        self.worst_case_send()
            .saturating_mul(u32::try_from(rounds).unwrap_or(u32::MAX))
    }
}

fn offset_from_minutes(minutes: i32) -> Option<FixedOffset> {
    minutes.checked_mul(60).and_then(FixedOffset::east_opt)
}

fn parse_hhmm(raw: &str) -> Option<NaiveTime> {
    NaiveTime::parse_from_str(raw.trim(), "%H:%M").ok()
}

/// Load configuration from a YAML file and validate it.
/// - If `path` is None, uses `config.yaml` in the current working directory.
pub fn load(path: Option<&Path>) -> Result<Config, ConfigError> {
    let path = path.unwrap_or_else(|| Path::new("config.yaml"));
    let content = fs::read_to_string(path)?;
    let cfg: Config = serde_yaml::from_str(&content)?;
    validate(&cfg)?;
    Ok(cfg)
}

/// Validate a configuration instance.
pub fn validate(cfg: &Config) -> Result<(), ConfigError> {
    if cfg.app.data_dir.trim().is_empty() {
        return Err(ConfigError::Invalid("app.data_dir must be non-empty"));
    }
    if offset_from_minutes(cfg.app.utc_offset_minutes).is_none() {
        return Err(ConfigError::Invalid(
            "app.utc_offset_minutes must be within +/- 24 hours",
        ));
    }
    if cfg.app.worker_concurrency == 0 {
        return Err(ConfigError::Invalid("app.worker_concurrency must be > 0"));
    }
    if cfg.app.store_timeout_ms == 0 {
        return Err(ConfigError::Invalid("app.store_timeout_ms must be > 0"));
    }
    if cfg.app.item_timeout_ms == 0 {
        return Err(ConfigError::Invalid("app.item_timeout_ms must be > 0"));
    }
    if cfg.app.run_timeout_seconds == 0 {
        return Err(ConfigError::Invalid("app.run_timeout_seconds must be > 0"));
    }

    let s = &cfg.schedule;
    if parse_hhmm(&s.slots.morning).is_none() {
        return Err(ConfigError::Invalid("schedule.slots.morning must be HH:MM"));
    }
    if parse_hhmm(&s.slots.afternoon).is_none() {
        return Err(ConfigError::Invalid("schedule.slots.afternoon must be HH:MM"));
    }
    if parse_hhmm(&s.slots.evening).is_none() {
        return Err(ConfigError::Invalid("schedule.slots.evening must be HH:MM"));
    }
    if s.horizon_days <= 0 {
        return Err(ConfigError::Invalid("schedule.horizon_days must be > 0"));
    }
    if s.tolerance_minutes <= 0 {
        return Err(ConfigError::Invalid("schedule.tolerance_minutes must be > 0"));
    }
    if s.retry_cooldown_minutes < 0 {
        return Err(ConfigError::Invalid(
            "schedule.retry_cooldown_minutes must be >= 0",
        ));
    }
    if s.retry_cooldown_minutes >= 2 * s.tolerance_minutes {
        return Err(ConfigError::Invalid(
            "schedule.retry_cooldown_minutes must be shorter than the due window (2 x tolerance_minutes)",
        ));
    }
    if s.claim_ttl_minutes <= 0 {
        return Err(ConfigError::Invalid("schedule.claim_ttl_minutes must be > 0"));
    }

    let d = &cfg.delivery;
    if d.fanout_concurrency == 0 {
        return Err(ConfigError::Invalid("delivery.fanout_concurrency must be > 0"));
    }
    if d.send_timeout_ms == 0 {
        return Err(ConfigError::Invalid("delivery.send_timeout_ms must be > 0"));
    }
    if d.max_attempts == 0 {
        return Err(ConfigError::Invalid("delivery.max_attempts must be > 0"));
    }

    // A tier item covers its store calls and one whole fan-out.
    let needed = d.fanout_budget(cfg.destinations.len()) + cfg.app.store_timeout() * 2;
    if cfg.app.item_timeout() < needed {
        return Err(ConfigError::Invalid(
            "app.item_timeout_ms must cover a full fan-out (max_attempts x send_timeout_ms + backoff) plus store calls",
        ));
    }

    for dest in &cfg.destinations {
        if dest.name().trim().is_empty() {
            return Err(ConfigError::Invalid("destinations[].name must be non-empty"));
        }
    }
    let mut names: Vec<&str> = cfg.destinations.iter().map(|d| d.name()).collect();
    names.sort_unstable();
    if names.windows(2).any(|w| w[0] == w[1]) {
        return Err(ConfigError::Invalid("destinations[].name must be unique"));
    }

    Ok(())
}

/// Returns the reference YAML document.
pub fn example() -> &'static str {
    r#"app:
  data_dir: "./data"
  utc_offset_minutes: 330
  worker_concurrency: 4
  store_timeout_ms: 5000
  item_timeout_ms: 60000
  run_timeout_seconds: 240

schedule:
  slots:
    morning: "09:00"
    afternoon: "13:00"
    evening: "19:30"
  tiers: full
  horizon_days: 7
  tolerance_minutes: 5
  retry_cooldown_minutes: 3
  claim_ttl_minutes: 10

delivery:
  fanout_concurrency: 2
  send_timeout_ms: 10000
  max_attempts: 3
  backoff_base_ms: 500
  max_backoff_ms: 5000

destinations:
  - kind: telegram
    name: "students"
    bot_token: "YOUR_TELEGRAM_BOT_TOKEN"
    chat_id: "@class_reminders"
  - kind: webhook
    name: "ops"
    url: "https://hooks.example.com/class-reminders"
"#
}
