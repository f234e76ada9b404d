//! Delivery fan-out: one rendered reminder to every configured destination.
//!
//! Destinations are independent. Each gets bounded retries with backoff on
//! transient errors, and a failure at one never hides a success at another.

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use futures::future::{BoxFuture, FutureExt};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use crate::config::{self, Config, DestinationConfig};
use crate::model::NotificationStatus;

pub mod telegram;
pub mod webhook;

pub use telegram::TelegramDestination;
pub use webhook::WebhookDestination;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DeliveryError {
    /// Timeouts, connection failures, rate limits, 5xx.
    #[error("transient: {0}")]
    Transient(String),
    /// Rejected payload, bad credentials, unknown chat.
    #[error("{0}")]
    Permanent(String),
}

impl DeliveryError {
    pub fn is_transient(&self) -> bool {
        matches!(self, DeliveryError::Transient(_))
    }
}

/// A messaging endpoint that accepts a text payload.
#[async_trait]
pub trait Destination: Send + Sync {
    fn name(&self) -> &str;

    async fn send(&self, message: &str) -> Result<(), DeliveryError>;
}

/// Stands in for a destination whose credentials are missing so the problem
/// shows up per destination in the ledger.
#[derive(Debug, Clone)]
pub struct UnconfiguredDestination {
    name: String,
    reason: String,
}

impl UnconfiguredDestination {
    pub fn new(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            reason: reason.into(),
        }
    }
}

#[async_trait]
impl Destination for UnconfiguredDestination {
    fn name(&self) -> &str {
        &self.name
    }

    async fn send(&self, _message: &str) -> Result<(), DeliveryError> {
        Err(DeliveryError::Permanent(format!(
            "destination not configured: {}",
            self.reason
        )))
    }
}

/// Build the destination set from config. Never fails: a destination that
/// cannot be built becomes an `UnconfiguredDestination`.
pub fn build_destinations(cfg: &Config) -> Vec<Arc<dyn Destination>> {
    cfg.destinations.iter().map(build_destination).collect()
}

fn build_destination(dest: &DestinationConfig) -> Arc<dyn Destination> {
    match dest {
        DestinationConfig::Telegram {
            name,
            bot_token,
            chat_id,
        } => {
            if bot_token.trim().is_empty() || chat_id.trim().is_empty() {
                warn!(destination = %name, "telegram bot_token or chat_id missing");
                return Arc::new(UnconfiguredDestination::new(
                    name.clone(),
                    "telegram bot_token and chat_id are required",
                ));
            }
            Arc::new(TelegramDestination::new(name.clone(), bot_token, chat_id))
        }
        DestinationConfig::Webhook { name, url, headers } => {
            match WebhookDestination::new(name.clone(), url, headers.clone()) {
                Ok(d) => Arc::new(d),
                Err(err) => {
                    warn!(destination = %name, error = %err, "webhook destination unusable");
                    Arc::new(UnconfiguredDestination::new(name.clone(), err.to_string()))
                }
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub send_timeout: Duration,
    pub backoff_base: Duration,
    pub max_backoff: Duration,
    pub concurrency: usize,
}

impl From<&config::Delivery> for RetryPolicy {
    fn from(d: &config::Delivery) -> Self {
        Self {
            max_attempts: d.max_attempts.max(1),
            send_timeout: d.send_timeout(),
            backoff_base: Duration::from_millis(d.backoff_base_ms),
            max_backoff: Duration::from_millis(d.max_backoff_ms),
            concurrency: d.fanout_concurrency.max(1),
        }
    }
}

/// Delay before retry number `attempt` (1-based): `base * 2^(attempt-1)`,
/// capped at `cap`.
pub fn backoff_delay(attempt: u32, base: Duration, cap: Duration) -> Duration {
    let factor = 1u32 << attempt.saturating_sub(1).min(16);
    base.saturating_mul(factor).min(cap)
}

/// Send to one destination, retrying transient failures. Returns the number
/// of attempts used on success.
#[instrument(skip_all, fields(destination = %dest.name()))]
pub async fn send_with_retry(
    dest: &dyn Destination,
    message: &str,
    policy: &RetryPolicy,
) -> Result<u32, DeliveryError> {
    let mut attempt = 1;
    loop {
        let result = match tokio::time::timeout(policy.send_timeout, dest.send(message)).await {
            Ok(r) => r,
            Err(_) => Err(DeliveryError::Transient(format!(
                "timed out after {} ms",
                policy.send_timeout.as_millis()
            ))),
        };
        match result {
            Ok(()) => {
                debug!(attempt, "delivered");
                return Ok(attempt);
            }
            Err(err) if err.is_transient() && attempt < policy.max_attempts => {
                let delay = backoff_delay(attempt, policy.backoff_base, policy.max_backoff);
                warn!(attempt, error = %err, delay_ms = delay.as_millis() as u64, "send failed; retrying");
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(err) => {
                warn!(attempt, error = %err, "send failed");
                return Err(err);
            }
        }
    }
}

/// Aggregate outcome of one fan-out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FanOutResult {
    pub status: NotificationStatus,
    /// Destinations that accepted the message, sorted.
    pub delivered: Vec<String>,
    /// Error per destination that did not.
    pub errors: BTreeMap<String, String>,
}

impl FanOutResult {
    pub fn error_summary(&self) -> Option<String> {
        if self.errors.is_empty() {
            return None;
        }
        Some(
            self.errors
                .iter()
                .map(|(name, err)| format!("{name}: {err}"))
                .collect::<Vec<_>>()
                .join("; "),
        )
    }
}

/// Deliver `message` to every destination with at most
/// `policy.concurrency` sends in flight. `Sent` if any destination succeeded.
#[instrument(skip_all, fields(destinations = destinations.len()))]
pub async fn fan_out(
    destinations: &[Arc<dyn Destination>],
    message: &str,
    policy: &RetryPolicy,
) -> FanOutResult {
    if destinations.is_empty() {
        warn!("no destinations configured");
        let mut errors = BTreeMap::new();
        errors.insert("*".to_string(), "no destinations configured".to_string());
        return FanOutResult {
            status: NotificationStatus::Failed,
            delivered: Vec::new(),
            errors,
        };
    }

    let sends: Vec<BoxFuture<'_, (String, Result<u32, DeliveryError>)>> = destinations
        .iter()
        .map(|dest| {
            async move {
                let result = send_with_retry(dest.as_ref(), message, policy).await;
                (dest.name().to_string(), result)
            }
            .boxed()
        })
        .collect();
    let results: Vec<(String, Result<u32, DeliveryError>)> = stream::iter(sends)
        .buffer_unordered(policy.concurrency.max(1))
        .collect()
        .await;

    let mut delivered = Vec::new();
    let mut errors = BTreeMap::new();
    for (name, result) in results {
        match result {
            Ok(_) => delivered.push(name),
            Err(err) => {
                errors.insert(name, err.to_string());
            }
        }
    }
    delivered.sort();

    let status = if delivered.is_empty() {
        NotificationStatus::Failed
    } else {
        NotificationStatus::Sent
    };
    info!(
        status = status.as_str(),
        delivered = delivered.len(),
        failed = errors.len(),
        "fan-out finished"
    );
    FanOutResult {
        status,
        delivered,
        errors,
    }
}
