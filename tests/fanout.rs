use class_scheduler::delivery::{self, DeliveryError, Destination, RetryPolicy};
use class_scheduler::model::NotificationStatus;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::time::Duration;

#[derive(Clone)]
struct ScriptedDestination {
    name: String,
    delay: Duration,
    responses: Arc<Mutex<VecDeque<Result<(), DeliveryError>>>>,
    calls: Arc<Mutex<usize>>,
}

impl ScriptedDestination {
    fn new(name: &str, responses: Vec<Result<(), DeliveryError>>) -> Self {
        Self {
            name: name.to_string(),
            delay: Duration::ZERO,
            responses: Arc::new(Mutex::new(VecDeque::from(responses))),
            calls: Arc::new(Mutex::new(0)),
        }
    }

    fn slow(name: &str, delay: Duration) -> Self {
        Self {
            delay,
            ..Self::new(name, vec![])
        }
    }

    async fn calls(&self) -> usize {
        *self.calls.lock().await
    }
}

#[async_trait::async_trait]
impl Destination for ScriptedDestination {
    fn name(&self) -> &str {
        &self.name
    }

    async fn send(&self, _message: &str) -> Result<(), DeliveryError> {
        *self.calls.lock().await += 1;
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.responses.lock().await.pop_front().unwrap_or(Ok(()))
    }
}

fn policy() -> RetryPolicy {
    RetryPolicy {
        max_attempts: 3,
        send_timeout: Duration::from_millis(100),
        backoff_base: Duration::from_millis(1),
        max_backoff: Duration::from_millis(4),
        concurrency: 2,
    }
}

fn boxed(list: &[&ScriptedDestination]) -> Vec<Arc<dyn Destination>> {
    list.iter()
        .map(|d| Arc::new((*d).clone()) as Arc<dyn Destination>)
        .collect()
}

#[tokio::test]
async fn partial_success_counts_as_sent() {
    let a = ScriptedDestination::new("a", vec![]);
    let b = ScriptedDestination::new("b", vec![Err(DeliveryError::Permanent("rejected".into()))]);

    let result = delivery::fan_out(&boxed(&[&a, &b]), "hello", &policy()).await;
    assert_eq!(result.status, NotificationStatus::Sent);
    assert_eq!(result.delivered, vec!["a".to_string()]);
    assert_eq!(result.errors.get("b").map(String::as_str), Some("rejected"));
    assert_eq!(result.error_summary().as_deref(), Some("b: rejected"));
    // Permanent errors are not retried.
    assert_eq!(b.calls().await, 1);
}

#[tokio::test]
async fn every_destination_failing_is_a_failure() {
    let a = ScriptedDestination::new("a", vec![Err(DeliveryError::Permanent("bad chat".into()))]);
    let b = ScriptedDestination::new("b", vec![Err(DeliveryError::Permanent("bad url".into()))]);

    let result = delivery::fan_out(&boxed(&[&b, &a]), "hello", &policy()).await;
    assert_eq!(result.status, NotificationStatus::Failed);
    assert!(result.delivered.is_empty());
    assert_eq!(result.error_summary().as_deref(), Some("a: bad chat; b: bad url"));
}

#[tokio::test]
async fn transient_errors_are_retried_with_backoff() {
    let flaky = ScriptedDestination::new(
        "flaky",
        vec![
            Err(DeliveryError::Transient("connection reset".into())),
            Err(DeliveryError::Transient("HTTP 503".into())),
        ],
    );

    let attempts = delivery::send_with_retry(&flaky, "hello", &policy())
        .await
        .unwrap();
    assert_eq!(attempts, 3);
    assert_eq!(flaky.calls().await, 3);
}

#[tokio::test]
async fn retries_stop_at_max_attempts() {
    let down = ScriptedDestination::new(
        "down",
        (0..5)
            .map(|_| Err(DeliveryError::Transient("HTTP 502".into())))
            .collect(),
    );

    let err = delivery::send_with_retry(&down, "hello", &policy())
        .await
        .unwrap_err();
    assert!(err.is_transient());
    assert_eq!(down.calls().await, 3);
}

#[tokio::test]
async fn slow_destination_times_out_without_holding_up_others() {
    let fast = ScriptedDestination::new("fast", vec![]);
    let slow = ScriptedDestination::slow("slow", Duration::from_millis(500));
    let policy = RetryPolicy {
        max_attempts: 1,
        ..policy()
    };

    let result = delivery::fan_out(&boxed(&[&slow, &fast]), "hello", &policy).await;
    assert_eq!(result.status, NotificationStatus::Sent);
    assert_eq!(result.delivered, vec!["fast".to_string()]);
    assert!(result.errors["slow"].contains("timed out"));
}
