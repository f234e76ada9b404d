//! Bounded, cancellable per-item execution shared by the three entry points.

use futures::stream::{self, StreamExt};
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::report::{ItemReport, SkipReason};

/// Run `work` over `items` with at most `concurrency` in flight.
///
/// Each item is bounded by `item_timeout`; an error or timeout becomes a
/// failed report for that item only. Once `cancel` fires, items that have
/// not started are reported as skipped. A timed-out item is dropped at an
/// await point, so an open transaction is rolled back rather than half
/// committed.
pub async fn run_bounded<T, K, F, Fut>(
    items: Vec<T>,
    concurrency: usize,
    item_timeout: Duration,
    cancel: &CancellationToken,
    key_of: K,
    work: F,
) -> Vec<ItemReport>
where
    K: Fn(&T) -> String,
    F: Fn(T) -> Fut,
    Fut: Future<Output = anyhow::Result<Vec<ItemReport>>>,
{
    let batches: Vec<Vec<ItemReport>> = stream::iter(items)
        .map(|item| {
            let key = key_of(&item);
            let fut = work(item);
            async move {
                if cancel.is_cancelled() {
                    return vec![ItemReport::skipped(key, SkipReason::Cancelled)];
                }
                match tokio::time::timeout(item_timeout, fut).await {
                    Ok(Ok(reports)) => reports,
                    Ok(Err(err)) => {
                        let detail = format!("{err:#}");
                        warn!(%key, error = %detail, "item failed");
                        vec![ItemReport::failed(key, detail)]
                    }
                    Err(_) => {
                        warn!(%key, timeout_ms = item_timeout.as_millis() as u64, "item timed out");
                        vec![ItemReport::failed(
                            key,
                            format!("timed out after {} ms", item_timeout.as_millis()),
                        )]
                    }
                }
            }
        })
        .buffer_unordered(concurrency.max(1))
        .collect()
        .await;
    batches.into_iter().flatten().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::report::Outcome;
    use anyhow::anyhow;

    #[tokio::test]
    async fn failures_and_timeouts_stay_local() {
        let cancel = CancellationToken::new();
        let mut reports = run_bounded(
            vec![1u64, 2, 3],
            2,
            Duration::from_millis(50),
            &cancel,
            |n| format!("item:{n}"),
            |n| async move {
                match n {
                    1 => Ok(vec![ItemReport::created("item:1")]),
                    2 => Err(anyhow!("boom")),
                    _ => {
                        tokio::time::sleep(Duration::from_secs(5)).await;
                        Ok(vec![])
                    }
                }
            },
        )
        .await;
        reports.sort_by(|a, b| a.key.cmp(&b.key));
        assert_eq!(reports.len(), 3);
        assert_eq!(reports[0].outcome, Outcome::Created);
        assert_eq!(reports[1].outcome, Outcome::Failed);
        assert_eq!(reports[1].detail.as_deref(), Some("boom"));
        assert_eq!(reports[2].outcome, Outcome::Failed);
        assert!(reports[2].detail.as_deref().unwrap().contains("timed out"));
    }

    #[tokio::test]
    async fn cancelled_runs_skip_remaining_items() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let reports = run_bounded(
            vec![1, 2],
            1,
            Duration::from_secs(1),
            &cancel,
            |n| format!("item:{n}"),
            |_| async { Ok(vec![ItemReport::created("never")]) },
        )
        .await;
        assert!(reports
            .iter()
            .all(|r| r.outcome == Outcome::Skipped(SkipReason::Cancelled)));
        assert_eq!(reports.len(), 2);
    }
}
