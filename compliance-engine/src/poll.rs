//! Bounded polling of asynchronous cluster state

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;

use crate::error::{AuditError, AuditResult};
use crate::kubernetes::{ClusterApi, WorkloadStatus};

/// Interval between two condition evaluations
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Evaluate `condition` until it yields a value or `timeout` elapses.
///
/// The condition is always evaluated at least once, and once more at the
/// deadline. An error from the condition is returned as is. Giving up is
/// `AuditError::Timeout`, only after `timeout` has fully elapsed.
pub async fn wait_for<T, F, Fut>(
    what: &str,
    mut condition: F,
    timeout: Duration,
    interval: Duration,
) -> AuditResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = AuditResult<Option<T>>>,
{
    let start = Instant::now();

    loop {
        if let Some(value) = condition().await? {
            return Ok(value);
        }

        let elapsed = start.elapsed();
        if elapsed >= timeout {
            tracing::debug!(what, "Condition not met within {:?}", timeout);
            return Err(AuditError::Timeout {
                what: what.to_string(),
                waited: elapsed,
            });
        }

        tokio::time::sleep(interval.min(timeout - elapsed)).await;
    }
}

/// Wait until `replicas` pods of the named stateful workload are ready
pub async fn wait_for_ready(
    cluster: &dyn ClusterApi,
    namespace: &str,
    name: &str,
    replicas: i32,
    timeout: Duration,
) -> AuditResult<WorkloadStatus> {
    let what = format!("stateful set {}/{} to become ready", namespace, name);

    wait_for(
        &what,
        || async move {
            let status = cluster.get_stateful_set(namespace, name).await?;
            Ok(status.filter(|s| s.ready_replicas == Some(replicas)))
        },
        timeout,
        DEFAULT_POLL_INTERVAL,
    )
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fakes::{MemoryCluster, Readiness};
    use crate::kubernetes::ProbeWorkloadSpec;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn test_returns_first_value() {
        let calls = AtomicU32::new(0);
        let value = wait_for(
            "counter",
            || async {
                let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                Ok((n >= 3).then_some(n))
            },
            Duration::from_secs(5),
            Duration::from_millis(1),
        )
        .await
        .unwrap();

        assert_eq!(value, 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_times_out_within_bounds() {
        let timeout = Duration::from_millis(200);
        let start = std::time::Instant::now();

        let result: AuditResult<()> = wait_for(
            "never",
            || async { Ok(None) },
            timeout,
            Duration::from_millis(20),
        )
        .await;

        let elapsed = start.elapsed();
        assert!(result.unwrap_err().is_timeout());
        assert!(elapsed >= timeout, "gave up after {:?}", elapsed);
        assert!(elapsed <= timeout + Duration::from_millis(500));
    }

    #[tokio::test]
    async fn test_waits_full_timeout_when_interval_is_longer() {
        let calls = AtomicU32::new(0);
        let start = std::time::Instant::now();

        for (timeout, interval) in [
            (Duration::from_millis(100), Duration::from_millis(100)),
            (Duration::from_millis(100), Duration::from_secs(1)),
        ] {
            let result: AuditResult<()> = wait_for(
                "never",
                || async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(None)
                },
                timeout,
                interval,
            )
            .await;
            assert!(result.unwrap_err().is_timeout());
        }

        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_millis(200), "gave up after {:?}", elapsed);
        assert!(elapsed < Duration::from_secs(1));
        // Evaluated on entry and again at the deadline
        assert!(calls.load(Ordering::SeqCst) >= 4);
    }

    #[tokio::test]
    async fn test_value_at_deadline_is_returned() {
        let calls = AtomicU32::new(0);
        let value = wait_for(
            "second try",
            || async { Ok((calls.fetch_add(1, Ordering::SeqCst) == 1).then_some("ready")) },
            Duration::from_millis(50),
            Duration::from_secs(1),
        )
        .await
        .unwrap();
        assert_eq!(value, "ready");
    }

    #[tokio::test]
    async fn test_condition_error_propagates() {
        let result: AuditResult<()> = wait_for(
            "broken",
            || async { Err(AuditError::Internal("boom".to_string())) },
            Duration::from_secs(5),
            Duration::from_millis(1),
        )
        .await;

        assert!(matches!(result, Err(AuditError::Internal(_))));
    }

    #[tokio::test]
    async fn test_wait_for_ready() {
        let cluster = MemoryCluster::new();
        cluster.set_readiness(Readiness::AfterPolls(2));
        let spec = ProbeWorkloadSpec::new("probe", "default", "tools").replicas(2);
        cluster.create_stateful_set(&spec).await.unwrap();

        let status = wait_for_ready(&cluster, "default", "probe", 2, Duration::from_secs(10))
            .await
            .unwrap();
        assert_eq!(status.ready_replicas, Some(2));
    }

    #[tokio::test]
    async fn test_wait_for_ready_times_out() {
        let cluster = MemoryCluster::new();
        cluster.set_readiness(Readiness::Never);
        let spec = ProbeWorkloadSpec::new("probe", "default", "tools");
        cluster.create_stateful_set(&spec).await.unwrap();

        let err = wait_for_ready(&cluster, "default", "probe", 1, Duration::from_millis(50))
            .await
            .unwrap_err();
        assert!(err.is_timeout());
    }
}
