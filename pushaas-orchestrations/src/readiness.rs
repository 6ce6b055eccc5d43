//! Bounded-retry wait for asynchronous cloud conditions

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

/// Attempt budget for one readiness wait
///
/// The worst-case wall time of a wait is `max_attempts * interval`; there is
/// no other cancellation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadinessPolicy {
    pub max_attempts: u32,
    pub interval: Duration,
}

impl Default for ReadinessPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 30,
            interval: Duration::from_secs(5),
        }
    }
}

/// Evaluate `condition` until it returns `Ok(true)` or attempts run out.
///
/// The first evaluation happens immediately. A query error counts as "not
/// yet" and is retried. Returns `false` after `max_attempts` evaluations and
/// `max_attempts - 1` sleeps.
pub async fn wait_until<F, Fut, E>(what: &str, policy: ReadinessPolicy, mut condition: F) -> bool
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<bool, E>>,
    E: Display,
{
    for attempt in 1..=policy.max_attempts {
        match condition(attempt).await {
            Ok(true) => {
                tracing::debug!(condition = what, attempt, "condition met");
                return true;
            }
            Ok(false) => {
                tracing::debug!(
                    condition = what,
                    attempt,
                    max_attempts = policy.max_attempts,
                    "condition not met yet"
                );
            }
            Err(e) => {
                tracing::warn!(condition = what, attempt, error = %e, "condition query failed, retrying");
            }
        }

        if attempt < policy.max_attempts {
            tokio::time::sleep(policy.interval).await;
        }
    }

    tracing::warn!(
        condition = what,
        max_attempts = policy.max_attempts,
        "gave up waiting for condition"
    );
    false
}
