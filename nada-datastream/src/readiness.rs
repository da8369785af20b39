//! Readiness polling
//!
//! Some resources are usable only a while after the control plane accepted the
//! create call. The poller re-runs a probe at a fixed interval until it
//! reports ready, the probe fails, or the attempt bound (if any) runs out.
//! Waiting goes through a [`Clock`] so tests can run without real delays.

use async_trait::async_trait;
use std::future::Future;
use std::time::Duration;
use tracing::info;

/// Delay between readiness probes
pub const READINESS_INTERVAL: Duration = Duration::from_secs(30);

/// Attempts before a connection profile is given up on
pub const PROFILE_READY_ATTEMPTS: u32 = 5;

#[async_trait]
pub trait Clock: Send + Sync {
    async fn sleep(&self, duration: Duration);
}

/// Wall clock backed by tokio timers
#[derive(Debug, Default, Clone, Copy)]
pub struct TokioClock;

#[async_trait]
impl Clock for TokioClock {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    pub interval: Duration,
    /// `None` polls until the probe is ready or fails
    pub max_attempts: Option<u32>,
}

impl PollPolicy {
    pub fn unbounded(interval: Duration) -> Self {
        Self {
            interval,
            max_attempts: None,
        }
    }

    pub fn bounded(interval: Duration, attempts: u32) -> Self {
        Self {
            interval,
            max_attempts: Some(attempts),
        }
    }

    /// Private connections take minutes to come up and are waited on indefinitely
    pub fn private_connection() -> Self {
        Self::unbounded(READINESS_INTERVAL)
    }

    pub fn connection_profile() -> Self {
        Self::bounded(READINESS_INTERVAL, PROFILE_READY_ATTEMPTS)
    }
}

/// Result of one probe
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Poll<T> {
    Ready(T),
    /// Not there yet; carries the observed state for logging
    Pending(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome<T> {
    Ready(T),
    Exhausted { attempts: u32 },
}

/// Probe until ready. A probe error ends polling immediately.
pub async fn poll_until<T, E, F, Fut>(
    clock: &dyn Clock,
    policy: PollPolicy,
    target: &str,
    mut probe: F,
) -> Result<PollOutcome<T>, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Poll<T>, E>>,
{
    let mut attempt = 0u32;

    loop {
        attempt += 1;

        match probe().await? {
            Poll::Ready(value) => return Ok(PollOutcome::Ready(value)),
            Poll::Pending(state) => {
                if policy.max_attempts.is_some_and(|max| attempt >= max) {
                    return Ok(PollOutcome::Exhausted { attempts: attempt });
                }

                info!(
                    target_resource = %target,
                    state = %state,
                    attempt = attempt,
                    wait_secs = policy.interval.as_secs(),
                    "Waiting for resource to become ready"
                );
                clock.sleep(policy.interval).await;
            }
        }
    }
}
