//! Retry loop for sinks that talk to something outside the process.
//!
//! Rate limits and transient failures are retried forever, each attempt is
//! logged. Only [`SinkError::Fatal`] gives up.

use std::future::Future;
use std::time::Duration;

use tracing::warn;

use crate::error::SinkError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub transient_delay: Duration,
    pub rate_limit_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            transient_delay: Duration::from_secs(1),
            rate_limit_delay: Duration::from_secs(10),
        }
    }
}

impl RetryPolicy {
    /// Calls `attempt` until it succeeds or fails fatally.
    pub async fn deliver<T, F, Fut>(&self, what: &str, mut attempt: F) -> Result<T, SinkError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, SinkError>>,
    {
        let mut attempts: u64 = 0;
        loop {
            attempts += 1;
            let delay = match attempt().await {
                Ok(value) => return Ok(value),
                Err(SinkError::Fatal(reason)) => return Err(SinkError::Fatal(reason)),
                Err(SinkError::RateLimited(reason)) => {
                    warn!(
                        "Rate limited while sending {what} (attempt {attempts}): {reason}, retrying in {:?}",
                        self.rate_limit_delay
                    );
                    self.rate_limit_delay
                }
                Err(SinkError::Transient(reason)) => {
                    warn!(
                        "Error sending {what} (attempt {attempts}): {reason}, retrying in {:?}",
                        self.transient_delay
                    );
                    self.transient_delay
                }
            };
            tokio::time::sleep(delay).await;
        }
    }
}

// ╔════════════════════════════════════════════╗
// ║ ████████╗███████╗███████╗████████╗███████╗ ║
// ║ ╚══██╔══╝██╔════╝██╔════╝╚══██╔══╝██╔════╝ ║
// ║    ██║   █████╗  ███████╗   ██║   ███████╗ ║
// ║    ██║   ██╔══╝  ╚════██║   ██║   ╚════██║ ║
// ║    ██║   ███████╗███████║   ██║   ███████║ ║
// ║    ╚═╝   ╚══════╝╚══════╝   ╚═╝   ╚══════╝ ║
// ╚════════════════════════════════════════════╝

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn instant() -> RetryPolicy {
        RetryPolicy {
            transient_delay: Duration::from_millis(1),
            rate_limit_delay: Duration::from_millis(1),
        }
    }

    #[tokio::test]
    async fn retries_until_success() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let result = instant()
            .deliver("event", move || {
                let n = counter.fetch_add(1, Ordering::SeqCst);
                async move {
                    match n {
                        0 => Err(SinkError::Transient("connection reset".into())),
                        1 => Err(SinkError::RateLimited("HTTP 429".into())),
                        _ => Ok(n),
                    }
                }
            })
            .await;
        assert_eq!(result.unwrap(), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn fatal_stops_immediately() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let result: Result<(), _> = instant()
            .deliver("event", move || {
                counter.fetch_add(1, Ordering::SeqCst);
                async { Err(SinkError::Fatal("relative URL without a base".into())) }
            })
            .await;
        assert!(matches!(result, Err(SinkError::Fatal(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn default_delays() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.transient_delay, Duration::from_secs(1));
        assert_eq!(policy.rate_limit_delay, Duration::from_secs(10));
    }
}
