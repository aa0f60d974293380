//! Retry policies and an async executor that applies them.
//!
//! A [`RetryPolicy`] is a plain value that answers one question: after the
//! `n`-th consecutive failure, how long should we wait before trying again
//! (or should we give up)?  Keeping the policy as data rather than baking
//! loops into each call site lets tests swap "retry forever every 5 s" for a
//! bounded, fast variant.
//!
//! | Preset                           | Behaviour                                  |
//! |----------------------------------|--------------------------------------------|
//! | [`RetryPolicy::connect_forever`] | retry forever, fixed 5 s delay             |
//! | [`RetryPolicy::file_read`]       | 3 retries at 100 / 200 / 300 ms, then fail |
//! | [`RetryPolicy::none`]            | single attempt                             |

use std::future::Future;
use std::time::Duration;

use thiserror::Error;
use tracing::debug;

use crate::shutdown::ShutdownSignal;

/// Delay between connect attempts on the client's server-facing path.
pub const CONNECT_RETRY_DELAY: Duration = Duration::from_secs(5);

/// Back-off schedule for reading a file that may be locked mid-write.
pub const FILE_READ_BACKOFF_MS: [u64; 3] = [100, 200, 300];

/// When and how often a failed operation is retried.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryPolicy {
    /// Retry indefinitely, waiting `delay` after every failure.
    Forever { delay: Duration },
    /// Retry once per entry in `delays`, waiting that long; then give up.
    Schedule { delays: Vec<Duration> },
}

impl RetryPolicy {
    /// Retry forever with a fixed delay.
    pub fn forever(delay: Duration) -> Self {
        Self::Forever { delay }
    }

    /// Retry `retries` times with the same `delay` between attempts.
    pub fn fixed(delay: Duration, retries: u32) -> Self {
        Self::Schedule {
            delays: vec![delay; retries as usize],
        }
    }

    /// Retry once per supplied delay.
    pub fn schedule(delays: impl Into<Vec<Duration>>) -> Self {
        Self::Schedule {
            delays: delays.into(),
        }
    }

    /// Make exactly one attempt.
    pub fn none() -> Self {
        Self::Schedule { delays: Vec::new() }
    }

    /// The client's server-facing connect policy: forever, every 5 s.
    pub fn connect_forever() -> Self {
        Self::forever(CONNECT_RETRY_DELAY)
    }

    /// The watcher's file read policy: 100, 200, 300 ms, then fail.
    pub fn file_read() -> Self {
        Self::schedule(
            FILE_READ_BACKOFF_MS
                .iter()
                .map(|ms| Duration::from_millis(*ms))
                .collect::<Vec<_>>(),
        )
    }

    /// Returns the wait before the next attempt after `failures` consecutive
    /// failures (1-based), or `None` if the operation should be abandoned.
    pub fn delay_for(&self, failures: u32) -> Option<Duration> {
        if failures == 0 {
            return Some(Duration::ZERO);
        }
        match self {
            Self::Forever { delay } => Some(*delay),
            Self::Schedule { delays } => delays.get(failures as usize - 1).copied(),
        }
    }

    /// Maximum number of retries after the first attempt; `None` means unbounded.
    pub fn max_retries(&self) -> Option<u32> {
        match self {
            Self::Forever { .. } => None,
            Self::Schedule { delays } => Some(delays.len() as u32),
        }
    }

    pub fn is_unbounded(&self) -> bool {
        self.max_retries().is_none()
    }
}

/// Outcome of an operation that did not succeed under its retry policy.
#[derive(Debug, Error)]
pub enum RetryError<E>
where
    E: std::error::Error + 'static,
{
    /// Every permitted attempt failed.
    #[error("gave up after {attempts} attempt(s): {last}")]
    Exhausted {
        attempts: u32,
        #[source]
        last: E,
    },
    /// The shutdown signal was raised before the operation succeeded.
    #[error("cancelled after {attempts} attempt(s)")]
    Cancelled { attempts: u32 },
}

/// Runs `op` until it succeeds, the policy gives up, or `shutdown` is raised.
///
/// `op` receives the 1-based attempt number.  The shutdown signal is checked
/// before every attempt, and the back-off sleep wakes early when it fires.
///
/// # Errors
///
/// Returns [`RetryError::Exhausted`] with the last error when the policy
/// runs out of retries, or [`RetryError::Cancelled`] on shutdown.
pub async fn retry_async<T, E, F, Fut>(
    policy: &RetryPolicy,
    shutdown: Option<&ShutdownSignal>,
    mut op: F,
) -> Result<T, RetryError<E>>
where
    E: std::error::Error + 'static,
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let mut attempts = 0u32;
    loop {
        if shutdown.is_some_and(ShutdownSignal::is_cancelled) {
            return Err(RetryError::Cancelled { attempts });
        }

        attempts = attempts.saturating_add(1);
        let err = match op(attempts).await {
            Ok(value) => return Ok(value),
            Err(e) => e,
        };

        let Some(delay) = policy.delay_for(attempts) else {
            return Err(RetryError::Exhausted {
                attempts,
                last: err,
            });
        };

        debug!(attempt = attempts, ?delay, error = %err, "attempt failed; retrying");

        match shutdown {
            Some(signal) => {
                if !signal.sleep(delay).await {
                    return Err(RetryError::Cancelled { attempts });
                }
            }
            None => tokio::time::sleep(delay).await,
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn io_err() -> io::Error {
        io::Error::new(io::ErrorKind::PermissionDenied, "locked")
    }

    // ── Policy values ────────────────────────────────────────────────────────

    #[test]
    fn test_connect_forever_uses_five_second_delay_indefinitely() {
        let policy = RetryPolicy::connect_forever();
        assert_eq!(policy.delay_for(1), Some(Duration::from_secs(5)));
        assert_eq!(policy.delay_for(1_000_000), Some(Duration::from_secs(5)));
        assert!(policy.is_unbounded());
    }

    #[test]
    fn test_file_read_schedule_is_100_200_300_then_gives_up() {
        let policy = RetryPolicy::file_read();
        assert_eq!(policy.delay_for(1), Some(Duration::from_millis(100)));
        assert_eq!(policy.delay_for(2), Some(Duration::from_millis(200)));
        assert_eq!(policy.delay_for(3), Some(Duration::from_millis(300)));
        assert_eq!(policy.delay_for(4), None);
        assert_eq!(policy.max_retries(), Some(3));
    }

    #[test]
    fn test_none_policy_never_retries() {
        assert_eq!(RetryPolicy::none().delay_for(1), None);
        assert_eq!(RetryPolicy::none().max_retries(), Some(0));
    }

    #[test]
    fn test_fixed_policy_repeats_delay() {
        let policy = RetryPolicy::fixed(Duration::from_millis(7), 2);
        assert_eq!(policy.delay_for(1), Some(Duration::from_millis(7)));
        assert_eq!(policy.delay_for(2), Some(Duration::from_millis(7)));
        assert_eq!(policy.delay_for(3), None);
    }

    // ── Executor ─────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn test_retry_async_returns_first_success() {
        let result: Result<u32, RetryError<io::Error>> =
            retry_async(&RetryPolicy::file_read(), None, |attempt| async move { Ok(attempt) }).await;
        assert_eq!(result.unwrap(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_async_succeeds_on_third_attempt() {
        // Arrange
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);

        // Act
        let result = retry_async(&RetryPolicy::file_read(), None, move |_| {
            let counter = Arc::clone(&counter);
            async move {
                if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(io_err())
                } else {
                    Ok("content")
                }
            }
        })
        .await;

        // Assert
        assert_eq!(result.unwrap(), "content");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_async_gives_up_after_four_attempts_for_file_read() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);

        let result: Result<(), _> = retry_async(&RetryPolicy::file_read(), None, move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            async { Err(io_err()) }
        })
        .await;

        assert!(matches!(result, Err(RetryError::Exhausted { attempts: 4, .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_retry_async_does_not_start_when_already_cancelled() {
        let shutdown = ShutdownSignal::new();
        shutdown.cancel();
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);

        let result: Result<(), RetryError<io::Error>> =
            retry_async(&RetryPolicy::connect_forever(), Some(&shutdown), move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
                async { Err(io_err()) }
            })
            .await;

        assert!(matches!(result, Err(RetryError::Cancelled { attempts: 0 })));
        assert_eq!(calls.load(Ordering::SeqCst), 0, "operation must not run after cancellation");
    }

    #[tokio::test]
    async fn test_retry_async_forever_exits_when_cancelled_during_backoff() {
        // Arrange
        let shutdown = ShutdownSignal::new();
        let canceller = shutdown.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(30)).await;
            canceller.cancel();
        });

        // Act: an always-failing op under a forever policy
        let result: Result<(), _> = tokio::time::timeout(
            Duration::from_secs(5),
            retry_async(&RetryPolicy::connect_forever(), Some(&shutdown), |_| async {
                Err(io_err())
            }),
        )
        .await
        .expect("retry loop must exit promptly on cancellation");

        // Assert
        assert!(matches!(result, Err(RetryError::Cancelled { attempts: 1 })));
    }
}
