//! Creation error state with doubling backoff
//!
//! After a creation failure the pool fails fast with the stored error until a
//! backoff timer expires. Consecutive failures double the interval up to a
//! cap; a successful creation resets it.

use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::JoinHandle;

use crate::errors::PoolError;

/// Error state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorState {
    /// Creations are attempted normally
    Normal,

    /// A creation failed; acquirers receive the stored error
    ErrorSet,
}

struct BackoffInner {
    error: Option<PoolError>,
    next_wait: Duration,
    timer: Option<JoinHandle<()>>,
}

pub(crate) struct ErrorBackoff {
    inner: Mutex<BackoffInner>,
    initial: Duration,
    max: Duration,
}

impl ErrorBackoff {
    pub fn new(initial: Duration, max: Duration) -> Self {
        Self {
            inner: Mutex::new(BackoffInner {
                error: None,
                next_wait: initial,
                timer: None,
            }),
            initial,
            max,
        }
    }

    pub fn state(&self) -> ErrorState {
        if self.inner.lock().error.is_some() {
            ErrorState::ErrorSet
        } else {
            ErrorState::Normal
        }
    }

    /// The stored error while in `ErrorSet`
    pub fn error(&self) -> Option<PoolError> {
        self.inner.lock().error.clone()
    }

    /// Interval the next failure will wait
    pub fn next_wait(&self) -> Duration {
        self.inner.lock().next_wait
    }

    /// Store `error` and return how long the error window lasts
    pub fn record_failure(&self, error: PoolError) -> Duration {
        let mut inner = self.inner.lock();
        inner.error = Some(error);
        let wait = inner.next_wait;
        inner.next_wait = (wait * 2).min(self.max);
        wait
    }

    pub fn record_success(&self) {
        self.inner.lock().next_wait = self.initial;
    }

    /// Install the timer that ends the current window, cancelling any previous one
    pub fn replace_timer(&self, timer: JoinHandle<()>) {
        if let Some(previous) = self.inner.lock().timer.replace(timer) {
            previous.abort();
        }
    }

    /// Leave `ErrorSet`; called when the backoff timer fires
    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.error = None;
        inner.timer = None;
    }

    /// Abort a pending timer; safe to call repeatedly
    pub fn cancel_timer(&self) {
        if let Some(timer) = self.inner.lock().timer.take() {
            timer.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn failure() -> PoolError {
        PoolError::CreationFailed(Arc::new(std::io::Error::other("refused")))
    }

    #[test]
    fn test_interval_doubles_up_to_cap() {
        let backoff = ErrorBackoff::new(Duration::from_secs(5), Duration::from_secs(60));
        let waits: Vec<_> = (0..6).map(|_| backoff.record_failure(failure())).collect();
        assert_eq!(
            waits,
            [5, 10, 20, 40, 60, 60].map(Duration::from_secs).to_vec()
        );
    }

    #[test]
    fn test_success_resets_interval() {
        let backoff = ErrorBackoff::new(Duration::from_secs(5), Duration::from_secs(60));
        backoff.record_failure(failure());
        backoff.record_failure(failure());
        assert_eq!(backoff.next_wait(), Duration::from_secs(20));
        backoff.record_success();
        assert_eq!(backoff.next_wait(), Duration::from_secs(5));
    }

    #[test]
    fn test_clear_leaves_error_state() {
        let backoff = ErrorBackoff::new(Duration::from_secs(5), Duration::from_secs(60));
        assert_eq!(backoff.state(), ErrorState::Normal);
        backoff.record_failure(failure());
        assert_eq!(backoff.state(), ErrorState::ErrorSet);
        assert!(matches!(backoff.error(), Some(PoolError::CreationFailed(_))));

        backoff.clear();
        assert_eq!(backoff.state(), ErrorState::Normal);
        assert!(backoff.error().is_none());
        // the interval keeps growing until a creation succeeds
        assert_eq!(backoff.next_wait(), Duration::from_secs(10));
    }

    #[tokio::test]
    async fn test_replaced_timer_is_aborted() {
        let backoff = ErrorBackoff::new(Duration::from_secs(5), Duration::from_secs(60));
        let first = tokio::spawn(async {
            tokio::time::sleep(Duration::from_secs(3600)).await;
        });
        let abort = first.abort_handle();
        backoff.replace_timer(first);
        backoff.replace_timer(tokio::spawn(async {}));
        for _ in 0..100 {
            if abort.is_finished() {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert!(abort.is_finished());
        backoff.cancel_timer();
        backoff.cancel_timer();
    }
}
