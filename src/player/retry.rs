// ABOUTME: Retry policy for engine errors
// ABOUTME: One transient failure per window is retried, the next one is fatal

use std::time::Duration;
use tokio::time::Instant;

pub(crate) struct ErrorBackoff {
    window: Duration,
    last_retry: Option<Instant>,
}

impl ErrorBackoff {
    pub(crate) fn new(window: Duration) -> Self {
        Self {
            window,
            last_retry: None,
        }
    }

    /// Forget earlier failures; a new track starts with a clean slate
    pub(crate) fn reset(&mut self) {
        self.last_retry = None;
    }

    /// Whether an error seen at `now` should be retried
    pub(crate) fn should_retry(&mut self, now: Instant, retryable: bool) -> bool {
        if !retryable {
            return false;
        }
        if let Some(last) = self.last_retry {
            if now.saturating_duration_since(last) < self.window {
                return false;
            }
        }
        self.last_retry = Some(now);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const WINDOW: Duration = Duration::from_secs(300);

    #[test]
    fn test_second_error_within_window_is_fatal() {
        let mut backoff = ErrorBackoff::new(WINDOW);
        let start = Instant::now();

        assert!(backoff.should_retry(start, true));
        assert!(!backoff.should_retry(start + Duration::from_secs(60), true));
    }

    #[test]
    fn test_error_after_window_is_retried() {
        let mut backoff = ErrorBackoff::new(WINDOW);
        let start = Instant::now();

        assert!(backoff.should_retry(start, true));
        assert!(backoff.should_retry(start + WINDOW, true));
    }

    #[test]
    fn test_non_retryable_is_fatal() {
        let mut backoff = ErrorBackoff::new(WINDOW);
        assert!(!backoff.should_retry(Instant::now(), false));
        assert!(backoff.should_retry(Instant::now(), true));
    }

    #[test]
    fn test_reset_clears_window() {
        let mut backoff = ErrorBackoff::new(WINDOW);
        let now = Instant::now();
        assert!(backoff.should_retry(now, true));

        backoff.reset();
        assert!(backoff.should_retry(now, true));
    }
}
