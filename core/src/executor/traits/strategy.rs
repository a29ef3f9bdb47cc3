use std::time::Duration;

/// Backoff policy between execution-loop attempts of one task.
pub trait RetryStrategy: Send + Sync {
    fn name(&self) -> &str;

    /// Delay before attempt `attempt + 1`; `None` stops retrying.
    fn next_delay(&self, attempt: u32, error: &str) -> Option<Duration>;

    fn max_attempts(&self) -> u32;

    fn should_retry(&self, attempt: u32, error: &str) -> bool {
        attempt < self.max_attempts() && !self.is_fatal_error(error)
    }

    fn is_fatal_error(&self, _error: &str) -> bool {
        false
    }
}

/// Constant delay, used when no strategy is configured.
#[derive(Debug, Clone, Copy)]
pub struct FixedDelay {
    pub delay: Duration,
    pub max_attempts: u32,
}

impl RetryStrategy for FixedDelay {
    fn name(&self) -> &str {
        "fixed"
    }

    fn next_delay(&self, _attempt: u32, _error: &str) -> Option<Duration> {
        Some(self.delay)
    }

    fn max_attempts(&self) -> u32 {
        self.max_attempts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_delay_stops_at_max_attempts() {
        let s = FixedDelay {
            delay: Duration::from_millis(5),
            max_attempts: 2,
        };
        assert!(s.should_retry(1, "empty output"));
        assert!(!s.should_retry(2, "empty output"));
        assert_eq!(s.next_delay(1, ""), Some(Duration::from_millis(5)));
    }
}
