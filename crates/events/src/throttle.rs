//! Rate limiting for repeated error logs.

use std::time::{Duration, Instant};

/// Minimum spacing between repeated error logs from one writer.
pub const ERROR_LOG_INTERVAL: Duration = Duration::from_secs(10);

/// Lets one error log through per interval and counts the rest.
#[derive(Debug, Clone)]
pub struct ErrorThrottle {
    interval: Duration,
    last_logged: Option<Instant>,
    suppressed: u64,
}

impl ErrorThrottle {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last_logged: None,
            suppressed: 0,
        }
    }

    /// Returns `Some(suppressed_since_last)` when the caller should log now.
    pub fn check(&mut self, now: Instant) -> Option<u64> {
        let due = self
            .last_logged
            .map_or(true, |last| now.duration_since(last) >= self.interval);
        if due {
            self.last_logged = Some(now);
            Some(std::mem::take(&mut self.suppressed))
        } else {
            self.suppressed += 1;
            None
        }
    }
}

impl Default for ErrorThrottle {
    fn default() -> Self {
        Self::new(ERROR_LOG_INTERVAL)
    }
}
