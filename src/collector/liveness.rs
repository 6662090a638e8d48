//! Blink-based liveness check.
//!
//! A live face blinks every few seconds; a photo held up to the camera does
//! not. When no blink is seen for the configured timeout the check fails
//! once and re-arms, so a static image keeps failing once per timeout.

use chrono::{DateTime, Duration, Utc};

#[derive(Debug, Clone)]
pub struct LivenessMonitor {
    timeout: Duration,
    last_blink: Option<DateTime<Utc>>,
}

impl LivenessMonitor {
    pub fn new(timeout: std::time::Duration) -> Self {
        Self {
            timeout: Duration::from_std(timeout).unwrap_or_else(|_| Duration::seconds(60)),
            last_blink: None,
        }
    }

    /// Restart the timer from `now`.
    pub fn rearm(&mut self, now: DateTime<Utc>) {
        self.last_blink = Some(now);
    }

    /// Feed one single-face frame. Returns true when liveness just failed.
    pub fn observe(&mut self, is_blinking: bool, now: DateTime<Utc>) -> bool {
        if is_blinking {
            self.rearm(now);
            return false;
        }

        let last = *self.last_blink.get_or_insert(now);
        if now - last > self.timeout {
            self.rearm(now);
            return true;
        }
        false
    }

    /// Time since the last blink (or re-arm).
    pub fn since_last_blink(&self, now: DateTime<Utc>) -> Option<Duration> {
        self.last_blink.map(|last| now - last)
    }
}
