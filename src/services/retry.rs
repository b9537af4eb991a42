use std::time::Duration;

/// Bounded exponential backoff: attempt `n` (1-based) waits
/// `base * 2^(n-1)`, capped at `max`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    pub max_attempts: u32,
    pub base: Duration,
    pub max: Duration,
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base: Duration::from_millis(100),
            max: Duration::from_secs(2),
        }
    }
}

impl Backoff {
    pub fn delay(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(16);
        self.base.saturating_mul(1 << exp).min(self.max)
    }
}

/// Delay before the next delivery of an outbox entry that has failed
/// `attempts` times: 2^attempts seconds, at most five minutes.
pub fn outbox_delay(attempts: i32) -> chrono::Duration {
    let exp = attempts.clamp(0, 16) as u32;
    chrono::Duration::seconds(i64::min(300, 2_i64.pow(exp)))
}
