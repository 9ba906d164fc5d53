//! Retry and cooldown policy

use std::time::Duration;

/// How a settlement dispatch retries, and how long a failed match waits
/// before the scheduler may dispatch it again
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total tries per dispatch, the first one included
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Bound on each ledger round-trip
    pub attempt_timeout: Duration,
    /// Cooldown after the first failed dispatch; zero re-dispatches on the
    /// next cycle
    pub failure_cooldown: Duration,
    pub max_failure_cooldown: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(8),
            attempt_timeout: Duration::from_secs(10),
            failure_cooldown: Duration::ZERO,
            max_failure_cooldown: Duration::from_secs(60),
        }
    }
}

impl RetryPolicy {
    /// Delay before retrying after the `attempt`-th failed try (zero-based)
    ///
    /// `base_delay * 2^attempt`, capped at `max_delay`.
    pub fn backoff(&self, attempt: u32) -> Duration {
        exponential(self.base_delay, attempt, self.max_delay)
    }

    /// Cooldown for a match with `failures` consecutive failed dispatches
    pub fn cooldown(&self, failures: u32) -> Duration {
        exponential(
            self.failure_cooldown,
            failures.saturating_sub(1),
            self.max_failure_cooldown,
        )
    }

    /// [`cooldown`](Self::cooldown) as a wall-clock offset
    pub fn cooldown_offset(&self, failures: u32) -> chrono::Duration {
        chrono::Duration::from_std(self.cooldown(failures))
            .unwrap_or_else(|_| chrono::Duration::seconds(i64::from(u32::MAX)))
    }
}

fn exponential(base: Duration, exponent: u32, cap: Duration) -> Duration {
    let factor = 2u32.checked_pow(exponent).unwrap_or(u32::MAX);
    base.checked_mul(factor).unwrap_or(cap).min(cap)
}
