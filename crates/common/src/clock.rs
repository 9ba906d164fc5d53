//! Wall-clock abstraction
//!
//! Round deadlines are absolute ledger timestamps, so the scheduler compares
//! them against wall-clock time rather than a monotonic instant. Components
//! take a [`SharedClock`] so tests and the simulator can drive time by hand.

use chrono::{DateTime, Duration, Utc};
use parking_lot::RwLock;
use std::sync::Arc;

/// Timestamp type used for deadlines and lifecycle bookkeeping
pub type Timestamp = DateTime<Utc>;

/// Source of the current time
pub trait Clock: Send + Sync {
    fn now(&self) -> Timestamp;
}

/// Shared clock handle
pub type SharedClock = Arc<dyn Clock>;

/// Clock backed by the system time
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl SystemClock {
    pub fn shared() -> SharedClock {
        Arc::new(Self)
    }
}

impl Clock for SystemClock {
    fn now(&self) -> Timestamp {
        Utc::now()
    }
}

/// Manually advanced clock for tests and simulations
#[derive(Debug, Clone)]
pub struct ManualClock {
    now: Arc<RwLock<Timestamp>>,
}

impl ManualClock {
    /// Create a clock frozen at `start`
    pub fn new(start: Timestamp) -> Self {
        Self {
            now: Arc::new(RwLock::new(start)),
        }
    }

    /// Create a clock frozen at the Unix epoch
    pub fn at_epoch() -> Self {
        Self::new(DateTime::<Utc>::default())
    }

    /// Move the clock forward
    pub fn advance(&self, by: Duration) {
        *self.now.write() += by;
    }

    /// Set the clock to an absolute time
    pub fn set(&self, to: Timestamp) {
        *self.now.write() = to;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Timestamp {
        *self.now.read()
    }
}
