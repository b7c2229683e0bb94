//! Node-local time keeping
//!
//! Every node runs a free-running microsecond counter that starts at an
//! arbitrary value. Nothing here is shared between nodes: the clock sync
//! engine only ever compares timestamps taken on the same [`NodeClock`],
//! and the scheduler converts local targets back into runtime instants to
//! arm its timers.
//!
//! # Examples
//!
//! ```
//! use slotsync::time::NodeClock;
//! use std::time::Duration;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let clock = NodeClock::new(Duration::from_secs(3));
//! assert!(clock.now() >= 3_000_000);
//! # }
//! ```

use std::time::Duration;
use tokio::time::Instant;

/// Local timestamp in microseconds
pub type Micros = u64;

/// Free-running local clock with an arbitrary start value
#[derive(Debug, Clone, Copy)]
pub struct NodeClock {
    /// Runtime instant at which the local counter read `offset`
    base: Instant,
    /// Counter value at `base`
    offset: Duration,
}

impl NodeClock {
    /// Creates a clock that currently reads `offset`
    pub fn new(offset: Duration) -> Self {
        NodeClock::starting_at(Instant::now(), offset)
    }

    /// Creates a clock that read `offset` at `base`
    pub fn starting_at(base: Instant, offset: Duration) -> Self {
        NodeClock { base, offset }
    }

    /// Current local time
    pub fn now(&self) -> Micros {
        self.at(Instant::now())
    }

    /// Local time corresponding to a runtime instant
    pub fn at(&self, instant: Instant) -> Micros {
        util::micros(self.offset + instant.saturating_duration_since(self.base))
    }

    /// Runtime instant at which the local clock reads `local`
    ///
    /// Local times before the clock's start map to its start.
    pub fn instant_at(&self, local: i64) -> Instant {
        let since_base = local - util::micros(self.offset) as i64;
        self.base + Duration::from_micros(since_base.max(0) as u64)
    }
}

/// Utility functions for time management
pub mod util {
    use std::time::Duration;
    use super::Micros;

    /// Whole microseconds in a duration, saturating
    pub fn micros(duration: Duration) -> Micros {
        u64::try_from(duration.as_micros()).unwrap_or(u64::MAX)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_clock_advances_with_runtime() {
        let clock = NodeClock::new(Duration::from_millis(500));
        assert_eq!(clock.now(), 500_000);

        tokio::time::sleep(Duration::from_millis(40)).await;
        assert_eq!(clock.now(), 540_000);
    }

    #[tokio::test(start_paused = true)]
    async fn test_instant_round_trip() {
        let clock = NodeClock::new(Duration::from_secs(7));
        let target = clock.instant_at(7_250_000);

        assert_eq!(target - Instant::now(), Duration::from_millis(250));
        assert_eq!(clock.at(target), 7_250_000);
    }

    #[tokio::test(start_paused = true)]
    async fn test_instant_before_start_clamps() {
        let clock = NodeClock::new(Duration::from_secs(1));
        assert_eq!(clock.instant_at(-5), clock.instant_at(1_000_000));
    }

    #[test]
    fn test_micros() {
        assert_eq!(util::micros(Duration::from_millis(3)), 3_000);
        assert_eq!(util::micros(Duration::MAX), u64::MAX);
    }
}
