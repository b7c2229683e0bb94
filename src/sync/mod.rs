//! Synchronization module
//!
//! This module runs the bootstrap flood that gives every node the same
//! epoch origin, expressed in its own local clock, and turns the resulting
//! regression into the [`Epoch`] the slot scheduler runs on.

pub mod engine;

pub use self::engine::{SyncEngine, SyncRole};

use std::time::Duration;
use serde::{Serialize, Deserialize};

use crate::core::{Error, Result, MIN_SYNC_ROUNDS};
use crate::time::{util::micros, Micros};

/// Configuration for the bootstrap flood
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Number of times each node transmits a sync packet
    pub rounds: u8,
    /// Initiator delay before the first packet
    #[serde(serialize_with = "crate::core::serde::serialize_millis")]
    #[serde(deserialize_with = "crate::core::serde::deserialize_millis")]
    pub settle_delay: Duration,
    /// Delay between receiving a round and forwarding the next one
    #[serde(serialize_with = "crate::core::serde::serialize_millis")]
    #[serde(deserialize_with = "crate::core::serde::deserialize_millis")]
    pub guard_delay: Duration,
    /// Wait for the next round once the flood has reached this node
    #[serde(serialize_with = "crate::core::serde::serialize_millis")]
    #[serde(deserialize_with = "crate::core::serde::deserialize_millis")]
    pub round_timeout: Duration,
    /// Wait for the first packet of the flood
    #[serde(serialize_with = "crate::core::serde::serialize_millis")]
    #[serde(deserialize_with = "crate::core::serde::deserialize_millis")]
    pub join_timeout: Duration,
}

impl Default for SyncConfig {
    fn default() -> Self {
        SyncConfig {
            rounds: 10,
            settle_delay: Duration::from_millis(50),
            guard_delay: Duration::from_millis(5),
            round_timeout: Duration::from_millis(25),
            join_timeout: Duration::from_millis(2000),
        }
    }
}

impl SyncConfig {
    /// Validates the bootstrap settings
    pub fn validate(&self) -> Result<()> {
        if self.rounds < MIN_SYNC_ROUNDS {
            return Err(Error::config(format!(
                "sync needs at least {} rounds, got {}",
                MIN_SYNC_ROUNDS, self.rounds
            )));
        }
        if self.round_timeout <= self.guard_delay {
            return Err(Error::config("round_timeout must exceed guard_delay"));
        }
        if self.join_timeout < self.round_timeout {
            return Err(Error::config("join_timeout must be at least round_timeout"));
        }
        Ok(())
    }
}

/// One (round, local receive time) observation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncSample {
    pub round: u8,
    pub time: Micros,
}

/// Linear model of the flood: `local_time(round) = origin + round × slope`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClockFit {
    /// Local time (µs) at which round 0 was on the air
    pub origin: f64,
    /// Local time (µs) between consecutive rounds
    pub slope: f64,
}

impl ClockFit {
    /// Fits the model through the first and last forwarded samples
    pub fn two_point(first: SyncSample, last: SyncSample) -> Result<Self> {
        if last.round <= first.round {
            return Err(Error::bootstrap(format!(
                "no usable regression inputs (first round {}, last round {})",
                first.round, last.round
            )));
        }

        let slope = util::slope(first, last);
        let origin = first.time as f64 - f64::from(first.round) * slope;
        Ok(ClockFit { origin, slope })
    }

    /// Local time at which `round` was (or would have been) on the air
    pub fn local_epoch_time(&self, round: u8) -> f64 {
        self.origin + f64::from(round) * self.slope
    }
}

/// Tracks the first and last samples a node forwards
#[derive(Debug, Default, Clone)]
pub struct SampleTracker {
    first: Option<SyncSample>,
    last: Option<SyncSample>,
}

impl SampleTracker {
    pub fn record(&mut self, sample: SyncSample) {
        if self.first.is_none() {
            self.first = Some(sample);
        } else {
            self.last = Some(sample);
        }
    }

    pub fn first(&self) -> Option<SyncSample> {
        self.first
    }

    pub fn last(&self) -> Option<SyncSample> {
        self.last
    }

    /// Regression over the recorded samples
    pub fn fit(&self) -> Result<ClockFit> {
        match (self.first, self.last) {
            (None, _) => Err(Error::bootstrap("no sync packet received")),
            (Some(first), None) => Err(Error::bootstrap(format!(
                "only round {} received, need two distinct rounds",
                first.round
            ))),
            (Some(first), Some(last)) => ClockFit::two_point(first, last),
        }
    }
}

/// Shared time frame for the slotted phase
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Epoch {
    /// Local time (µs) of the epoch anchor
    pub origin: i64,
    /// Slots per epoch
    pub slot_count: u8,
    /// Length of one slot
    pub slot_duration: Duration,
}

impl Epoch {
    /// Anchors an epoch at the fitted origin
    pub fn from_fit(fit: &ClockFit, slot_count: u8, slot_duration: Duration) -> Result<Self> {
        if slot_count == 0 || slot_duration.is_zero() {
            return Err(Error::config("epoch needs at least one non-empty slot"));
        }
        if !fit.origin.is_finite() {
            return Err(Error::bootstrap("regression produced a non-finite origin"));
        }

        Ok(Epoch {
            origin: fit.origin.round() as i64,
            slot_count,
            slot_duration,
        })
    }

    /// Length of one full cycle through all slots
    pub fn length(&self) -> Duration {
        self.slot_duration * u32::from(self.slot_count)
    }

    /// Local time of the start of epoch `index`
    pub fn boundary(&self, index: u64) -> i64 {
        self.origin + (index * micros(self.length())) as i64
    }

    /// First epoch boundary at or after local time `after`
    pub fn next_boundary(&self, after: i64) -> (u64, i64) {
        let length = micros(self.length()) as i64;
        let index = if after <= self.origin {
            0
        } else {
            util::ceil_div((after - self.origin) as u64, length as u64)
        };
        (index, self.boundary(index))
    }
}

/// Utility functions for synchronization
pub mod util {
    use super::SyncSample;

    /// Local time per round between two samples
    pub fn slope(first: SyncSample, last: SyncSample) -> f64 {
        (last.time as f64 - first.time as f64) / f64::from(last.round - first.round)
    }

    /// Integer division rounding up
    pub fn ceil_div(value: u64, divisor: u64) -> u64 {
        (value + divisor - 1) / divisor
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(round: u8, time: Micros) -> SyncSample {
        SyncSample { round, time }
    }

    #[test]
    fn test_regression_exactness() {
        let cases = [
            (sample(0, 1_000), sample(9, 451_000)),
            (sample(1, 20_000), sample(19, 920_000)),
            (sample(3, 7_777_123), sample(17, 8_000_999)),
            (sample(2, 5), sample(3, 6)),
        ];

        for (first, last) in cases {
            let fit = ClockFit::two_point(first, last).unwrap();
            assert!((fit.local_epoch_time(first.round) - first.time as f64).abs() < 1e-6);
            assert!((fit.local_epoch_time(last.round) - last.time as f64).abs() < 1e-6);
        }
    }

    #[test]
    fn test_uniform_fifty_ms_rounds() {
        let mut tracker = SampleTracker::default();
        for round in 0..10u8 {
            tracker.record(sample(round, u64::from(round) * 50_000));
        }

        let fit = tracker.fit().unwrap();
        assert!((fit.slope - 50_000.0).abs() < 1e-6);
        assert!(fit.origin.abs() < 1e-6);
    }

    #[test]
    fn test_degenerate_inputs_rejected() {
        assert!(matches!(
            ClockFit::two_point(sample(4, 100), sample(4, 200)),
            Err(Error::Bootstrap(_))
        ));

        let mut tracker = SampleTracker::default();
        assert!(matches!(tracker.fit(), Err(Error::Bootstrap(_))));
        tracker.record(sample(2, 10));
        assert!(matches!(tracker.fit(), Err(Error::Bootstrap(_))));
    }

    #[test]
    fn test_tracker_keeps_first_and_last() {
        let mut tracker = SampleTracker::default();
        tracker.record(sample(1, 10));
        tracker.record(sample(3, 30));
        tracker.record(sample(5, 50));

        assert_eq!(tracker.first(), Some(sample(1, 10)));
        assert_eq!(tracker.last(), Some(sample(5, 50)));
    }

    #[test]
    fn test_epoch_boundaries() {
        let fit = ClockFit { origin: 1_000_000.4, slope: 5_000.0 };
        let epoch = Epoch::from_fit(&fit, 27, Duration::from_millis(37)).unwrap();

        assert_eq!(epoch.origin, 1_000_000);
        assert_eq!(epoch.length(), Duration::from_millis(999));
        assert_eq!(epoch.boundary(2), 1_000_000 + 2 * 999_000);

        assert_eq!(epoch.next_boundary(0), (0, 1_000_000));
        assert_eq!(epoch.next_boundary(1_000_000), (0, 1_000_000));
        assert_eq!(epoch.next_boundary(1_000_001), (1, 1_999_000));
        assert_eq!(epoch.next_boundary(1_999_000), (1, 1_999_000));
    }

    #[test]
    fn test_config_validation() {
        assert!(SyncConfig::default().validate().is_ok());

        let config = SyncConfig { rounds: 2, ..SyncConfig::default() };
        assert!(config.validate().is_err());

        let config = SyncConfig {
            round_timeout: Duration::from_millis(5),
            ..SyncConfig::default()
        };
        assert!(config.validate().is_err());
    }
}
