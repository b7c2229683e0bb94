//! Slotted phase
//!
//! Once the clock is synchronized every node runs the same TDMA cycle: an
//! epoch of `slot_count` equal slots, each owned by one transmitter. The
//! timers in [`timer`] only bump counters; [`SlotScheduler`] consumes those
//! ticks one at a time and does all radio and buffer work.

pub mod scheduler;
pub mod timer;

pub use self::scheduler::{SchedulerExit, SlotScheduler};
pub use self::timer::{schedule_periodic, SlotClock, SlotTick};

use std::time::Duration;
use serde::{Serialize, Deserialize};

use crate::core::{max_batch_capacity, Error, Result};

/// Slot timing and aggregation settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScheduleConfig {
    /// Slots per epoch
    pub slot_count: u8,
    /// Length of one slot
    #[serde(serialize_with = "crate::core::serde::serialize_millis")]
    #[serde(deserialize_with = "crate::core::serde::deserialize_millis")]
    pub slot_duration: Duration,
    /// Offset of the slot tick after the epoch tick
    #[serde(serialize_with = "crate::core::serde::serialize_millis")]
    #[serde(deserialize_with = "crate::core::serde::deserialize_millis")]
    pub slot_phase: Duration,
    /// Delay between the slot tick and a source's transmission
    #[serde(serialize_with = "crate::core::serde::serialize_millis")]
    #[serde(deserialize_with = "crate::core::serde::deserialize_millis")]
    pub tx_offset: Duration,
    /// How long receivers listen in a slot
    #[serde(serialize_with = "crate::core::serde::serialize_millis")]
    #[serde(deserialize_with = "crate::core::serde::deserialize_millis")]
    pub rx_timeout: Duration,
    /// Readings per batch (`K`)
    pub batch_capacity: usize,
    /// Consecutive idle epochs after which a node stops
    pub idle_epochs_before_stop: u32,
    /// Hard limit on epochs run, if any
    pub max_epochs: Option<u32>,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        ScheduleConfig {
            slot_count: 27,
            slot_duration: Duration::from_millis(37),
            slot_phase: Duration::from_millis(1),
            tx_offset: Duration::from_millis(3),
            rx_timeout: Duration::from_millis(25),
            batch_capacity: 5,
            idle_epochs_before_stop: 5,
            max_epochs: None,
        }
    }
}

impl ScheduleConfig {
    /// Checks the timing budget of a slot and the batch capacity against the radio payload
    pub fn validate(&self, max_payload: usize) -> Result<()> {
        if self.slot_count == 0 {
            return Err(Error::config("slot_count must be at least 1"));
        }
        if self.slot_phase.is_zero() {
            return Err(Error::config("slot_phase must be non-zero"));
        }
        if self.rx_timeout <= self.tx_offset {
            return Err(Error::config("rx_timeout must exceed tx_offset"));
        }
        if self.slot_phase + self.tx_offset + self.rx_timeout >= self.slot_duration {
            return Err(Error::config(format!(
                "slot of {:?} cannot fit phase {:?}, tx offset {:?} and rx timeout {:?}",
                self.slot_duration, self.slot_phase, self.tx_offset, self.rx_timeout
            )));
        }

        let limit = max_batch_capacity(max_payload);
        if self.batch_capacity == 0 || self.batch_capacity > limit {
            return Err(Error::config(format!(
                "batch_capacity must be between 1 and {} for a {} byte payload",
                limit, max_payload
            )));
        }
        if self.idle_epochs_before_stop == 0 {
            return Err(Error::config("idle_epochs_before_stop must be at least 1"));
        }
        Ok(())
    }

    /// Length of one epoch
    pub fn epoch_length(&self) -> Duration {
        self.slot_duration * u32::from(self.slot_count)
    }
}
