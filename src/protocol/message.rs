use serde::{Serialize, Deserialize};
use crate::core::Reading;

/// Counter packet flooded during the bootstrap phase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncPacket {
    /// Number of hops/rounds this flood has gone through
    pub round: u8,
}

impl SyncPacket {
    /// The packet the initiator sends first
    pub fn initial() -> Self {
        SyncPacket { round: 0 }
    }

    /// The packet a forwarder re-broadcasts, `None` once the counter is exhausted
    pub fn next(&self) -> Option<Self> {
        self.round.checked_add(1).map(|round| SyncPacket { round })
    }
}

/// Bounded batch of readings carried in one slot transmission
///
/// The capacity `K` is fixed at construction; `count` is the number of
/// readings actually held.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchPacket {
    readings: Vec<Reading>,
    capacity: usize,
}

impl BatchPacket {
    /// Creates an empty batch that holds at most `capacity` readings
    pub fn with_capacity(capacity: usize) -> Self {
        BatchPacket {
            readings: Vec::with_capacity(capacity),
            capacity,
        }
    }

    /// Builds a batch from readings, handing back whatever does not fit
    pub fn from_readings(
        capacity: usize,
        readings: impl IntoIterator<Item = Reading>,
    ) -> (Self, Vec<Reading>) {
        let mut batch = BatchPacket::with_capacity(capacity);
        let mut rest = Vec::new();
        for reading in readings {
            if let Err(reading) = batch.push(reading) {
                rest.push(reading);
            }
        }
        (batch, rest)
    }

    /// Appends a reading, returning it back if the batch is full
    pub fn push(&mut self, reading: Reading) -> Result<(), Reading> {
        if self.is_full() {
            return Err(reading);
        }
        self.readings.push(reading);
        Ok(())
    }

    /// Number of readings in the batch
    pub fn count(&self) -> usize {
        self.readings.len()
    }

    /// Maximum number of readings
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn is_empty(&self) -> bool {
        self.readings.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.readings.len() >= self.capacity
    }

    /// Readings in packing order
    pub fn readings(&self) -> &[Reading] {
        &self.readings
    }

    /// Splits the batch back into its readings, in packing order
    pub fn into_readings(self) -> Vec<Reading> {
        self.readings
    }
}
