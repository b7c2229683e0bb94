//! Sink drain and run termination
//!
//! Readings reaching the sink wait in a bounded FIFO and are written out in
//! the sink's own slot, one log line each. The same reading can arrive over
//! two relay paths; the drain delivers it once.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Serialize, Deserialize};
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::core::{Error, NodeId, Reading, Result};
use crate::node::{Counter, Counters};

/// Sink drain settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SinkConfig {
    /// Readings held before early emission
    pub fifo_capacity: usize,
    /// Readings written out per sink slot
    pub flush_limit: usize,
}

impl Default for SinkConfig {
    fn default() -> Self {
        SinkConfig {
            fifo_capacity: 200,
            flush_limit: 50,
        }
    }
}

impl SinkConfig {
    pub fn validate(&self) -> Result<()> {
        if self.fifo_capacity == 0 || self.flush_limit == 0 {
            return Err(Error::config("sink fifo_capacity and flush_limit must be at least 1"));
        }
        Ok(())
    }
}

/// A reading written out by the sink
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Delivery {
    pub reading: Reading,
    /// Epoch in which the reading reached the sink
    pub epoch: u32,
    /// Slot in which the reading reached the sink
    pub slot: u8,
    pub delivered_at: DateTime<Utc>,
}

/// What happened to a reading offered to the sink
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Offer {
    Queued,
    /// FIFO was full; emitted immediately
    Emitted,
    Duplicate,
}

#[derive(Debug, Clone, Copy)]
struct Pending {
    reading: Reading,
    epoch: u32,
    slot: u8,
}

/// Sequence numbers seen per source
#[derive(Debug, Default)]
struct SeenSet {
    sources: HashMap<NodeId, [u64; 4]>,
}

impl SeenSet {
    /// Marks a reading seen; false if it already was
    fn insert(&mut self, reading: &Reading) -> bool {
        let bits = self.sources.entry(reading.source_id).or_default();
        let word = usize::from(reading.sequence / 64);
        let mask = 1u64 << (reading.sequence % 64);
        let fresh = bits[word] & mask == 0;
        bits[word] |= mask;
        fresh
    }
}

/// Bounded delivery queue of the sink
pub struct SinkDrain {
    fifo: VecDeque<Pending>,
    config: SinkConfig,
    seen: SeenSet,
    counters: Arc<Counters>,
    exporter: Option<mpsc::UnboundedSender<Delivery>>,
}

impl SinkDrain {
    pub fn new(config: SinkConfig, counters: Arc<Counters>) -> Self {
        SinkDrain {
            fifo: VecDeque::with_capacity(config.fifo_capacity),
            config,
            seen: SeenSet::default(),
            counters,
            exporter: None,
        }
    }

    /// Forwards every delivered reading to `exporter`
    pub fn with_exporter(mut self, exporter: mpsc::UnboundedSender<Delivery>) -> Self {
        self.exporter = Some(exporter);
        self
    }

    /// Readings waiting to be written out
    pub fn pending(&self) -> usize {
        self.fifo.len()
    }

    /// Accepts a reading that reached the sink in `slot` of `epoch`
    pub fn offer(&mut self, reading: Reading, epoch: u32, slot: u8) -> Offer {
        if !self.seen.insert(&reading) {
            self.counters.incr(Counter::Duplicates);
            return Offer::Duplicate;
        }

        let pending = Pending { reading, epoch, slot };
        if self.fifo.len() >= self.config.fifo_capacity {
            warn!(source = %reading.source_id, seq = reading.sequence, "sink fifo full, emitting early");
            self.counters.incr(Counter::SinkOverflow);
            self.emit(pending);
            return Offer::Emitted;
        }

        self.fifo.push_back(pending);
        Offer::Queued
    }

    /// Writes out up to the configured flush limit
    pub fn flush(&mut self) -> usize {
        self.drain(self.config.flush_limit)
    }

    /// Writes out everything
    pub fn flush_all(&mut self) -> usize {
        self.drain(usize::MAX)
    }

    fn drain(&mut self, limit: usize) -> usize {
        let count = limit.min(self.fifo.len());
        for _ in 0..count {
            if let Some(pending) = self.fifo.pop_front() {
                self.emit(pending);
            }
        }
        count
    }

    fn emit(&self, pending: Pending) {
        let Pending { reading, epoch, slot } = pending;
        info!(
            source = %reading.source_id,
            seq = reading.sequence,
            payload = reading.payload,
            epoch,
            slot,
            "reading delivered"
        );
        self.counters.incr(Counter::Delivered);

        if let Some(exporter) = &self.exporter {
            let delivery = Delivery { reading, epoch, slot, delivered_at: Utc::now() };
            // A closed exporter only stops the export, never the sink
            let _ = exporter.send(delivery);
        }
    }
}

impl Drop for SinkDrain {
    fn drop(&mut self) {
        self.flush_all();
    }
}

/// Ends the run after a number of consecutive idle epochs
///
/// The counter is armed by the first epoch that moves data, so nodes that
/// start their schedule before the first reading exists do not stop early.
#[derive(Debug, Clone)]
pub struct StopCounter {
    threshold: u32,
    idle: u32,
    armed: bool,
}

impl StopCounter {
    pub fn new(threshold: u32) -> Self {
        StopCounter { threshold, idle: 0, armed: false }
    }

    /// Consecutive idle epochs since data last moved
    pub fn idle_epochs(&self) -> u32 {
        self.idle
    }

    /// Records one finished epoch; returns true once the run is complete
    pub fn record_epoch(&mut self, moved: u64) -> bool {
        if moved > 0 {
            self.armed = true;
            self.idle = 0;
            return false;
        }
        if self.armed {
            self.idle += 1;
        }
        self.armed && self.idle >= self.threshold
    }
}
