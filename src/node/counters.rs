//! Per-node drop and failure counters
//!
//! The scheduler is the only writer; anything holding the `Arc` may read a
//! [`CounterSnapshot`] at any time without locking.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Serialize, Deserialize};

/// One externally visible counter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Counter {
    /// Batches this node transmitted in its own slot
    BatchesSent,
    /// Batches decoded in a receive slot
    BatchesReceived,
    /// Receive slots that ended without a frame
    RxTimeouts,
    /// Frames that failed to decode
    DecodeErrors,
    /// Readings carried in transmitted batches
    ReadingsSent,
    /// Readings dropped by the aggregator
    AggregationDropped,
    /// Readings written out by the sink
    Delivered,
    /// Readings the sink emitted early because its FIFO was full
    SinkOverflow,
    /// Readings the sink had already delivered
    Duplicates,
    /// Local readings rejected by a full queue
    QueueOverflow,
}

/// Atomic counters shared between a running node and its observers
#[derive(Debug, Default)]
pub struct Counters {
    batches_sent: AtomicU64,
    batches_received: AtomicU64,
    rx_timeouts: AtomicU64,
    decode_errors: AtomicU64,
    readings_sent: AtomicU64,
    aggregation_dropped: AtomicU64,
    delivered: AtomicU64,
    sink_overflow: AtomicU64,
    duplicates: AtomicU64,
    queue_overflow: AtomicU64,
}

/// Point-in-time copy of [`Counters`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CounterSnapshot {
    pub batches_sent: u64,
    pub batches_received: u64,
    pub rx_timeouts: u64,
    pub decode_errors: u64,
    pub readings_sent: u64,
    pub aggregation_dropped: u64,
    pub delivered: u64,
    pub sink_overflow: u64,
    pub duplicates: u64,
    pub queue_overflow: u64,
}

impl Counters {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self, counter: Counter) -> &AtomicU64 {
        match counter {
            Counter::BatchesSent => &self.batches_sent,
            Counter::BatchesReceived => &self.batches_received,
            Counter::RxTimeouts => &self.rx_timeouts,
            Counter::DecodeErrors => &self.decode_errors,
            Counter::ReadingsSent => &self.readings_sent,
            Counter::AggregationDropped => &self.aggregation_dropped,
            Counter::Delivered => &self.delivered,
            Counter::SinkOverflow => &self.sink_overflow,
            Counter::Duplicates => &self.duplicates,
            Counter::QueueOverflow => &self.queue_overflow,
        }
    }

    /// Adds `n` to `counter`
    #[inline]
    pub fn add(&self, counter: Counter, n: u64) {
        if n > 0 {
            self.slot(counter).fetch_add(n, Ordering::Relaxed);
        }
    }

    /// Adds one to `counter`
    #[inline]
    pub fn incr(&self, counter: Counter) {
        self.add(counter, 1);
    }

    /// Raises `counter` to `value` if it is lower
    pub fn raise_to(&self, counter: Counter, value: u64) {
        self.slot(counter).fetch_max(value, Ordering::Relaxed);
    }

    pub fn get(&self, counter: Counter) -> u64 {
        self.slot(counter).load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> CounterSnapshot {
        CounterSnapshot {
            batches_sent: self.get(Counter::BatchesSent),
            batches_received: self.get(Counter::BatchesReceived),
            rx_timeouts: self.get(Counter::RxTimeouts),
            decode_errors: self.get(Counter::DecodeErrors),
            readings_sent: self.get(Counter::ReadingsSent),
            aggregation_dropped: self.get(Counter::AggregationDropped),
            delivered: self.get(Counter::Delivered),
            sink_overflow: self.get(Counter::SinkOverflow),
            duplicates: self.get(Counter::Duplicates),
            queue_overflow: self.get(Counter::QueueOverflow),
        }
    }
}
