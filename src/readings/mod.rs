//! Local reading production
//!
//! The scheduler only sees a [`ReadingSource`]: something that may have a
//! reading pending and hands them out in FIFO order. [`ReadingQueue`] is
//! the bounded buffer between the sensor and the scheduler and
//! [`DataGenerator`] fills it at a fixed cadence with seeded values.

use std::collections::VecDeque;
use std::time::Duration;

use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Distribution, Normal};
use serde::{Serialize, Deserialize};
use tokio::time::Instant;
use tracing::warn;

use crate::core::{Error, NodeId, Reading, Result};

/// FIFO producer of local readings
pub trait ReadingSource {
    /// Whether [`ReadingSource::pop`] would return a reading
    fn has_pending(&self) -> bool;

    /// Takes the oldest pending reading
    fn pop(&mut self) -> Option<Reading>;

    /// Produces whatever became due by `now`
    fn refresh(&mut self, _now: Instant) {}

    /// Readings lost to a full buffer so far
    fn overflowed(&self) -> u64 {
        0
    }

    /// Whether this source will never produce another reading
    fn is_finished(&self) -> bool {
        true
    }
}

/// Bounded FIFO of locally produced readings
#[derive(Debug, Clone)]
pub struct ReadingQueue {
    items: VecDeque<Reading>,
    capacity: usize,
    overflowed: u64,
}

impl ReadingQueue {
    pub fn new(capacity: usize) -> Self {
        ReadingQueue {
            items: VecDeque::with_capacity(capacity),
            capacity,
            overflowed: 0,
        }
    }

    /// Appends a reading; returns false and counts it when the queue is full
    pub fn push(&mut self, reading: Reading) -> bool {
        if self.items.len() >= self.capacity {
            self.overflowed += 1;
            return false;
        }
        self.items.push_back(reading);
        true
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

impl ReadingSource for ReadingQueue {
    fn has_pending(&self) -> bool {
        !self.items.is_empty()
    }

    fn pop(&mut self) -> Option<Reading> {
        self.items.pop_front()
    }

    fn overflowed(&self) -> u64 {
        self.overflowed
    }

    fn is_finished(&self) -> bool {
        self.items.is_empty()
    }
}

impl<S: ReadingSource + ?Sized> ReadingSource for &mut S {
    fn has_pending(&self) -> bool {
        (**self).has_pending()
    }

    fn pop(&mut self) -> Option<Reading> {
        (**self).pop()
    }

    fn refresh(&mut self, now: Instant) {
        (**self).refresh(now)
    }

    fn overflowed(&self) -> u64 {
        (**self).overflowed()
    }

    fn is_finished(&self) -> bool {
        (**self).is_finished()
    }
}

/// Configuration for local reading generation
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneratorConfig {
    /// Time between two readings
    #[serde(serialize_with = "crate::core::serde::serialize_millis")]
    #[serde(deserialize_with = "crate::core::serde::deserialize_millis")]
    pub period: Duration,
    /// Readings each node produces in total
    pub read_count: u8,
    /// Capacity of the local queue
    pub queue_capacity: usize,
    /// Base seed, mixed with the node id
    pub seed: u64,
    /// Mean sensor value
    pub payload_mean: f64,
    /// Standard deviation of the sensor value
    pub payload_std_dev: f64,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        GeneratorConfig {
            period: Duration::from_millis(1000),
            read_count: 200,
            queue_capacity: 100,
            seed: 0x5107_5E4C,
            payload_mean: 2048.0,
            payload_std_dev: 128.0,
        }
    }
}

impl GeneratorConfig {
    pub fn validate(&self) -> Result<()> {
        if self.period.is_zero() {
            return Err(Error::config("generator period must be non-zero"));
        }
        if self.queue_capacity == 0 {
            return Err(Error::config("queue_capacity must be at least 1"));
        }
        if !(self.payload_std_dev.is_finite() && self.payload_std_dev >= 0.0) {
            return Err(Error::config(format!(
                "payload_std_dev must be finite and non-negative, got {}",
                self.payload_std_dev
            )));
        }
        self.distribution().map(|_| ())
    }

    fn distribution(&self) -> Result<Normal<f64>> {
        Normal::new(self.payload_mean, self.payload_std_dev)
            .map_err(|e| Error::config(format!("invalid payload distribution: {}", e)))
    }
}

/// Periodic producer of a node's readings
pub struct DataGenerator {
    node: NodeId,
    period: Duration,
    remaining: u8,
    next_sequence: u8,
    next_due: Instant,
    rng: StdRng,
    distribution: Normal<f64>,
}

impl DataGenerator {
    /// Creates a generator whose first reading is due one period after `start`
    pub fn new(node: NodeId, config: &GeneratorConfig, start: Instant) -> Result<Self> {
        let seed = config
            .seed
            .wrapping_add(u64::from(node.0).wrapping_mul(0x9E37_79B9_7F4A_7C15));

        Ok(DataGenerator {
            node,
            period: config.period,
            remaining: config.read_count,
            next_sequence: 1,
            next_due: start + config.period,
            rng: StdRng::seed_from_u64(seed),
            distribution: config.distribution()?,
        })
    }

    /// Whether every reading has been produced
    pub fn is_exhausted(&self) -> bool {
        self.remaining == 0
    }

    /// Readings still to be produced
    pub fn remaining(&self) -> u8 {
        self.remaining
    }

    /// Pushes every reading due at `now` into `queue`; returns how many were produced
    pub fn poll(&mut self, now: Instant, queue: &mut ReadingQueue) -> usize {
        let mut produced = 0;

        while self.remaining > 0 && self.next_due <= now {
            let reading = self.next_reading();
            if !queue.push(reading) {
                warn!(node = %self.node, seq = reading.sequence, "local queue full, reading dropped");
            }

            self.next_due += self.period;
            self.remaining -= 1;
            produced += 1;
        }

        produced
    }

    fn next_reading(&mut self) -> Reading {
        let value = self.distribution.sample(&mut self.rng);
        let payload = value.round().clamp(0.0, f64::from(u16::MAX)) as u16;
        let reading = Reading::new(self.node, self.next_sequence, payload);
        self.next_sequence = self.next_sequence.wrapping_add(1);
        reading
    }
}

/// A node's generator feeding its local queue
pub struct SensorFeed {
    generator: DataGenerator,
    queue: ReadingQueue,
}

impl SensorFeed {
    /// Starts producing readings for `node` at `start`
    pub fn new(node: NodeId, config: &GeneratorConfig, start: Instant) -> Result<Self> {
        Ok(SensorFeed {
            generator: DataGenerator::new(node, config, start)?,
            queue: ReadingQueue::new(config.queue_capacity),
        })
    }
}

impl ReadingSource for SensorFeed {
    fn has_pending(&self) -> bool {
        self.queue.has_pending()
    }

    fn pop(&mut self) -> Option<Reading> {
        self.queue.pop()
    }

    fn refresh(&mut self, now: Instant) {
        self.generator.poll(now, &mut self.queue);
    }

    fn overflowed(&self) -> u64 {
        self.queue.overflowed()
    }

    /// Every reading has been produced and handed out
    fn is_finished(&self) -> bool {
        self.generator.is_exhausted() && self.queue.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_queue_bounded_fifo() {
        let mut queue = ReadingQueue::new(2);
        assert!(!queue.has_pending());

        assert!(queue.push(Reading::new(NodeId(1), 1, 10)));
        assert!(queue.push(Reading::new(NodeId(1), 2, 20)));
        assert!(!queue.push(Reading::new(NodeId(1), 3, 30)));
        assert_eq!(queue.overflowed(), 1);

        assert_eq!(queue.pop().map(|r| r.sequence), Some(1));
        assert_eq!(queue.pop().map(|r| r.sequence), Some(2));
        assert_eq!(queue.pop(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_generator_cadence() {
        let config = GeneratorConfig {
            period: Duration::from_millis(100),
            read_count: 3,
            ..GeneratorConfig::default()
        };
        let start = Instant::now();
        let mut generator = DataGenerator::new(NodeId(4), &config, start).unwrap();
        let mut queue = ReadingQueue::new(10);

        assert_eq!(generator.poll(start, &mut queue), 0);
        assert_eq!(generator.poll(start + Duration::from_millis(100), &mut queue), 1);
        assert_eq!(generator.poll(start + Duration::from_secs(5), &mut queue), 2);
        assert!(generator.is_exhausted());

        let sequences: Vec<u8> = std::iter::from_fn(|| queue.pop()).map(|r| r.sequence).collect();
        assert_eq!(sequences, vec![1, 2, 3]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_generator_is_seeded_per_node() {
        let config = GeneratorConfig::default();
        let start = Instant::now();
        let later = start + Duration::from_secs(3);

        let payloads = |node: u16| {
            let mut generator = DataGenerator::new(NodeId(node), &config, start).unwrap();
            let mut queue = ReadingQueue::new(10);
            generator.poll(later, &mut queue);
            std::iter::from_fn(move || queue.pop()).map(|r| r.payload).collect::<Vec<_>>()
        };

        assert_eq!(payloads(7), payloads(7));
        assert_ne!(payloads(7), payloads(8));
    }

    #[tokio::test(start_paused = true)]
    async fn test_sensor_feed() {
        let config = GeneratorConfig {
            period: Duration::from_millis(10),
            read_count: 4,
            queue_capacity: 2,
            ..GeneratorConfig::default()
        };
        let start = Instant::now();
        let mut feed = SensorFeed::new(NodeId(2), &config, start).unwrap();

        feed.refresh(start + Duration::from_millis(20));
        assert!(!feed.is_finished());

        feed.refresh(start + Duration::from_millis(40));
        assert_eq!(feed.overflowed(), 2);
        assert_eq!(feed.pop().map(|r| r.sequence), Some(1));
        assert_eq!(feed.pop().map(|r| r.sequence), Some(2));
        assert!(!feed.has_pending());
        assert!(feed.is_finished());
    }

    #[test]
    fn test_config_validation() {
        assert!(GeneratorConfig::default().validate().is_ok());

        let config = GeneratorConfig { payload_std_dev: -1.0, ..GeneratorConfig::default() };
        assert!(matches!(config.validate(), Err(Error::Config(_))));

        let config = GeneratorConfig { payload_std_dev: f64::NAN, ..GeneratorConfig::default() };
        assert!(matches!(config.validate(), Err(Error::Config(_))));

        let config = GeneratorConfig { payload_std_dev: 0.0, ..GeneratorConfig::default() };
        assert!(config.validate().is_ok());

        let config = GeneratorConfig { period: Duration::ZERO, ..GeneratorConfig::default() };
        assert!(config.validate().is_err());
    }
}
