//! Packet aggregation
//!
//! One [`Aggregator`] per node owns the relay buffer: readings received in
//! foreign slots wait there until the node's own slot, where they are packed
//! ahead of the node's local readings into a single bounded [`BatchPacket`].
//! Whatever does not fit is dropped and counted; nothing is retried.

use std::collections::VecDeque;

use tracing::debug;

use crate::core::Reading;
use crate::protocol::BatchPacket;
use crate::readings::ReadingSource;

/// Result of merging a received batch into the relay buffer
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeOutcome {
    /// Readings now buffered for forwarding
    pub accepted: usize,
    /// Readings that did not fit
    pub dropped: usize,
}

/// A batch ready for transmission
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packed {
    pub batch: BatchPacket,
    /// Readings taken from the relay buffer
    pub relayed: usize,
    /// Readings taken from the local source
    pub local: usize,
    /// Readings drained but not packed
    pub dropped: usize,
}

/// Bounded relay buffer plus the pack/unpack policy
#[derive(Debug, Clone)]
pub struct Aggregator {
    capacity: usize,
    relay: VecDeque<Reading>,
    dropped: u64,
}

impl Aggregator {
    /// Creates an aggregator for batches of `capacity` readings
    pub fn new(capacity: usize) -> Self {
        Aggregator {
            capacity,
            relay: VecDeque::with_capacity(capacity),
            dropped: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Readings waiting for the node's own slot
    pub fn buffered(&self) -> usize {
        self.relay.len()
    }

    /// Total readings dropped so far
    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    /// Appends a received batch to the relay buffer in arrival order
    pub fn merge(&mut self, batch: BatchPacket) -> MergeOutcome {
        let mut outcome = MergeOutcome::default();

        for reading in Self::unpack(batch) {
            if self.relay.len() < self.capacity {
                self.relay.push_back(reading);
                outcome.accepted += 1;
            } else {
                outcome.dropped += 1;
            }
        }

        if outcome.dropped > 0 {
            self.dropped += outcome.dropped as u64;
            debug!(dropped = outcome.dropped, "relay buffer full");
        }
        outcome
    }

    /// Builds the batch for the node's own slot
    ///
    /// Buffered relay readings go first, then local readings. The local
    /// source is drained completely; readings past the capacity are dropped.
    pub fn pack<S: ReadingSource>(&mut self, source: &mut S) -> Packed {
        let mut batch = BatchPacket::with_capacity(self.capacity);
        let mut relayed = 0;
        let mut local = 0;
        let mut dropped = 0;

        for reading in self.relay.drain(..) {
            match batch.push(reading) {
                Ok(()) => relayed += 1,
                Err(_) => dropped += 1,
            }
        }

        while let Some(reading) = source.pop() {
            match batch.push(reading) {
                Ok(()) => local += 1,
                Err(_) => dropped += 1,
            }
        }

        self.dropped += dropped as u64;
        Packed { batch, relayed, local, dropped }
    }

    /// Splits a batch back into its readings, in packing order
    pub fn unpack(batch: BatchPacket) -> Vec<Reading> {
        batch.into_readings()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::NodeId;
    use crate::readings::ReadingQueue;

    fn readings(source: u16, count: u8) -> Vec<Reading> {
        (1..=count).map(|seq| Reading::new(NodeId(source), seq, u16::from(seq) * 100)).collect()
    }

    fn queue_of(items: &[Reading]) -> ReadingQueue {
        let mut queue = ReadingQueue::new(100);
        for &reading in items {
            queue.push(reading);
        }
        queue
    }

    #[test]
    fn test_pack_unpack_preserves_order() {
        let mut aggregator = Aggregator::new(5);

        for n in 0..=5u8 {
            let input = readings(9, n);
            let mut queue = queue_of(&input);
            let packed = aggregator.pack(&mut queue);

            assert_eq!(packed.batch.count(), input.len());
            assert_eq!(packed.dropped, 0);
            assert_eq!(Aggregator::unpack(packed.batch), input);
        }
        assert_eq!(aggregator.dropped(), 0);
    }

    #[test]
    fn test_capacity_law() {
        let mut aggregator = Aggregator::new(5);
        let input = readings(9, 12);
        let mut queue = queue_of(&input);

        let packed = aggregator.pack(&mut queue);

        assert_eq!(packed.batch.count(), 5);
        assert_eq!(packed.batch.readings(), &input[..5]);
        assert_eq!(packed.dropped, 7);
        assert_eq!(aggregator.dropped(), 7);
        assert!(!queue.has_pending());
    }

    #[test]
    fn test_full_relay_buffer_wins_over_local() {
        let k = 5;
        let mut aggregator = Aggregator::new(k);

        // Slot 3: a full batch arrives from downstream
        let relayed = readings(4, k as u8);
        let (batch, rest) = BatchPacket::from_readings(k, relayed.clone());
        assert!(rest.is_empty());
        let outcome = aggregator.merge(batch);
        assert_eq!(outcome, MergeOutcome { accepted: k, dropped: 0 });

        // Slot 7: the node's own slot with two local readings pending
        let mut queue = queue_of(&readings(3, 2));
        let packed = aggregator.pack(&mut queue);

        assert_eq!(packed.batch.count(), k);
        assert_eq!(packed.batch.readings(), &relayed[..]);
        assert_eq!(packed.relayed, k);
        assert_eq!(packed.local, 0);
        assert_eq!(packed.dropped, 2);
        assert_eq!(aggregator.dropped(), 2);
        assert_eq!(aggregator.buffered(), 0);
    }

    #[test]
    fn test_local_readings_follow_relay_readings() {
        let mut aggregator = Aggregator::new(5);
        let relayed = readings(4, 2);
        let local = readings(3, 2);

        aggregator.merge(BatchPacket::from_readings(5, relayed.clone()).0);
        let packed = aggregator.pack(&mut queue_of(&local));

        let expected: Vec<_> = relayed.into_iter().chain(local).collect();
        assert_eq!(packed.batch.into_readings(), expected);
    }

    #[test]
    fn test_merge_overflow_dropped() {
        let mut aggregator = Aggregator::new(5);

        aggregator.merge(BatchPacket::from_readings(5, readings(4, 3)).0);
        let outcome = aggregator.merge(BatchPacket::from_readings(5, readings(6, 4)).0);

        assert_eq!(outcome, MergeOutcome { accepted: 2, dropped: 2 });
        assert_eq!(aggregator.buffered(), 5);
        assert_eq!(aggregator.dropped(), 2);
    }
}
