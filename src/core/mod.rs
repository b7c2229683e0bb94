//! Core types and traits for the slotted collection protocol
//!
//! This module contains the fundamental building blocks used throughout the library.

pub mod error;
pub mod types;
pub mod serde;

pub use self::error::{Error, Result};
pub use self::types::{
    Config,
    NodeId,
    Reading,
};

/// Size of one reading on the wire: source id (2) + sequence (1) + payload (2)
pub const READING_WIRE_SIZE: usize = 5;

/// Size of a sync packet on the wire
pub const SYNC_WIRE_SIZE: usize = 1;

/// Size of the batch header (the `count` byte)
pub const BATCH_HEADER_SIZE: usize = 1;

/// Default maximum radio payload in bytes
pub const DEFAULT_MAX_PAYLOAD: usize = 100;

/// Minimum number of synchronization rounds for a usable two-point fit
pub const MIN_SYNC_ROUNDS: u8 = 3;

/// Largest number of readings that fit into one batch for the given radio payload
pub fn max_batch_capacity(max_payload: usize) -> usize {
    max_payload.saturating_sub(BATCH_HEADER_SIZE) / READING_WIRE_SIZE
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_batch_capacity_from_payload() {
        assert_eq!(max_batch_capacity(DEFAULT_MAX_PAYLOAD), 19);
        assert_eq!(max_batch_capacity(26), 5);
        assert_eq!(max_batch_capacity(0), 0);
    }
}
