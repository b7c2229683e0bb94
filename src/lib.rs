//! slotsync: time-synchronized TDMA data collection for multi-hop sensor networks
//!
//! A sink floods a counter packet to establish a shared epoch without any
//! central clock, then every node follows a fixed slot schedule in which
//! readings are aggregated into bounded batches and relayed hop by hop
//! towards the sink.
//!
//! ```no_run
//! use std::sync::Arc;
//! use slotsync::core::Config;
//! use slotsync::network::{Medium, MediumConfig};
//! use slotsync::node::Node;
//! use slotsync::time::NodeClock;
//!
//! # async fn example() -> slotsync::Result<()> {
//! let config = Config::default();
//! let topology = Arc::new(config.validate()?);
//! let medium = Medium::new(&MediumConfig::default())?;
//!
//! let mut tasks = Vec::new();
//! for &id in topology.nodes() {
//!     let radio = medium.attach(id).await?;
//!     let clock = NodeClock::new(std::time::Duration::ZERO);
//!     let node = Node::new(id, config.clone(), Arc::clone(&topology), radio, clock)?;
//!     tasks.push(tokio::spawn(node.run()));
//! }
//! # Ok(())
//! # }
//! ```

pub mod aggregate;
pub mod core;
pub mod network;
pub mod node;
pub mod protocol;
pub mod readings;
pub mod schedule;
pub mod sink;
pub mod sync;
pub mod time;
pub mod topology;

// Re-export commonly used items
pub use crate::core::{Error, Result};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }
}
