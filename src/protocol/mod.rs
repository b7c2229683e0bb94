//! Protocol implementation module
//!
//! This module defines the two packet types that go over the air, their
//! fixed-width encoding, and the per-node protocol state machine.

pub mod codec;
pub mod message;
pub mod state;

pub use self::codec::{BatchCodec, SyncCodec};
pub use self::message::{BatchPacket, SyncPacket};
pub use self::state::{NodeState, ProtocolState, StateInfo};
