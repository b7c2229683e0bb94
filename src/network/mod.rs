//! Radio abstraction and backends
//!
//! The protocol only needs two blocking-with-timeout primitives: broadcast
//! one frame, or wait a bounded time for one frame. [`Radio`] captures
//! that contract; [`Medium`] simulates a shared broadcast domain in memory
//! and [`UdpRadio`] carries frames over IPv4 multicast so separate processes
//! can play separate nodes.

mod medium;
mod udp;

pub use self::medium::{Medium, MediumConfig, SimRadio};
pub use self::udp::UdpRadio;

use std::future::Future;
use std::net::Ipv4Addr;
use std::time::Duration;

use bytes::BytesMut;
use serde::{Serialize, Deserialize};

use crate::core::{Result, DEFAULT_MAX_PAYLOAD};

/// A half-duplex packet radio
///
/// Each call transfers exactly one frame or nothing.
pub trait Radio: Send {
    /// Broadcasts one frame
    fn send(&mut self, frame: &[u8]) -> impl Future<Output = Result<()>> + Send;

    /// Waits up to `timeout` for one frame and places it in `buf`
    ///
    /// `buf` is cleared first. Returns the frame length, or 0 on timeout.
    fn receive(
        &mut self,
        buf: &mut BytesMut,
        timeout: Duration,
    ) -> impl Future<Output = Result<usize>> + Send;
}

impl<R: Radio> Radio for &mut R {
    fn send(&mut self, frame: &[u8]) -> impl Future<Output = Result<()>> + Send {
        (**self).send(frame)
    }

    fn receive(
        &mut self,
        buf: &mut BytesMut,
        timeout: Duration,
    ) -> impl Future<Output = Result<usize>> + Send {
        (**self).receive(buf, timeout)
    }
}

/// Radio backend selection
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RadioConfig {
    /// All nodes in one process on an in-memory broadcast medium
    Simulated {
        #[serde(default = "default_max_payload")]
        max_payload: usize,
        #[serde(default)]
        medium: MediumConfig,
    },
    /// One node per process over IPv4 multicast
    Udp {
        #[serde(default = "default_max_payload")]
        max_payload: usize,
        group: Ipv4Addr,
        port: u16,
        #[serde(default = "default_interface")]
        interface: Ipv4Addr,
    },
}

fn default_max_payload() -> usize {
    DEFAULT_MAX_PAYLOAD
}

fn default_interface() -> Ipv4Addr {
    Ipv4Addr::LOCALHOST
}

impl Default for RadioConfig {
    fn default() -> Self {
        RadioConfig::Simulated {
            max_payload: DEFAULT_MAX_PAYLOAD,
            medium: MediumConfig::default(),
        }
    }
}

impl RadioConfig {
    /// Largest frame the radio carries
    pub fn max_payload(&self) -> usize {
        match self {
            RadioConfig::Simulated { max_payload, .. } | RadioConfig::Udp { max_payload, .. } => {
                *max_payload
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_radio_config_serde() {
        let config: RadioConfig = serde_json::from_str(
            r#"{"kind":"udp","group":"239.1.2.3","port":7000}"#,
        )
        .unwrap();

        match config {
            RadioConfig::Udp { group, port, interface, max_payload } => {
                assert_eq!(group, Ipv4Addr::new(239, 1, 2, 3));
                assert_eq!(port, 7000);
                assert_eq!(interface, Ipv4Addr::LOCALHOST);
                assert_eq!(max_payload, DEFAULT_MAX_PAYLOAD);
            }
            _ => panic!("Expected UDP radio config"),
        }

        let config: RadioConfig = serde_json::from_str(r#"{"kind":"simulated"}"#).unwrap();
        assert_eq!(config.max_payload(), DEFAULT_MAX_PAYLOAD);
    }
}
