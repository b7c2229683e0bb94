use bytes::BytesMut;
use tokio::time;
use tokio_util::codec::{Decoder, Encoder};
use tracing::{debug, info, trace};

use crate::core::{NodeId, Result};
use crate::network::Radio;
use crate::protocol::{SyncCodec, SyncPacket};
use crate::time::NodeClock;
use super::{ClockFit, SampleTracker, SyncConfig, SyncSample};

/// Part a node plays in the bootstrap flood
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncRole {
    /// Starts the flood with round 0 (the sink)
    Initiator,
    /// Re-broadcasts every newer round it hears
    Forwarder,
}

/// Runs the bootstrap flood for one node
pub struct SyncEngine {
    node: NodeId,
    config: SyncConfig,
    role: SyncRole,
    tracker: SampleTracker,
    codec: SyncCodec,
}

impl SyncEngine {
    /// Creates a new engine
    pub fn new(node: NodeId, config: SyncConfig, role: SyncRole) -> Self {
        SyncEngine {
            node,
            config,
            role,
            tracker: SampleTracker::default(),
            codec: SyncCodec::new(),
        }
    }

    pub fn role(&self) -> SyncRole {
        self.role
    }

    /// Samples recorded so far
    pub fn tracker(&self) -> &SampleTracker {
        &self.tracker
    }

    /// Exchanges sync packets until the round budget is spent or the flood dies out
    ///
    /// Returns the fitted model of the flood in this node's local time.
    pub async fn run<R: Radio>(&mut self, radio: &mut R, clock: &NodeClock) -> Result<ClockFit> {
        let mut buf = BytesMut::with_capacity(64);
        let mut sent: u8 = 0;
        let mut last_sent: Option<u8> = None;
        let mut joined = false;

        if self.role == SyncRole::Initiator {
            time::sleep(self.config.settle_delay).await;

            let packet = SyncPacket::initial();
            let now = clock.now();
            self.send(radio, packet).await?;
            self.tracker.record(SyncSample { round: packet.round, time: now });

            sent = 1;
            last_sent = Some(packet.round);
            joined = true;
            debug!(node = %self.node, local = now, "sync flood started");
        }

        while sent < self.config.rounds {
            let timeout = if joined {
                self.config.round_timeout
            } else {
                self.config.join_timeout
            };

            let len = radio.receive(&mut buf, timeout).await?;
            let received_at = clock.now();
            if len == 0 {
                debug!(node = %self.node, joined, sent, "sync wait timed out");
                break;
            }

            let packet = match self.codec.decode(&mut buf) {
                Ok(Some(packet)) => packet,
                Ok(None) | Err(_) => {
                    trace!(node = %self.node, len, "ignoring non-sync frame");
                    continue;
                }
            };

            if last_sent.map_or(false, |last| packet.round <= last) {
                trace!(node = %self.node, round = packet.round, "stale sync round");
                continue;
            }

            joined = true;
            self.tracker.record(SyncSample { round: packet.round, time: received_at });
            trace!(node = %self.node, round = packet.round, local = received_at, "sync round received");

            let Some(next) = packet.next() else {
                break;
            };

            time::sleep(self.config.guard_delay).await;
            self.send(radio, next).await?;
            sent += 1;
            last_sent = Some(next.round);
        }

        let fit = self.tracker.fit()?;
        info!(
            node = %self.node,
            origin = fit.origin,
            slope = fit.slope,
            rounds = sent,
            "clock synchronized"
        );
        Ok(fit)
    }

    async fn send<R: Radio>(&mut self, radio: &mut R, packet: SyncPacket) -> Result<()> {
        let mut frame = BytesMut::with_capacity(crate::core::SYNC_WIRE_SIZE);
        self.codec.encode(packet, &mut frame)?;
        radio.send(&frame).await
    }
}
