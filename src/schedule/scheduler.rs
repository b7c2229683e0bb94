use std::sync::Arc;

use bytes::BytesMut;
use tokio::time::{self, Instant};
use tokio_util::codec::{Decoder, Encoder};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace};

use crate::aggregate::Aggregator;
use crate::core::{NodeId, Result};
use crate::network::Radio;
use crate::node::{Counter, Counters};
use crate::protocol::{BatchCodec, BatchPacket, ProtocolState};
use crate::readings::ReadingSource;
use crate::sink::{Offer, SinkDrain, StopCounter};
use crate::sync::Epoch;
use crate::time::NodeClock;
use crate::topology::{Role, TopologyTable};
use super::{ScheduleConfig, SlotClock, SlotTick};

/// Why the slotted phase ended without an error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerExit {
    /// Local readings exhausted and no data moved for the configured number of epochs
    Completed,
    /// Stopped from outside
    Cancelled,
    /// Ran the configured maximum number of epochs
    EpochLimit,
}

/// Per-node TDMA state machine
pub struct SlotScheduler<R, S> {
    node: NodeId,
    config: ScheduleConfig,
    topology: Arc<TopologyTable>,
    radio: R,
    source: S,
    aggregator: Aggregator,
    codec: BatchCodec,
    sink: Option<SinkDrain>,
    counters: Arc<Counters>,
    stop: StopCounter,
    cancel: CancellationToken,
    epochs: u32,
    buf: BytesMut,
}

impl<R: Radio, S: ReadingSource> SlotScheduler<R, S> {
    /// Creates a scheduler; `sink` must be given exactly when `node` is the sink
    pub fn new(
        node: NodeId,
        config: ScheduleConfig,
        topology: Arc<TopologyTable>,
        radio: R,
        source: S,
        sink: Option<SinkDrain>,
        counters: Arc<Counters>,
    ) -> Self {
        SlotScheduler {
            node,
            aggregator: Aggregator::new(config.batch_capacity),
            codec: BatchCodec::new(config.batch_capacity),
            stop: StopCounter::new(config.idle_epochs_before_stop),
            config,
            topology,
            radio,
            source,
            sink,
            counters,
            cancel: CancellationToken::new(),
            epochs: 0,
            buf: BytesMut::with_capacity(128),
        }
    }

    /// Stops the scheduler between slots when `cancel` fires
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Epochs fully processed so far
    pub fn epochs(&self) -> u32 {
        self.epochs
    }

    pub fn aggregator(&self) -> &Aggregator {
        &self.aggregator
    }

    /// Runs slots until a stop condition or a fatal error
    pub async fn run(
        &mut self,
        epoch: &Epoch,
        clock: &NodeClock,
        state: &mut ProtocolState,
    ) -> Result<SchedulerExit> {
        state.synced()?;
        let mut slots = SlotClock::arm(epoch, self.config.slot_phase, clock);
        let mut moved: u64 = 0;
        let mut started = false;

        info!(
            node = %self.node,
            slot = ?self.topology.slot_of(self.node),
            active = ?self.topology.active_slots(self.node),
            "entering slotted phase"
        );

        let exit = loop {
            let tick = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break SchedulerExit::Cancelled,
                tick = slots.next_tick() => tick?,
            };

            if tick.slot == 0 {
                if started {
                    self.epochs += 1;
                    // Idle epochs only end the run once local production is over
                    if self.stop.record_epoch(moved) && self.source.is_finished() {
                        info!(node = %self.node, epochs = self.epochs, "no data moved, run complete");
                        break SchedulerExit::Completed;
                    }
                    if self.config.max_epochs.map_or(false, |max| self.epochs >= max) {
                        break SchedulerExit::EpochLimit;
                    }
                }
                started = true;
                moved = 0;
            }

            state.enter_slot(tick.epoch, tick.slot)?;
            moved += self.run_slot(tick).await?;
            state.leave_slot()?;
        };

        if let Some(sink) = self.sink.as_mut() {
            let flushed = sink.flush_all();
            debug!(node = %self.node, flushed, "sink fifo flushed");
        }
        state.stop()?;
        Ok(exit)
    }

    /// Processes one slot; returns the number of readings moved
    async fn run_slot(&mut self, tick: SlotTick) -> Result<u64> {
        self.source.refresh(Instant::now());
        self.counters.raise_to(Counter::QueueOverflow, self.source.overflowed());

        let role = self.topology.role(self.node, tick.slot);
        trace!(node = %self.node, epoch = tick.epoch, slot = tick.slot, %role, "slot");

        match role {
            Role::Sink => self.sink_slot(tick).await,
            Role::Source => self.source_slot(tick).await,
            Role::Relay => self.relay_slot(tick).await,
            Role::Idle => Ok(0),
        }
    }

    async fn source_slot(&mut self, tick: SlotTick) -> Result<u64> {
        // Listeners start receiving at the slot tick
        time::sleep(self.config.tx_offset).await;

        let packed = self.aggregator.pack(&mut self.source);
        let count = packed.batch.count();
        if packed.dropped > 0 {
            self.counters.add(Counter::AggregationDropped, packed.dropped as u64);
            debug!(node = %self.node, dropped = packed.dropped, "batch full, readings dropped");
        }

        self.buf.clear();
        self.codec.encode(&packed.batch, &mut self.buf)?;
        self.radio.send(&self.buf).await?;

        self.counters.incr(Counter::BatchesSent);
        self.counters.add(Counter::ReadingsSent, count as u64);
        debug!(
            node = %self.node,
            epoch = tick.epoch,
            slot = tick.slot,
            count,
            relayed = packed.relayed,
            local = packed.local,
            "batch sent"
        );
        Ok(count as u64)
    }

    async fn relay_slot(&mut self, tick: SlotTick) -> Result<u64> {
        let Some(batch) = self.receive_batch(tick).await? else {
            return Ok(0);
        };

        let outcome = self.aggregator.merge(batch);
        self.counters.add(Counter::AggregationDropped, outcome.dropped as u64);
        Ok(outcome.accepted as u64)
    }

    async fn sink_slot(&mut self, tick: SlotTick) -> Result<u64> {
        let mut moved = 0;

        // The sink's own readings go straight to the drain
        while let Some(reading) = self.source.pop() {
            if self.offer(reading, tick) {
                moved += 1;
            }
        }

        if self.topology.owner(tick.slot) == Some(self.node) {
            if let Some(sink) = self.sink.as_mut() {
                sink.flush();
            }
        } else if self.topology.listens(self.node, tick.slot) {
            if let Some(batch) = self.receive_batch(tick).await? {
                for reading in Aggregator::unpack(batch) {
                    if self.offer(reading, tick) {
                        moved += 1;
                    }
                }
            }
        }

        Ok(moved)
    }

    fn offer(&mut self, reading: crate::core::Reading, tick: SlotTick) -> bool {
        match self.sink.as_mut() {
            Some(sink) => sink.offer(reading, tick.epoch, tick.slot) != Offer::Duplicate,
            None => false,
        }
    }

    async fn receive_batch(&mut self, tick: SlotTick) -> Result<Option<BatchPacket>> {
        let len = self.radio.receive(&mut self.buf, self.config.rx_timeout).await?;
        if len == 0 {
            self.counters.incr(Counter::RxTimeouts);
            trace!(node = %self.node, slot = tick.slot, "nothing received");
            return Ok(None);
        }

        match self.codec.decode(&mut self.buf) {
            Ok(Some(batch)) => {
                self.counters.incr(Counter::BatchesReceived);
                debug!(
                    node = %self.node,
                    epoch = tick.epoch,
                    slot = tick.slot,
                    from = ?self.topology.owner(tick.slot),
                    count = batch.count(),
                    "batch received"
                );
                Ok(Some(batch))
            }
            Ok(None) | Err(_) => {
                self.counters.incr(Counter::DecodeErrors);
                debug!(node = %self.node, slot = tick.slot, len, "undecodable frame");
                Ok(None)
            }
        }
    }
}
