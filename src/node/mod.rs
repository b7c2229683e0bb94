//! A complete protocol participant
//!
//! [`Node`] ties the pieces together: it runs the bootstrap flood, turns the
//! fit into an [`Epoch`], and hands over to the [`SlotScheduler`]. Fatal
//! conditions never escape as panics or errors; they end up as a
//! [`NodeExit`] in the returned [`NodeReport`] and the radio goes quiet.

mod counters;

pub use self::counters::{Counter, CounterSnapshot, Counters};

use std::fmt;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::core::{Config, Error, NodeId, Result};
use crate::network::Radio;
use crate::protocol::{ProtocolState, StateInfo};
use crate::readings::SensorFeed;
use crate::schedule::{SchedulerExit, SlotScheduler};
use crate::sink::{Delivery, SinkDrain};
use crate::sync::{Epoch, SyncEngine, SyncRole};
use crate::time::NodeClock;
use crate::topology::TopologyTable;

/// How a node's run ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeExit {
    /// Stop heuristic fired
    Completed,
    /// Cancelled from outside
    Cancelled,
    /// Configured epoch limit reached
    EpochLimit,
    /// No usable clock fit; the node never entered the slotted phase
    BootstrapFailed(String),
    /// Slot timing was lost
    Desynchronized(String),
    /// The radio failed
    RadioFailure(String),
    /// Any other internal fault
    Failed(String),
}

impl NodeExit {
    pub fn is_fatal(&self) -> bool {
        !matches!(self, NodeExit::Completed | NodeExit::Cancelled | NodeExit::EpochLimit)
    }
}

impl From<SchedulerExit> for NodeExit {
    fn from(exit: SchedulerExit) -> Self {
        match exit {
            SchedulerExit::Completed => NodeExit::Completed,
            SchedulerExit::Cancelled => NodeExit::Cancelled,
            SchedulerExit::EpochLimit => NodeExit::EpochLimit,
        }
    }
}

impl From<Error> for NodeExit {
    fn from(err: Error) -> Self {
        let reason = err.to_string();
        match err {
            Error::Bootstrap(_) => NodeExit::BootstrapFailed(reason),
            Error::Desync(_) => NodeExit::Desynchronized(reason),
            Error::Radio(_) | Error::Io(_) => NodeExit::RadioFailure(reason),
            _ => NodeExit::Failed(reason),
        }
    }
}

impl fmt::Display for NodeExit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeExit::Completed => write!(f, "completed"),
            NodeExit::Cancelled => write!(f, "cancelled"),
            NodeExit::EpochLimit => write!(f, "epoch limit reached"),
            NodeExit::BootstrapFailed(reason)
            | NodeExit::Desynchronized(reason)
            | NodeExit::RadioFailure(reason)
            | NodeExit::Failed(reason) => write!(f, "{}", reason),
        }
    }
}

/// Outcome of one node's run
#[derive(Debug, Clone)]
pub struct NodeReport {
    pub node: NodeId,
    pub exit: NodeExit,
    /// Final protocol state
    pub state: StateInfo,
    /// Epochs fully processed in the slotted phase
    pub epochs: u32,
    pub counters: CounterSnapshot,
}

/// One protocol participant
pub struct Node<R> {
    id: NodeId,
    config: Config,
    topology: Arc<TopologyTable>,
    radio: R,
    clock: NodeClock,
    counters: Arc<Counters>,
    cancel: CancellationToken,
    exporter: Option<mpsc::UnboundedSender<Delivery>>,
    state: ProtocolState,
}

impl<R: Radio> Node<R> {
    /// Creates a node; `id` must own a slot in `topology`
    pub fn new(
        id: NodeId,
        config: Config,
        topology: Arc<TopologyTable>,
        radio: R,
        clock: NodeClock,
    ) -> Result<Self> {
        if topology.slot_of(id).is_none() {
            return Err(Error::topology(format!("node {} owns no slot", id)));
        }

        Ok(Node {
            id,
            config,
            topology,
            radio,
            clock,
            counters: Arc::new(Counters::new()),
            cancel: CancellationToken::new(),
            exporter: None,
            state: ProtocolState::new(),
        })
    }

    /// Stops the node when `cancel` fires
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Sends every reading the sink delivers to `exporter`
    pub fn with_exporter(mut self, exporter: mpsc::UnboundedSender<Delivery>) -> Self {
        self.exporter = Some(exporter);
        self
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    /// Counters that stay readable while the node runs
    pub fn counters(&self) -> Arc<Counters> {
        Arc::clone(&self.counters)
    }

    /// Runs bootstrap and the slotted phase to the end
    pub async fn run(mut self) -> NodeReport {
        let mut epochs = 0;
        let exit = match self.run_inner(&mut epochs).await {
            Ok(exit) => {
                info!(node = %self.id, %exit, "node stopped");
                exit
            }
            Err(err) => {
                error!(node = %self.id, error = %err, fatal = err.is_fatal(), "node halted");
                self.state.halt(err.to_string());
                NodeExit::from(err)
            }
        };

        NodeReport {
            node: self.id,
            exit,
            state: self.state.get_state_info(),
            epochs,
            counters: self.counters.snapshot(),
        }
    }

    async fn run_inner(&mut self, epochs: &mut u32) -> Result<NodeExit> {
        let feed = SensorFeed::new(self.id, &self.config.generator, Instant::now())?;

        let role = if self.topology.is_sink(self.id) {
            SyncRole::Initiator
        } else {
            SyncRole::Forwarder
        };
        let mut engine = SyncEngine::new(self.id, self.config.sync.clone(), role);

        let fit = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return Ok(NodeExit::Cancelled),
            fit = engine.run(&mut self.radio, &self.clock) => fit?,
        };

        let schedule = &self.config.schedule;
        let epoch = Epoch::from_fit(&fit, schedule.slot_count, schedule.slot_duration)?;

        let sink = self.topology.is_sink(self.id).then(|| {
            let drain = SinkDrain::new(self.config.sink.clone(), Arc::clone(&self.counters));
            match self.exporter.take() {
                Some(exporter) => drain.with_exporter(exporter),
                None => drain,
            }
        });

        let mut scheduler = SlotScheduler::new(
            self.id,
            schedule.clone(),
            Arc::clone(&self.topology),
            &mut self.radio,
            feed,
            sink,
            Arc::clone(&self.counters),
        )
        .with_cancellation(self.cancel.clone());

        let result = scheduler.run(&epoch, &self.clock, &mut self.state).await;
        *epochs = scheduler.epochs();
        result.map(NodeExit::from)
    }
}
