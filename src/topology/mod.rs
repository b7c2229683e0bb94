//! Static node/slot assignment
//!
//! The topology is a plain table handed to every node at startup: which node
//! owns which slot, which node is the sink, and which foreign slots a relay
//! listens in. [`TopologyTable`] validates it once and answers the per-slot
//! role question for the scheduler.

use std::collections::{HashMap, HashSet};
use std::fmt;

use serde::{Serialize, Deserialize};

use crate::core::{Error, NodeId, Result};

/// Foreign slots a node receives in
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListenEntry {
    pub node: NodeId,
    pub slots: Vec<u8>,
}

/// Topology as written in the configuration file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TopologyConfig {
    /// The single data sink
    pub sink: NodeId,
    /// Slot owners, indexed by slot
    pub slots: Vec<NodeId>,
    /// Relay listen lists
    #[serde(default)]
    pub listen: Vec<ListenEntry>,
}

impl TopologyConfig {
    /// The 27-slot reference deployment with sink 22 and relays 3, 28, 31 and 33
    pub fn reference() -> Self {
        let slots = [
            8, 2, 3, 4, 6, 7, 1, 10, 11, 13, 14, 15, 31, 17, 18, 19, 20, 22, 23, 24, 25, 26, 27,
            28, 16, 32, 33,
        ];
        let listen = [
            (3, vec![7, 11]),
            (28, vec![0, 12]),
            (31, vec![25]),
            (33, vec![6, 1, 3]),
        ];

        TopologyConfig {
            sink: NodeId(22),
            slots: slots.iter().copied().map(NodeId).collect(),
            listen: listen
                .into_iter()
                .map(|(node, slots)| ListenEntry { node: NodeId(node), slots })
                .collect(),
        }
    }
}

impl Default for TopologyConfig {
    fn default() -> Self {
        Self::reference()
    }
}

/// What a node does in one slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Role {
    /// Owns the slot and transmits its batch
    Source,
    /// Receives the slot owner's batch for forwarding in its own slot
    Relay,
    /// No radio activity
    Idle,
    /// The data sink
    Sink,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Role::Source => "source",
            Role::Relay => "relay",
            Role::Idle => "idle",
            Role::Sink => "sink",
        };
        f.write_str(name)
    }
}

/// Validated topology
#[derive(Debug, Clone)]
pub struct TopologyTable {
    sink: NodeId,
    slots: Vec<NodeId>,
    own: HashMap<NodeId, u8>,
    listen: HashMap<NodeId, Vec<u8>>,
}

impl TopologyTable {
    /// Validates a topology configuration
    pub fn new(config: &TopologyConfig) -> Result<Self> {
        if config.slots.is_empty() {
            return Err(Error::topology("slot mapping is empty"));
        }
        if config.slots.len() > usize::from(u8::MAX) {
            return Err(Error::topology(format!(
                "{} slots exceed the maximum of {}",
                config.slots.len(),
                u8::MAX
            )));
        }

        let mut own = HashMap::with_capacity(config.slots.len());
        for (slot, &node) in config.slots.iter().enumerate() {
            if let Some(previous) = own.insert(node, slot as u8) {
                return Err(Error::topology(format!(
                    "node {} owns both slot {} and slot {}",
                    node, previous, slot
                )));
            }
        }

        let sink_slot = own.get(&config.sink).copied().ok_or_else(|| {
            Error::topology(format!("sink {} owns no slot", config.sink))
        })?;

        let slot_count = config.slots.len();
        let mut listen: HashMap<NodeId, Vec<u8>> = HashMap::new();
        for entry in &config.listen {
            let own_slot = *own.get(&entry.node).ok_or_else(|| {
                Error::topology(format!("listener {} owns no slot", entry.node))
            })?;

            let slots = listen.entry(entry.node).or_default();
            for &slot in &entry.slots {
                if usize::from(slot) >= slot_count {
                    return Err(Error::topology(format!(
                        "node {} listens in slot {} but only {} slots exist",
                        entry.node, slot, slot_count
                    )));
                }
                if slot == own_slot {
                    return Err(Error::topology(format!(
                        "node {} listens in its own slot {}",
                        entry.node, slot
                    )));
                }
                slots.push(slot);
            }
            slots.sort_unstable();
            slots.dedup();
        }

        // The sink hears everyone unless told otherwise
        listen.entry(config.sink).or_insert_with(|| {
            (0..slot_count as u8).filter(|&slot| slot != sink_slot).collect()
        });

        Ok(TopologyTable {
            sink: config.sink,
            slots: config.slots.clone(),
            own,
            listen,
        })
    }

    pub fn sink(&self) -> NodeId {
        self.sink
    }

    pub fn is_sink(&self, node: NodeId) -> bool {
        node == self.sink
    }

    /// Number of slots per epoch
    pub fn slot_count(&self) -> usize {
        self.slots.len()
    }

    /// All slot owners in slot order
    pub fn nodes(&self) -> &[NodeId] {
        &self.slots
    }

    /// Owner of slot `slot`
    pub fn owner(&self, slot: u8) -> Option<NodeId> {
        self.slots.get(usize::from(slot)).copied()
    }

    /// The slot `node` transmits in
    pub fn slot_of(&self, node: NodeId) -> Option<u8> {
        self.own.get(&node).copied()
    }

    /// Whether `node` receives in `slot`
    pub fn listens(&self, node: NodeId, slot: u8) -> bool {
        self.listen
            .get(&node)
            .map_or(false, |slots| slots.binary_search(&slot).is_ok())
    }

    /// Every slot in which `node` uses its radio, ascending
    pub fn active_slots(&self, node: NodeId) -> Vec<u8> {
        let mut slots = self.listen.get(&node).cloned().unwrap_or_default();
        if let Some(own) = self.slot_of(node) {
            slots.push(own);
        }
        slots.sort_unstable();
        slots
    }

    /// Role of `node` in `slot`
    pub fn role(&self, node: NodeId, slot: u8) -> Role {
        if self.is_sink(node) {
            Role::Sink
        } else if self.owner(slot) == Some(node) {
            Role::Source
        } else if self.listens(node, slot) {
            Role::Relay
        } else {
            Role::Idle
        }
    }

    /// Nodes that receive in at least one foreign slot, sink excluded
    pub fn relays(&self) -> HashSet<NodeId> {
        self.listen
            .iter()
            .filter(|(node, slots)| **node != self.sink && !slots.is_empty())
            .map(|(node, _)| *node)
            .collect()
    }
}
