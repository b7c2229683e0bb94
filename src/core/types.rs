use std::fmt;
use std::path::Path;

use serde::{Serialize, Deserialize};

use super::{Error, Result};
use crate::network::RadioConfig;
use crate::readings::GeneratorConfig;
use crate::schedule::ScheduleConfig;
use crate::sink::SinkConfig;
use crate::sync::SyncConfig;
use crate::topology::{TopologyConfig, TopologyTable};

/// Node identifier in the network
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(pub u16);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u16> for NodeId {
    fn from(id: u16) -> Self {
        NodeId(id)
    }
}

/// One sensor reading as it travels towards the sink
///
/// Field order is the wire order; bincode's fixed-width encoding of this
/// struct is exactly [`super::READING_WIRE_SIZE`] bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Reading {
    /// Node that produced the reading
    pub source_id: NodeId,
    /// Per-source sequence number
    pub sequence: u8,
    /// Sensor value
    pub payload: u16,
}

impl Reading {
    /// Creates a new reading
    pub fn new(source_id: NodeId, sequence: u8, payload: u16) -> Self {
        Reading { source_id, sequence, payload }
    }
}

impl fmt::Display for Reading {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{},{}", self.source_id, self.sequence, self.payload)
    }
}

/// Configuration for a slotsync network
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Clock synchronization (bootstrap) settings
    pub sync: SyncConfig,
    /// Slot timing and aggregation settings
    pub schedule: ScheduleConfig,
    /// Local reading generator settings
    pub generator: GeneratorConfig,
    /// Sink drain settings
    pub sink: SinkConfig,
    /// Static node/slot assignment
    pub topology: TopologyConfig,
    /// Radio backend
    pub radio: RadioConfig,
}

impl Config {
    /// Loads a configuration from a TOML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        Self::from_toml(&text)
            .map_err(|e| Error::config(format!("{}: {}", path.display(), e)))
    }

    /// Parses a configuration from TOML text
    pub fn from_toml(text: &str) -> Result<Self> {
        toml::from_str(text).map_err(|e| Error::config(e.to_string()))
    }

    /// Checks all cross-field constraints and builds the topology table
    pub fn validate(&self) -> Result<TopologyTable> {
        self.sync.validate()?;
        self.schedule.validate(self.radio.max_payload())?;
        self.generator.validate()?;
        self.sink.validate()?;

        let idle_window = self.schedule.epoch_length() * self.schedule.idle_epochs_before_stop;
        if idle_window < self.generator.period {
            return Err(Error::config(format!(
                "{} idle epochs of {:?} are shorter than the generator period {:?}",
                self.schedule.idle_epochs_before_stop,
                self.schedule.epoch_length(),
                self.generator.period
            )));
        }

        let topology = TopologyTable::new(&self.topology)?;
        if topology.slot_count() != self.schedule.slot_count as usize {
            return Err(Error::config(format!(
                "schedule has {} slots but topology maps {}",
                self.schedule.slot_count,
                topology.slot_count()
            )));
        }

        Ok(topology)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reading_display() {
        let reading = Reading::new(NodeId(10), 3, 512);
        assert_eq!(reading.to_string(), "10,3,512");
    }

    #[test]
    fn test_reading_wire_size() {
        let reading = Reading::new(NodeId(0x0102), 7, 0xBEEF);
        let encoded = bincode::serialize(&reading).unwrap();
        assert_eq!(encoded.len(), super::super::READING_WIRE_SIZE);
        assert_eq!(encoded, vec![0x02, 0x01, 7, 0xEF, 0xBE]);
    }

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();
        let topology = config.validate().unwrap();
        assert_eq!(topology.sink(), NodeId(22));
        assert_eq!(topology.slot_count(), 27);
    }

    #[test]
    fn test_slot_count_mismatch_rejected() {
        let mut config = Config::default();
        config.schedule.slot_count = 10;
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn test_idle_window_must_cover_generator_period() {
        let mut config = Config::default();
        config.schedule.idle_epochs_before_stop = 1;
        config.generator.period = config.schedule.epoch_length() * 2;
        assert!(matches!(config.validate(), Err(Error::Config(_))));

        config.schedule.idle_epochs_before_stop = 2;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_from_toml() {
        let config = Config::from_toml(
            r#"
            [sync]
            rounds = 6
            guard_delay = 10

            [schedule]
            slot_count = 3
            slot_duration = 50
            batch_capacity = 4

            [generator]
            period = 500

            [topology]
            sink = 1
            slots = [1, 2, 3]

            [[topology.listen]]
            node = 2
            slots = [2]
            "#,
        )
        .unwrap();

        assert_eq!(config.sync.rounds, 6);
        assert_eq!(config.sync.guard_delay, std::time::Duration::from_millis(10));
        assert_eq!(config.schedule.batch_capacity, 4);
        assert_eq!(config.generator.period, std::time::Duration::from_millis(500));
        let topology = config.validate().unwrap();
        assert_eq!(topology.slot_of(NodeId(2)), Some(1));
        assert!(topology.listens(NodeId(2), 2));
    }
}
