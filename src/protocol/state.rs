use std::time::Duration;
use tokio::time::Instant;

use crate::core::{Error, Result};

/// Represents the current state of a node in the network
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeState {
    /// Running the clock-sync flood, no epoch yet
    Bootstrapping,

    /// Epoch established, cycling through slots
    Synced {
        /// Epochs completed since the schedule was armed
        epoch: u32,
        /// Slot currently being processed, `None` between slots
        active_slot: Option<u8>,
    },

    /// Scheduler left the slotted phase on an explicit stop condition
    Stopped,
}

/// Protocol state machine for managing node behavior
#[derive(Debug)]
pub struct ProtocolState {
    /// Current state
    state: NodeState,
    /// When the current state was entered
    entered: Instant,
    /// Set once a fatal condition silenced the node
    halted: Option<String>,
}

/// Information about the current protocol state
#[derive(Debug, Clone)]
pub struct StateInfo {
    /// Current state type
    pub state_type: &'static str,
    /// Current epoch (if synced)
    pub epoch: Option<u32>,
    /// Active slot (if inside one)
    pub slot: Option<u8>,
    /// Reason the node went silent, if it did
    pub halted: Option<String>,
    /// Time in current state
    pub time_in_state: Duration,
}

impl Default for ProtocolState {
    fn default() -> Self {
        Self::new()
    }
}

impl ProtocolState {
    /// Creates a new protocol state machine in the bootstrap phase
    pub fn new() -> Self {
        ProtocolState {
            state: NodeState::Bootstrapping,
            entered: Instant::now(),
            halted: None,
        }
    }

    pub fn state(&self) -> &NodeState {
        &self.state
    }

    pub fn is_halted(&self) -> bool {
        self.halted.is_some()
    }

    /// Gets information about the current state
    pub fn get_state_info(&self) -> StateInfo {
        let (state_type, epoch, slot) = match &self.state {
            NodeState::Bootstrapping => ("Bootstrapping", None, None),
            NodeState::Synced { epoch, active_slot } => ("Synced", Some(*epoch), *active_slot),
            NodeState::Stopped => ("Stopped", None, None),
        };

        StateInfo {
            state_type,
            epoch,
            slot,
            halted: self.halted.clone(),
            time_in_state: self.entered.elapsed(),
        }
    }

    /// Leaves the bootstrap phase once an epoch exists
    pub fn synced(&mut self) -> Result<()> {
        self.ensure_running()?;
        match self.state {
            NodeState::Bootstrapping => {
                self.transition(NodeState::Synced { epoch: 0, active_slot: None });
                Ok(())
            }
            _ => Err(Error::invalid_state("Can only sync from Bootstrapping state")),
        }
    }

    /// Marks slot `slot` of `epoch` as being processed
    pub fn enter_slot(&mut self, epoch: u32, slot: u8) -> Result<()> {
        self.ensure_running()?;
        match self.state {
            NodeState::Synced { active_slot: None, .. } => {
                self.transition(NodeState::Synced { epoch, active_slot: Some(slot) });
                Ok(())
            }
            NodeState::Synced { active_slot: Some(current), .. } => Err(Error::invalid_state(
                format!("Slot {} entered while slot {} still active", slot, current),
            )),
            _ => Err(Error::invalid_state("Can only enter a slot when synced")),
        }
    }

    /// Returns to idle after a slot finished
    pub fn leave_slot(&mut self) -> Result<()> {
        match self.state {
            NodeState::Synced { epoch, active_slot: Some(_) } => {
                self.transition(NodeState::Synced { epoch, active_slot: None });
                Ok(())
            }
            _ => Err(Error::invalid_state("No active slot to leave")),
        }
    }

    /// Ends the slotted phase
    pub fn stop(&mut self) -> Result<()> {
        match self.state {
            NodeState::Synced { .. } => {
                self.transition(NodeState::Stopped);
                Ok(())
            }
            _ => Err(Error::invalid_state("Can only stop a synced node")),
        }
    }

    /// Silences the node after a fatal condition; the state itself is kept
    pub fn halt(&mut self, reason: impl Into<String>) {
        self.halted = Some(reason.into());
    }

    fn ensure_running(&self) -> Result<()> {
        match &self.halted {
            Some(reason) => Err(Error::invalid_state(format!("Node halted: {}", reason))),
            None => Ok(()),
        }
    }

    fn transition(&mut self, next: NodeState) {
        self.state = next;
        self.entered = Instant::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_slot_cycle() {
        let mut state = ProtocolState::new();
        assert_eq!(state.state(), &NodeState::Bootstrapping);

        state.synced().unwrap();
        state.enter_slot(1, 0).unwrap();
        assert_eq!(
            state.state(),
            &NodeState::Synced { epoch: 1, active_slot: Some(0) }
        );

        state.leave_slot().unwrap();
        state.enter_slot(1, 1).unwrap();
        state.leave_slot().unwrap();
        assert_eq!(
            state.state(),
            &NodeState::Synced { epoch: 1, active_slot: None }
        );

        state.stop().unwrap();
        assert_eq!(state.state(), &NodeState::Stopped);
    }

    #[tokio::test]
    async fn test_invalid_transitions() {
        let mut state = ProtocolState::new();

        // Can't enter a slot before the epoch exists
        assert!(state.enter_slot(1, 0).is_err());
        assert!(state.leave_slot().is_err());
        assert!(state.stop().is_err());

        state.synced().unwrap();
        assert!(state.synced().is_err());

        // Slots never overlap
        state.enter_slot(1, 3).unwrap();
        assert!(state.enter_slot(1, 4).is_err());
    }

    #[tokio::test]
    async fn test_halt_keeps_bootstrapping() {
        let mut state = ProtocolState::new();
        state.halt("no sync packet received");

        assert!(state.is_halted());
        assert_eq!(state.state(), &NodeState::Bootstrapping);
        assert!(state.synced().is_err());
        assert_eq!(state.state(), &NodeState::Bootstrapping);
    }

    #[tokio::test(start_paused = true)]
    async fn test_state_info() {
        let mut state = ProtocolState::new();

        let info = state.get_state_info();
        assert_eq!(info.state_type, "Bootstrapping");
        assert!(info.epoch.is_none());
        assert!(info.halted.is_none());

        state.synced().unwrap();
        state.enter_slot(2, 5).unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;

        let info = state.get_state_info();
        assert_eq!(info.state_type, "Synced");
        assert_eq!(info.epoch, Some(2));
        assert_eq!(info.slot, Some(5));
        assert!(info.time_in_state >= Duration::from_millis(10));
    }
}
