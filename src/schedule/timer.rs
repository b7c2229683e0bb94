use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::debug;

use crate::core::{Error, Result};
use crate::sync::Epoch;
use crate::time::{util::micros, NodeClock};

/// Runs `callback` every `period`, first at `start`
///
/// Ticks missed while the runtime was busy are delivered back to back so
/// the callback count always matches elapsed time.
pub fn schedule_periodic<F>(start: Instant, period: Duration, mut callback: F) -> JoinHandle<()>
where
    F: FnMut() + Send + 'static,
{
    tokio::spawn(async move {
        let mut interval = time::interval_at(start, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Burst);
        loop {
            interval.tick().await;
            callback();
        }
    })
}

/// Counters written by the timer callbacks
#[derive(Debug, Default)]
struct TickState {
    /// Epoch ticks seen
    epoch: AtomicU32,
    /// Next slot index
    cursor: AtomicU32,
    /// Slot index of the latest slot tick
    active: AtomicU32,
    /// Slot ticks not yet consumed
    pending: AtomicU32,
    notify: Notify,
}

impl TickState {
    fn on_epoch(&self) {
        self.epoch.fetch_add(1, Ordering::AcqRel);
        self.cursor.store(0, Ordering::Release);
    }

    fn on_slot(&self) {
        let slot = self.cursor.fetch_add(1, Ordering::AcqRel);
        self.active.store(slot, Ordering::Release);
        self.pending.fetch_add(1, Ordering::AcqRel);
        self.notify.notify_one();
    }
}

/// One slot to process
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotTick {
    /// Epoch number, starting at 1
    pub epoch: u32,
    pub slot: u8,
}

/// Phase-locked epoch and slot timers
pub struct SlotClock {
    state: Arc<TickState>,
    slot_count: u8,
    first_epoch: u64,
    starts_at: Instant,
    last: Option<SlotTick>,
    handles: Vec<JoinHandle<()>>,
}

impl SlotClock {
    /// Arms both timers at the first epoch boundary at least one slot away
    pub fn arm(epoch: &Epoch, slot_phase: Duration, clock: &NodeClock) -> Self {
        let lead = micros(epoch.slot_duration) as i64;
        let (first_epoch, boundary) = epoch.next_boundary(clock.now() as i64 + lead);
        let starts_at = clock.instant_at(boundary);

        let state = Arc::new(TickState::default());
        let epoch_state = Arc::clone(&state);
        let slot_state = Arc::clone(&state);

        let handles = vec![
            schedule_periodic(starts_at, epoch.length(), move || epoch_state.on_epoch()),
            schedule_periodic(starts_at + slot_phase, epoch.slot_duration, move || {
                slot_state.on_slot()
            }),
        ];

        debug!(first_epoch, boundary, "slot timers armed");

        SlotClock {
            state,
            slot_count: epoch.slot_count,
            first_epoch,
            starts_at,
            last: None,
            handles,
        }
    }

    /// Index of the first epoch boundary the timers were armed at
    pub fn first_epoch(&self) -> u64 {
        self.first_epoch
    }

    /// Runtime instant of the first epoch tick
    pub fn starts_at(&self) -> Instant {
        self.starts_at
    }

    /// Waits for the next slot tick
    ///
    /// Fails with [`Error::Desync`] if a tick was missed or the two timers
    /// disagree about where in the epoch they are.
    pub async fn next_tick(&mut self) -> Result<SlotTick> {
        while self.state.pending.load(Ordering::Acquire) == 0 {
            self.state.notify.notified().await;
        }

        let pending = self.state.pending.swap(0, Ordering::AcqRel);
        let slot = self.state.active.load(Ordering::Acquire);
        let epoch = self.state.epoch.load(Ordering::Acquire);
        self.check(pending, epoch, slot)
    }

    fn check(&mut self, pending: u32, epoch: u32, slot: u32) -> Result<SlotTick> {
        if pending > 1 {
            return Err(Error::desync(format!("{} slot ticks pending", pending)));
        }
        if slot >= u32::from(self.slot_count) {
            return Err(Error::desync(format!(
                "slot {} past the end of the epoch, epoch tick missed",
                slot
            )));
        }

        let slot = slot as u8;
        let expected = match self.last {
            None => SlotTick { epoch: 1, slot: 0 },
            Some(last) if last.slot + 1 == self.slot_count => SlotTick { epoch: last.epoch + 1, slot: 0 },
            Some(last) => SlotTick { epoch: last.epoch, slot: last.slot + 1 },
        };

        let tick = SlotTick { epoch, slot };
        if tick != expected {
            return Err(Error::desync(format!(
                "expected epoch {} slot {}, timers report epoch {} slot {}",
                expected.epoch, expected.slot, epoch, slot
            )));
        }

        self.last = Some(tick);
        Ok(tick)
    }
}

impl Drop for SlotClock {
    fn drop(&mut self) {
        for handle in &self.handles {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::ClockFit;

    fn epoch(slot_count: u8) -> Epoch {
        let fit = ClockFit { origin: 0.0, slope: 5_000.0 };
        Epoch::from_fit(&fit, slot_count, Duration::from_millis(10)).unwrap()
    }

    fn detached(slot_count: u8) -> SlotClock {
        SlotClock {
            state: Arc::new(TickState::default()),
            slot_count,
            first_epoch: 0,
            starts_at: Instant::now(),
            last: None,
            handles: Vec::new(),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_ticks_follow_epochs() {
        let clock = NodeClock::new(Duration::ZERO);
        let mut slots = SlotClock::arm(&epoch(3), Duration::from_millis(1), &clock);

        // Boundary 0 is less than one slot away, so the first epoch is index 1
        assert_eq!(slots.first_epoch(), 1);
        assert_eq!(slots.starts_at() - Instant::now(), Duration::from_millis(30));

        let mut ticks = Vec::new();
        for _ in 0..7 {
            let tick = slots.next_tick().await.unwrap();
            ticks.push((tick.epoch, tick.slot));
        }
        assert_eq!(ticks, vec![(1, 0), (1, 1), (1, 2), (2, 0), (2, 1), (2, 2), (3, 0)]);
        assert_eq!(
            clock.at(Instant::now()),
            30_000 + 2 * 30_000 + 1_000
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_stalled_loop_desynchronizes() {
        let clock = NodeClock::new(Duration::ZERO);
        let mut slots = SlotClock::arm(&epoch(3), Duration::from_millis(1), &clock);

        slots.next_tick().await.unwrap();
        time::sleep(Duration::from_millis(25)).await;

        assert!(matches!(slots.next_tick().await, Err(Error::Desync(_))));
    }

    #[tokio::test]
    async fn test_missed_epoch_tick_detected() {
        let mut slots = detached(3);
        slots.check(1, 1, 0).unwrap();
        slots.check(1, 1, 1).unwrap();
        slots.check(1, 1, 2).unwrap();

        // Cursor ran on because the epoch tick never reset it
        assert!(matches!(slots.check(1, 1, 3), Err(Error::Desync(_))));
    }

    #[tokio::test]
    async fn test_epoch_counter_mismatch_detected() {
        let mut slots = detached(2);
        slots.check(1, 1, 0).unwrap();
        assert!(matches!(slots.check(1, 2, 1), Err(Error::Desync(_))));

        let mut slots = detached(2);
        slots.check(1, 1, 0).unwrap();
        slots.check(1, 1, 1).unwrap();
        assert!(matches!(slots.check(1, 1, 0), Err(Error::Desync(_))));
    }
}
