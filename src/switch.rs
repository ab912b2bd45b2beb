use crate::slots::Slot;
#[cfg(feature = "defmt")]
use defmt::trace;

/// Delay between a switch request and loading the new slot.
pub const DEFAULT_SWITCH_DELAY_MS: u64 = 200;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
struct PendingSwitch {
    slot: Slot,
    due_ms: u64,
}

/// A cancellable, delayed slot switch.
///
/// Only one switch can be pending. Scheduling a new one replaces the outstanding request, so
/// rapid button presses settle on the last selected slot instead of loading every slot in between.
#[derive(Debug, Clone)]
pub struct SlotSwitcher {
    delay_ms: u64,
    pending: Option<PendingSwitch>,
}

impl SlotSwitcher {
    pub fn new(delay_ms: u64) -> Self {
        Self {
            delay_ms,
            pending: None,
        }
    }

    /// Schedules a switch to `slot`. Returns the slot of the request that got superseded, if any.
    pub fn schedule(&mut self, slot: Slot, now_ms: u64) -> Option<Slot> {
        #[cfg(feature = "defmt")]
        trace!("schedule: {} at {}", slot, now_ms);

        let superseded = self.cancel();
        self.pending = Some(PendingSwitch {
            slot,
            due_ms: now_ms.saturating_add(self.delay_ms),
        });
        superseded
    }

    /// Drops the pending switch and returns its target.
    pub fn cancel(&mut self) -> Option<Slot> {
        self.pending.take().map(|pending| pending.slot)
    }

    /// Target of the pending switch.
    pub fn target(&self) -> Option<Slot> {
        self.pending.map(|pending| pending.slot)
    }

    pub fn is_pending(&self) -> bool {
        self.pending.is_some()
    }

    /// Returns the target once the delay has elapsed. The switch is consumed by this.
    pub fn poll(&mut self, now_ms: u64) -> Option<Slot> {
        match self.pending {
            Some(pending) if now_ms >= pending.due_ms => {
                self.pending = None;
                Some(pending.slot)
            }
            _ => None,
        }
    }
}

impl Default for SlotSwitcher {
    fn default() -> Self {
        Self::new(DEFAULT_SWITCH_DELAY_MS)
    }
}
