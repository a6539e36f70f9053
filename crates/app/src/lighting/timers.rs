//! Two-slot timer arena: one turn-off timer, one override-revert timer.
//!
//! Every armed timer carries a [`TimerToken`]. When a firing reaches the
//! room's queue its token is checked against the slot; a token that no
//! longer matches belongs to a cancelled or replaced timer and is dropped.

use crate::ports::TimerHandle;

/// Purpose of a room timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimerKind {
    /// Switch lights off once the room stayed vacant long enough.
    TurnOff,
    /// Hand control back to automation after a manual override.
    OverrideRevert,
}

/// Identifies one arming of a timer slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimerToken {
    kind: TimerKind,
    generation: u64,
}

impl TimerToken {
    #[must_use]
    pub fn kind(self) -> TimerKind {
        self.kind
    }
}

#[derive(Debug)]
struct Slot {
    token: TimerToken,
    handle: TimerHandle,
}

#[derive(Debug, Default)]
pub(crate) struct TimerSlots {
    turn_off: Option<Slot>,
    override_revert: Option<Slot>,
    generation: u64,
}

impl TimerSlots {
    fn slot_mut(&mut self, kind: TimerKind) -> &mut Option<Slot> {
        match kind {
            TimerKind::TurnOff => &mut self.turn_off,
            TimerKind::OverrideRevert => &mut self.override_revert,
        }
    }

    pub(crate) fn is_armed(&self, kind: TimerKind) -> bool {
        match kind {
            TimerKind::TurnOff => self.turn_off.is_some(),
            TimerKind::OverrideRevert => self.override_revert.is_some(),
        }
    }

    pub(crate) fn live_count(&self) -> usize {
        usize::from(self.turn_off.is_some()) + usize::from(self.override_revert.is_some())
    }

    pub(crate) fn next_token(&mut self, kind: TimerKind) -> TimerToken {
        self.generation += 1;
        TimerToken {
            kind,
            generation: self.generation,
        }
    }

    /// Store a freshly armed timer, returning the handle it replaced.
    pub(crate) fn store(&mut self, token: TimerToken, handle: TimerHandle) -> Option<TimerHandle> {
        self.slot_mut(token.kind)
            .replace(Slot { token, handle })
            .map(|previous| previous.handle)
    }

    /// Empty a slot so its timer can be cancelled.
    pub(crate) fn take(&mut self, kind: TimerKind) -> Option<TimerHandle> {
        self.slot_mut(kind).take().map(|slot| slot.handle)
    }

    /// Accept a firing. Returns `false` for stale tokens.
    pub(crate) fn claim(&mut self, token: TimerToken) -> bool {
        let slot = self.slot_mut(token.kind);
        if slot.as_ref().is_some_and(|current| current.token == token) {
            *slot = None;
            true
        } else {
            false
        }
    }

    pub(crate) fn take_all(&mut self) -> Vec<TimerHandle> {
        [self.turn_off.take(), self.override_revert.take()]
            .into_iter()
            .flatten()
            .map(|slot| slot.handle)
            .collect()
    }
}
