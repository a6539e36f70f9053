//! Tracks the state changes a room expects to see as a result of its own
//! commands, so they are not mistaken for manual overrides.

use std::collections::{HashMap, VecDeque};

use roomlights_domain::entity::EntityState;
use roomlights_domain::id::EntityId;

#[derive(Debug, Default)]
pub(crate) struct EchoTracker {
    pending: HashMap<EntityId, VecDeque<EntityState>>,
}

impl EchoTracker {
    /// Record that a command driving `entity_id` to `state` is about to go out.
    pub(crate) fn expect(&mut self, entity_id: &EntityId, state: EntityState) {
        self.pending
            .entry(entity_id.clone())
            .or_default()
            .push_back(state);
    }

    /// Forget an expectation whose command failed.
    pub(crate) fn withdraw(&mut self, entity_id: &EntityId, state: &EntityState) {
        if let Some(queue) = self.pending.get_mut(entity_id) {
            if let Some(position) = queue.iter().rposition(|expected| expected == state) {
                queue.remove(position);
            }
            if queue.is_empty() {
                self.pending.remove(entity_id);
            }
        }
    }

    /// Match an inbound change against the expectations for its entity.
    ///
    /// Returns `true` when the change is the echo of one of our commands.
    /// Expectations queued before the matching one are dropped with it. A
    /// binary state nobody expected invalidates the entity's queue.
    pub(crate) fn consume(&mut self, entity_id: &EntityId, state: &EntityState) -> bool {
        let Some(queue) = self.pending.get_mut(entity_id) else {
            return false;
        };
        let matched = match queue.iter().position(|expected| expected == state) {
            Some(position) => {
                for _ in 0..=position {
                    queue.pop_front();
                }
                true
            }
            None => {
                if state.is_binary() {
                    queue.clear();
                }
                false
            }
        };
        if queue.is_empty() {
            self.pending.remove(entity_id);
        }
        matched
    }

    #[cfg(test)]
    pub(crate) fn is_pending(&self, entity_id: &EntityId) -> bool {
        self.pending.contains_key(entity_id)
    }

    pub(crate) fn clear(&mut self) {
        self.pending.clear();
    }
}
