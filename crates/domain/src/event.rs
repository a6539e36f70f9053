//! State change — an immutable record of an entity moving to a new state.

use serde::{Deserialize, Serialize};

use crate::entity::EntityState;
use crate::id::EntityId;
use crate::time::{Timestamp, now};

/// A single state-change notification delivered by the home bus.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateChange {
    pub entity_id: EntityId,
    /// The previous state, when the source knows it.
    pub old_state: Option<EntityState>,
    pub new_state: EntityState,
    pub timestamp: Timestamp,
}

impl StateChange {
    /// Build a change stamped with the current time.
    #[must_use]
    pub fn new(entity_id: EntityId, old_state: Option<EntityState>, new_state: EntityState) -> Self {
        Self {
            entity_id,
            old_state,
            new_state,
            timestamp: now(),
        }
    }

    /// Whether the state value stayed the same (attribute-only update).
    #[must_use]
    pub fn is_unchanged(&self) -> bool {
        self.old_state.as_ref() == Some(&self.new_state)
    }
}
