//! Lux gate — keeps lights off when the room is already bright enough.

use crate::entity::EntityState;
use crate::id::EntityId;

/// Threshold the ambient light is compared against.
#[derive(Debug, Clone, PartialEq)]
pub enum LuxLimit {
    Fixed(f64),
    /// Read the limit from a numeric entity (e.g. an `input_number`).
    Entity(EntityId),
}

/// Optional guard evaluated when a room becomes active.
#[derive(Debug, Clone, PartialEq)]
pub struct LuxGate {
    pub sensor: EntityId,
    pub limit: LuxLimit,
}

impl LuxGate {
    /// Decide whether lights may be turned on.
    ///
    /// Unreadable values never block: the room is assumed to be dark.
    #[must_use]
    pub fn allows_turn_on(reading: &EntityState, limit: Option<f64>) -> bool {
        match (reading.as_number(), limit) {
            (Some(lux), Some(limit)) => lux < limit,
            _ => true,
        }
    }
}
