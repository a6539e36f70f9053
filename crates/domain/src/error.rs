//! Common error types used across the workspace.
//!
//! Each layer defines its own typed errors and converts into
//! [`RoomLightsError`] via `#[from]` when crossing a port boundary.

use crate::id::EntityId;
use crate::mode::Period;
use crate::service::LightService;

/// Top-level error for all roomlights operations.
#[derive(Debug, thiserror::Error)]
pub enum RoomLightsError {
    /// A domain invariant was violated.
    #[error("validation error")]
    Validation(#[from] ValidationError),

    /// A light command could not be delivered.
    #[error("command error")]
    Command(#[from] CommandError),

    /// The requested entity does not exist.
    #[error("entity {0} not found")]
    NotFound(EntityId),
}

/// Domain validation failures.
#[derive(Debug, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    /// The string is not a `<domain>.<object_id>` entity id.
    #[error("invalid entity id {0:?}")]
    InvalidEntityId(String),

    /// The room name is empty.
    #[error("name must not be empty")]
    EmptyName,

    /// A required entity was not configured.
    #[error("missing required entity: {0}")]
    MissingEntity(&'static str),

    /// The control list for a period has no entities.
    #[error("{0} control entities must not be empty")]
    EmptyControlEntities(Period),

    /// An entity is configured for more than one role.
    #[error("entity {0} is used for more than one role")]
    ConflictingRole(EntityId),
}

/// Failure to deliver a light command.
#[derive(Debug, PartialEq, Eq, thiserror::Error)]
pub enum CommandError {
    /// The target light did not respond.
    #[error("entity {0} is unreachable")]
    Unreachable(EntityId),

    /// The target refused the command.
    #[error("entity {entity_id} rejected {service}: {reason}")]
    Rejected {
        entity_id: EntityId,
        service: LightService,
        reason: String,
    },
}
