//! Notifications a running room emits for observers (logs, dashboards,
//! error reporting).

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::id::EntityId;
use crate::mode::{ManagerState, Period};
use crate::service::LightService;

/// Something observable that happened inside a room controller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RoomNotification {
    ModeChanged {
        room: String,
        from: ManagerState,
        to: ManagerState,
    },
    PeriodChanged {
        room: String,
        from: Period,
        to: Period,
    },
    /// A control entity changed without the room asking for it.
    OverrideDetected { room: String, entity_id: EntityId },
    /// Emitted once per detected override, even when an existing revert
    /// timer keeps governing.
    OverrideTimerSet { room: String, delay: Duration },
    TurnOffScheduled { room: String, delay: Duration },
    /// A light command failed; the room carries on as if it succeeded.
    CommandFailed {
        room: String,
        entity_id: EntityId,
        service: LightService,
        error: String,
    },
}

impl RoomNotification {
    /// Name of the room that emitted this notification.
    #[must_use]
    pub fn room(&self) -> &str {
        match self {
            Self::ModeChanged { room, .. }
            | Self::PeriodChanged { room, .. }
            | Self::OverrideDetected { room, .. }
            | Self::OverrideTimerSet { room, .. }
            | Self::TurnOffScheduled { room, .. }
            | Self::CommandFailed { room, .. } => room,
        }
    }
}
