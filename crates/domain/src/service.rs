//! Service — a command the lighting core sends to a control entity.

use serde::{Deserialize, Serialize};

use crate::entity::EntityState;

/// Light services issued by a room.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LightService {
    TurnOn,
    TurnOff,
}

impl LightService {
    /// The state the target is expected to report once the call succeeded.
    #[must_use]
    pub fn target_state(self) -> EntityState {
        match self {
            Self::TurnOn => EntityState::On,
            Self::TurnOff => EntityState::Off,
        }
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::TurnOn => "turn_on",
            Self::TurnOff => "turn_off",
        }
    }
}

impl std::fmt::Display for LightService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
