//! Lighting modes and day/night periods.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::entity::EntityState;

/// Operating state of a room's lighting controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ManagerState {
    /// Automation switched off by the enabled switch.
    Disabled,
    /// Nobody around, lights are off.
    Idle,
    /// Presence or keep-alive holds the lights on.
    Active,
    /// Someone changed a light by hand; automation waits for the revert timer.
    Override,
}

impl std::fmt::Display for ManagerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Disabled => "disabled",
            Self::Idle => "idle",
            Self::Active => "active",
            Self::Override => "override",
        })
    }
}

/// Which control list is in use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Period {
    #[default]
    Day,
    Night,
}

impl Period {
    /// Derive the period from the house-mode entity.
    ///
    /// Anything that is not one of `night_states` (including unknown or
    /// unavailable values) counts as [`Day`](Self::Day).
    #[must_use]
    pub fn from_house_mode(state: &EntityState, night_states: &BTreeSet<String>) -> Self {
        if night_states.contains(state.as_str()) {
            Self::Night
        } else {
            Self::Day
        }
    }
}

impl std::fmt::Display for Period {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Day => "day",
            Self::Night => "night",
        })
    }
}
