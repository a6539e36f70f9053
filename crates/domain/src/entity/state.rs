//! Entity state — the current value reported for an entity.

use serde::{Deserialize, Serialize};

/// Value of an entity as reported by the home bus.
///
/// Binary sensors, switches and lights report `on`/`off`. Select-like
/// entities (such as the house mode) report arbitrary text.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum EntityState {
    On,
    Off,
    #[default]
    Unknown,
    Unavailable,
    Text(String),
}

impl EntityState {
    /// Parse a raw state string. Unrecognised values become [`Text`](Self::Text).
    #[must_use]
    pub fn parse(raw: &str) -> Self {
        match raw {
            "on" => Self::On,
            "off" => Self::Off,
            "unknown" | "" => Self::Unknown,
            "unavailable" => Self::Unavailable,
            other => Self::Text(other.to_string()),
        }
    }

    #[must_use]
    pub fn is_on(&self) -> bool {
        matches!(self, Self::On)
    }

    /// Whether this is a binary `on`/`off` value.
    #[must_use]
    pub fn is_binary(&self) -> bool {
        matches!(self, Self::On | Self::Off)
    }

    /// Interpret a textual state as a number (e.g. a lux reading).
    #[must_use]
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Self::Text(text) => text.trim().parse().ok(),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::On => "on",
            Self::Off => "off",
            Self::Unknown => "unknown",
            Self::Unavailable => "unavailable",
            Self::Text(text) => text,
        }
    }
}

impl From<String> for EntityState {
    fn from(raw: String) -> Self {
        Self::parse(&raw)
    }
}

impl From<&str> for EntityState {
    fn from(raw: &str) -> Self {
        Self::parse(raw)
    }
}

impl From<EntityState> for String {
    fn from(state: EntityState) -> Self {
        match state {
            EntityState::Text(text) => text,
            other => other.as_str().to_string(),
        }
    }
}

impl From<bool> for EntityState {
    fn from(on: bool) -> Self {
        if on { Self::On } else { Self::Off }
    }
}

impl std::fmt::Display for EntityState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
