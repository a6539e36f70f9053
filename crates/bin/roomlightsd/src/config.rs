//! Configuration loading — TOML file with environment variable overrides.
//!
//! Looks for `roomlights.toml` in the working directory, or the file named
//! by `ROOMLIGHTS_CONFIG`. Every section has a default so the file is
//! optional. Environment variables take precedence over file values.

use std::collections::HashSet;
use std::time::Duration;

use serde::Deserialize;

use roomlights_domain::error::RoomLightsError;
use roomlights_domain::id::EntityId;
use roomlights_domain::room::{LuxGate, LuxLimit, RoomConfig};

const DEFAULT_PATH: &str = "roomlights.toml";

/// Top-level configuration.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Logging settings.
    pub logging: LoggingConfig,
    /// Virtual home settings.
    pub demo: DemoConfig,
    /// One entry per managed room.
    pub rooms: Vec<RoomSection>,
}

/// Logging configuration.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Filter directive (`RUST_LOG` syntax).
    pub filter: String,
}

/// Initial state of the virtual home.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct DemoConfig {
    /// Value every house-mode entity starts with.
    pub house_mode: String,
}

/// A `[[rooms]]` table.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RoomSection {
    pub name: String,
    pub presence_entity: EntityId,
    #[serde(default)]
    pub keep_alive_entity: Option<EntityId>,
    #[serde(default)]
    pub enabled_switch_entity: Option<EntityId>,
    pub house_mode_entity: EntityId,
    #[serde(default = "default_night_mode_states")]
    pub night_mode_states: Vec<String>,
    pub control_entities: Vec<EntityId>,
    pub night_control_entities: Vec<EntityId>,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
    /// Falls back to `timeout_secs`.
    #[serde(default)]
    pub night_timeout_secs: Option<u64>,
    #[serde(default)]
    pub override_timeout_secs: Option<u64>,
    #[serde(default)]
    pub lux: Option<LuxSection>,
}

/// Optional `[rooms.lux]` table. Exactly one of `limit` and
/// `limit_entity` must be set.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LuxSection {
    pub sensor: EntityId,
    #[serde(default)]
    pub limit: Option<f64>,
    #[serde(default)]
    pub limit_entity: Option<EntityId>,
}

fn default_night_mode_states() -> Vec<String> {
    vec!["night".to_string()]
}

impl Config {
    /// Load configuration from `roomlights.toml` (or `ROOMLIGHTS_CONFIG`)
    /// then apply environment-variable overrides.
    ///
    /// # Errors
    ///
    /// Returns an error if the TOML file exists but is malformed, or if a
    /// room section does not describe a valid room.
    pub fn load() -> Result<Self, ConfigError> {
        let path = std::env::var("ROOMLIGHTS_CONFIG").unwrap_or_else(|_| DEFAULT_PATH.to_string());
        let mut config = Self::from_file(&path)?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    fn from_file(path: &str) -> Result<Self, ConfigError> {
        match std::fs::read_to_string(path) {
            Ok(content) => toml::from_str(&content).map_err(ConfigError::Parse),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(err) => Err(ConfigError::Io(err)),
        }
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(val) = std::env::var("ROOMLIGHTS_LOG") {
            self.logging.filter = val;
        }
        if let Ok(val) = std::env::var("RUST_LOG") {
            self.logging.filter = val;
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let mut names = HashSet::new();
        for room in &self.rooms {
            if !names.insert(room.name.as_str()) {
                return Err(ConfigError::Validation(format!(
                    "duplicate room name {:?}",
                    room.name
                )));
            }
        }
        self.room_configs().map(|_| ())
    }

    /// Build the domain configuration of every room.
    ///
    /// # Errors
    ///
    /// Returns the first room that fails to build.
    pub fn room_configs(&self) -> Result<Vec<RoomConfig>, ConfigError> {
        self.rooms.iter().map(RoomSection::to_room_config).collect()
    }
}

impl RoomSection {
    /// Convert this table into a validated [`RoomConfig`].
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Validation`] for an ambiguous lux limit and
    /// [`ConfigError::Room`] when the room itself is invalid.
    pub fn to_room_config(&self) -> Result<RoomConfig, ConfigError> {
        let mut builder = RoomConfig::builder()
            .name(self.name.clone())
            .presence_entity(self.presence_entity.clone())
            .house_mode_entity(self.house_mode_entity.clone());

        if let Some(entity_id) = &self.keep_alive_entity {
            builder = builder.keep_alive_entity(entity_id.clone());
        }
        if let Some(entity_id) = &self.enabled_switch_entity {
            builder = builder.enabled_switch_entity(entity_id.clone());
        }
        for state in &self.night_mode_states {
            builder = builder.night_mode_state(state.clone());
        }
        for entity_id in &self.control_entities {
            builder = builder.control_entity(entity_id.clone());
        }
        for entity_id in &self.night_control_entities {
            builder = builder.night_control_entity(entity_id.clone());
        }
        if let Some(secs) = self.timeout_secs {
            builder = builder.timeout(Duration::from_secs(secs));
        }
        if let Some(secs) = self.night_timeout_secs {
            builder = builder.night_timeout(Duration::from_secs(secs));
        }
        if let Some(secs) = self.override_timeout_secs {
            builder = builder.override_timeout(Duration::from_secs(secs));
        }
        if let Some(lux) = &self.lux {
            builder = builder.lux_gate(lux.to_gate(&self.name)?);
        }

        builder.build().map_err(|source| ConfigError::Room {
            room: self.name.clone(),
            source,
        })
    }
}

impl LuxSection {
    fn to_gate(&self, room: &str) -> Result<LuxGate, ConfigError> {
        let limit = match (self.limit, &self.limit_entity) {
            (Some(limit), None) => LuxLimit::Fixed(limit),
            (None, Some(entity_id)) => LuxLimit::Entity(entity_id.clone()),
            _ => {
                return Err(ConfigError::Validation(format!(
                    "room {room:?}: lux needs exactly one of limit and limit_entity"
                )));
            }
        };
        Ok(LuxGate {
            sensor: self.sensor.clone(),
            limit,
        })
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: "roomlightsd=info,roomlights_app=info,roomlights_adapter_virtual=info"
                .to_string(),
        }
    }
}

impl Default for DemoConfig {
    fn default() -> Self {
        Self {
            house_mode: "day".to_string(),
        }
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// TOML parse failure.
    #[error("failed to parse config file")]
    Parse(#[from] toml::de::Error),
    /// File I/O failure.
    #[error("failed to read config file")]
    Io(#[from] std::io::Error),
    /// Semantic validation failure.
    #[error("invalid configuration: {0}")]
    Validation(String),
    /// A room section that does not describe a valid room.
    #[error("invalid room {room:?}")]
    Room {
        room: String,
        #[source]
        source: RoomLightsError,
    },
}
