//! Room — the static description of one room's entities and timings.
//!
//! A [`RoomConfig`] names the sensors and switches a room listens to, the
//! lights it drives during the day and at night, and how long it waits
//! before switching them off again.

mod lux;

pub use lux::{LuxGate, LuxLimit};

use std::collections::BTreeSet;
use std::time::Duration;

use crate::entity::EntityState;
use crate::error::{RoomLightsError, ValidationError};
use crate::id::EntityId;
use crate::mode::Period;

/// Delay before lights go off once the room is vacant.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(300);
/// Delay before a manual override is reverted.
pub const DEFAULT_OVERRIDE_TIMEOUT: Duration = Duration::from_secs(600);

/// Immutable configuration of one room.
#[derive(Debug, Clone, PartialEq)]
pub struct RoomConfig {
    pub name: String,
    pub presence_entity: EntityId,
    pub keep_alive_entity: Option<EntityId>,
    /// When absent the room is always enabled.
    pub enabled_switch_entity: Option<EntityId>,
    pub house_mode_entity: EntityId,
    /// House-mode values counted as night.
    pub night_mode_states: BTreeSet<String>,
    pub control_entities: Vec<EntityId>,
    pub night_control_entities: Vec<EntityId>,
    pub timeout: Duration,
    pub night_timeout: Duration,
    pub override_timeout: Duration,
    pub lux_gate: Option<LuxGate>,
}

impl RoomConfig {
    /// Create a builder for constructing a [`RoomConfig`].
    #[must_use]
    pub fn builder() -> RoomConfigBuilder {
        RoomConfigBuilder::default()
    }

    /// Check domain invariants.
    ///
    /// # Errors
    ///
    /// Returns [`RoomLightsError::Validation`] when:
    /// - `name` is empty ([`ValidationError::EmptyName`])
    /// - a control list is empty ([`ValidationError::EmptyControlEntities`])
    /// - a trigger entity is also a control entity, or fills two trigger roles
    ///   ([`ValidationError::ConflictingRole`])
    pub fn validate(&self) -> Result<(), RoomLightsError> {
        if self.name.trim().is_empty() {
            return Err(ValidationError::EmptyName.into());
        }
        if self.control_entities.is_empty() {
            return Err(ValidationError::EmptyControlEntities(Period::Day).into());
        }
        if self.night_control_entities.is_empty() {
            return Err(ValidationError::EmptyControlEntities(Period::Night).into());
        }
        let triggers = std::iter::once(&self.presence_entity)
            .chain(self.keep_alive_entity.as_ref())
            .chain(self.enabled_switch_entity.as_ref())
            .chain(std::iter::once(&self.house_mode_entity));
        let mut seen = BTreeSet::new();
        for trigger in triggers {
            if self.is_control_entity(trigger) || !seen.insert(trigger) {
                return Err(ValidationError::ConflictingRole(trigger.clone()).into());
            }
        }
        Ok(())
    }

    /// The lights driven during `period`.
    #[must_use]
    pub fn control_entities_for(&self, period: Period) -> &[EntityId] {
        match period {
            Period::Day => &self.control_entities,
            Period::Night => &self.night_control_entities,
        }
    }

    /// The vacancy delay used during `period`.
    #[must_use]
    pub fn timeout_for(&self, period: Period) -> Duration {
        match period {
            Period::Day => self.timeout,
            Period::Night => self.night_timeout,
        }
    }

    /// Whether `entity_id` appears in either control list.
    #[must_use]
    pub fn is_control_entity(&self, entity_id: &EntityId) -> bool {
        self.control_entities.contains(entity_id) || self.night_control_entities.contains(entity_id)
    }

    #[must_use]
    pub fn period_for(&self, house_mode: &EntityState) -> Period {
        Period::from_house_mode(house_mode, &self.night_mode_states)
    }

    /// Every entity whose changes the room must observe, without duplicates.
    ///
    /// Trigger entities come first, followed by day then night lights.
    #[must_use]
    pub fn subscribed_entities(&self) -> Vec<EntityId> {
        let mut seen = BTreeSet::new();
        std::iter::once(&self.presence_entity)
            .chain(self.keep_alive_entity.as_ref())
            .chain(self.enabled_switch_entity.as_ref())
            .chain(std::iter::once(&self.house_mode_entity))
            .chain(&self.control_entities)
            .chain(&self.night_control_entities)
            .filter(|id| seen.insert((*id).clone()))
            .cloned()
            .collect()
    }
}

/// Step-by-step builder for [`RoomConfig`].
#[derive(Debug, Default)]
pub struct RoomConfigBuilder {
    name: Option<String>,
    presence_entity: Option<EntityId>,
    keep_alive_entity: Option<EntityId>,
    enabled_switch_entity: Option<EntityId>,
    house_mode_entity: Option<EntityId>,
    night_mode_states: BTreeSet<String>,
    control_entities: Vec<EntityId>,
    night_control_entities: Vec<EntityId>,
    timeout: Option<Duration>,
    night_timeout: Option<Duration>,
    override_timeout: Option<Duration>,
    lux_gate: Option<LuxGate>,
}

impl RoomConfigBuilder {
    #[must_use]
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    #[must_use]
    pub fn presence_entity(mut self, id: EntityId) -> Self {
        self.presence_entity = Some(id);
        self
    }

    #[must_use]
    pub fn keep_alive_entity(mut self, id: EntityId) -> Self {
        self.keep_alive_entity = Some(id);
        self
    }

    #[must_use]
    pub fn enabled_switch_entity(mut self, id: EntityId) -> Self {
        self.enabled_switch_entity = Some(id);
        self
    }

    #[must_use]
    pub fn house_mode_entity(mut self, id: EntityId) -> Self {
        self.house_mode_entity = Some(id);
        self
    }

    #[must_use]
    pub fn night_mode_state(mut self, state: impl Into<String>) -> Self {
        self.night_mode_states.insert(state.into());
        self
    }

    #[must_use]
    pub fn control_entity(mut self, id: EntityId) -> Self {
        self.control_entities.push(id);
        self
    }

    #[must_use]
    pub fn night_control_entity(mut self, id: EntityId) -> Self {
        self.night_control_entities.push(id);
        self
    }

    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    #[must_use]
    pub fn night_timeout(mut self, timeout: Duration) -> Self {
        self.night_timeout = Some(timeout);
        self
    }

    #[must_use]
    pub fn override_timeout(mut self, timeout: Duration) -> Self {
        self.override_timeout = Some(timeout);
        self
    }

    #[must_use]
    pub fn lux_gate(mut self, gate: LuxGate) -> Self {
        self.lux_gate = Some(gate);
        self
    }

    /// Consume the builder, validate, and return a [`RoomConfig`].
    ///
    /// The night timeout defaults to the day timeout.
    ///
    /// # Errors
    ///
    /// Returns [`RoomLightsError::Validation`] if a required entity is
    /// missing or an invariant of [`RoomConfig::validate`] fails.
    pub fn build(self) -> Result<RoomConfig, RoomLightsError> {
        let presence_entity = self
            .presence_entity
            .ok_or(ValidationError::MissingEntity("presence_entity"))?;
        let house_mode_entity = self
            .house_mode_entity
            .ok_or(ValidationError::MissingEntity("house_mode_entity"))?;
        let timeout = self.timeout.unwrap_or(DEFAULT_TIMEOUT);
        let config = RoomConfig {
            name: self.name.unwrap_or_default(),
            presence_entity,
            keep_alive_entity: self.keep_alive_entity,
            enabled_switch_entity: self.enabled_switch_entity,
            house_mode_entity,
            night_mode_states: self.night_mode_states,
            control_entities: self.control_entities,
            night_control_entities: self.night_control_entities,
            timeout,
            night_timeout: self.night_timeout.unwrap_or(timeout),
            override_timeout: self.override_timeout.unwrap_or(DEFAULT_OVERRIDE_TIMEOUT),
            lux_gate: self.lux_gate,
        };
        config.validate()?;
        Ok(config)
    }
}
