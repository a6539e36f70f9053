//! # roomlights-adapter-virtual
//!
//! Virtual/demo home that stands in for a real home-automation bus.
//!
//! [`VirtualHome`] keeps every entity's state in memory, broadcasts each
//! change to subscribers and applies light commands to its own state, so a
//! command produces the same echo a real bus would send back.
//!
//! ## Dependency rule
//!
//! Depends on `roomlights-app` (port traits) and `roomlights-domain` only.

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::broadcast;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;

use roomlights_app::ports::{CommandSink, EntityEventSource, StateStream};
use roomlights_domain::entity::EntityState;
use roomlights_domain::error::{CommandError, RoomLightsError};
use roomlights_domain::event::StateChange;
use roomlights_domain::id::EntityId;
use roomlights_domain::service::LightService;

const DEFAULT_CAPACITY: usize = 256;

/// Domains that accept light commands.
const SWITCHABLE_DOMAINS: [&str; 2] = ["light", "switch"];

struct Inner {
    states: Mutex<HashMap<EntityId, EntityState>>,
    unreachable: Mutex<HashSet<EntityId>>,
    sender: broadcast::Sender<StateChange>,
}

impl Inner {
    fn states(&self) -> MutexGuard<'_, HashMap<EntityId, EntityState>> {
        self.states.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn unreachable(&self) -> MutexGuard<'_, HashSet<EntityId>> {
        self.unreachable.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// In-memory home shared by every room. Cloning yields another handle to
/// the same home.
#[derive(Clone)]
pub struct VirtualHome {
    inner: Arc<Inner>,
}

impl Default for VirtualHome {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl VirtualHome {
    /// Create an empty home whose subscribers may fall `capacity` changes
    /// behind before dropping some.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            inner: Arc::new(Inner {
                states: Mutex::new(HashMap::new()),
                unreachable: Mutex::new(HashSet::new()),
                sender,
            }),
        }
    }

    /// Seed an entity without notifying anyone.
    #[must_use]
    pub fn with_entity(self, entity_id: EntityId, state: impl Into<EntityState>) -> Self {
        self.inner.states().insert(entity_id, state.into());
        self
    }

    /// Set an entity's state and broadcast the change.
    ///
    /// Returns `false`, without broadcasting, when the state is unchanged.
    pub fn set_state(&self, entity_id: &EntityId, state: impl Into<EntityState>) -> bool {
        let new_state = state.into();
        let old_state = {
            let mut states = self.inner.states();
            if states.get(entity_id) == Some(&new_state) {
                return false;
            }
            states.insert(entity_id.clone(), new_state.clone())
        };
        tracing::debug!(%entity_id, state = %new_state, "entity changed");
        // no subscriber is not an error
        let _ = self
            .inner
            .sender
            .send(StateChange::new(entity_id.clone(), old_state, new_state));
        true
    }

    /// Current state of an entity, `None` if it was never set.
    #[must_use]
    pub fn state(&self, entity_id: &EntityId) -> Option<EntityState> {
        self.inner.states().get(entity_id).cloned()
    }

    /// Make commands to `entity_id` fail until reset.
    pub fn set_unreachable(&self, entity_id: &EntityId, unreachable: bool) {
        let mut set = self.inner.unreachable();
        if unreachable {
            set.insert(entity_id.clone());
        } else {
            set.remove(entity_id);
        }
    }

    /// Number of entities known to the home.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.states().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl EntityEventSource for VirtualHome {
    fn current_state(
        &self,
        entity_id: &EntityId,
    ) -> impl Future<Output = Result<EntityState, RoomLightsError>> + Send {
        let state = self.state(entity_id).unwrap_or_default();
        async move { Ok(state) }
    }

    fn subscribe(&self, entity_id: &EntityId) -> Result<StateStream, RoomLightsError> {
        let wanted = entity_id.clone();
        let stream = BroadcastStream::new(self.inner.sender.subscribe()).filter_map(move |item| {
            match item {
                Ok(change) if change.entity_id == wanted => Some(change),
                Ok(_) => None,
                Err(BroadcastStreamRecvError::Lagged(skipped)) => {
                    tracing::warn!(entity_id = %wanted, skipped, "subscriber lagged, changes lost");
                    None
                }
            }
        });
        Ok(Box::pin(stream))
    }
}

impl CommandSink for VirtualHome {
    fn call_service(
        &self,
        entity_id: &EntityId,
        service: LightService,
    ) -> impl Future<Output = Result<(), RoomLightsError>> + Send {
        let result = if self.inner.unreachable().contains(entity_id) {
            Err(CommandError::Unreachable(entity_id.clone()).into())
        } else if self.state(entity_id).is_none() {
            Err(RoomLightsError::NotFound(entity_id.clone()))
        } else if !SWITCHABLE_DOMAINS.contains(&entity_id.domain()) {
            Err(CommandError::Rejected {
                entity_id: entity_id.clone(),
                service,
                reason: format!("{} entities cannot be switched", entity_id.domain()),
            }
            .into())
        } else {
            tracing::debug!(%entity_id, %service, "service called");
            self.set_state(entity_id, service.target_state());
            Ok(())
        };
        async move { result }
    }
}
