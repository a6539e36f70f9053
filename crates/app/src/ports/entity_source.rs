//! Entity event source port — point reads and change streams for entities.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use roomlights_domain::entity::EntityState;
use roomlights_domain::error::RoomLightsError;
use roomlights_domain::event::StateChange;
use roomlights_domain::id::EntityId;
use tokio_stream::Stream;

/// Stream of changes for a single entity, in arrival order.
pub type StateStream = Pin<Box<dyn Stream<Item = StateChange> + Send>>;

/// Reports entity states from the home-automation bus.
pub trait EntityEventSource {
    /// Read the current state of an entity.
    ///
    /// Unknown entities report [`EntityState::Unknown`].
    fn current_state(
        &self,
        entity_id: &EntityId,
    ) -> impl Future<Output = Result<EntityState, RoomLightsError>> + Send;

    /// Subscribe to future changes of an entity.
    ///
    /// # Errors
    ///
    /// Returns an error if the source cannot open the subscription.
    fn subscribe(&self, entity_id: &EntityId) -> Result<StateStream, RoomLightsError>;
}

impl<T: EntityEventSource + Send + Sync> EntityEventSource for Arc<T> {
    fn current_state(
        &self,
        entity_id: &EntityId,
    ) -> impl Future<Output = Result<EntityState, RoomLightsError>> + Send {
        (**self).current_state(entity_id)
    }

    fn subscribe(&self, entity_id: &EntityId) -> Result<StateStream, RoomLightsError> {
        (**self).subscribe(entity_id)
    }
}
