//! Command sink port — where light commands go.

use std::future::Future;
use std::sync::Arc;

use roomlights_domain::error::RoomLightsError;
use roomlights_domain::id::EntityId;
use roomlights_domain::service::LightService;

/// Receives light commands targeted at control entities.
///
/// Failures are reported back to the caller but never retried by the core.
pub trait CommandSink {
    /// Call `service` on `entity_id`.
    fn call_service(
        &self,
        entity_id: &EntityId,
        service: LightService,
    ) -> impl Future<Output = Result<(), RoomLightsError>> + Send;

    fn turn_on(
        &self,
        entity_id: &EntityId,
    ) -> impl Future<Output = Result<(), RoomLightsError>> + Send {
        self.call_service(entity_id, LightService::TurnOn)
    }

    fn turn_off(
        &self,
        entity_id: &EntityId,
    ) -> impl Future<Output = Result<(), RoomLightsError>> + Send {
        self.call_service(entity_id, LightService::TurnOff)
    }
}

impl<T: CommandSink + Send + Sync> CommandSink for Arc<T> {
    fn call_service(
        &self,
        entity_id: &EntityId,
        service: LightService,
    ) -> impl Future<Output = Result<(), RoomLightsError>> + Send {
        (**self).call_service(entity_id, service)
    }
}
