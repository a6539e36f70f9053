//! Notification port — publish room notifications to observers.

use std::future::Future;
use std::sync::Arc;

use roomlights_domain::error::RoomLightsError;
use roomlights_domain::notification::RoomNotification;

/// Publishes [`RoomNotification`]s to interested subscribers.
pub trait NotificationPublisher {
    /// Publish a notification to all current subscribers.
    fn publish(
        &self,
        notification: RoomNotification,
    ) -> impl Future<Output = Result<(), RoomLightsError>> + Send;
}

impl<T: NotificationPublisher + Send + Sync> NotificationPublisher for Arc<T> {
    fn publish(
        &self,
        notification: RoomNotification,
    ) -> impl Future<Output = Result<(), RoomLightsError>> + Send {
        (**self).publish(notification)
    }
}
