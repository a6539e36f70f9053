//! In-process notification bus shared by every room.
//!
//! All rooms publish into one broadcast channel. Observers either take the
//! whole feed with [`InProcessNotificationBus::subscribe`] or follow a single
//! room with [`InProcessNotificationBus::subscribe_room`].

use std::future::Future;

use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::{Stream, StreamExt};

use roomlights_domain::error::RoomLightsError;
use roomlights_domain::notification::RoomNotification;

use crate::ports::NotificationPublisher;

/// Broadcast bus for [`RoomNotification`]s.
///
/// Publishing never fails: with no subscriber the notification is dropped.
pub struct InProcessNotificationBus {
    sender: broadcast::Sender<RoomNotification>,
}

impl InProcessNotificationBus {
    /// Create a bus whose subscribers may fall `capacity` notifications
    /// behind before losing some.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Every notification of every room published from now on.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<RoomNotification> {
        self.sender.subscribe()
    }

    /// Notifications of the room called `room` only.
    ///
    /// A subscriber that lags logs how many notifications it lost and
    /// carries on with the next one.
    #[must_use]
    pub fn subscribe_room(
        &self,
        room: impl Into<String>,
    ) -> impl Stream<Item = RoomNotification> + Send + Unpin + 'static {
        let room = room.into();
        BroadcastStream::new(self.sender.subscribe()).filter_map(move |item| match item {
            Ok(notification) if notification.room() == room => Some(notification),
            Ok(_) => None,
            Err(BroadcastStreamRecvError::Lagged(skipped)) => {
                tracing::warn!(%room, skipped, "room subscriber lagged, notifications lost");
                None
            }
        })
    }

    /// Number of live subscribers, room-scoped ones included.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl NotificationPublisher for InProcessNotificationBus {
    fn publish(
        &self,
        notification: RoomNotification,
    ) -> impl Future<Output = Result<(), RoomLightsError>> + Send {
        if self.sender.send(notification).is_err() {
            tracing::trace!("notification dropped, nobody is listening");
        }
        async { Ok(()) }
    }
}
