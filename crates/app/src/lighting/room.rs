//! Room runner — wires one room's subscriptions and timers into its machine.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_stream::StreamExt;

use roomlights_domain::error::RoomLightsError;
use roomlights_domain::room::RoomConfig;

use super::machine::{LightingStateMachine, RoomInput};
use crate::ports::{
    CommandSink, DelayedActionScheduler, EntityEventSource, NotificationPublisher, StateStream,
};

/// A running room.
///
/// Dropping the handle asks the room to shut down without waiting for it;
/// use [`RoomHandle::shutdown`] to wait.
pub struct RoomHandle {
    name: String,
    queue: mpsc::UnboundedSender<RoomInput>,
    task: Option<JoinHandle<()>>,
}

impl RoomHandle {
    /// Validate `config`, subscribe to every entity it names and start
    /// processing changes in a background task.
    ///
    /// Subscriptions are opened before the initial states are read, so no
    /// change falls between the two.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid or a subscription
    /// cannot be opened. Nothing is left running in that case.
    pub async fn spawn<ES, CS, DS, NP>(
        config: RoomConfig,
        source: ES,
        sink: CS,
        scheduler: DS,
        publisher: NP,
    ) -> Result<Self, RoomLightsError>
    where
        ES: EntityEventSource + Send + Sync + 'static,
        CS: CommandSink + Send + Sync + 'static,
        DS: DelayedActionScheduler + Send + Sync + 'static,
        NP: NotificationPublisher + Send + Sync + 'static,
    {
        config.validate()?;
        let config = Arc::new(config);
        let (queue, inbox) = mpsc::unbounded_channel();

        let mut forwarders = Vec::new();
        for entity_id in config.subscribed_entities() {
            match source.subscribe(&entity_id) {
                Ok(stream) => forwarders.push(tokio::spawn(forward(stream, queue.clone()))),
                Err(err) => {
                    tracing::error!(room = %config.name, %entity_id, error = %err, "failed to subscribe");
                    for forwarder in &forwarders {
                        forwarder.abort();
                    }
                    return Err(err);
                }
            }
        }

        let machine = LightingStateMachine::initialize(
            Arc::clone(&config),
            source,
            sink,
            scheduler,
            publisher,
            queue.clone(),
        )
        .await;
        let task = tokio::spawn(run(machine, inbox, forwarders));

        Ok(Self {
            name: config.name.clone(),
            queue,
            task: Some(task),
        })
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether the room task is still processing inputs.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }

    /// Stop the room and wait until its timers are cancelled.
    pub async fn shutdown(mut self) {
        let _ = self.queue.send(RoomInput::Shutdown);
        if let Some(task) = self.task.take()
            && let Err(err) = task.await
        {
            tracing::warn!(room = %self.name, error = %err, "room task ended abnormally");
        }
    }
}

impl Drop for RoomHandle {
    fn drop(&mut self) {
        if self.task.is_some() {
            let _ = self.queue.send(RoomInput::Shutdown);
        }
    }
}

async fn forward(mut stream: StateStream, queue: mpsc::UnboundedSender<RoomInput>) {
    while let Some(change) = stream.next().await {
        if queue.send(RoomInput::StateChanged(change)).is_err() {
            break;
        }
    }
}

async fn run<ES, CS, DS, NP>(
    mut machine: LightingStateMachine<ES, CS, DS, NP>,
    mut inbox: mpsc::UnboundedReceiver<RoomInput>,
    forwarders: Vec<JoinHandle<()>>,
) where
    ES: EntityEventSource,
    CS: CommandSink,
    DS: DelayedActionScheduler,
    NP: NotificationPublisher,
{
    while let Some(input) = inbox.recv().await {
        if machine.handle(input).await.is_break() {
            break;
        }
    }
    for forwarder in forwarders {
        forwarder.abort();
    }
    machine.teardown();
}
