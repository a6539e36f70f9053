//! # roomlightsd — room lighting daemon
//!
//! Composition root that wires rooms to their collaborators and runs them.
//!
//! ## Responsibilities
//! - Load configuration (config file, env vars)
//! - Set up `tracing` output
//! - Seed the virtual home with every entity the rooms reference
//! - Spawn one room per `[[rooms]]` table, sharing the scheduler and the
//!   notification bus
//! - Log room notifications
//! - Shut every room down on Ctrl-C
//!
//! ## Dependency rule
//! This is the **only** crate that depends on all other crates.
//! It is the wiring layer — no lighting logic belongs here.

mod config;

use std::sync::Arc;

use tokio::sync::broadcast;
use tracing_subscriber::EnvFilter;

use roomlights_adapter_virtual::VirtualHome;
use roomlights_app::lighting::RoomHandle;
use roomlights_app::notification_bus::InProcessNotificationBus;
use roomlights_app::scheduler::TokioScheduler;
use roomlights_domain::entity::EntityState;
use roomlights_domain::notification::RoomNotification;
use roomlights_domain::room::{LuxLimit, RoomConfig};

use config::Config;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::load()?;

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_new(&config.logging.filter)?)
        .init();

    let rooms = config.room_configs()?;
    if rooms.is_empty() {
        tracing::warn!("no rooms configured");
    }

    let home = seed_home(&rooms, &config.demo.house_mode);
    let scheduler = Arc::new(TokioScheduler::new());
    let bus = Arc::new(InProcessNotificationBus::new(256));
    let notifications = tokio::spawn(log_notifications(bus.subscribe()));

    let mut handles = Vec::with_capacity(rooms.len());
    for room in rooms {
        let handle = RoomHandle::spawn(
            room,
            home.clone(),
            home.clone(),
            Arc::clone(&scheduler),
            Arc::clone(&bus),
        )
        .await?;
        tracing::info!(room = handle.name(), "room started");
        handles.push(handle);
    }
    tracing::info!(
        rooms = handles.len(),
        entities = home.len(),
        subscribers = bus.subscriber_count(),
        "roomlightsd running"
    );

    tokio::signal::ctrl_c().await?;
    tracing::info!("shutting down");

    for handle in handles {
        handle.shutdown().await;
    }
    notifications.abort();

    Ok(())
}

/// Build a home where every room starts vacant, enabled and dark.
fn seed_home(rooms: &[RoomConfig], house_mode: &str) -> VirtualHome {
    let mut home = VirtualHome::default();
    for room in rooms {
        home = home
            .with_entity(room.presence_entity.clone(), EntityState::Off)
            .with_entity(room.house_mode_entity.clone(), house_mode);
        if let Some(entity_id) = &room.keep_alive_entity {
            home = home.with_entity(entity_id.clone(), EntityState::Off);
        }
        if let Some(entity_id) = &room.enabled_switch_entity {
            home = home.with_entity(entity_id.clone(), EntityState::On);
        }
        for entity_id in room
            .control_entities
            .iter()
            .chain(&room.night_control_entities)
        {
            home = home.with_entity(entity_id.clone(), EntityState::Off);
        }
        if let Some(gate) = &room.lux_gate {
            home = home.with_entity(gate.sensor.clone(), EntityState::Unknown);
            if let LuxLimit::Entity(entity_id) = &gate.limit {
                home = home.with_entity(entity_id.clone(), EntityState::Unknown);
            }
        }
    }
    home
}

async fn log_notifications(mut receiver: broadcast::Receiver<RoomNotification>) {
    loop {
        match receiver.recv().await {
            Ok(RoomNotification::CommandFailed {
                room,
                entity_id,
                service,
                error,
            }) => {
                tracing::warn!(%room, %entity_id, %service, %error, "light command failed");
            }
            Ok(notification) => {
                tracing::info!(room = notification.room(), ?notification, "room notification");
            }
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                tracing::warn!(skipped, "notification log lagged");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}
