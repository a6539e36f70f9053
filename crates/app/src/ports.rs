//! Port definitions — traits that adapters implement.
//!
//! Ports are the boundaries between the lighting core and the outside world.
//! A room depends only on these traits, never on process-wide state, so each
//! room can be built and tested in isolation.

pub mod command_sink;
pub mod entity_source;
pub mod notifier;
pub mod scheduler;

pub use command_sink::CommandSink;
pub use entity_source::{EntityEventSource, StateStream};
pub use notifier::NotificationPublisher;
pub use scheduler::{DelayedActionScheduler, TimerAction, TimerHandle};
