//! Per-room lighting controller.
//!
//! A [`RoomHandle`] owns one room: it subscribes to the room's entities,
//! funnels every change and timer firing into a single queue, and feeds that
//! queue to a [`LightingStateMachine`] one input at a time.

mod echo;
pub mod machine;
pub mod room;
mod timers;

pub use machine::{LightingStateMachine, RoomInput, RuntimeState};
pub use room::RoomHandle;
pub use timers::{TimerKind, TimerToken};
