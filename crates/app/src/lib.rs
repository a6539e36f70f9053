//! # roomlights-app
//!
//! Application layer — the per-room lighting controller and **port
//! definitions** (traits).
//!
//! ## Responsibilities
//! - Define **port traits** that adapters must implement:
//!   - `EntityEventSource` — point reads and state-change streams
//!   - `CommandSink` — `turn_on` / `turn_off` light commands
//!   - `DelayedActionScheduler` — cancellable one-shot timers
//!   - `NotificationPublisher` — observable room notifications
//! - Run one `LightingStateMachine` per room behind a serialized input queue
//! - Provide **in-process infrastructure** (tokio scheduler, notification bus)
//!   that doesn't need IO
//!
//! ## Dependency rule
//! Depends on `roomlights-domain` only (plus `tokio` for tasks and channels).
//! Never imports adapter crates. Adapters depend on *this* crate, not the reverse.

pub mod lighting;
pub mod notification_bus;
pub mod ports;
pub mod scheduler;
