//! # roomlights-domain
//!
//! Pure domain model for per-room lighting automation.
//!
//! ## Responsibilities
//! - Foundational types: entity identifiers, error conventions, timestamps
//! - Define **Entity states** and the **state changes** reported by the home
//! - Define **Services** (light commands: `turn_on`, `turn_off`)
//! - Define **Room configuration** and its invariants
//! - Define the **lighting modes** (`ManagerState`) and day/night **periods**
//! - Define **Notifications** a room emits while it runs
//!
//! ## Dependency rule
//! This crate has **no internal dependencies**.
//! It must never import anything from `app`, adapters, or external IO crates.
//! All IO boundaries are expressed as traits in the `app` crate (ports).

pub mod error;
pub mod id;
pub mod time;

pub mod entity;
pub mod event;
pub mod mode;
pub mod notification;
pub mod room;
pub mod service;
