//! Entity — a named sensor, switch or light observed on the home bus.
//!
//! The lighting core never owns entities; it only reads their
//! [`EntityState`] and reacts to changes of it.

mod state;

pub use state::EntityState;
