//! Boundary types for vmwarden
//!
//! Everything a front-end or CLI consumes crosses this crate: the closed VM
//! status enum, power actions, VM snapshots with remaining time, the admin
//! fleet view, console access payloads, and reaper run summaries.

mod types;

pub use types::*;
