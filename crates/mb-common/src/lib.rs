//! Shared types for the Modbus stack workspace.
//!
//! Carries the parts every other crate needs but none of them owns:
//! configuration structures, the base-state model published by active
//! parts (§4.5), and small time helpers.

pub mod config;
pub mod state;
pub mod time;

pub use config::*;
pub use state::*;
pub use time::*;
