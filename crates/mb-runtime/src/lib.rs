//! Active-part runtime (§4.5): a worker thread, a bounded action queue,
//! a base-state publisher, and a busy counter, shared by the client and
//! server engines when they run as a supervised part rather than being
//! driven directly by an embedding application.

pub mod action;
pub mod busy;
pub mod part;
pub mod publisher;

pub use action::{ActionHandle, ActionOutcome, PartError};
pub use busy::{BusyCounter, BusyGuard};
pub use part::{ActivePart, PartConfig, PartHandler};
pub use publisher::BaseStatePublisher;
