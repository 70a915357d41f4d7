//! Modbus server (slave) transaction engine (§4.4).

pub mod engine;
pub mod handler;

pub use engine::{FramingKind, ServerEngine};
pub use handler::{HandlerReply, RequestHandler};
