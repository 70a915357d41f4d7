//! Modbus client (master) transaction engine (§4.3).

pub mod engine;

pub use engine::ClientEngine;
pub use mb_codec::function::{Transaction, TxError, TxErrorKind, TxState};
