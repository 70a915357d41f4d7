//! Wire-level Modbus codec: CRC-16 RTU framing, MBAP framing, the
//! function code layout table, and the function object that pairs a
//! request with its response.

pub mod adu;
pub mod codec;
pub mod crc;
pub mod error;
pub mod fc;
pub mod function;
pub mod transaction_id;

pub use adu::{Adu, Framing, Role, ADU_MAX, MAX_PDU_SIZE};
pub use codec::{
    attempt_decode_request, attempt_decode_response, pack_bits, pack_registers,
    prepare_request_for_send, prepare_response_for_send, unpack_bits, unpack_registers,
    DecodeOutcome,
};
pub use error::ModbusError;
pub use fc::{fc_info, ExceptionCode, FCInfo, FunctionCode};
pub use function::{CancelHandle, Transaction, TxError, TxErrorKind, TxState};
