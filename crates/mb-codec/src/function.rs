//! The function object (§3, §4.2): pairs a request ADU with a
//! response ADU and carries the outcome of running them against a
//! transport. Shared by the client and server engines.

use crate::adu::{Adu, Framing, Role};
use crate::codec::{pack_bits, pack_registers, unpack_bits, unpack_registers};
use crate::fc::{fc_info, ExceptionCode, FunctionCode};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// A clonable, `Send + Sync` handle used to request cancellation of an
/// in-progress `run` from another thread (§5 "Cancellation and timeouts").
#[derive(Debug, Clone)]
pub struct CancelHandle(Arc<AtomicBool>);

impl CancelHandle {
    /// Request that the engine abandon the current `run` at its next
    /// wake, leaving the transport for the next call to flush.
    pub fn request_cancel(&self) {
        self.0.store(true, Ordering::Release);
    }
}

/// Completion state of a function object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxState {
    /// Configured but not yet run.
    Ready,
    /// A `run` is currently in progress.
    InProgress,
    /// The last `run` completed with a valid response.
    Succeeded,
    /// The last `run` exhausted its tries without success.
    Failed,
}

/// Error taxonomy for a function object (§7).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxErrorKind {
    /// Transport reported it is not connected.
    NotConnected,
    /// A write to the transport failed.
    WriteFailed,
    /// A read from the transport failed.
    ReadFailed,
    /// The deadline passed with no bytes received.
    TimeoutNoResponse,
    /// The deadline passed with a partial response in the buffer.
    TimeoutPartialResponse,
    /// The decoder rejected the bytes received.
    DecodeFatal(crate::error::ModbusError),
    /// A datagram transport returned a short read that can never complete.
    IncompleteDatagram,
    /// The peer replied with an authoritative exception code (never retried).
    ExceptionResponse(ExceptionCode),
    /// `prepare_request_for_send` was called without a valid FCInfo.
    InvalidFc,
    /// A write would overrun the ADU buffer.
    BufferOverrun,
    /// An accessor was asked to read or write out of the declared range.
    ArrayOutOfRange,
    /// The caller requested cancellation via a [`CancelHandle`] before
    /// a response arrived.
    Cancelled,
}

impl TxErrorKind {
    /// Whether an error of this kind is retry-eligible (§4.3 retry policy).
    #[must_use]
    pub fn is_retryable(self) -> bool {
        !matches!(self, Self::ExceptionResponse(_) | Self::InvalidFc | Self::Cancelled)
    }

    /// Whether this error was reported by the peer rather than observed locally.
    #[must_use]
    pub fn reported_by_peer(self) -> bool {
        matches!(self, Self::ExceptionResponse(_))
    }
}

/// A structured error recorded on a function object.
#[derive(Debug, Clone)]
pub struct TxError {
    /// The kind of failure.
    pub kind: TxErrorKind,
    /// A human-readable description, logged alongside the kind.
    pub description: String,
}

impl TxError {
    #[must_use]
    pub fn new(kind: TxErrorKind, description: impl Into<String>) -> Self {
        Self {
            kind,
            description: description.into(),
        }
    }
}

/// Pairs a request ADU and a response ADU, and tracks the outcome of
/// running them against a transport.
#[derive(Debug)]
pub struct Transaction {
    request: Adu,
    response: Adu,
    time_limit: Duration,
    max_tries: u8,
    try_number: u8,
    state: TxState,
    error: Option<TxError>,
    last_transition: Instant,
    last_success: Option<Instant>,
    request_payload: Vec<u8>,
    cancel: Arc<AtomicBool>,
}

impl Transaction {
    /// Create a function object for `fc` with the given framing and header words.
    ///
    /// `header` meaning depends on the FC: `[addr, count, _, _]` for
    /// most, `[addr, and_mask, or_mask, _]` for FC 0x16, and
    /// `[read_addr, read_count, write_addr, write_count]` for FC 0x17.
    ///
    /// # Errors
    ///
    /// Returns [`crate::error::ModbusError::InvalidFc`] if `fc_byte`
    /// does not name a supported function code.
    pub fn new(
        fc_byte: u8,
        framing: Framing,
        header: [u16; 4],
        time_limit: Duration,
        max_tries: u8,
    ) -> Result<Self, crate::error::ModbusError> {
        let info = fc_info(fc_byte)?;
        let mut request = Adu::new(Role::Request, framing);
        request.set_fc_info(info);
        request.set_header(header);
        Ok(Self {
            request,
            response: Adu::new(Role::Response, framing),
            time_limit,
            max_tries: max_tries.max(1),
            try_number: 0,
            state: TxState::Ready,
            error: None,
            last_transition: Instant::now(),
            last_success: None,
            request_payload: Vec::new(),
            cancel: Arc::new(AtomicBool::new(false)),
        })
    }

    #[must_use]
    pub fn request(&self) -> &Adu {
        &self.request
    }

    pub fn request_mut(&mut self) -> &mut Adu {
        &mut self.request
    }

    #[must_use]
    pub fn response(&self) -> &Adu {
        &self.response
    }

    pub fn response_mut(&mut self) -> &mut Adu {
        &mut self.response
    }

    #[must_use]
    pub fn request_payload(&self) -> &[u8] {
        &self.request_payload
    }

    #[must_use]
    pub fn time_limit(&self) -> Duration {
        self.time_limit
    }

    #[must_use]
    pub fn max_tries(&self) -> u8 {
        self.max_tries
    }

    #[must_use]
    pub fn try_number(&self) -> u8 {
        self.try_number
    }

    #[must_use]
    pub fn state(&self) -> TxState {
        self.state
    }

    #[must_use]
    pub fn error(&self) -> Option<&TxError> {
        self.error.as_ref()
    }

    #[must_use]
    pub fn last_success(&self) -> Option<Instant> {
        self.last_success
    }

    /// Reset for a fresh `run`, preserving configuration (FC, header, payload).
    pub fn begin_run(&mut self) {
        self.try_number = 0;
        self.state = TxState::InProgress;
        self.error = None;
        self.last_transition = Instant::now();
        self.cancel.store(false, Ordering::Release);
    }

    /// A clonable handle another thread can use to cancel this run.
    #[must_use]
    pub fn cancel_handle(&self) -> CancelHandle {
        CancelHandle(Arc::clone(&self.cancel))
    }

    /// Whether cancellation has been requested since the last `begin_run`.
    #[must_use]
    pub fn is_cancel_requested(&self) -> bool {
        self.cancel.load(Ordering::Acquire)
    }

    /// Advance the try counter at the start of each attempt. The
    /// request was already laid out once in `begin_run`/`prepare_*`
    /// and is re-sent unchanged on every try; only the response
    /// buffer (and any partial decode state it carries) is cleared.
    pub fn begin_try(&mut self) {
        self.try_number += 1;
        self.response.reset();
    }

    /// Mark the transaction as having succeeded.
    pub fn mark_succeeded(&mut self) {
        self.state = TxState::Succeeded;
        self.error = None;
        let now = Instant::now();
        self.last_transition = now;
        self.last_success = Some(now);
    }

    /// Record an error without changing the overall completion state
    /// (the engine decides whether to retry).
    pub fn record_error(&mut self, error: TxError) {
        self.error = Some(error);
        self.last_transition = Instant::now();
    }

    /// Mark the transaction as having exhausted its tries.
    pub fn mark_failed(&mut self, error: TxError) {
        self.state = TxState::Failed;
        self.error = Some(error);
        self.last_transition = Instant::now();
    }

    /// Stage boolean values as the request payload (coil-family FCs only).
    ///
    /// Returns `false` (and stages nothing) if the configured FC is not
    /// digital or `values.len()` exceeds the declared item count.
    #[must_use]
    pub fn set_discretes(&mut self, values: &[bool]) -> bool {
        let Some(info) = self.request.fc_info() else {
            return false;
        };
        if !info.is_digital || values.len() > self.request.header()[1] as usize {
            return false;
        }
        self.request_payload = pack_bits(values);
        true
    }

    /// Unpack boolean values from the response payload (coil-family FCs only).
    ///
    /// Returns `None` if the response has no FCInfo, is not digital, or
    /// the transaction has not succeeded.
    #[must_use]
    pub fn get_discretes(&self) -> Option<Vec<bool>> {
        if self.state != TxState::Succeeded {
            return None;
        }
        let info = self.response.fc_info()?;
        if !info.is_digital {
            return None;
        }
        let count = self.response.item_count() as usize;
        let payload = &self.response.pdu_bytes()[1 + info.response_header_bytes..];
        Some(unpack_bits(payload, count))
    }

    /// Stage 16-bit values as the request payload (register-family FCs only).
    #[must_use]
    pub fn set_registers(&mut self, values: &[i16]) -> bool {
        let Some(info) = self.request.fc_info() else {
            return false;
        };
        if !info.is_register {
            return false;
        }
        self.request_payload = pack_registers(values);
        true
    }

    /// Unpack 16-bit values from the response payload (register-family FCs only).
    #[must_use]
    pub fn get_registers(&self) -> Option<Vec<i16>> {
        if self.state != TxState::Succeeded {
            return None;
        }
        let info = self.response.fc_info()?;
        if !info.is_register {
            return None;
        }
        let payload = &self.response.pdu_bytes()[1 + info.response_header_bytes..];
        Some(unpack_registers(payload))
    }

    /// The configured function code.
    #[must_use]
    pub fn function_code(&self) -> Option<FunctionCode> {
        self.request.fc_info().map(|i| i.fc)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{attempt_decode_response, prepare_request_for_send, prepare_response_for_send};

    fn read_holding_regs_roundtrip() -> Transaction {
        let framing = Framing::Rtu { address: 1 };
        let mut tx = Transaction::new(0x03, framing, [0, 2, 0, 0], Duration::from_millis(500), 1)
            .unwrap();
        prepare_request_for_send(tx.request_mut(), 0, &[]).unwrap();

        let mut response = Adu::new(Role::Response, framing);
        response.set_fc_info(fc_info(0x03).unwrap());
        prepare_response_for_send(&mut response, tx.request(), &pack_registers(&[0x0102, 0x0304]))
            .unwrap();

        let n = response.as_bytes().len();
        tx.response_mut().write_at(0, response.as_bytes()).unwrap();
        let outcome = attempt_decode_response(tx.response_mut(), tx.request(), n);
        assert_eq!(outcome, crate::codec::DecodeOutcome::Complete);
        tx.mark_succeeded();
        tx
    }

    #[test]
    fn get_registers_after_success() {
        let tx = read_holding_regs_roundtrip();
        assert_eq!(tx.get_registers(), Some(vec![0x0102, 0x0304]));
    }

    #[test]
    fn get_registers_before_success_is_none() {
        let framing = Framing::Rtu { address: 1 };
        let tx = Transaction::new(0x03, framing, [0, 2, 0, 0], Duration::from_millis(500), 1)
            .unwrap();
        assert_eq!(tx.get_registers(), None);
    }

    #[test]
    fn set_discretes_rejects_oversized_array() {
        let framing = Framing::Rtu { address: 1 };
        let mut tx = Transaction::new(0x0F, framing, [0, 2, 0, 0], Duration::from_millis(500), 1)
            .unwrap();
        assert!(!tx.set_discretes(&[true, true, true]));
    }

    #[test]
    fn set_registers_rejects_non_register_fc() {
        let framing = Framing::Rtu { address: 1 };
        let mut tx = Transaction::new(0x01, framing, [0, 1, 0, 0], Duration::from_millis(500), 1)
            .unwrap();
        assert!(!tx.set_registers(&[1, 2]));
    }
}
