//! The client (master) transaction engine (§4.3): runs one function
//! object against a transport, retrying per policy.

use mb_codec::adu::Framing;
use mb_codec::codec::{attempt_decode_response, prepare_request_for_send, DecodeOutcome};
use mb_codec::function::{Transaction, TxError, TxErrorKind};
use mb_codec::transaction_id;
use mb_common::config::ClientConfig;
use mb_common::time::Deadline;
use mb_transport::Transport;
use std::time::{Duration, Instant};
use tracing::{debug, trace, warn};

/// Executes [`Transaction`]s against a single [`Transport`], one at a
/// time, applying the retry/timeout/flush policy.
pub struct ClientEngine<T: Transport> {
    transport: T,
    config: ClientConfig,
    needs_flush: bool,
}

impl<T: Transport> ClientEngine<T> {
    #[must_use]
    pub fn new(transport: T, config: ClientConfig) -> Self {
        Self {
            transport,
            config,
            needs_flush: false,
        }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    /// Run `function` to completion, retrying per policy.
    ///
    /// Returns `true` iff the function ended in `succeeded`; the
    /// function's final state always describes the outcome in full.
    pub fn run(&mut self, function: &mut Transaction) -> bool {
        function.begin_run();

        if self.needs_flush && self.config.flush_period > Duration::ZERO {
            trace!("flushing transport before new request (prior call failed)");
            self.transport.flush(self.config.flush_period);
            self.needs_flush = false;
        }

        let try_transaction_id = match function.request().framing() {
            Framing::Mbap { .. } => transaction_id::next(),
            Framing::Rtu { .. } => 0,
        };
        let payload = function.request_payload().to_vec();
        if let Err(e) = prepare_request_for_send(function.request_mut(), try_transaction_id, &payload) {
            function.mark_failed(TxError::new(
                TxErrorKind::InvalidFc,
                format!("prepare_request_for_send: {e}"),
            ));
            return false;
        }

        if !self.transport.is_connected() {
            function.mark_failed(TxError::new(TxErrorKind::NotConnected, "transport not connected"));
            self.needs_flush = true;
            return false;
        }

        let max_tries = function.max_tries();
        let mut last_error = TxError::new(TxErrorKind::TimeoutNoResponse, "no tries attempted");

        for try_no in 1..=max_tries {
            if try_no > 1 && self.config.retry_delay > Duration::ZERO {
                trace!(delay = ?self.config.retry_delay, "waiting before retry");
                std::thread::sleep(self.config.retry_delay);
            }

            function.begin_try();

            if try_no > 1 && self.config.flush_period > Duration::ZERO {
                self.transport.flush(self.config.flush_period);
            }

            if let Err(e) = self.transport.write_all(function.request().as_bytes()) {
                last_error = TxError::new(TxErrorKind::WriteFailed, e.to_string());
                continue;
            }

            match self.read_until_decided(function) {
                ReadOutcome::Succeeded => {
                    function.mark_succeeded();
                    return true;
                }
                ReadOutcome::PeerException(error) => {
                    function.mark_failed(error);
                    return false;
                }
                ReadOutcome::Cancelled(error) => {
                    function.mark_failed(error);
                    self.needs_flush = true;
                    return false;
                }
                ReadOutcome::Retry(error) => {
                    last_error = error;
                }
            }
        }

        warn!(tries = max_tries, "client transaction exhausted all tries");
        function.mark_failed(last_error);
        self.needs_flush = true;
        false
    }

    fn read_until_decided(&mut self, function: &mut Transaction) -> ReadOutcome {
        let deadline = Deadline::after(function.time_limit());
        let mut bytes_seen = false;

        loop {
            if function.is_cancel_requested() {
                return ReadOutcome::Cancelled(TxError::new(TxErrorKind::Cancelled, "run cancelled by caller"));
            }
            if deadline.is_expired() && !self.transport.is_datagram() {
                return ReadOutcome::Retry(timeout_error(bytes_seen));
            }
            let spin = std::cmp::min(self.config.nominal_spin_period, deadline.remaining());
            let spin_deadline = Deadline::after(spin).instant();

            let fill = function.response().fill_len();
            let n = {
                let buf = function.response_mut().buffer_mut();
                match self.transport.read_some(&mut buf[fill..], spin_deadline) {
                    Ok(n) => n,
                    Err(e) => return ReadOutcome::Retry(TxError::new(TxErrorKind::ReadFailed, e.to_string())),
                }
            };

            if n == 0 {
                if deadline.is_expired() {
                    return ReadOutcome::Retry(timeout_error(bytes_seen));
                }
                continue;
            }
            bytes_seen = true;
            let new_fill = fill + n;
            if function.response_mut().set_len(new_fill).is_err() {
                return ReadOutcome::Retry(TxError::new(
                    TxErrorKind::BufferOverrun,
                    "response exceeded ADU buffer",
                ));
            }

            match attempt_decode_response(function.response_mut(), function.request(), new_fill) {
                DecodeOutcome::Complete => {
                    if let Some(exc) = function.response().exception() {
                        return ReadOutcome::PeerException(TxError::new(
                            TxErrorKind::ExceptionResponse(exc),
                            format!("peer reported {exc}"),
                        ));
                    }
                    debug!("response decoded");
                    return ReadOutcome::Succeeded;
                }
                DecodeOutcome::Fatal(err) => {
                    return ReadOutcome::Retry(TxError::new(TxErrorKind::DecodeFatal(err), err.to_string()));
                }
                DecodeOutcome::NeedMore => {
                    if self.transport.is_datagram() {
                        return ReadOutcome::Retry(TxError::new(
                            TxErrorKind::IncompleteDatagram,
                            "datagram shorter than declared frame",
                        ));
                    }
                }
            }
        }
    }
}

enum ReadOutcome {
    Succeeded,
    PeerException(TxError),
    Cancelled(TxError),
    Retry(TxError),
}

fn timeout_error(bytes_seen: bool) -> TxError {
    if bytes_seen {
        TxError::new(TxErrorKind::TimeoutPartialResponse, "deadline passed with a partial response")
    } else {
        TxError::new(TxErrorKind::TimeoutNoResponse, "deadline passed with no response")
    }
}
