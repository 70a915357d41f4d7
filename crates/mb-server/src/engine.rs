//! The server (slave) transaction engine (§4.4): accumulates request
//! bytes, dispatches to a [`RequestHandler`], and writes the response.

use crate::handler::{HandlerReply, RequestHandler};
use mb_codec::adu::{Adu, Framing, Role};
use mb_codec::codec::{
    attempt_decode_request, pack_bits, pack_registers, prepare_response_for_send, unpack_bits,
    unpack_registers, DecodeOutcome,
};
use mb_codec::fc::{ExceptionCode, FunctionCode};
use mb_common::config::ServerConfig;
use mb_common::time::Deadline;
use mb_transport::Transport;
use std::time::Instant;
use tracing::{debug, trace, warn};

/// Maximum discretes/coils a single read may return (§6 bounds).
const MAX_READ_DISCRETES: usize = 2000;
/// Maximum registers a single read may return.
const MAX_READ_REGISTERS: usize = 125;
/// Maximum coils a single write may set.
const MAX_WRITE_COILS: usize = 1968;
/// Maximum registers a single write may set.
const MAX_WRITE_REGISTERS: usize = 123;
/// Maximum registers FC 0x17 may write.
const MAX_RW_WRITE_REGISTERS: usize = 121;

/// Which wire framing this server listens for. Chosen once at
/// construction; a server does not mix RTU and MBAP on one transport.
#[derive(Debug, Clone, Copy)]
pub enum FramingKind {
    Rtu,
    Mbap,
}

impl FramingKind {
    fn placeholder(self) -> Framing {
        match self {
            Self::Rtu => Framing::Rtu { address: 0 },
            Self::Mbap => Framing::Mbap {
                transaction_id: 0,
                unit_id: 0,
            },
        }
    }
}

/// Per-connection assembly state (§4.4 state machine).
enum Phase {
    Idle,
    Accumulating { deadline: Deadline },
    Responding,
}

/// Listens for requests on a transport and replies via a [`RequestHandler`].
pub struct ServerEngine<T: Transport, H: RequestHandler> {
    transport: T,
    handler: H,
    config: ServerConfig,
    request: Adu,
    response: Adu,
    phase: Phase,
    idle_deadline: Deadline,
}

impl<T: Transport, H: RequestHandler> ServerEngine<T, H> {
    #[must_use]
    pub fn new(transport: T, handler: H, config: ServerConfig, framing_kind: FramingKind) -> Self {
        let idle_deadline = Deadline::after(config.idle_timeout);
        Self {
            transport,
            handler,
            config,
            request: Adu::new(Role::Request, framing_kind.placeholder()),
            response: Adu::new(Role::Response, framing_kind.placeholder()),
            phase: Phase::Idle,
            idle_deadline,
        }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    pub fn handler(&mut self) -> &mut H {
        &mut self.handler
    }

    /// Run one pass: at most one read, and a write if a response is pending.
    /// Intended to be called repeatedly from a worker loop (§4.5).
    ///
    /// # Errors
    ///
    /// Returns the transport's I/O error if a read or write fails outright
    /// (as opposed to timing out, which is reported as `Ok` with no bytes).
    pub fn poll(&mut self, spin_period: std::time::Duration) -> std::io::Result<()> {
        self.handler.service();

        match self.phase {
            Phase::Responding => {
                self.transport.write_all(self.response.as_bytes())?;
                trace!("response written, returning to idle");
                self.reset_idle();
            }
            Phase::Idle | Phase::Accumulating { .. } => {
                let fill = self.request.fill_len();
                let deadline = Deadline::after(spin_period).instant();
                let n = {
                    let buf = self.request.buffer_mut();
                    self.transport.read_some(&mut buf[fill..], deadline)?
                };

                if n == 0 {
                    match self.phase {
                        Phase::Idle => self.check_idle_timeout(),
                        _ => self.check_accumulation_timeout(),
                    }
                    return Ok(());
                }

                if matches!(self.phase, Phase::Idle) {
                    self.phase = Phase::Accumulating {
                        deadline: Deadline::after(self.config.request_assembly_timeout),
                    };
                }
                let new_fill = fill + n;
                if self.request.set_len(new_fill).is_err() {
                    warn!("request exceeded ADU buffer, discarding");
                    self.reset_idle();
                    return Ok(());
                }
                self.try_decode(new_fill);
            }
        }
        Ok(())
    }

    /// Drops a stream connection that has sat idle (no bytes, no partial
    /// request) longer than `idle_timeout`. Datagram transports have no
    /// connection to drop.
    fn check_idle_timeout(&mut self) {
        if self.transport.is_connected() && !self.transport.is_datagram() && self.idle_deadline.is_expired() {
            debug!("connection idle too long, disconnecting");
            self.transport.disconnect();
        }
    }

    fn check_accumulation_timeout(&mut self) {
        if let Phase::Accumulating { deadline } = self.phase {
            if deadline.is_expired() {
                debug!("request assembly timed out, discarding partial buffer");
                self.reset_idle();
            }
        }
    }

    fn try_decode(&mut self, bytes_available: usize) {
        match attempt_decode_request(&mut self.request, bytes_available) {
            DecodeOutcome::NeedMore => {
                if self.transport.is_datagram() {
                    debug!("incomplete datagram request discarded");
                    self.reset_idle();
                } else {
                    self.check_accumulation_timeout();
                }
            }
            DecodeOutcome::Complete => self.dispatch(),
            DecodeOutcome::Fatal(err) => {
                warn!(%err, "request decode failed, discarding");
                self.reset_idle();
            }
        }
    }

    fn reset_idle(&mut self) {
        self.request.reset();
        self.response.reset();
        self.phase = Phase::Idle;
        self.idle_deadline = Deadline::after(self.config.idle_timeout);
    }

    fn address_accepted(&self) -> bool {
        if self.config.respond_to_all {
            return true;
        }
        let addressed_id = match self.request.framing() {
            Framing::Rtu { address } => address,
            Framing::Mbap { unit_id, .. } => unit_id,
        };
        addressed_id == self.config.unit_id || self.config.accept_unit_ids.contains(&addressed_id)
    }

    fn dispatch(&mut self) {
        if !self.address_accepted() {
            trace!("request address not accepted, ignoring");
            self.reset_idle();
            return;
        }

        let Some(info) = self.request.fc_info() else {
            warn!("decoded request carries no FCInfo");
            self.reset_idle();
            return;
        };
        let header = *self.request.header();

        let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            call_handler(&mut self.handler, info.fc, header, self.request.pdu_bytes())
        }));

        let reply = match outcome {
            Ok(reply) => reply,
            Err(_) => {
                warn!(fc = %info.fc, "handler panicked, replying slave_device_failure");
                HandlerOutcome::Exception(ExceptionCode::SlaveDeviceFailure)
            }
        };

        match reply {
            HandlerOutcome::Ignore => {
                trace!(fc = %info.fc, "handler requested no reply");
                self.reset_idle();
            }
            HandlerOutcome::Exception(code) => {
                self.response.set_exception(Some(code));
                self.finish_response(&[]);
            }
            HandlerOutcome::Reply { payload, echo_header } => {
                self.response.set_exception(None);
                if let Some(h) = echo_header {
                    self.response.set_header(h);
                }
                self.finish_response(&payload);
            }
        }
    }

    fn finish_response(&mut self, payload: &[u8]) {
        if let Err(e) = prepare_response_for_send(&mut self.response, &self.request, payload) {
            warn!(%e, "failed to frame response, discarding");
            self.reset_idle();
            return;
        }
        self.phase = Phase::Responding;
    }
}

enum HandlerOutcome {
    Reply { payload: Vec<u8>, echo_header: Option<[u16; 4]> },
    Exception(ExceptionCode),
    Ignore,
}

fn ok_reply(payload: Vec<u8>) -> HandlerOutcome {
    HandlerOutcome::Reply {
        payload,
        echo_header: None,
    }
}

fn ack_reply(header: [u16; 4]) -> HandlerOutcome {
    HandlerOutcome::Reply {
        payload: Vec::new(),
        echo_header: Some(header),
    }
}

fn from_unit<T>(reply: HandlerReply<T>, to_payload: impl FnOnce(T) -> Vec<u8>) -> HandlerOutcome {
    match reply {
        HandlerReply::Ok(value) => ok_reply(to_payload(value)),
        HandlerReply::Ignore => HandlerOutcome::Ignore,
        HandlerReply::Exception(code) => HandlerOutcome::Exception(code),
    }
}

fn from_write(reply: HandlerReply<()>, header: [u16; 4]) -> HandlerOutcome {
    match reply {
        HandlerReply::Ok(()) => ack_reply(header),
        HandlerReply::Ignore => HandlerOutcome::Ignore,
        HandlerReply::Exception(code) => HandlerOutcome::Exception(code),
    }
}

fn call_handler<H: RequestHandler>(
    handler: &mut H,
    fc: FunctionCode,
    header: [u16; 4],
    pdu: &[u8],
) -> HandlerOutcome {
    use FunctionCode::{
        MaskWriteRegister, ReadCoils, ReadDiscreteInputs, ReadHoldingRegisters,
        ReadInputRegisters, ReadWriteMultipleRegisters, WriteMultipleCoils,
        WriteMultipleRegisters, WriteSingleCoil, WriteSingleRegister,
    };

    match fc {
        ReadCoils => {
            let (address, count) = (header[0], header[1]);
            if count as usize > MAX_READ_DISCRETES {
                return HandlerOutcome::Exception(ExceptionCode::IllegalDataValue);
            }
            from_unit(handler.read_coils(address, count), |bits| pack_bits(&bits))
        }
        ReadDiscreteInputs => {
            let (address, count) = (header[0], header[1]);
            if count as usize > MAX_READ_DISCRETES {
                return HandlerOutcome::Exception(ExceptionCode::IllegalDataValue);
            }
            from_unit(handler.read_discrete_inputs(address, count), |bits| pack_bits(&bits))
        }
        ReadHoldingRegisters => {
            let (address, count) = (header[0], header[1]);
            if count as usize > MAX_READ_REGISTERS {
                return HandlerOutcome::Exception(ExceptionCode::IllegalDataValue);
            }
            from_unit(handler.read_holding_registers(address, count), |regs| {
                pack_registers(&regs)
            })
        }
        ReadInputRegisters => {
            let (address, count) = (header[0], header[1]);
            if count as usize > MAX_READ_REGISTERS {
                return HandlerOutcome::Exception(ExceptionCode::IllegalDataValue);
            }
            from_unit(handler.read_input_registers(address, count), |regs| {
                pack_registers(&regs)
            })
        }
        WriteSingleCoil => {
            let (address, raw) = (header[0], header[1]);
            let value = raw == 0xFF00;
            from_write(handler.write_single_coil(address, value), header)
        }
        WriteSingleRegister => {
            let (address, value) = (header[0], header[1] as i16);
            from_write(handler.write_single_register(address, value), header)
        }
        WriteMultipleCoils => {
            let (address, count) = (header[0], header[1]);
            if count as usize > MAX_WRITE_COILS {
                return HandlerOutcome::Exception(ExceptionCode::IllegalDataValue);
            }
            let values = unpack_bits(&pdu[6..], count as usize);
            from_write(handler.write_multiple_coils(address, &values), header)
        }
        WriteMultipleRegisters => {
            let (address, count) = (header[0], header[1]);
            if count as usize > MAX_WRITE_REGISTERS {
                return HandlerOutcome::Exception(ExceptionCode::IllegalDataValue);
            }
            let values = unpack_registers(&pdu[6..]);
            from_write(handler.write_multiple_registers(address, &values), header)
        }
        MaskWriteRegister => {
            let (address, and_mask, or_mask) = (header[0], header[1], header[2]);
            from_write(handler.mask_write_register(address, and_mask, or_mask), header)
        }
        ReadWriteMultipleRegisters => {
            let (read_address, read_count, write_address, write_count) =
                (header[0], header[1], header[2], header[3]);
            if read_count as usize > MAX_READ_REGISTERS
                || write_count as usize > MAX_RW_WRITE_REGISTERS
            {
                return HandlerOutcome::Exception(ExceptionCode::IllegalDataValue);
            }
            let write_values = unpack_registers(&pdu[10..]);
            from_unit(
                handler.read_write_multiple_registers(read_address, read_count, write_address, &write_values),
                |regs| pack_registers(&regs),
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mb_codec::codec::{attempt_decode_response, prepare_request_for_send};
    use mb_transport::simulated::duplex_pair;
    use std::time::Duration;

    struct EchoHandler {
        registers: Vec<i16>,
    }

    impl RequestHandler for EchoHandler {
        fn name(&self) -> &str {
            "echo"
        }

        fn read_holding_registers(&mut self, address: u16, count: u16) -> HandlerReply<Vec<i16>> {
            let start = address as usize;
            let end = start + count as usize;
            if end > self.registers.len() {
                return HandlerReply::Exception(ExceptionCode::IllegalDataAddress);
            }
            HandlerReply::Ok(self.registers[start..end].to_vec())
        }

        fn write_single_register(&mut self, address: u16, value: i16) -> HandlerReply<()> {
            match self.registers.get_mut(address as usize) {
                Some(slot) => {
                    *slot = value;
                    HandlerReply::Ok(())
                }
                None => HandlerReply::Exception(ExceptionCode::IllegalDataAddress),
            }
        }
    }

    #[test]
    fn read_holding_registers_round_trip() {
        let (client_t, server_t) = duplex_pair(false);
        let handler = EchoHandler {
            registers: vec![10, 20, 30, 40],
        };
        let mut server = ServerEngine::new(
            server_t,
            handler,
            ServerConfig {
                unit_id: 1,
                ..ServerConfig::default()
            },
            FramingKind::Rtu,
        );

        let mut request = Adu::new(Role::Request, Framing::Rtu { address: 1 });
        request.set_fc_info(mb_codec::fc_info(0x03).unwrap());
        request.set_header([1, 2, 0, 0]);
        prepare_request_for_send(&mut request, 0, &[]).unwrap();

        let handle = std::thread::spawn(move || {
            let mut client_t = client_t;
            client_t.write_all(request.as_bytes()).unwrap();

            let mut response = Adu::new(Role::Response, Framing::Rtu { address: 1 });
            let deadline = Instant::now() + Duration::from_millis(1000);
            let mut fill = 0;
            loop {
                let buf = response.buffer_mut();
                let n = client_t.read_some(&mut buf[fill..], deadline).unwrap();
                if n == 0 {
                    continue;
                }
                fill += n;
                response.set_len(fill).unwrap();
                if attempt_decode_response(&mut response, &request, fill) == DecodeOutcome::Complete {
                    break;
                }
            }
            response
        });

        // Drive the server's poll loop until it has sent a reply.
        for _ in 0..200 {
            server.poll(Duration::from_millis(10)).unwrap();
            if handle.is_finished() {
                break;
            }
        }
        let response = handle.join().unwrap();
        assert_eq!(unpack_registers(&response.pdu_bytes()[2..]), vec![20, 30]);
    }

    #[test]
    fn address_filter_ignores_foreign_unit_id() {
        let (client_t, server_t) = duplex_pair(false);
        let handler = EchoHandler {
            registers: vec![1, 2, 3, 4],
        };
        let mut server = ServerEngine::new(
            server_t,
            handler,
            ServerConfig {
                unit_id: 9,
                ..ServerConfig::default()
            },
            FramingKind::Rtu,
        );

        let mut request = Adu::new(Role::Request, Framing::Rtu { address: 1 });
        request.set_fc_info(mb_codec::fc_info(0x03).unwrap());
        request.set_header([0, 1, 0, 0]);
        prepare_request_for_send(&mut request, 0, &[]).unwrap();

        let mut client_t = client_t;
        client_t.write_all(request.as_bytes()).unwrap();

        for _ in 0..10 {
            server.poll(Duration::from_millis(10)).unwrap();
        }
        assert!(matches!(server.phase, Phase::Idle));

        let mut buf = [0u8; 16];
        let deadline = Instant::now() + Duration::from_millis(50);
        assert_eq!(client_t.read_some(&mut buf, deadline).unwrap(), 0);
    }
}
