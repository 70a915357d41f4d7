//! Bit-exact ADU encode/decode (§4.1).

use crate::adu::{Adu, Framing, ADU_MAX, MAX_PDU_SIZE};
use crate::crc;
use crate::error::ModbusError;
use crate::fc::{fc_info, ExceptionCode, FCInfo, FunctionCode};
use byteorder::{BigEndian, ByteOrder};
use tracing::trace;

/// Outcome of a single progressive-decode attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeOutcome {
    /// Not enough bytes yet to know whether the frame is well-formed.
    NeedMore,
    /// A complete, valid frame was decoded.
    Complete,
    /// The bytes present can never form a valid frame.
    Fatal(ModbusError),
}

/// Pack booleans into Modbus coil-payload bytes, LSB-first within each byte.
#[must_use]
pub fn pack_bits(values: &[bool]) -> Vec<u8> {
    let mut out = vec![0u8; values.len().div_ceil(8)];
    for (i, &v) in values.iter().enumerate() {
        if v {
            out[i / 8] |= 1 << (i % 8);
        }
    }
    out
}

/// Unpack `count` booleans from Modbus coil-payload bytes.
#[must_use]
pub fn unpack_bits(bytes: &[u8], count: usize) -> Vec<bool> {
    (0..count)
        .map(|i| bytes[i / 8] & (1 << (i % 8)) != 0)
        .collect()
}

/// Pack 16-bit values into big-endian register-payload bytes.
#[must_use]
pub fn pack_registers(values: &[i16]) -> Vec<u8> {
    let mut out = vec![0u8; values.len() * 2];
    for (i, &v) in values.iter().enumerate() {
        BigEndian::write_i16(&mut out[i * 2..i * 2 + 2], v);
    }
    out
}

/// Unpack big-endian register-payload bytes into 16-bit values.
#[must_use]
pub fn unpack_registers(bytes: &[u8]) -> Vec<i16> {
    bytes.chunks_exact(2).map(BigEndian::read_i16).collect()
}

fn read_u16(buf: &[u8], offset: usize) -> u16 {
    BigEndian::read_u16(&buf[offset..offset + 2])
}

fn write_u16(buf: &mut Vec<u8>, value: u16) {
    let mut tmp = [0u8; 2];
    BigEndian::write_u16(&mut tmp, value);
    buf.extend_from_slice(&tmp);
}

/// Build the request-side PDU bytes (FC byte through payload) for `info`
/// using `header` and, for write FCs, `payload`.
fn build_request_pdu(info: FCInfo, header: [u16; 4], payload: &[u8]) -> Vec<u8> {
    use FunctionCode::{
        MaskWriteRegister, ReadCoils, ReadDiscreteInputs, ReadHoldingRegisters,
        ReadInputRegisters, ReadWriteMultipleRegisters, WriteMultipleCoils,
        WriteMultipleRegisters, WriteSingleCoil, WriteSingleRegister,
    };

    let mut pdu = vec![info.fc.to_byte()];
    match info.fc {
        ReadCoils | ReadDiscreteInputs | ReadHoldingRegisters | ReadInputRegisters => {
            write_u16(&mut pdu, header[0]);
            write_u16(&mut pdu, header[1]);
        }
        WriteSingleCoil | WriteSingleRegister => {
            write_u16(&mut pdu, header[0]);
            write_u16(&mut pdu, header[1]);
        }
        WriteMultipleCoils | WriteMultipleRegisters => {
            write_u16(&mut pdu, header[0]);
            write_u16(&mut pdu, header[1]);
            pdu.push(u8::try_from(payload.len()).unwrap_or(u8::MAX));
            pdu.extend_from_slice(payload);
        }
        MaskWriteRegister => {
            write_u16(&mut pdu, header[0]);
            write_u16(&mut pdu, header[1]);
            write_u16(&mut pdu, header[2]);
        }
        ReadWriteMultipleRegisters => {
            write_u16(&mut pdu, header[0]);
            write_u16(&mut pdu, header[1]);
            write_u16(&mut pdu, header[2]);
            write_u16(&mut pdu, header[3]);
            pdu.push(u8::try_from(payload.len()).unwrap_or(u8::MAX));
            pdu.extend_from_slice(payload);
        }
    }
    pdu
}

/// Build the response-side PDU bytes for `info` using `header` and,
/// for read FCs, `payload`.
fn build_response_pdu(info: FCInfo, header: [u16; 4], payload: &[u8]) -> Vec<u8> {
    use FunctionCode::{
        MaskWriteRegister, ReadCoils, ReadDiscreteInputs, ReadHoldingRegisters,
        ReadInputRegisters, ReadWriteMultipleRegisters, WriteMultipleCoils,
        WriteMultipleRegisters, WriteSingleCoil, WriteSingleRegister,
    };

    let mut pdu = vec![info.fc.to_byte()];
    match info.fc {
        ReadCoils | ReadDiscreteInputs | ReadHoldingRegisters | ReadInputRegisters
        | ReadWriteMultipleRegisters => {
            pdu.push(u8::try_from(payload.len()).unwrap_or(u8::MAX));
            pdu.extend_from_slice(payload);
        }
        WriteSingleCoil | WriteSingleRegister | WriteMultipleCoils | WriteMultipleRegisters => {
            write_u16(&mut pdu, header[0]);
            write_u16(&mut pdu, header[1]);
        }
        MaskWriteRegister => {
            write_u16(&mut pdu, header[0]);
            write_u16(&mut pdu, header[1]);
            write_u16(&mut pdu, header[2]);
        }
    }
    pdu
}

/// Lay out `pdu` into `adu`'s buffer under its current framing,
/// appending CRC (RTU) or the MBAP header (MBAP).
fn write_framed_pdu(adu: &mut Adu, pdu: &[u8]) -> Result<(), ModbusError> {
    if pdu.len() > MAX_PDU_SIZE {
        return Err(ModbusError::BufferTooLargeForAdu);
    }
    match adu.framing() {
        Framing::Rtu { address } => {
            let total = 1 + pdu.len() + 2;
            if total > ADU_MAX {
                return Err(ModbusError::BufferTooLargeForAdu);
            }
            adu.write_at(0, &[address])?;
            adu.write_at(1, pdu)?;
            let (lo, hi) = crc::crc16(&adu.as_bytes()[..1 + pdu.len()]);
            adu.write_at(1 + pdu.len(), &[lo, hi])?;
        }
        Framing::Mbap {
            transaction_id,
            unit_id,
        } => {
            let length = u16::try_from(pdu.len() + 1).map_err(|_| ModbusError::BufferTooLargeForAdu)?;
            let mut header = Vec::with_capacity(7);
            write_u16(&mut header, transaction_id);
            write_u16(&mut header, 0); // protocol_id
            write_u16(&mut header, length);
            header.push(unit_id);
            adu.write_at(0, &header)?;
            adu.write_at(7, pdu)?;
        }
    }
    Ok(())
}

/// Lay out a request into `adu`. `try_transaction_id` is used for MBAP
/// framing only (ignored for RTU).
///
/// # Errors
///
/// Returns an error if `adu` has no [`FCInfo`] set or the resulting
/// frame would not fit in the buffer.
pub fn prepare_request_for_send(
    adu: &mut Adu,
    try_transaction_id: u16,
    payload: &[u8],
) -> Result<(), ModbusError> {
    let info = adu.fc_info().ok_or(ModbusError::InvalidFc(0))?;
    if let Framing::Mbap { unit_id, .. } = adu.framing() {
        adu.set_framing(Framing::Mbap {
            transaction_id: try_transaction_id,
            unit_id,
        });
    }
    let pdu = build_request_pdu(info, *adu.header(), payload);
    write_framed_pdu(adu, &pdu)
}

/// Lay out a response into `adu`, copying addressing from `request`.
///
/// If `adu.exception()` is set, writes an exception response instead
/// of the normal reply; `payload` is ignored in that case.
///
/// # Errors
///
/// Returns an error if `request` has no [`FCInfo`] set, or the
/// resulting frame would not fit in the buffer.
pub fn prepare_response_for_send(
    adu: &mut Adu,
    request: &Adu,
    payload: &[u8],
) -> Result<(), ModbusError> {
    let request_info = request.fc_info().ok_or(ModbusError::InvalidFc(0))?;
    adu.set_framing(request.framing());

    let pdu = if let Some(exc) = adu.exception() {
        vec![request_info.fc.to_byte() | 0x80, exc.to_byte()]
    } else {
        let info = adu.fc_info().unwrap_or(request_info);
        build_response_pdu(info, *adu.header(), payload)
    };
    write_framed_pdu(adu, &pdu)
}

/// Minimum bytes needed before the FC byte itself is readable.
fn min_header_len(framing: Framing) -> usize {
    framing.pdu_start_offset() + 1
}

/// Progressively decode a request frame.
///
/// `bytes_available` is the number of valid bytes currently in
/// `adu`'s buffer (set by the caller via [`Adu::set_len`] as more
/// bytes arrive); this call does not itself read from a transport.
pub fn attempt_decode_request(adu: &mut Adu, bytes_available: usize) -> DecodeOutcome {
    let outcome = decode_pdu(adu, None, bytes_available);
    if let DecodeOutcome::Fatal(err) = outcome {
        trace!(%err, bytes_available, "request decode failed");
    }
    outcome
}

/// Progressively decode a response frame against the `request` it answers.
pub fn attempt_decode_response(
    adu: &mut Adu,
    request: &Adu,
    bytes_available: usize,
) -> DecodeOutcome {
    let outcome = decode_pdu(adu, Some(request), bytes_available);
    if let DecodeOutcome::Fatal(err) = outcome {
        trace!(%err, bytes_available, "response decode failed");
    }
    outcome
}

fn decode_pdu(adu: &mut Adu, request: Option<&Adu>, bytes_available: usize) -> DecodeOutcome {
    let framing = adu.framing();
    let pdu_start = framing.pdu_start_offset();

    if bytes_available < min_header_len(framing) {
        return DecodeOutcome::NeedMore;
    }
    let buf = adu.bytes_upto(bytes_available);
    let fc_byte = buf[pdu_start];

    // Exception response: only possible when decoding against a request.
    if let Some(req) = request {
        if fc_byte & 0x80 != 0 {
            return decode_exception_response(adu, req, &buf, pdu_start, bytes_available);
        }
    }

    let info = match fc_info(fc_byte) {
        Ok(info) => info,
        Err(e) => return DecodeOutcome::Fatal(e),
    };

    if let Some(req) = request {
        let Some(req_info) = req.fc_info() else {
            return DecodeOutcome::Fatal(ModbusError::InvalidFc(0));
        };
        if req_info.fc != info.fc {
            return DecodeOutcome::Fatal(ModbusError::FcMismatch);
        }
    }

    let header_bytes = if request.is_some() {
        info.response_header_bytes
    } else {
        info.request_header_bytes
    };
    let byte_count_offset = if request.is_some() {
        info.pdu_offset_to_response_data_byte_count
    } else {
        info.pdu_offset_to_request_data_byte_count
    };

    let header_end = pdu_start + 1 + header_bytes;
    if bytes_available < header_end {
        return DecodeOutcome::NeedMore;
    }

    let payload_len = if byte_count_offset == 0 {
        0usize
    } else {
        buf[pdu_start + byte_count_offset] as usize
    };
    let pdu_total = 1 + header_bytes + payload_len;
    let frame_end = pdu_start + pdu_total;
    if bytes_available < frame_end {
        return DecodeOutcome::NeedMore;
    }

    if byte_count_offset != 0 {
        if let Some(err) =
            validate_byte_count(info, request.is_some(), &buf, pdu_start, payload_len)
        {
            return DecodeOutcome::Fatal(err);
        }
    }

    match framing {
        Framing::Rtu { .. } => {
            let total = frame_end + 2;
            if bytes_available < total {
                return DecodeOutcome::NeedMore;
            }
            if bytes_available > total {
                return DecodeOutcome::Fatal(ModbusError::ExtraBytesAfterPdu);
            }
            if !crc::verify(&buf[..total]) {
                return DecodeOutcome::Fatal(ModbusError::CrcMismatch);
            }
            if let Some(req) = request {
                if let Framing::Rtu { address } = req.framing() {
                    if address != 0 && buf[0] != address {
                        return DecodeOutcome::Fatal(ModbusError::RtuAddressMismatch);
                    }
                }
            }
            finalize_decode(adu, request, info, &buf, pdu_start, header_bytes, total);
        }
        Framing::Mbap { .. } => {
            let protocol_id = read_u16(&buf, 2);
            if protocol_id != 0 {
                return DecodeOutcome::Fatal(ModbusError::MbapProtocolMismatch);
            }
            let length_field = read_u16(&buf, 4) as usize;
            let declared_total = 6 + length_field;
            if bytes_available < declared_total.min(frame_end) {
                return DecodeOutcome::NeedMore;
            }
            if declared_total != frame_end {
                return DecodeOutcome::Fatal(ModbusError::MbapLengthMismatch);
            }
            if let Some(req) = request {
                if let Framing::Mbap { transaction_id, .. } = req.framing() {
                    if read_u16(&buf, 0) != transaction_id {
                        return DecodeOutcome::Fatal(ModbusError::MbapLengthMismatch);
                    }
                }
                if let Framing::Mbap { unit_id, .. } = req.framing() {
                    if buf[6] != unit_id {
                        return DecodeOutcome::Fatal(ModbusError::FcMismatch);
                    }
                }
            }
            if bytes_available > frame_end {
                return DecodeOutcome::Fatal(ModbusError::ExtraBytesAfterPdu);
            }
            finalize_decode(adu, request, info, &buf, pdu_start, header_bytes, frame_end);
        }
    }

    DecodeOutcome::Complete
}

fn validate_byte_count(
    info: FCInfo,
    is_response: bool,
    buf: &[u8],
    pdu_start: usize,
    byte_count: usize,
) -> Option<ModbusError> {
    use FunctionCode::{ReadWriteMultipleRegisters, WriteMultipleCoils, WriteMultipleRegisters};

    if is_response {
        return None;
    }
    let base = pdu_start + 1;
    let expected = match info.fc {
        WriteMultipleCoils => (read_u16(buf, base + 2) as usize).div_ceil(8),
        WriteMultipleRegisters => read_u16(buf, base + 2) as usize * 2,
        ReadWriteMultipleRegisters => read_u16(buf, base + 6) as usize * 2,
        _ => return None,
    };
    if expected != byte_count {
        Some(ModbusError::DataByteCountMismatch)
    } else {
        None
    }
}

fn finalize_decode(
    adu: &mut Adu,
    request: Option<&Adu>,
    info: FCInfo,
    buf: &[u8],
    pdu_start: usize,
    header_bytes: usize,
    total_len: usize,
) {
    let header = parse_header(info, request.is_some(), buf, pdu_start, header_bytes);
    adu.set_fc_info(info);
    adu.set_header(header);
    adu.set_exception(None);
    let item_count = derive_item_count(info, request, header);
    adu.set_item_count(item_count);
    let _ = adu.set_len(total_len);
}

fn parse_header(
    info: FCInfo,
    is_response: bool,
    buf: &[u8],
    pdu_start: usize,
    header_bytes: usize,
) -> [u16; 4] {
    use FunctionCode::{
        MaskWriteRegister, ReadWriteMultipleRegisters, WriteMultipleCoils, WriteMultipleRegisters,
        WriteSingleCoil, WriteSingleRegister,
    };

    let base = pdu_start + 1;
    let mut header = [0u16; 4];
    match (info.fc, is_response) {
        (ReadWriteMultipleRegisters, false) => {
            header[0] = read_u16(buf, base);
            header[1] = read_u16(buf, base + 2);
            header[2] = read_u16(buf, base + 4);
            header[3] = read_u16(buf, base + 6);
        }
        (MaskWriteRegister, _) => {
            header[0] = read_u16(buf, base);
            header[1] = read_u16(buf, base + 2);
            header[2] = read_u16(buf, base + 4);
        }
        (WriteSingleCoil | WriteSingleRegister, _)
        | (WriteMultipleCoils | WriteMultipleRegisters, true) => {
            header[0] = read_u16(buf, base);
            header[1] = read_u16(buf, base + 2);
        }
        (WriteMultipleCoils | WriteMultipleRegisters, false) => {
            header[0] = read_u16(buf, base);
            header[1] = read_u16(buf, base + 2);
        }
        _ if header_bytes >= 4 => {
            header[0] = read_u16(buf, base);
            header[1] = read_u16(buf, base + 2);
        }
        _ => {}
    }
    header
}

fn derive_item_count(info: FCInfo, request: Option<&Adu>, header: [u16; 4]) -> u16 {
    use FunctionCode::{
        MaskWriteRegister, ReadWriteMultipleRegisters, WriteSingleCoil, WriteSingleRegister,
    };

    match info.fc {
        WriteSingleCoil | WriteSingleRegister | MaskWriteRegister => 1,
        ReadWriteMultipleRegisters => {
            if request.is_some() {
                // Decoding a response: item count is the read-side count from the request.
                request.map_or(header[1], |req| req.header()[1])
            } else {
                header[1]
            }
        }
        _ => {
            if request.is_some() {
                request.map_or(header[1], |req| req.header()[1])
            } else {
                header[1]
            }
        }
    }
}

fn decode_exception_response(
    adu: &mut Adu,
    request: &Adu,
    buf: &[u8],
    pdu_start: usize,
    bytes_available: usize,
) -> DecodeOutcome {
    let frame_len = match adu.framing() {
        Framing::Rtu { .. } => pdu_start + 2 + 2,
        Framing::Mbap { .. } => pdu_start + 2,
    };
    if bytes_available < frame_len {
        return DecodeOutcome::NeedMore;
    }
    if bytes_available > frame_len {
        return DecodeOutcome::Fatal(ModbusError::ExtraBytesAfterPdu);
    }
    if let Framing::Rtu { .. } = adu.framing() {
        if !crc::verify(&buf[..frame_len]) {
            return DecodeOutcome::Fatal(ModbusError::CrcMismatch);
        }
        if let Framing::Rtu { address } = request.framing() {
            if address != 0 && buf[0] != address {
                return DecodeOutcome::Fatal(ModbusError::RtuAddressMismatch);
            }
        }
    }
    let Some(req_info) = request.fc_info() else {
        return DecodeOutcome::Fatal(ModbusError::InvalidFc(0));
    };
    let masked_fc = buf[pdu_start] & 0x7F;
    if masked_fc != req_info.fc.to_byte() {
        return DecodeOutcome::Fatal(ModbusError::FcMismatch);
    }
    let Some(code) = ExceptionCode::from_byte(buf[pdu_start + 1]) else {
        return DecodeOutcome::Fatal(ModbusError::InvalidFc(buf[pdu_start + 1]));
    };
    adu.set_fc_info(req_info);
    adu.set_exception(Some(code));
    let _ = adu.set_len(frame_len);
    DecodeOutcome::Complete
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adu::Role;

    #[test]
    fn coil_packing_law() {
        let bits = [true, false, true, true, false, false, false, false, true];
        let packed = pack_bits(&bits);
        assert_eq!(packed, vec![0x0D, 0x01]);
    }

    #[test]
    fn register_byte_order_law() {
        let packed = pack_registers(&[0x1234]);
        assert_eq!(packed, vec![0x12, 0x34]);
    }

    #[test]
    fn read_holding_registers_request_round_trip() {
        let mut adu = Adu::new(Role::Request, Framing::Rtu { address: 1 });
        adu.set_fc_info(fc_info(0x03).unwrap());
        adu.set_header([0, 2, 0, 0]);
        prepare_request_for_send(&mut adu, 0, &[]).unwrap();
        assert_eq!(
            adu.as_bytes(),
            &[0x01, 0x03, 0x00, 0x00, 0x00, 0x02, 0xC4, 0x0B]
        );

        let mut decoded = Adu::new(Role::Request, Framing::Rtu { address: 1 });
        let n = adu.as_bytes().len();
        decoded.write_at(0, adu.as_bytes()).unwrap();
        assert_eq!(attempt_decode_request(&mut decoded, n), DecodeOutcome::Complete);
        assert_eq!(decoded.header()[0], 0);
        assert_eq!(decoded.header()[1], 2);
    }

    #[test]
    fn mbap_round_trip_length_matches_pdu_size_plus_one() {
        let mut adu = Adu::new(
            Role::Request,
            Framing::Mbap {
                transaction_id: 1,
                unit_id: 0x11,
            },
        );
        adu.set_fc_info(fc_info(0x04).unwrap());
        adu.set_header([8, 1, 0, 0]);
        prepare_request_for_send(&mut adu, 1, &[]).unwrap();
        assert_eq!(
            adu.as_bytes(),
            &[0x00, 0x01, 0x00, 0x00, 0x00, 0x06, 0x11, 0x04, 0x00, 0x08, 0x00, 0x01]
        );
    }

    #[test]
    fn exception_response_round_trip() {
        let mut request = Adu::new(Role::Request, Framing::Rtu { address: 1 });
        request.set_fc_info(fc_info(0x01).unwrap());
        request.set_header([0x00C8, 1, 0, 0]);
        prepare_request_for_send(&mut request, 0, &[]).unwrap();

        let mut response = Adu::new(Role::Response, Framing::Rtu { address: 1 });
        response.set_exception(Some(ExceptionCode::IllegalDataAddress));
        prepare_response_for_send(&mut response, &request, &[]).unwrap();
        assert_eq!(response.as_bytes()[0], 0x01 | 0x80);
        assert_eq!(response.as_bytes()[1], 0x02);

        let mut decoded = Adu::new(Role::Response, Framing::Rtu { address: 1 });
        let n = response.as_bytes().len();
        decoded.write_at(0, response.as_bytes()).unwrap();
        let outcome = attempt_decode_response(&mut decoded, &request, n);
        assert_eq!(outcome, DecodeOutcome::Complete);
        assert_eq!(decoded.exception(), Some(ExceptionCode::IllegalDataAddress));
    }

    #[test]
    fn need_more_until_full_header_present() {
        let mut adu = Adu::new(Role::Request, Framing::Rtu { address: 1 });
        adu.write_at(0, &[0x01, 0x03]).unwrap();
        assert_eq!(attempt_decode_request(&mut adu, 2), DecodeOutcome::NeedMore);
    }

    #[test]
    fn crc_mismatch_is_fatal() {
        let mut adu = Adu::new(Role::Request, Framing::Rtu { address: 1 });
        adu.write_at(0, &[0x01, 0x03, 0x00, 0x00, 0x00, 0x02, 0xC4, 0x00])
            .unwrap();
        assert_eq!(
            attempt_decode_request(&mut adu, 8),
            DecodeOutcome::Fatal(ModbusError::CrcMismatch)
        );
    }

    #[test]
    fn rtu_response_address_mismatch_is_fatal() {
        let mut request = Adu::new(Role::Request, Framing::Rtu { address: 1 });
        request.set_fc_info(fc_info(0x03).unwrap());
        request.set_header([0, 2, 0, 0]);
        prepare_request_for_send(&mut request, 0, &[]).unwrap();

        // A well-formed response, correctly CRC'd, but addressed to slave 2
        // instead of the slave 1 the request was sent to.
        let mut response = Adu::new(Role::Response, Framing::Rtu { address: 2 });
        response.set_fc_info(fc_info(0x03).unwrap());
        prepare_response_for_send(&mut response, &request, &pack_registers(&[0x0102, 0x0304])).unwrap();

        let mut decoded = Adu::new(Role::Response, Framing::Rtu { address: 1 });
        let n = response.as_bytes().len();
        decoded.write_at(0, response.as_bytes()).unwrap();
        assert_eq!(
            attempt_decode_response(&mut decoded, &request, n),
            DecodeOutcome::Fatal(ModbusError::RtuAddressMismatch)
        );
    }

    #[test]
    fn rtu_broadcast_request_exempts_response_address_check() {
        let mut request = Adu::new(Role::Request, Framing::Rtu { address: 0 });
        request.set_fc_info(fc_info(0x01).unwrap());
        request.set_header([0x00C8, 1, 0, 0]);
        prepare_request_for_send(&mut request, 0, &[]).unwrap();

        let mut response = Adu::new(Role::Response, Framing::Rtu { address: 9 });
        response.set_exception(Some(ExceptionCode::IllegalDataAddress));
        prepare_response_for_send(&mut response, &request, &[]).unwrap();

        let mut decoded = Adu::new(Role::Response, Framing::Rtu { address: 0 });
        let n = response.as_bytes().len();
        decoded.write_at(0, response.as_bytes()).unwrap();
        assert_eq!(
            attempt_decode_response(&mut decoded, &request, n),
            DecodeOutcome::Complete
        );
    }
}
