//! ADU/PDU buffer types (§3).
//!
//! `Adu` is the PDU and ADU concepts from the specification fused into
//! one owner: a fixed byte buffer plus the framing metadata and header
//! words needed to lay it out or interpret it. Request and response
//! ADUs are both represented by this type; `role` distinguishes them.

use crate::fc::{ExceptionCode, FCInfo};

/// Maximum ADU size in bytes (RTU address/unit-id + PDU + CRC, or MBAP
/// header + PDU), large enough for the MBAP worst case.
pub const ADU_MAX: usize = 260;

/// Maximum PDU size: 256 (RTU frame cap) minus 3 bytes of RTU overhead
/// (address + 2 CRC bytes).
pub const MAX_PDU_SIZE: usize = 253;

/// RTU overhead: 1 address byte + 2 CRC bytes.
const RTU_OVERHEAD: usize = 3;

/// MBAP header size: transaction_id(2) + protocol_id(2) + length(2) + unit_id(1).
const MBAP_HEADER_SIZE: usize = 7;

/// Whether an [`Adu`] holds a request or a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// A request, prepared by a client or decoded by a server.
    Request,
    /// A response, prepared by a server or decoded by a client.
    Response,
}

/// Wire framing and its addressing metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Framing {
    /// RTU: serial, CRC-16 framed.
    Rtu {
        /// Slave address (0 = broadcast, request only).
        address: u8,
    },
    /// MBAP: TCP/UDP, length-prefixed with a transaction ID.
    Mbap {
        /// Transaction identifier, echoed by the server.
        transaction_id: u16,
        /// Unit identifier (slave address behind a gateway).
        unit_id: u8,
    },
}

impl Framing {
    /// Byte offset of the PDU's first byte (the FC byte) within the ADU buffer.
    #[must_use]
    pub fn pdu_start_offset(self) -> usize {
        match self {
            Framing::Rtu { .. } => 1,
            Framing::Mbap { .. } => MBAP_HEADER_SIZE,
        }
    }

    /// Fixed non-PDU overhead this framing adds to the ADU.
    #[must_use]
    pub fn adu_overhead(self) -> usize {
        match self {
            Framing::Rtu { .. } => RTU_OVERHEAD,
            Framing::Mbap { .. } => MBAP_HEADER_SIZE,
        }
    }
}

/// A request or response Application Data Unit.
///
/// Owns a fixed-capacity buffer re-used across retries: preparing a
/// new attempt overwrites the buffer in place rather than allocating.
#[derive(Debug, Clone)]
pub struct Adu {
    buf: [u8; ADU_MAX],
    len: usize,
    role: Role,
    framing: Framing,
    fc_info: Option<FCInfo>,
    /// Four header words; meaning depends on the FC (address, count, masks, ...).
    header: [u16; 4],
    /// Number of items (coils/registers) this ADU addresses.
    item_count: u16,
    /// Exception code to send (server) or received (client).
    exception: Option<ExceptionCode>,
}

impl Adu {
    /// An empty ADU ready to be filled by `prepare_*_for_send` or a decoder.
    #[must_use]
    pub fn new(role: Role, framing: Framing) -> Self {
        Self {
            buf: [0u8; ADU_MAX],
            len: 0,
            role,
            framing,
            fc_info: None,
            header: [0; 4],
            item_count: 0,
            exception: None,
        }
    }

    /// Reset to an empty ADU, keeping the role and framing. Called
    /// between retries so the buffer is reused rather than reallocated.
    pub fn reset(&mut self) {
        self.len = 0;
        self.fc_info = None;
        self.header = [0; 4];
        self.item_count = 0;
        self.exception = None;
    }

    #[must_use]
    pub fn role(&self) -> Role {
        self.role
    }

    #[must_use]
    pub fn framing(&self) -> Framing {
        self.framing
    }

    pub fn set_framing(&mut self, framing: Framing) {
        self.framing = framing;
    }

    #[must_use]
    pub fn fc_info(&self) -> Option<FCInfo> {
        self.fc_info
    }

    pub fn set_fc_info(&mut self, info: FCInfo) {
        self.fc_info = Some(info);
    }

    #[must_use]
    pub fn header(&self) -> &[u16; 4] {
        &self.header
    }

    pub fn set_header(&mut self, header: [u16; 4]) {
        self.header = header;
    }

    #[must_use]
    pub fn item_count(&self) -> u16 {
        self.item_count
    }

    pub fn set_item_count(&mut self, count: u16) {
        self.item_count = count;
    }

    #[must_use]
    pub fn exception(&self) -> Option<ExceptionCode> {
        self.exception
    }

    pub fn set_exception(&mut self, code: Option<ExceptionCode>) {
        self.exception = code;
    }

    /// Whole-buffer byte offset of the FC byte.
    #[must_use]
    pub fn pdu_start_offset(&self) -> usize {
        self.framing.pdu_start_offset()
    }

    /// Fixed overhead this ADU's framing adds beyond the PDU.
    #[must_use]
    pub fn adu_overhead(&self) -> usize {
        self.framing.adu_overhead()
    }

    /// Size of the PDU portion, once the ADU has been laid out or decoded.
    #[must_use]
    pub fn pdu_size(&self) -> usize {
        self.len.saturating_sub(self.pdu_start_offset())
    }

    /// Total number of valid bytes currently in the buffer.
    #[must_use]
    pub fn len(&self) -> usize {
        self.len
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Shared view of the valid bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.buf[..self.len]
    }

    /// Shared view of the PDU portion (FC byte onward, excluding framing overhead/CRC).
    #[must_use]
    pub fn pdu_bytes(&self) -> &[u8] {
        let start = self.pdu_start_offset();
        &self.buf[start..self.len]
    }

    /// Mutable view of the whole buffer, for a decoder appending bytes.
    pub fn buffer_mut(&mut self) -> &mut [u8; ADU_MAX] {
        &mut self.buf
    }

    /// Owned copy of the first `n` buffer bytes, independent of any
    /// further borrow of `self` (used by the decoder, which inspects
    /// bytes before mutating `self` with the decoded result).
    #[must_use]
    pub fn bytes_upto(&self, n: usize) -> Vec<u8> {
        self.buf[..n].to_vec()
    }

    /// Current fill length; decoders advance this as bytes arrive.
    #[must_use]
    pub fn fill_len(&self) -> usize {
        self.len
    }

    /// Set the number of valid bytes in the buffer.
    ///
    /// # Errors
    ///
    /// Returns [`crate::error::ModbusError::BufferTooLargeForAdu`] if
    /// `len` exceeds [`ADU_MAX`].
    pub fn set_len(&mut self, len: usize) -> Result<(), crate::error::ModbusError> {
        if len > ADU_MAX {
            return Err(crate::error::ModbusError::BufferTooLargeForAdu);
        }
        self.len = len;
        Ok(())
    }

    /// Copy `bytes` into the buffer starting at `offset`, extending
    /// `len` if this write reaches past the current fill.
    ///
    /// # Errors
    ///
    /// Returns [`crate::error::ModbusError::BufferTooLargeForAdu`] if
    /// the write would run past [`ADU_MAX`].
    pub fn write_at(
        &mut self,
        offset: usize,
        bytes: &[u8],
    ) -> Result<(), crate::error::ModbusError> {
        let end = offset
            .checked_add(bytes.len())
            .ok_or(crate::error::ModbusError::BufferTooLargeForAdu)?;
        if end > ADU_MAX {
            return Err(crate::error::ModbusError::BufferTooLargeForAdu);
        }
        self.buf[offset..end].copy_from_slice(bytes);
        if end > self.len {
            self.len = end;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rtu_pdu_start_offset_is_one() {
        let adu = Adu::new(Role::Request, Framing::Rtu { address: 1 });
        assert_eq!(adu.pdu_start_offset(), 1);
        assert_eq!(adu.adu_overhead(), 3);
    }

    #[test]
    fn mbap_pdu_start_offset_is_seven() {
        let adu = Adu::new(
            Role::Request,
            Framing::Mbap {
                transaction_id: 1,
                unit_id: 1,
            },
        );
        assert_eq!(adu.pdu_start_offset(), 7);
        assert_eq!(adu.adu_overhead(), 7);
    }

    #[test]
    fn write_at_extends_len_and_pdu_size() {
        let mut adu = Adu::new(Role::Request, Framing::Rtu { address: 1 });
        adu.write_at(0, &[0x01, 0x03, 0x00, 0x00, 0x00, 0x02]).unwrap();
        adu.write_at(6, &[0xC4, 0x0B]).unwrap();
        assert_eq!(adu.len(), 8);
        assert_eq!(adu.pdu_size(), 7);
    }

    #[test]
    fn write_at_rejects_overflow() {
        let mut adu = Adu::new(Role::Request, Framing::Rtu { address: 1 });
        let big = vec![0u8; ADU_MAX + 1];
        assert!(adu.write_at(0, &big).is_err());
    }

    #[test]
    fn reset_clears_derived_fields_but_keeps_framing() {
        let mut adu = Adu::new(Role::Request, Framing::Rtu { address: 7 });
        adu.write_at(0, &[1, 2, 3]).unwrap();
        adu.set_item_count(5);
        adu.reset();
        assert_eq!(adu.len(), 0);
        assert_eq!(adu.item_count(), 0);
        assert_eq!(adu.framing(), Framing::Rtu { address: 7 });
    }
}
