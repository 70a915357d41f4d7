//! Codec-level error taxonomy (§4.1, §7 "Setup, fatal" / decode-path errors).

use thiserror::Error;

/// Everything that can go wrong laying out or decoding an ADU.
///
/// These are distinct from the exception codes a *peer* reports on the
/// wire ([`crate::fc::ExceptionCode`]) — a `ModbusError` means the
/// bytes themselves could not be turned into a valid frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ModbusError {
    /// Fewer bytes were supplied than the smallest valid PDU needs.
    #[error("buffer too small")]
    BufferTooSmall,

    /// The buffer cannot hold a PDU of the size requested.
    #[error("buffer too large for ADU")]
    BufferTooLargeForAdu,

    /// The FC byte does not name a supported function code.
    #[error("invalid function code: 0x{0:02X}")]
    InvalidFc(u8),

    /// The fixed header bytes for this FC did not match what was expected.
    #[error("header bytes mismatch")]
    HeaderBytesMismatch,

    /// The data-byte-count field disagrees with the declared item count.
    #[error("data byte count mismatch")]
    DataByteCountMismatch,

    /// RTU CRC-16 check failed.
    #[error("CRC mismatch")]
    CrcMismatch,

    /// The reply's RTU address byte did not match the request's
    /// (broadcast requests, address 0, are exempt).
    #[error("RTU address mismatch")]
    RtuAddressMismatch,

    /// MBAP `protocol_id` was not zero.
    #[error("MBAP protocol ID mismatch")]
    MbapProtocolMismatch,

    /// MBAP `length` field disagreed with the bytes actually present.
    #[error("MBAP length mismatch")]
    MbapLengthMismatch,

    /// A response FC (masking the exception bit) did not match the request FC.
    #[error("function code mismatch")]
    FcMismatch,

    /// More bytes followed the PDU than the frame's own length accounts for.
    #[error("extra bytes after PDU")]
    ExtraBytesAfterPdu,
}
