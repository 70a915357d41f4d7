//! Function codes, exception codes, and the per-FC layout table.

use crate::error::ModbusError;
use std::fmt;

/// Supported Modbus function codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FunctionCode {
    /// Read Coils (0x01).
    ReadCoils = 0x01,
    /// Read Discrete Inputs (0x02).
    ReadDiscreteInputs = 0x02,
    /// Read Holding Registers (0x03).
    ReadHoldingRegisters = 0x03,
    /// Read Input Registers (0x04).
    ReadInputRegisters = 0x04,
    /// Write Single Coil (0x05).
    WriteSingleCoil = 0x05,
    /// Write Single Register (0x06).
    WriteSingleRegister = 0x06,
    /// Write Multiple Coils (0x0F).
    WriteMultipleCoils = 0x0F,
    /// Write Multiple Registers (0x10).
    WriteMultipleRegisters = 0x10,
    /// Mask Write Register (0x16).
    MaskWriteRegister = 0x16,
    /// Read/Write Multiple Registers (0x17).
    ReadWriteMultipleRegisters = 0x17,
}

impl FunctionCode {
    /// Parse a function code from its wire byte value.
    ///
    /// # Errors
    ///
    /// Returns [`ModbusError::InvalidFc`] if `byte` names neither a
    /// supported function code nor an exception response FC.
    pub fn from_byte(byte: u8) -> Result<Self, ModbusError> {
        match byte {
            0x01 => Ok(Self::ReadCoils),
            0x02 => Ok(Self::ReadDiscreteInputs),
            0x03 => Ok(Self::ReadHoldingRegisters),
            0x04 => Ok(Self::ReadInputRegisters),
            0x05 => Ok(Self::WriteSingleCoil),
            0x06 => Ok(Self::WriteSingleRegister),
            0x0F => Ok(Self::WriteMultipleCoils),
            0x10 => Ok(Self::WriteMultipleRegisters),
            0x16 => Ok(Self::MaskWriteRegister),
            0x17 => Ok(Self::ReadWriteMultipleRegisters),
            other => Err(ModbusError::InvalidFc(other)),
        }
    }

    /// The wire byte value for this function code.
    #[must_use]
    pub fn to_byte(self) -> u8 {
        self as u8
    }
}

impl fmt::Display for FunctionCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::ReadCoils => "ReadCoils",
            Self::ReadDiscreteInputs => "ReadDiscreteInputs",
            Self::ReadHoldingRegisters => "ReadHoldingRegisters",
            Self::ReadInputRegisters => "ReadInputRegisters",
            Self::WriteSingleCoil => "WriteSingleCoil",
            Self::WriteSingleRegister => "WriteSingleRegister",
            Self::WriteMultipleCoils => "WriteMultipleCoils",
            Self::WriteMultipleRegisters => "WriteMultipleRegisters",
            Self::MaskWriteRegister => "MaskWriteRegister",
            Self::ReadWriteMultipleRegisters => "ReadWriteMultipleRegisters",
        };
        f.write_str(s)
    }
}

/// Modbus exception codes (§6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ExceptionCode {
    /// Illegal function code.
    IllegalFunction = 0x01,
    /// Illegal data address.
    IllegalDataAddress = 0x02,
    /// Illegal data value.
    IllegalDataValue = 0x03,
    /// Slave (server) device failure.
    SlaveDeviceFailure = 0x04,
    /// Acknowledge (request accepted, processing).
    Acknowledge = 0x05,
    /// Slave (server) device busy.
    SlaveDeviceBusy = 0x06,
    /// Memory parity error.
    MemoryParityError = 0x08,
    /// Gateway path unavailable.
    GatewayPathUnavailable = 0x0A,
    /// Gateway target device failed to respond.
    GatewayTargetFailedToRespond = 0x0B,
}

impl ExceptionCode {
    /// Parse an exception code from its wire byte value.
    #[must_use]
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0x01 => Some(Self::IllegalFunction),
            0x02 => Some(Self::IllegalDataAddress),
            0x03 => Some(Self::IllegalDataValue),
            0x04 => Some(Self::SlaveDeviceFailure),
            0x05 => Some(Self::Acknowledge),
            0x06 => Some(Self::SlaveDeviceBusy),
            0x08 => Some(Self::MemoryParityError),
            0x0A => Some(Self::GatewayPathUnavailable),
            0x0B => Some(Self::GatewayTargetFailedToRespond),
            _ => None,
        }
    }

    /// The wire byte value for this exception code.
    #[must_use]
    pub fn to_byte(self) -> u8 {
        self as u8
    }
}

impl fmt::Display for ExceptionCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::IllegalFunction => "Illegal Function",
            Self::IllegalDataAddress => "Illegal Data Address",
            Self::IllegalDataValue => "Illegal Data Value",
            Self::SlaveDeviceFailure => "Slave Device Failure",
            Self::Acknowledge => "Acknowledge",
            Self::SlaveDeviceBusy => "Slave Device Busy",
            Self::MemoryParityError => "Memory Parity Error",
            Self::GatewayPathUnavailable => "Gateway Path Unavailable",
            Self::GatewayTargetFailedToRespond => "Gateway Target Failed To Respond",
        };
        f.write_str(s)
    }
}

/// Static layout description for a function code (§3 "FCInfo").
///
/// `pdu_offset_to_*_data_byte_count` is the byte offset, from the
/// start of the PDU (the FC byte is offset 0), of the data-byte-count
/// field; `0` means the field does not exist for this FC (the FC byte
/// itself always occupies offset 0, so 0 is otherwise unused).
#[derive(Debug, Clone, Copy)]
pub struct FCInfo {
    /// The function code this descriptor is for.
    pub fc: FunctionCode,
    /// Whether this FC reads data from the server.
    pub does_read: bool,
    /// Whether this FC writes data to the server.
    pub does_write: bool,
    /// Whether this FC operates on single-bit (coil/discrete) items.
    pub is_digital: bool,
    /// Whether this FC operates on 16-bit register items.
    pub is_register: bool,
    /// Whether this FC addresses exactly one item (no count field).
    pub is_single: bool,
    /// Fixed request header length in bytes, after the FC byte.
    pub request_header_bytes: usize,
    /// Fixed response header length in bytes, after the FC byte.
    pub response_header_bytes: usize,
    /// PDU offset of the request data-byte-count field, or 0 if absent.
    pub pdu_offset_to_request_data_byte_count: usize,
    /// PDU offset of the response data-byte-count field, or 0 if absent.
    pub pdu_offset_to_response_data_byte_count: usize,
}

/// Look up the static layout descriptor for a function code.
///
/// # Errors
///
/// Returns [`ModbusError::InvalidFc`] if `byte` is not a supported FC.
pub fn fc_info(byte: u8) -> Result<FCInfo, ModbusError> {
    use FunctionCode::{
        MaskWriteRegister, ReadCoils, ReadDiscreteInputs, ReadHoldingRegisters,
        ReadInputRegisters, ReadWriteMultipleRegisters, WriteMultipleCoils,
        WriteMultipleRegisters, WriteSingleCoil, WriteSingleRegister,
    };

    let fc = FunctionCode::from_byte(byte)?;
    Ok(match fc {
        ReadCoils | ReadDiscreteInputs => FCInfo {
            fc,
            does_read: true,
            does_write: false,
            is_digital: true,
            is_register: false,
            is_single: false,
            request_header_bytes: 4,
            response_header_bytes: 1,
            pdu_offset_to_request_data_byte_count: 0,
            pdu_offset_to_response_data_byte_count: 1,
        },
        ReadHoldingRegisters | ReadInputRegisters => FCInfo {
            fc,
            does_read: true,
            does_write: false,
            is_digital: false,
            is_register: true,
            is_single: false,
            request_header_bytes: 4,
            response_header_bytes: 1,
            pdu_offset_to_request_data_byte_count: 0,
            pdu_offset_to_response_data_byte_count: 1,
        },
        WriteSingleCoil => FCInfo {
            fc,
            does_read: false,
            does_write: true,
            is_digital: true,
            is_register: false,
            is_single: true,
            request_header_bytes: 4,
            response_header_bytes: 4,
            pdu_offset_to_request_data_byte_count: 0,
            pdu_offset_to_response_data_byte_count: 0,
        },
        WriteSingleRegister => FCInfo {
            fc,
            does_read: false,
            does_write: true,
            is_digital: false,
            is_register: true,
            is_single: true,
            request_header_bytes: 4,
            response_header_bytes: 4,
            pdu_offset_to_request_data_byte_count: 0,
            pdu_offset_to_response_data_byte_count: 0,
        },
        WriteMultipleCoils => FCInfo {
            fc,
            does_read: false,
            does_write: true,
            is_digital: true,
            is_register: false,
            is_single: false,
            request_header_bytes: 5,
            response_header_bytes: 4,
            pdu_offset_to_request_data_byte_count: 5,
            pdu_offset_to_response_data_byte_count: 0,
        },
        WriteMultipleRegisters => FCInfo {
            fc,
            does_read: false,
            does_write: true,
            is_digital: false,
            is_register: true,
            is_single: false,
            request_header_bytes: 5,
            response_header_bytes: 4,
            pdu_offset_to_request_data_byte_count: 5,
            pdu_offset_to_response_data_byte_count: 0,
        },
        MaskWriteRegister => FCInfo {
            fc,
            does_read: false,
            does_write: true,
            is_digital: false,
            is_register: true,
            is_single: true,
            request_header_bytes: 6,
            response_header_bytes: 6,
            pdu_offset_to_request_data_byte_count: 0,
            pdu_offset_to_response_data_byte_count: 0,
        },
        ReadWriteMultipleRegisters => FCInfo {
            fc,
            does_read: true,
            does_write: true,
            is_digital: false,
            is_register: true,
            is_single: false,
            request_header_bytes: 9,
            response_header_bytes: 1,
            pdu_offset_to_request_data_byte_count: 9,
            pdu_offset_to_response_data_byte_count: 1,
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_every_fc_byte() {
        for byte in [0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x0F, 0x10, 0x16, 0x17] {
            let fc = FunctionCode::from_byte(byte).unwrap();
            assert_eq!(fc.to_byte(), byte);
        }
    }

    #[test]
    fn rejects_unsupported_fc() {
        assert_eq!(FunctionCode::from_byte(0x08), Err(ModbusError::InvalidFc(0x08)));
    }

    #[test]
    fn write_multiple_coils_byte_count_offset() {
        let info = fc_info(0x0F).unwrap();
        assert_eq!(info.pdu_offset_to_request_data_byte_count, 5);
        assert_eq!(info.pdu_offset_to_response_data_byte_count, 0);
    }

    #[test]
    fn read_write_multiple_registers_is_both() {
        let info = fc_info(0x17).unwrap();
        assert!(info.does_read);
        assert!(info.does_write);
        assert_eq!(info.request_header_bytes, 9);
    }
}
