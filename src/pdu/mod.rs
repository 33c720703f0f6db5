// SPDX-FileCopyrightText: Copyright (c) 2017-2024 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Protocol Data Unit: function codes, request/response payloads, exceptions
//! and the range validation every constructor enforces before a request ever
//! reaches a transport.

mod codec;

pub use codec::{create_exception, decode_response, encode_request};
pub(crate) use codec::{decode_request, encode_response};

use std::fmt;

/// Inclusive range of function codes a well-formed PDU may carry; the high
/// bit (0x80) is reserved to mark an exception response, so a *request*
/// function code never lands there.
const FUNCTION_CODE_MAX: u8 = 0x7F;

/// A single Modbus function code.
///
/// Restricted to `1..=127` at construction, matching the wire's exception
/// convention of `request_fn_code + 0x80`: were `FunctionCode` allowed to
/// carry values `>= 0x80`, encoding its exception would overflow past `u8`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FunctionCode(u8);

impl FunctionCode {
    pub const READ_COILS: Self = Self(0x01);
    pub const READ_DISCRETE_INPUTS: Self = Self(0x02);
    pub const READ_HOLDING_REGISTERS: Self = Self(0x03);
    pub const READ_INPUT_REGISTERS: Self = Self(0x04);
    pub const WRITE_SINGLE_COIL: Self = Self(0x05);
    pub const WRITE_SINGLE_REGISTER: Self = Self(0x06);
    pub const WRITE_MULTIPLE_COILS: Self = Self(0x0F);
    pub const WRITE_MULTIPLE_REGISTERS: Self = Self(0x10);

    /// The raw wire byte.
    #[must_use]
    pub const fn value(self) -> u8 {
        self.0
    }

    /// The byte an exception response carries for this request code.
    #[must_use]
    pub(crate) const fn exception_value(self) -> u8 {
        self.0 + 0x80
    }
}

impl TryFrom<u8> for FunctionCode {
    type Error = ValidationError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        if value == 0 || value > FUNCTION_CODE_MAX {
            return Err(ValidationError::FunctionCode { code: value });
        }
        Ok(Self(value))
    }
}

impl fmt::Display for FunctionCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:02X}", self.0)
    }
}

/// The standard Modbus exception codes, plus an escape hatch for codes the
/// wire defines but this crate's public surface does not otherwise name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExceptionCode {
    IllegalFunction,
    IllegalDataAddress,
    IllegalDataValue,
    ServerDeviceFailure,
    Acknowledge,
    ServerDeviceBusy,
    /// A defined but uncommon wire code (`MemoryParityError`,
    /// `GatewayPathUnavailable`, `GatewayTargetDevice`, or any other value
    /// `0x01..=0xFF`) that does not otherwise have a named variant here.
    Other(u8),
}

impl ExceptionCode {
    #[must_use]
    pub(crate) const fn wire_value(self) -> u8 {
        match self {
            Self::IllegalFunction => 0x01,
            Self::IllegalDataAddress => 0x02,
            Self::IllegalDataValue => 0x03,
            Self::ServerDeviceFailure => 0x04,
            Self::Acknowledge => 0x05,
            Self::ServerDeviceBusy => 0x06,
            Self::Other(code) => code,
        }
    }

    #[must_use]
    pub(crate) const fn from_wire_value(code: u8) -> Self {
        match code {
            0x01 => Self::IllegalFunction,
            0x02 => Self::IllegalDataAddress,
            0x03 => Self::IllegalDataValue,
            0x04 => Self::ServerDeviceFailure,
            0x05 => Self::Acknowledge,
            0x06 => Self::ServerDeviceBusy,
            other => Self::Other(other),
        }
    }
}

impl fmt::Display for ExceptionCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::IllegalFunction => write!(f, "illegal function"),
            Self::IllegalDataAddress => write!(f, "illegal data address"),
            Self::IllegalDataValue => write!(f, "illegal data value"),
            Self::ServerDeviceFailure => write!(f, "server device failure"),
            Self::Acknowledge => write!(f, "acknowledge"),
            Self::ServerDeviceBusy => write!(f, "server device busy"),
            Self::Other(code) => write!(f, "exception code 0x{code:02X}"),
        }
    }
}

/// A well-formed exception response: a slave refusing `function` with
/// `code`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("slave raised {code} for function {function}")]
pub struct PduException {
    pub function: FunctionCode,
    pub code: ExceptionCode,
}

/// Constructor- and decode-time validation failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("invalid function code: 0x{code:02X}")]
    FunctionCode { code: u8 },

    #[error("address {address} is out of range for this request")]
    Address { address: u16 },

    #[error("quantity {quantity} is out of range (max {max})")]
    Quantity { quantity: u16, max: u16 },

    #[error("register value {value:#06X} is out of range")]
    Register { value: u32 },

    #[error("timeout must be greater than zero")]
    Timeout,

    #[error("retry limit must be greater than zero")]
    Retry,
}

/// Maximum quantity of coils/discrete inputs a single read may request.
pub const MAX_READ_BITS: u16 = 2000;
/// Maximum quantity of registers a single read may request.
pub const MAX_READ_REGISTERS: u16 = 125;
/// Maximum quantity of coils a single write-multiple may carry.
pub const MAX_WRITE_BITS: u16 = 1968;
/// Maximum quantity of registers a single write-multiple may carry.
pub const MAX_WRITE_REGISTERS: u16 = 123;

fn check_quantity(quantity: u16, max: u16) -> Result<(), ValidationError> {
    if quantity == 0 || quantity > max {
        return Err(ValidationError::Quantity { quantity, max });
    }
    Ok(())
}

/// `address + quantity` must not overflow the 16-bit address space: a
/// starting address of `0xFFFF` combined with a quantity greater than one
/// would roll over past `0x10000`, which no real register map does.
fn check_address_range(address: u16, quantity: u16) -> Result<(), ValidationError> {
    if u32::from(address) + u32::from(quantity) > 0x1_0000 {
        return Err(ValidationError::Address { address });
    }
    Ok(())
}

/// A validated request payload, ready to be encoded onto the wire by
/// [`crate::pdu::encode_request`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PduRequest {
    ReadCoils { address: u16, quantity: u16 },
    ReadDiscreteInputs { address: u16, quantity: u16 },
    ReadHoldingRegisters { address: u16, quantity: u16 },
    ReadInputRegisters { address: u16, quantity: u16 },
    WriteSingleCoil { address: u16, value: bool },
    WriteSingleRegister { address: u16, value: u16 },
    WriteMultipleCoils { address: u16, values: Vec<bool> },
    WriteMultipleRegisters { address: u16, values: Vec<u16> },
}

impl PduRequest {
    pub fn read_coils(address: u16, quantity: u16) -> Result<Self, ValidationError> {
        check_quantity(quantity, MAX_READ_BITS)?;
        check_address_range(address, quantity)?;
        Ok(Self::ReadCoils { address, quantity })
    }

    pub fn read_discrete_inputs(address: u16, quantity: u16) -> Result<Self, ValidationError> {
        check_quantity(quantity, MAX_READ_BITS)?;
        check_address_range(address, quantity)?;
        Ok(Self::ReadDiscreteInputs { address, quantity })
    }

    pub fn read_holding_registers(address: u16, quantity: u16) -> Result<Self, ValidationError> {
        check_quantity(quantity, MAX_READ_REGISTERS)?;
        check_address_range(address, quantity)?;
        Ok(Self::ReadHoldingRegisters { address, quantity })
    }

    pub fn read_input_registers(address: u16, quantity: u16) -> Result<Self, ValidationError> {
        check_quantity(quantity, MAX_READ_REGISTERS)?;
        check_address_range(address, quantity)?;
        Ok(Self::ReadInputRegisters { address, quantity })
    }

    #[must_use]
    pub const fn write_single_coil(address: u16, value: bool) -> Self {
        Self::WriteSingleCoil { address, value }
    }

    #[must_use]
    pub const fn write_single_register(address: u16, value: u16) -> Self {
        Self::WriteSingleRegister { address, value }
    }

    pub fn write_multiple_coils(address: u16, values: Vec<bool>) -> Result<Self, ValidationError> {
        let quantity = u16::try_from(values.len()).map_err(|_| ValidationError::Quantity {
            quantity: u16::MAX,
            max: MAX_WRITE_BITS,
        })?;
        check_quantity(quantity, MAX_WRITE_BITS)?;
        check_address_range(address, quantity)?;
        Ok(Self::WriteMultipleCoils { address, values })
    }

    pub fn write_multiple_registers(
        address: u16,
        values: Vec<u16>,
    ) -> Result<Self, ValidationError> {
        let quantity = u16::try_from(values.len()).map_err(|_| ValidationError::Quantity {
            quantity: u16::MAX,
            max: MAX_WRITE_REGISTERS,
        })?;
        check_quantity(quantity, MAX_WRITE_REGISTERS)?;
        check_address_range(address, quantity)?;
        Ok(Self::WriteMultipleRegisters { address, values })
    }

    /// The function code this request is encoded under.
    #[must_use]
    pub fn function_code(&self) -> FunctionCode {
        match self {
            Self::ReadCoils { .. } => FunctionCode::READ_COILS,
            Self::ReadDiscreteInputs { .. } => FunctionCode::READ_DISCRETE_INPUTS,
            Self::ReadHoldingRegisters { .. } => FunctionCode::READ_HOLDING_REGISTERS,
            Self::ReadInputRegisters { .. } => FunctionCode::READ_INPUT_REGISTERS,
            Self::WriteSingleCoil { .. } => FunctionCode::WRITE_SINGLE_COIL,
            Self::WriteSingleRegister { .. } => FunctionCode::WRITE_SINGLE_REGISTER,
            Self::WriteMultipleCoils { .. } => FunctionCode::WRITE_MULTIPLE_COILS,
            Self::WriteMultipleRegisters { .. } => FunctionCode::WRITE_MULTIPLE_REGISTERS,
        }
    }

    /// The number of bits/registers the matching response must decode,
    /// used to truncate a read response to exactly what was asked for
    /// instead of the padded byte-aligned count the wire carries.
    #[must_use]
    pub(crate) fn expected_quantity(&self) -> Option<u16> {
        match *self {
            Self::ReadCoils { quantity, .. }
            | Self::ReadDiscreteInputs { quantity, .. }
            | Self::ReadHoldingRegisters { quantity, .. }
            | Self::ReadInputRegisters { quantity, .. } => Some(quantity),
            _ => None,
        }
    }
}

/// A decoded, successful response payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResponseData {
    ReadBits { values: Vec<bool> },
    ReadRegisters { values: Vec<u16> },
    WriteSingleCoil { address: u16, value: bool },
    WriteSingleRegister { address: u16, value: u16 },
    WriteMultiple { address: u16, quantity: u16 },
}

/// The decoded outcome of a single request/response exchange: either the
/// payload the master asked for, or a well-formed slave exception.
pub type PduOutcome = Result<ResponseData, PduException>;

pub(crate) fn packed_bits_len(bit_count: usize) -> usize {
    (bit_count + 7) / 8
}

pub(crate) fn pack_bits(bits: &[bool]) -> Vec<u8> {
    let mut bytes = vec![0u8; packed_bits_len(bits.len())];
    for (i, bit) in bits.iter().enumerate() {
        if *bit {
            bytes[i / 8] |= 1 << (i % 8);
        }
    }
    bytes
}

pub(crate) fn unpack_bits(bytes: &[u8], count: usize) -> Vec<bool> {
    (0..count)
        .map(|i| (bytes[i / 8] >> (i % 8)) & 0b1 != 0)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn function_code_range() {
        assert!(FunctionCode::try_from(0).is_err());
        assert!(FunctionCode::try_from(0x80).is_err());
        assert!(FunctionCode::try_from(0xFF).is_err());
        assert_eq!(FunctionCode::try_from(0x01).unwrap(), FunctionCode::READ_COILS);
        assert_eq!(FunctionCode::READ_COILS.exception_value(), 0x81);
    }

    #[test]
    fn pack_unpack_round_trip() {
        assert_eq!(pack_bits(&[]), Vec::<u8>::new());
        assert_eq!(pack_bits(&[true, false, true, true]), vec![0b_0000_1101]);
        assert_eq!(pack_bits(&[true; 9]), vec![0xFF, 0x01]);
        assert_eq!(
            unpack_bits(&[0xFF, 0b11], 10),
            vec![true, true, true, true, true, true, true, true, true, true]
        );
    }

    #[test]
    fn quantity_bounds() {
        assert!(PduRequest::read_coils(0, 0).is_err());
        assert!(PduRequest::read_coils(0, MAX_READ_BITS + 1).is_err());
        assert!(PduRequest::read_coils(0, MAX_READ_BITS).is_ok());
        assert!(PduRequest::read_holding_registers(0, MAX_READ_REGISTERS + 1).is_err());
    }

    #[test]
    fn address_quantity_must_not_overflow_address_space() {
        assert!(matches!(
            PduRequest::read_coils(0xFFFF, 2),
            Err(ValidationError::Address { address: 0xFFFF })
        ));
        assert!(PduRequest::read_coils(0xFFFF, 1).is_ok());
        assert!(PduRequest::read_holding_registers(0xFF00, 0x100).is_ok());
        assert!(PduRequest::read_holding_registers(0xFF01, 0x100).is_err());
    }
}
