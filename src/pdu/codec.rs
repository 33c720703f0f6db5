// SPDX-FileCopyrightText: Copyright (c) 2017-2024 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Encode [`PduRequest`]/[`ResponseData`] to and from the raw PDU bytes
//! carried inside a TCP or RTU ADU.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::io::{Error, ErrorKind};

use super::{
    pack_bits, unpack_bits, ExceptionCode, FunctionCode, PduException, PduOutcome, PduRequest,
    ResponseData,
};

/// Encode a validated request into its PDU bytes (function code + payload,
/// no ADU envelope).
#[must_use]
pub fn encode_request(req: &PduRequest) -> Bytes {
    let mut data = BytesMut::with_capacity(request_byte_count(req));
    data.put_u8(req.function_code().value());
    match req {
        PduRequest::ReadCoils { address, quantity }
        | PduRequest::ReadDiscreteInputs { address, quantity }
        | PduRequest::ReadHoldingRegisters { address, quantity }
        | PduRequest::ReadInputRegisters { address, quantity } => {
            data.put_u16(*address);
            data.put_u16(*quantity);
        }
        PduRequest::WriteSingleCoil { address, value } => {
            data.put_u16(*address);
            data.put_u16(bool_to_coil(*value));
        }
        PduRequest::WriteSingleRegister { address, value } => {
            data.put_u16(*address);
            data.put_u16(*value);
        }
        PduRequest::WriteMultipleCoils { address, values } => {
            data.put_u16(*address);
            data.put_u16(values.len() as u16);
            let packed = pack_bits(values);
            data.put_u8(packed.len() as u8);
            data.put_slice(&packed);
        }
        PduRequest::WriteMultipleRegisters { address, values } => {
            data.put_u16(*address);
            data.put_u16(values.len() as u16);
            data.put_u8((values.len() * 2) as u8);
            for value in values {
                data.put_u16(*value);
            }
        }
    }
    data.freeze()
}

fn request_byte_count(req: &PduRequest) -> usize {
    match req {
        PduRequest::ReadCoils { .. }
        | PduRequest::ReadDiscreteInputs { .. }
        | PduRequest::ReadHoldingRegisters { .. }
        | PduRequest::ReadInputRegisters { .. }
        | PduRequest::WriteSingleCoil { .. }
        | PduRequest::WriteSingleRegister { .. } => 5,
        PduRequest::WriteMultipleCoils { values, .. } => 6 + pack_bits(values).len(),
        PduRequest::WriteMultipleRegisters { values, .. } => 6 + values.len() * 2,
    }
}

/// Encode a response payload for function `function`, the mirror of
/// [`encode_request`] used by the in-process dispatcher.
#[must_use]
pub(crate) fn encode_response(function: FunctionCode, data: &ResponseData) -> Bytes {
    let mut buf = BytesMut::new();
    buf.put_u8(function.value());
    match data {
        ResponseData::ReadBits { values } => {
            let packed = pack_bits(values);
            buf.put_u8(packed.len() as u8);
            buf.put_slice(&packed);
        }
        ResponseData::ReadRegisters { values } => {
            buf.put_u8((values.len() * 2) as u8);
            for v in values {
                buf.put_u16(*v);
            }
        }
        ResponseData::WriteSingleCoil { address, value } => {
            buf.put_u16(*address);
            buf.put_u16(bool_to_coil(*value));
        }
        ResponseData::WriteSingleRegister { address, value } => {
            buf.put_u16(*address);
            buf.put_u16(*value);
        }
        ResponseData::WriteMultiple { address, quantity } => {
            buf.put_u16(*address);
            buf.put_u16(*quantity);
        }
    }
    buf.freeze()
}

/// Encode a well-formed exception response PDU: `function + 0x80`, code.
#[must_use]
pub fn create_exception(function: FunctionCode, code: ExceptionCode) -> Bytes {
    let mut buf = BytesMut::with_capacity(2);
    buf.put_u8(function.exception_value());
    buf.put_u8(code.wire_value());
    buf.freeze()
}

/// Decode a response PDU for the request it answers.
///
/// Dispatches purely on the response's own function code byte, the same way
/// a slave's reply is interpreted on the wire. `request` is consulted only
/// to supply the exact quantity a read-bits response should be truncated
/// to; it never gates which branch runs. A function code this decoder does
/// not recognize as one of the eight response shapes is not a transport
/// failure — it is reported the same way a slave-raised exception is, with
/// [`ExceptionCode::IllegalFunction`], matching what the wire algorithm
/// says to do with an unrecognized code.
pub fn decode_response(request: &PduRequest, mut bytes: Bytes) -> std::io::Result<PduOutcome> {
    if bytes.is_empty() {
        return Err(Error::new(ErrorKind::UnexpectedEof, "empty response PDU"));
    }
    let fn_code = bytes[0];
    if fn_code & 0x80 != 0 {
        let function = FunctionCode::try_from(fn_code & 0x7F)
            .map_err(|e| Error::new(ErrorKind::InvalidData, e.to_string()))?;
        if bytes.len() < 2 {
            return Err(Error::new(ErrorKind::UnexpectedEof, "truncated exception"));
        }
        let code = ExceptionCode::from_wire_value(bytes[1]);
        return Ok(Err(PduException { function, code }));
    }
    bytes.advance(1);
    let data = match fn_code {
        0x01 | 0x02 => {
            let byte_count = read_u8(&mut bytes)?;
            require_len(&bytes, byte_count as usize)?;
            let quantity = request.expected_quantity().unwrap_or(u16::from(byte_count) * 8);
            ResponseData::ReadBits {
                values: unpack_bits(&bytes[..byte_count as usize], quantity as usize),
            }
        }
        0x03 | 0x04 => {
            let byte_count = read_u8(&mut bytes)?;
            require_len(&bytes, byte_count as usize)?;
            let mut values = Vec::with_capacity(byte_count as usize / 2);
            let mut window = bytes.slice(0..byte_count as usize);
            while window.remaining() >= 2 {
                values.push(window.get_u16());
            }
            ResponseData::ReadRegisters { values }
        }
        0x05 => {
            let address = read_u16(&mut bytes)?;
            let value = coil_to_bool(read_u16(&mut bytes)?)?;
            ResponseData::WriteSingleCoil { address, value }
        }
        0x06 => {
            let address = read_u16(&mut bytes)?;
            let value = read_u16(&mut bytes)?;
            ResponseData::WriteSingleRegister { address, value }
        }
        0x0F | 0x10 => {
            let address = read_u16(&mut bytes)?;
            let quantity = read_u16(&mut bytes)?;
            ResponseData::WriteMultiple { address, quantity }
        }
        _ => {
            let function = FunctionCode::try_from(fn_code).unwrap_or(request.function_code());
            return Ok(Err(PduException {
                function,
                code: ExceptionCode::IllegalFunction,
            }));
        }
    };
    Ok(Ok(data))
}

/// Decode a request PDU, for the in-process dispatcher's server side.
pub(crate) fn decode_request(mut bytes: Bytes) -> Result<PduRequest, ExceptionCode> {
    if bytes.is_empty() {
        return Err(ExceptionCode::IllegalDataValue);
    }
    let fn_code = read_u8(&mut bytes).map_err(|_| ExceptionCode::IllegalDataValue)?;
    let req = match fn_code {
        0x01 => PduRequest::read_coils(req_u16(&mut bytes)?, req_u16(&mut bytes)?),
        0x02 => PduRequest::read_discrete_inputs(req_u16(&mut bytes)?, req_u16(&mut bytes)?),
        0x03 => PduRequest::read_holding_registers(req_u16(&mut bytes)?, req_u16(&mut bytes)?),
        0x04 => PduRequest::read_input_registers(req_u16(&mut bytes)?, req_u16(&mut bytes)?),
        0x05 => {
            let address = req_u16(&mut bytes)?;
            let value = coil_to_bool(req_u16(&mut bytes)?).map_err(|_| ExceptionCode::IllegalDataValue)?;
            Ok(PduRequest::write_single_coil(address, value))
        }
        0x06 => {
            let address = req_u16(&mut bytes)?;
            let value = req_u16(&mut bytes)?;
            Ok(PduRequest::write_single_register(address, value))
        }
        0x0F => {
            let address = req_u16(&mut bytes)?;
            let quantity = req_u16(&mut bytes)?;
            let byte_count = read_u8(&mut bytes).map_err(|_| ExceptionCode::IllegalDataValue)?;
            require_len(&bytes, byte_count as usize).map_err(|_| ExceptionCode::IllegalDataValue)?;
            let values = unpack_bits(&bytes[..byte_count as usize], quantity as usize);
            PduRequest::write_multiple_coils(address, values)
        }
        0x10 => {
            let address = req_u16(&mut bytes)?;
            let quantity = req_u16(&mut bytes)?;
            let byte_count = read_u8(&mut bytes).map_err(|_| ExceptionCode::IllegalDataValue)?;
            require_len(&bytes, byte_count as usize).map_err(|_| ExceptionCode::IllegalDataValue)?;
            let mut window = bytes.slice(0..byte_count as usize);
            let mut values = Vec::with_capacity(quantity as usize);
            while window.remaining() >= 2 {
                values.push(window.get_u16());
            }
            PduRequest::write_multiple_registers(address, values)
        }
        _ => return Err(ExceptionCode::IllegalFunction),
    };
    req.map_err(|_| ExceptionCode::IllegalDataValue)
}

fn req_u16(bytes: &mut Bytes) -> Result<u16, ExceptionCode> {
    read_u16(bytes).map_err(|_| ExceptionCode::IllegalDataValue)
}

fn read_u8(bytes: &mut Bytes) -> std::io::Result<u8> {
    if bytes.is_empty() {
        return Err(Error::new(ErrorKind::UnexpectedEof, "expected one byte"));
    }
    Ok(bytes.get_u8())
}

fn read_u16(bytes: &mut Bytes) -> std::io::Result<u16> {
    if bytes.remaining() < 2 {
        return Err(Error::new(ErrorKind::UnexpectedEof, "expected two bytes"));
    }
    Ok(bytes.get_u16())
}

fn require_len(bytes: &Bytes, len: usize) -> std::io::Result<()> {
    if bytes.len() < len {
        return Err(Error::new(ErrorKind::InvalidData, "invalid byte count"));
    }
    Ok(())
}

fn bool_to_coil(state: bool) -> u16 {
    if state {
        0xFF00
    } else {
        0x0000
    }
}

fn coil_to_bool(coil: u16) -> std::io::Result<bool> {
    match coil {
        0xFF00 => Ok(true),
        0x0000 => Ok(false),
        other => Err(Error::new(
            ErrorKind::InvalidData,
            format!("invalid coil value: 0x{other:04X}"),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_read_coils() {
        let req = PduRequest::read_coils(0x12, 4).unwrap();
        let bytes = encode_request(&req);
        assert_eq!(&bytes[..], &[0x01, 0x00, 0x12, 0x00, 0x04]);
    }

    #[test]
    fn encode_write_multiple_coils() {
        let req = PduRequest::write_multiple_coils(0x3311, vec![true, false, true, true]).unwrap();
        let bytes = encode_request(&req);
        assert_eq!(
            &bytes[..],
            &[0x0F, 0x33, 0x11, 0x00, 0x04, 0x01, 0b_0000_1101]
        );
    }

    #[test]
    fn encode_write_multiple_registers() {
        let req = PduRequest::write_multiple_registers(0x06, vec![0xABCD, 0xEF12]).unwrap();
        let bytes = encode_request(&req);
        assert_eq!(
            &bytes[..],
            &[0x10, 0x00, 0x06, 0x00, 0x02, 0x04, 0xAB, 0xCD, 0xEF, 0x12]
        );
    }

    #[test]
    fn exception_pdu_bytes() {
        let bytes = create_exception(FunctionCode::READ_HOLDING_REGISTERS, ExceptionCode::IllegalDataAddress);
        assert_eq!(&bytes[..], &[0x83, 0x02]);
    }

    #[test]
    fn decode_read_holding_registers_response() {
        let req = PduRequest::read_holding_registers(0x09, 2).unwrap();
        let bytes = Bytes::from_static(&[0x03, 0x04, 0xAA, 0x00, 0x11, 0x11]);
        let outcome = decode_response(&req, bytes).unwrap().unwrap();
        assert_eq!(
            outcome,
            ResponseData::ReadRegisters {
                values: vec![0xAA00, 0x1111]
            }
        );
    }

    #[test]
    fn decode_read_coils_truncates_to_requested_quantity() {
        let req = PduRequest::read_coils(0, 5).unwrap();
        let bytes = Bytes::from_static(&[0x01, 0x01, 0b_0001_1001]);
        let outcome = decode_response(&req, bytes).unwrap().unwrap();
        assert_eq!(
            outcome,
            ResponseData::ReadBits {
                values: vec![true, false, false, true, true]
            }
        );
    }

    #[test]
    fn decode_exception_response() {
        let req = PduRequest::read_holding_registers(0x09, 2).unwrap();
        let bytes = Bytes::from_static(&[0x83, 0x02]);
        let outcome = decode_response(&req, bytes).unwrap();
        assert_eq!(
            outcome,
            Err(PduException {
                function: FunctionCode::READ_HOLDING_REGISTERS,
                code: ExceptionCode::IllegalDataAddress,
            })
        );
    }

    #[test]
    fn decode_response_reports_unknown_function_as_exception() {
        let req = PduRequest::read_holding_registers(0x09, 2).unwrap();
        let bytes = Bytes::from_static(&[0x2B]);
        let outcome = decode_response(&req, bytes).unwrap();
        assert_eq!(
            outcome,
            Err(PduException {
                function: FunctionCode::try_from(0x2B).unwrap(),
                code: ExceptionCode::IllegalFunction,
            })
        );
    }

    #[test]
    fn decode_response_dispatches_on_its_own_function_code() {
        // A response PDU decodes by its own function code, independent of
        // what the request happened to ask for.
        let req = PduRequest::write_single_coil(0x10, true);
        let bytes = Bytes::from_static(&[0x03, 0x02, 0x00, 0x2A]);
        let outcome = decode_response(&req, bytes).unwrap().unwrap();
        assert_eq!(outcome, ResponseData::ReadRegisters { values: vec![0x002A] });
    }

    #[test]
    fn decode_request_dispatches_read_coils() {
        let bytes = Bytes::from_static(&[0x01, 0x00, 0x12, 0x00, 0x04]);
        let req = decode_request(bytes).unwrap();
        assert_eq!(req, PduRequest::ReadCoils { address: 0x12, quantity: 4 });
    }

    #[test]
    fn decode_request_rejects_unknown_function() {
        let bytes = Bytes::from_static(&[0x2B]);
        assert_eq!(decode_request(bytes).unwrap_err(), ExceptionCode::IllegalFunction);
    }
}
