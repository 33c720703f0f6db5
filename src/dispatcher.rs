// SPDX-FileCopyrightText: Copyright (c) 2017-2024 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! A minimal in-process PDU dispatcher: one handler slot per supported
//! function code. Exists to exercise the codec and the master engine from
//! both ends inside the test suite; it is not a network-listening server.

use bytes::Bytes;

use crate::pdu::{self, ExceptionCode, FunctionCode, PduRequest, ResponseData};
use crate::transport::ByteTransport;

type CoilsHandler = Box<dyn Fn(u16, u16) -> Result<Vec<bool>, ExceptionCode> + Send + Sync>;
type RegistersHandler = Box<dyn Fn(u16, u16) -> Result<Vec<u16>, ExceptionCode> + Send + Sync>;
type WriteCoilHandler = Box<dyn Fn(u16, bool) -> Result<(), ExceptionCode> + Send + Sync>;
type WriteRegisterHandler = Box<dyn Fn(u16, u16) -> Result<(), ExceptionCode> + Send + Sync>;
type WriteCoilsHandler = Box<dyn Fn(u16, &[bool]) -> Result<(), ExceptionCode> + Send + Sync>;
type WriteRegistersHandler = Box<dyn Fn(u16, &[u16]) -> Result<(), ExceptionCode> + Send + Sync>;

/// One handler slot per supported function code. A `None` slot answers
/// with `IllegalFunction`.
#[derive(Default)]
pub struct HandlerSet {
    pub read_coils: Option<CoilsHandler>,
    pub read_discrete_inputs: Option<CoilsHandler>,
    pub read_holding_registers: Option<RegistersHandler>,
    pub read_input_registers: Option<RegistersHandler>,
    pub write_single_coil: Option<WriteCoilHandler>,
    pub write_single_register: Option<WriteRegisterHandler>,
    pub write_multiple_coils: Option<WriteCoilsHandler>,
    pub write_multiple_registers: Option<WriteRegistersHandler>,
}

impl HandlerSet {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

/// Parse a request PDU, route it to the matching handler in `handlers`,
/// and encode the resulting response or exception PDU.
#[must_use]
pub fn dispatch(handlers: &HandlerSet, request_pdu: Bytes) -> Bytes {
    let request = match pdu::decode_request(request_pdu) {
        Ok(req) => req,
        // The function code couldn't even be parsed; the wire byte that
        // would identify the right exception function is unavailable, so
        // 0x01 is used as the nearest sensible stand-in.
        Err(code) => {
            return pdu::create_exception(FunctionCode::READ_COILS, code);
        }
    };
    let function = request.function_code();

    let outcome = match &request {
        PduRequest::ReadCoils { address, quantity } => handlers
            .read_coils
            .as_ref()
            .ok_or(ExceptionCode::IllegalFunction)
            .and_then(|h| h(*address, *quantity))
            .map(|values| ResponseData::ReadBits { values }),
        PduRequest::ReadDiscreteInputs { address, quantity } => handlers
            .read_discrete_inputs
            .as_ref()
            .ok_or(ExceptionCode::IllegalFunction)
            .and_then(|h| h(*address, *quantity))
            .map(|values| ResponseData::ReadBits { values }),
        PduRequest::ReadHoldingRegisters { address, quantity } => handlers
            .read_holding_registers
            .as_ref()
            .ok_or(ExceptionCode::IllegalFunction)
            .and_then(|h| h(*address, *quantity))
            .map(|values| ResponseData::ReadRegisters { values }),
        PduRequest::ReadInputRegisters { address, quantity } => handlers
            .read_input_registers
            .as_ref()
            .ok_or(ExceptionCode::IllegalFunction)
            .and_then(|h| h(*address, *quantity))
            .map(|values| ResponseData::ReadRegisters { values }),
        PduRequest::WriteSingleCoil { address, value } => handlers
            .write_single_coil
            .as_ref()
            .ok_or(ExceptionCode::IllegalFunction)
            .and_then(|h| h(*address, *value))
            .map(|()| ResponseData::WriteSingleCoil { address: *address, value: *value }),
        PduRequest::WriteSingleRegister { address, value } => handlers
            .write_single_register
            .as_ref()
            .ok_or(ExceptionCode::IllegalFunction)
            .and_then(|h| h(*address, *value))
            .map(|()| ResponseData::WriteSingleRegister { address: *address, value: *value }),
        PduRequest::WriteMultipleCoils { address, values } => handlers
            .write_multiple_coils
            .as_ref()
            .ok_or(ExceptionCode::IllegalFunction)
            .and_then(|h| h(*address, values))
            .map(|()| ResponseData::WriteMultiple { address: *address, quantity: values.len() as u16 }),
        PduRequest::WriteMultipleRegisters { address, values } => handlers
            .write_multiple_registers
            .as_ref()
            .ok_or(ExceptionCode::IllegalFunction)
            .and_then(|h| h(*address, values))
            .map(|()| ResponseData::WriteMultiple { address: *address, quantity: values.len() as u16 }),
    };

    match outcome {
        Ok(data) => pdu::encode_response(function, &data),
        Err(code) => pdu::create_exception(function, code),
    }
}

/// Drives `handlers` against one TCP-framed connection until it closes.
/// Not a network server in its own right — the caller supplies an already
/// accepted transport (a `TcpStream`, or an in-memory duplex half in
/// tests).
#[cfg(feature = "tcp")]
pub async fn serve_tcp<T>(transport: T, handlers: HandlerSet)
where
    T: ByteTransport,
{
    use crate::adu::tcp::{ResponseAdu, ServerCodec};
    use futures_util::{SinkExt, StreamExt};
    use tokio_util::codec::Framed;

    let mut framed = Framed::new(transport, ServerCodec::default());
    while let Some(Ok(request)) = framed.next().await {
        let pdu = dispatch(&handlers, request.pdu);
        if framed
            .send(ResponseAdu { hdr: request.hdr, pdu })
            .await
            .is_err()
        {
            break;
        }
    }
}

/// Drives `handlers` against one RTU-framed connection until it closes.
#[cfg(feature = "rtu")]
pub async fn serve_rtu<T>(transport: T, handlers: HandlerSet)
where
    T: ByteTransport,
{
    use crate::adu::rtu::{ResponseAdu, ServerCodec};
    use futures_util::{SinkExt, StreamExt};
    use tokio_util::codec::Framed;

    let mut framed = Framed::new(transport, ServerCodec::default());
    while let Some(Ok(request)) = framed.next().await {
        let pdu = dispatch(&handlers, request.pdu);
        if framed
            .send(ResponseAdu { hdr: request.hdr, pdu })
            .await
            .is_err()
        {
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unsupported_function_returns_illegal_function() {
        let handlers = HandlerSet::new();
        let req = pdu::encode_request(&PduRequest::read_coils(0, 1).unwrap());
        let rsp = dispatch(&handlers, req);
        assert_eq!(&rsp[..], &[0x81, 0x01]);
    }

    #[test]
    fn read_holding_registers_round_trips() {
        let mut handlers = HandlerSet::new();
        handlers.read_holding_registers = Some(Box::new(|address, quantity| {
            Ok((0..quantity).map(|i| address + i).collect())
        }));
        let req = pdu::encode_request(&PduRequest::read_holding_registers(10, 3).unwrap());
        let rsp = dispatch(&handlers, req);
        let request = PduRequest::read_holding_registers(10, 3).unwrap();
        let decoded = pdu::decode_response(&request, rsp).unwrap().unwrap();
        assert_eq!(
            decoded,
            ResponseData::ReadRegisters { values: vec![10, 11, 12] }
        );
    }

    #[test]
    fn handler_can_raise_exception() {
        let mut handlers = HandlerSet::new();
        handlers.read_coils = Some(Box::new(|_, _| Err(ExceptionCode::IllegalDataAddress)));
        let req = pdu::encode_request(&PduRequest::read_coils(0, 1).unwrap());
        let rsp = dispatch(&handlers, req);
        assert_eq!(&rsp[..], &[0x81, 0x02]);
    }
}
