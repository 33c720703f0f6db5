// SPDX-FileCopyrightText: Copyright (c) 2017-2024 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! MBAP framing for Modbus TCP.

use byteorder::{BigEndian, ByteOrder};
use bytes::{BufMut, Bytes, BytesMut};
use std::io::{Error, ErrorKind, Result};
use tokio_util::codec::{Decoder, Encoder};

pub(crate) type TransactionId = u16;
pub(crate) type UnitId = u8;

const HEADER_LEN: usize = 7;
const PROTOCOL_ID: u16 = 0x0000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Header {
    pub(crate) transaction_id: TransactionId,
    pub(crate) unit_id: UnitId,
}

#[derive(Debug)]
pub(crate) struct RequestAdu {
    pub(crate) hdr: Header,
    pub(crate) pdu: Bytes,
}

#[derive(Debug)]
pub(crate) struct ResponseAdu {
    pub(crate) hdr: Header,
    pub(crate) pdu: Bytes,
}

/// Splits MBAP-framed bytes into `(Header, pdu bytes)`, shared by the
/// client and the in-process dispatcher codecs.
#[derive(Debug, Default)]
pub(crate) struct AduDecoder;

impl Decoder for AduDecoder {
    type Item = (Header, Bytes);
    type Error = Error;

    fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<(Header, Bytes)>> {
        if buf.len() < HEADER_LEN {
            return Ok(None);
        }

        let len = usize::from(BigEndian::read_u16(&buf[4..6]));
        let pdu_len = if len > 0 {
            len - 1
        } else {
            return Err(Error::new(
                ErrorKind::InvalidData,
                format!("invalid MBAP length field: {len}"),
            ));
        };
        if buf.len() < HEADER_LEN + pdu_len {
            return Ok(None);
        }

        let header_data = buf.split_to(HEADER_LEN);

        let protocol_id = BigEndian::read_u16(&header_data[2..4]);
        if protocol_id != PROTOCOL_ID {
            return Err(Error::new(
                ErrorKind::InvalidData,
                format!("invalid protocol identifier: expected 0, got {protocol_id}"),
            ));
        }

        let transaction_id = BigEndian::read_u16(&header_data[0..2]);
        let unit_id = header_data[6];

        let pdu_data = buf.split_to(pdu_len).freeze();

        Ok(Some((Header { transaction_id, unit_id }, pdu_data)))
    }
}

/// Codec used by the master's background task.
#[derive(Debug, Default)]
pub(crate) struct ClientCodec {
    decoder: AduDecoder,
}

impl Decoder for ClientCodec {
    type Item = ResponseAdu;
    type Error = Error;

    fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<ResponseAdu>> {
        Ok(self
            .decoder
            .decode(buf)?
            .map(|(hdr, pdu)| ResponseAdu { hdr, pdu }))
    }
}

impl Encoder<RequestAdu> for ClientCodec {
    type Error = Error;

    fn encode(&mut self, adu: RequestAdu, buf: &mut BytesMut) -> Result<()> {
        let RequestAdu { hdr, pdu } = adu;
        buf.reserve(pdu.len() + HEADER_LEN);
        buf.put_u16(hdr.transaction_id);
        buf.put_u16(PROTOCOL_ID);
        buf.put_u16(u16_len(pdu.len() + 1));
        buf.put_u8(hdr.unit_id);
        buf.put_slice(&pdu);
        Ok(())
    }
}

/// Codec used by the in-process dispatcher that backs the integration
/// test suite.
#[derive(Debug, Default)]
pub(crate) struct ServerCodec {
    decoder: AduDecoder,
}

impl Decoder for ServerCodec {
    type Item = RequestAdu;
    type Error = Error;

    fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<RequestAdu>> {
        Ok(self
            .decoder
            .decode(buf)?
            .map(|(hdr, pdu)| RequestAdu { hdr, pdu }))
    }
}

impl Encoder<ResponseAdu> for ServerCodec {
    type Error = Error;

    fn encode(&mut self, adu: ResponseAdu, buf: &mut BytesMut) -> Result<()> {
        let ResponseAdu { hdr, pdu } = adu;
        buf.reserve(pdu.len() + HEADER_LEN);
        buf.put_u16(hdr.transaction_id);
        buf.put_u16(PROTOCOL_ID);
        buf.put_u16(u16_len(pdu.len() + 1));
        buf.put_u8(hdr.unit_id);
        buf.put_slice(&pdu);
        Ok(())
    }
}

fn u16_len(len: usize) -> u16 {
    debug_assert!(len <= usize::from(u16::MAX));
    len as u16
}
