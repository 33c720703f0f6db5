// SPDX-FileCopyrightText: Copyright (c) 2017-2024 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! RTU framing: slave address + PDU + CRC-16.
//!
//! The function code alone does not say how long a PDU is, so the decoder
//! keeps retrying a bounded number of times: on a CRC mismatch it drops
//! the leading byte (a classic RTU desync recovery, the receiver resolves
//! a corrupted frame boundary by resynchronizing on the next valid CRC)
//! and tries again, logging what it dropped.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use smallvec::SmallVec;
use std::io::{Cursor, Error, ErrorKind, Result};
use tokio_util::codec::{Decoder, Encoder};

use crate::slave::SlaveId;

// [Modbus over Serial Line Specification V1.02, 2.5.1.1]: max RTU frame is
// 256 bytes.
const MAX_FRAME_LEN: usize = 256;
const CRC_LEN: usize = 2;

type DroppedBytes = SmallVec<[u8; MAX_FRAME_LEN]>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Header {
    pub(crate) slave_id: SlaveId,
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

fn calc_crc(data: &[u8]) -> u16 {
    let mut crc: u16 = 0xFFFF;
    for x in data {
        crc ^= u16::from(*x);
        for _ in 0..8 {
            let odd = (crc & 0x0001) != 0;
            crc >>= 1;
            if odd {
                crc ^= 0xA001;
            }
        }
    }
    crc << 8 | crc >> 8
}

fn check_crc(adu_data: &[u8], expected_crc: u16) -> Result<()> {
    let actual = calc_crc(adu_data);
    if expected_crc != actual {
        return Err(Error::new(
            ErrorKind::InvalidData,
            format!("invalid CRC: expected 0x{expected_crc:04X}, computed 0x{actual:04X}"),
        ));
    }
    Ok(())
}

#[derive(Debug, Default)]
struct FrameDecoder {
    dropped_bytes: DroppedBytes,
}

impl FrameDecoder {
    fn decode(&mut self, buf: &mut BytesMut, pdu_len: usize) -> Result<Option<(SlaveId, Bytes)>> {
        let adu_len = 1 + pdu_len;
        if buf.len() < adu_len + CRC_LEN {
            return Ok(None);
        }

        let mut adu_buf = buf.split_to(adu_len);
        let crc_buf = buf.split_to(CRC_LEN);

        use byteorder::{BigEndian, ReadBytesExt};
        let crc_result = Cursor::new(&crc_buf)
            .read_u16::<BigEndian>()
            .and_then(|crc| check_crc(&adu_buf, crc));

        if let Err(err) = crc_result {
            let remainder = buf.split();
            debug_assert!(buf.is_empty());
            buf.unsplit(adu_buf);
            buf.unsplit(crc_buf);
            buf.unsplit(remainder);
            return Err(err);
        }

        if !self.dropped_bytes.is_empty() {
            log::warn!(
                "decoded frame after dropping {} byte(s): {:X?}",
                self.dropped_bytes.len(),
                self.dropped_bytes
            );
            self.dropped_bytes.clear();
        }

        let slave_id = adu_buf.split_to(1)[0];
        Ok(Some((slave_id, adu_buf.freeze())))
    }

    fn recover_on_error(&mut self, buf: &mut BytesMut) {
        debug_assert!(!buf.is_empty());
        let first = buf[0];
        log::debug!("dropped leading byte 0x{first:02X} while resynchronizing");
        if self.dropped_bytes.len() >= MAX_FRAME_LEN {
            log::error!(
                "giving up resynchronization after dropping {} byte(s)",
                self.dropped_bytes.len()
            );
            self.dropped_bytes.clear();
        }
        self.dropped_bytes.push(first);
        buf.advance(1);
    }
}

fn get_request_pdu_len(adu_buf: &BytesMut) -> Result<Option<usize>> {
    let Some(&fn_code) = adu_buf.get(1) else {
        return Ok(None);
    };
    let len = match fn_code {
        0x01..=0x06 => 5,
        0x0F | 0x10 => return Ok(adu_buf.get(6).map(|&n| 6 + usize::from(n))),
        _ => {
            return Err(Error::new(
                ErrorKind::InvalidData,
                format!("invalid function code: 0x{fn_code:02X}"),
            ))
        }
    };
    Ok(Some(len))
}

fn get_response_pdu_len(adu_buf: &BytesMut) -> Result<Option<usize>> {
    let Some(&fn_code) = adu_buf.get(1) else {
        return Ok(None);
    };
    let len = match fn_code {
        0x01..=0x04 => return Ok(adu_buf.get(2).map(|&n| 2 + usize::from(n))),
        0x05 | 0x06 | 0x0F | 0x10 => 5,
        0x81..=0xFF => 2,
        _ => {
            return Err(Error::new(
                ErrorKind::InvalidData,
                format!("invalid function code: 0x{fn_code:02X}"),
            ))
        }
    };
    Ok(Some(len))
}

fn decode<F>(
    kind: &str,
    frame_decoder: &mut FrameDecoder,
    get_pdu_len: F,
    buf: &mut BytesMut,
) -> Result<Option<(SlaveId, Bytes)>>
where
    F: Fn(&BytesMut) -> Result<Option<usize>>,
{
    const MAX_RETRIES: usize = 20;

    for _ in 0..MAX_RETRIES {
        let result = get_pdu_len(buf).and_then(|pdu_len| {
            let Some(pdu_len) = pdu_len else {
                return Ok(None);
            };
            frame_decoder.decode(buf, pdu_len)
        });

        if let Err(err) = result {
            log::warn!("failed to decode RTU {kind} frame: {err}");
            frame_decoder.recover_on_error(buf);
            continue;
        }
        return result;
    }

    log::error!("giving up decoding RTU {kind} frame after {MAX_RETRIES} retries");
    Err(Error::new(ErrorKind::InvalidData, "too many CRC retries"))
}

#[derive(Debug, Default)]
pub(crate) struct ClientCodec {
    decoder: FrameDecoder,
}

impl Decoder for ClientCodec {
    type Item = ResponseAdu;
    type Error = Error;

    fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<ResponseAdu>> {
        let Some((slave_id, pdu)) = decode("response", &mut self.decoder, get_response_pdu_len, buf)?
        else {
            return Ok(None);
        };
        Ok(Some(ResponseAdu { hdr: Header { slave_id }, pdu }))
    }
}

impl Encoder<RequestAdu> for ClientCodec {
    type Error = Error;

    fn encode(&mut self, adu: RequestAdu, buf: &mut BytesMut) -> Result<()> {
        let RequestAdu { hdr, pdu } = adu;
        buf.reserve(pdu.len() + 3);
        buf.put_u8(hdr.slave_id);
        buf.put_slice(&pdu);
        let crc = calc_crc(buf);
        buf.put_u16(crc);
        Ok(())
    }
}

#[derive(Debug, Default)]
pub(crate) struct ServerCodec {
    decoder: FrameDecoder,
}

impl Decoder for ServerCodec {
    type Item = RequestAdu;
    type Error = Error;

    fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<RequestAdu>> {
        let Some((slave_id, pdu)) = decode("request", &mut self.decoder, get_request_pdu_len, buf)?
        else {
            return Ok(None);
        };
        Ok(Some(RequestAdu { hdr: Header { slave_id }, pdu }))
    }
}

impl Encoder<ResponseAdu> for ServerCodec {
    type Error = Error;

    fn encode(&mut self, adu: ResponseAdu, buf: &mut BytesMut) -> Result<()> {
        let ResponseAdu { hdr, pdu } = adu;
        buf.reserve(pdu.len() + 3);
        buf.put_u8(hdr.slave_id);
        buf.put_slice(&pdu);
        let crc = calc_crc(buf);
        buf.put_u16(crc);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn crc_matches_known_vectors() {
        assert_eq!(calc_crc(&[0x01, 0x03, 0x08, 0x2B, 0x00, 0x02]), 0xB663);
        assert_eq!(calc_crc(&[0x01, 0x03, 0x04, 0x00, 0x20, 0x00, 0x00]), 0xFBF9);
    }

    #[test]
    fn encode_read_request() {
        let mut codec = ClientCodec::default();
        let mut buf = BytesMut::new();
        let pdu = Bytes::from_static(&[0x03, 0x08, 0x2B, 0x00, 0x02]);
        let adu = RequestAdu { hdr: Header { slave_id: 0x01 }, pdu };
        codec.encode(adu, &mut buf).unwrap();
        assert_eq!(&buf[..], &[0x01, 0x03, 0x08, 0x2B, 0x00, 0x02, 0xB6, 0x63]);
    }

    #[test]
    fn decode_rtu_message() {
        let mut codec = ClientCodec::default();
        let mut buf = BytesMut::from(
            &[0x01, 0x03, 0x04, 0x89, 0x02, 0x42, 0xC7, 0x00, 0x9D][..],
        );
        let adu = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(adu.hdr.slave_id, 0x01);
        assert_eq!(&adu.pdu[..], &[0x03, 0x04, 0x89, 0x02, 0x42, 0xC7]);
        assert_eq!(buf.len(), 0);
    }

    #[test]
    fn decode_drops_invalid_leading_bytes() {
        let mut codec = ClientCodec::default();
        let mut buf = BytesMut::from(
            &[0x42, 0x43, 0x01, 0x03, 0x04, 0x89, 0x02, 0x42, 0xC7, 0x00, 0x9D][..],
        );
        let adu = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(adu.hdr.slave_id, 0x01);
        assert_eq!(buf.len(), 0);
    }

    #[test]
    fn decode_partly_received_message() {
        let mut codec = ClientCodec::default();
        let mut buf = BytesMut::from(&[0x12, 0x02, 0x03, 0x00, 0x00, 0x00, 0x00][..]);
        assert!(codec.decode(&mut buf).unwrap().is_none());
        assert_eq!(buf.len(), 7);
    }
}
