// SPDX-FileCopyrightText: Copyright (c) 2017-2024 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The TCP single-exchange client, matching responses to requests by
//! `(transaction_id, unit_id)`.

use std::{
    fmt,
    io::{Error as IoError, ErrorKind},
    sync::atomic::{AtomicU16, Ordering},
};

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::codec::Framed;

use crate::{
    adu::tcp::{ClientCodec, Header, RequestAdu},
    error::Error,
    pdu::{self, PduRequest, ResponseData},
    slave::{Slave, SlaveContext, SlaveId},
};

use super::Client as ClientTrait;

const INITIAL_TRANSACTION_ID: u16 = 0;

pub(crate) struct TcpClient<T> {
    framed: Framed<T, ClientCodec>,
    unit_id: SlaveId,
    transaction_id: AtomicU16,
}

impl<T> TcpClient<T>
where
    T: AsyncRead + AsyncWrite + Unpin,
{
    pub(crate) fn new(transport: T, slave: Slave) -> Self {
        Self {
            framed: Framed::new(transport, ClientCodec::default()),
            unit_id: slave.into(),
            transaction_id: AtomicU16::new(INITIAL_TRANSACTION_ID),
        }
    }

    fn next_transaction_id(&self) -> u16 {
        self.transaction_id.fetch_add(1, Ordering::Relaxed)
    }

    fn next_header(&self) -> Header {
        Header {
            transaction_id: self.next_transaction_id(),
            unit_id: self.unit_id,
        }
    }
}

impl<T> SlaveContext for TcpClient<T> {
    fn set_slave(&mut self, slave: Slave) {
        self.unit_id = slave.into();
    }
}

#[async_trait]
impl<T> ClientTrait for TcpClient<T>
where
    T: AsyncRead + AsyncWrite + Send + Unpin + fmt::Debug,
{
    async fn call(&mut self, request: PduRequest) -> Result<ResponseData, Error> {
        // A stale partial read left over from a previous, dropped exchange
        // must never be mistaken for this one's response.
        self.framed.read_buffer_mut().clear();

        let hdr = self.next_header();
        let pdu = pdu::encode_request(&request);
        self.framed.send(RequestAdu { hdr, pdu }).await?;

        let response_adu = self
            .framed
            .next()
            .await
            .ok_or_else(|| IoError::from(ErrorKind::BrokenPipe))??;

        if response_adu.hdr != hdr {
            return Err(Error::Transport(IoError::new(
                ErrorKind::InvalidData,
                format!(
                    "response header {:?} does not match request header {:?}",
                    response_adu.hdr, hdr
                ),
            )));
        }

        match pdu::decode_response(&request, response_adu.pdu)? {
            Ok(data) => Ok(data),
            Err(exception) => Err(Error::Exception(exception)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adu::tcp::{ResponseAdu, ServerCodec};
    use crate::dispatcher::{dispatch, HandlerSet};
    use tokio::io::duplex;

    #[tokio::test]
    async fn call_round_trips_through_a_mock_server() {
        let (client_io, server_io) = duplex(1024);
        let mut client = TcpClient::new(client_io, Slave(0x11));

        let server_task = tokio::spawn(async move {
            let mut server = Framed::new(server_io, ServerCodec::default());
            let mut handlers = HandlerSet::new();
            handlers.read_holding_registers =
                Some(Box::new(|address, quantity| Ok((0..quantity).map(|i| address + i).collect())));

            let request = server.next().await.unwrap().unwrap();
            let response_pdu = dispatch(&handlers, request.pdu);
            server
                .send(ResponseAdu { hdr: request.hdr, pdu: response_pdu })
                .await
                .unwrap();
        });

        let request = PduRequest::read_holding_registers(0x09, 3).unwrap();
        let response = client.call(request).await.unwrap();
        assert_eq!(response, ResponseData::ReadRegisters { values: vec![9, 10, 11] });

        server_task.await.unwrap();
    }

    #[tokio::test]
    async fn call_surfaces_a_slave_exception() {
        let (client_io, server_io) = duplex(1024);
        let mut client = TcpClient::new(client_io, Slave::tcp_device());

        let server_task = tokio::spawn(async move {
            let mut server = Framed::new(server_io, ServerCodec::default());
            let handlers = HandlerSet::new();
            let request = server.next().await.unwrap().unwrap();
            let response_pdu = dispatch(&handlers, request.pdu);
            server
                .send(ResponseAdu { hdr: request.hdr, pdu: response_pdu })
                .await
                .unwrap();
        });

        let request = PduRequest::read_coils(0, 1).unwrap();
        let err = client.call(request).await.unwrap_err();
        assert!(matches!(err, Error::Exception(ex) if ex.code == crate::pdu::ExceptionCode::IllegalFunction));

        server_task.await.unwrap();
    }
}
