// SPDX-FileCopyrightText: Copyright (c) 2017-2024 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The RTU single-exchange client.
//!
//! RTU carries no transaction identifier, so there is nothing to match a
//! response against beyond "the next frame that arrives". This is only
//! sound because the caller guarantees at most one request is ever in
//! flight on a given serial line at a time; `call` asserts that in debug
//! builds by checking the echoed slave id.

use std::{
    fmt,
    io::{Error as IoError, ErrorKind},
};

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::codec::Framed;

use crate::{
    adu::rtu::{ClientCodec, Header, RequestAdu},
    error::Error,
    pdu::{self, PduRequest, ResponseData},
    slave::{Slave, SlaveContext, SlaveId},
};

use super::Client as ClientTrait;

pub(crate) struct RtuClient<T> {
    framed: Framed<T, ClientCodec>,
    slave_id: SlaveId,
}

impl<T> RtuClient<T>
where
    T: AsyncRead + AsyncWrite + Unpin,
{
    pub(crate) fn new(transport: T, slave: Slave) -> Self {
        Self {
            framed: Framed::new(transport, ClientCodec::default()),
            slave_id: slave.into(),
        }
    }
}

impl<T> SlaveContext for RtuClient<T> {
    fn set_slave(&mut self, slave: Slave) {
        self.slave_id = slave.into();
    }
}

#[async_trait]
impl<T> ClientTrait for RtuClient<T>
where
    T: AsyncRead + AsyncWrite + Send + Unpin + fmt::Debug,
{
    async fn call(&mut self, request: PduRequest) -> Result<ResponseData, Error> {
        self.framed.read_buffer_mut().clear();

        let hdr = Header { slave_id: self.slave_id };
        let pdu = pdu::encode_request(&request);
        self.framed.send(RequestAdu { hdr, pdu }).await?;

        let response_adu = self
            .framed
            .next()
            .await
            .ok_or_else(|| IoError::from(ErrorKind::BrokenPipe))??;

        debug_assert_eq!(
            response_adu.hdr.slave_id, self.slave_id,
            "RTU response matching relies on at most one in-flight request"
        );

        match pdu::decode_response(&request, response_adu.pdu)? {
            Ok(data) => Ok(data),
            Err(exception) => Err(Error::Exception(exception)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adu::rtu::{ResponseAdu, ServerCodec};
    use crate::dispatcher::{dispatch, HandlerSet};
    use tokio::io::duplex;

    #[tokio::test]
    async fn call_round_trips_through_a_mock_server() {
        let (client_io, server_io) = duplex(1024);
        let mut client = RtuClient::new(client_io, Slave(0x01));

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

        let request = PduRequest::read_holding_registers(0x82B, 2).unwrap();
        let response = client.call(request).await.unwrap();
        assert_eq!(response, ResponseData::ReadRegisters { values: vec![0x82B, 0x82C] });

        server_task.await.unwrap();
    }
}
