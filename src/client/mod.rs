// SPDX-FileCopyrightText: Copyright (c) 2017-2024 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The low-level, single-exchange client: one [`Client::call`] sends one
//! request ADU and waits for its matching response ADU. No retry, no
//! timeout, no queueing — that is the master engine's job, one layer up.

#[cfg(feature = "rtu")]
pub(crate) mod rtu;
#[cfg(feature = "tcp")]
pub(crate) mod tcp;

use async_trait::async_trait;

use crate::{error::Error, pdu::PduRequest, pdu::ResponseData, slave::SlaveContext};

/// A transport-bound Modbus client capable of a single request/response
/// exchange.
#[async_trait]
pub(crate) trait Client: SlaveContext + Send {
    async fn call(&mut self, request: PduRequest) -> Result<ResponseData, Error>;
}
