// SPDX-FileCopyrightText: Copyright (c) 2017-2024 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Application Data Unit framing: wraps a PDU's raw bytes with the
//! transport-specific envelope (MBAP header for TCP, slave address + CRC
//! for RTU) as a [`tokio_util::codec`] pair.
//!
//! Unlike the PDU layer, an ADU carries no function-code knowledge: it
//! only knows how to find where one frame ends and the next begins. The
//! caller (the client/master layer) supplies already-encoded PDU bytes on
//! the way out, and is responsible for re-interpreting the raw PDU bytes
//! on the way back in using the original request as context.

#[cfg(feature = "rtu")]
pub(crate) mod rtu;
#[cfg(feature = "tcp")]
pub(crate) mod tcp;
