// SPDX-FileCopyrightText: Copyright (c) 2017-2024 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Structured event hooks a [`crate::master::Master`] invokes, injected by
//! the caller instead of going through a process-global logger.
//!
//! This is separate from the ordinary `log::{trace,debug,warn,error}!`
//! diagnostics emitted by the codec and transport layers (dropped RTU
//! bytes, CRC mismatches, reconnect attempts) — those are unconditional
//! ambient diagnostics, not part of the programmatic surface, and every
//! caller gets them whether or not a [`LogSink`] is installed.

use std::time::Duration;

use crate::{error::MasterError, pdu::PduException, pdu::PduRequest, pdu::ResponseData};

/// Injected observer for a [`crate::master::Master`]'s request lifecycle
/// and connection lifecycle. Every method defaults to a no-op so callers
/// only override what they need, the same shape as
/// [`crate::slave::SlaveContext`].
pub trait LogSink: Send + Sync {
    /// A request is about to be sent (first attempt or a retry).
    fn request(&self, _request: &PduRequest, _attempt: u32) {}

    /// A request completed successfully.
    fn response(&self, _request: &PduRequest, _response: &ResponseData, _elapsed: Duration) {}

    /// A request failed with a transport-level error (I/O failure, timeout,
    /// cancellation) rather than a well-formed slave exception.
    fn error(&self, _request: &PduRequest, _error: &MasterError, _attempt: u32) {}

    /// The slave answered with a well-formed Modbus exception. Distinct
    /// from [`LogSink::error`]: the exchange itself succeeded, the slave
    /// merely refused the request.
    fn exception(&self, _request: &PduRequest, _exception: &PduException, _attempt: u32) {}

    /// Raw bytes were written to the transport.
    fn bytes_transmitted(&self, _count: usize) {}

    /// Raw bytes were read from the transport.
    fn bytes_received(&self, _count: usize) {}

    /// One ADU was written to the transport.
    fn packets_transmitted(&self, _count: usize) {}

    /// One ADU was read from the transport.
    fn packets_received(&self, _count: usize) {}

    /// The connection is being opened.
    fn connecting(&self) {}

    /// The connection is open and ready to serve requests.
    fn connected(&self) {}

    /// The connection has closed, by request or failure.
    fn disconnected(&self) {}
}

/// A [`LogSink`] that discards every event; the default for a
/// [`crate::master::MasterConfig`] that does not install one.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopLogSink;

impl LogSink for NoopLogSink {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn noop_sink_accepts_every_event_without_panicking() {
        let sink = NoopLogSink;
        sink.connecting();
        sink.connected();
        sink.bytes_transmitted(4);
        sink.bytes_received(4);
        sink.packets_transmitted(1);
        sink.packets_received(1);
        sink.disconnected();
    }
}
