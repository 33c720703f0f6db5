// SPDX-FileCopyrightText: Copyright (c) 2017-2024 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Error taxonomy.
//!
//! Two layers, mirroring the codec/transport split: [`Error`] is the
//! low-level failure a [`crate::client::Client`] call can produce (decoding
//! or I/O), while [`MasterError`] is the richer taxonomy a
//! [`crate::master::Master`] request resolves to.

use std::fmt;

use crate::pdu::{PduException, ValidationError};

/// A specialized [`Result`] for a single client-level call.
pub type Result<T> = std::result::Result<T, Error>;

/// Low-level errors produced while encoding, decoding, or transporting a
/// single ADU.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The response PDU carried a Modbus exception.
    #[error(transparent)]
    Exception(#[from] PduException),

    /// Transport-level I/O failure (connection reset, broken pipe, framing
    /// error raised by a codec, ...).
    #[error("transport error: {0}")]
    Transport(#[from] std::io::Error),
}

/// The outcome taxonomy surfaced by [`crate::master::Master`] request
/// methods.
///
/// Distinguishes the five failure modes: a synchronous validation failure,
/// a well-formed slave exception, an exhausted retry/timeout budget, a
/// wrapped transport failure, and cancellation.
#[derive(Debug, thiserror::Error)]
pub enum MasterError {
    /// Request arguments failed a range check (address, quantity, register,
    /// timeout, retry). Raised synchronously, before the request is
    /// enqueued.
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// The slave returned a well-formed Modbus exception. Not a transport
    /// failure: the request/response exchange succeeded, the slave merely
    /// refused it.
    #[error(transparent)]
    Exception(#[from] PduException),

    /// The request exceeded its per-attempt timeout on every attempt the
    /// retry policy allowed.
    #[error("request timed out after {attempts} attempt(s)")]
    Timeout {
        /// Number of attempts made, including the first.
        attempts: u32,
    },

    /// The connection failed for a reason other than a per-request timeout
    /// (I/O error, peer reset, CRC exhaustion, inactivity watchdog).
    #[error("master connection error: {0}")]
    Master(#[source] std::io::Error),

    /// The request was canceled before it could complete (connection closed
    /// while queued, or the `Master` was dropped).
    #[error("request canceled")]
    Cancelled,
}

impl MasterError {
    /// `true` for errors the default [`crate::master::retry::default_policy`]
    /// considers for a retry.
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}

impl From<Error> for MasterError {
    fn from(err: Error) -> Self {
        match err {
            Error::Exception(ex) => Self::Exception(ex),
            Error::Transport(io) => Self::Master(io),
        }
    }
}

/// A connection-fatal cause, recorded when a [`crate::master::Master`]
/// transitions out of `Open` for a reason other than a user-initiated
/// `close()`.
#[derive(Debug)]
pub struct ConnectionError(pub std::io::Error);

impl fmt::Display for ConnectionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "connection terminated: {}", self.0)
    }
}

impl std::error::Error for ConnectionError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.0)
    }
}
