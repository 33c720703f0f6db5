// SPDX-FileCopyrightText: Copyright (c) 2017-2024 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The master request-pipeline engine: a cloneable handle in front of one
//! background task that owns the transport, serializes requests, retries
//! timeouts, and watches for inactivity.

pub mod retry;

mod pipeline;

use std::{sync::Arc, time::Duration};

use tokio::sync::{mpsc, oneshot, watch};

use crate::{
    client::Client,
    error::MasterError,
    logging::{LogSink, NoopLogSink},
    pdu::{PduRequest, ResponseData, ValidationError},
    slave::{Slave, SlaveContext},
    transport::{ActivityClock, ActivityTracker, ByteTransport},
};

#[cfg(feature = "tcp")]
use crate::client::tcp::TcpClient;
#[cfg(feature = "rtu")]
use crate::client::rtu::RtuClient;

use pipeline::Command;
use retry::{DefaultRetryPolicy, RetryPolicy};

/// The connection lifecycle a [`Master`] moves through. `Opening` is the
/// brief window between spawning the background task and its first pass
/// through the select loop; every other transition happens inside that
/// loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Closed,
    Opening,
    Open,
    Closing,
}

/// The shortest per-attempt timeout a request may be given; a slave that
/// cannot answer inside 50 ms is not meaningfully different from one that
/// never answers, and a tighter budget leaves no room for the round-trip
/// itself.
pub const MIN_TIMEOUT: Duration = Duration::from_millis(50);

/// Per-call overrides of a [`MasterConfig`]'s defaults. `None` falls back
/// to the master's configured value.
#[derive(Debug, Clone, Copy, Default)]
pub struct RequestOptions {
    pub timeout: Option<Duration>,
    pub retries: Option<u32>,
}

impl RequestOptions {
    fn validate(&self) -> Result<(), ValidationError> {
        if matches!(self.timeout, Some(t) if t < MIN_TIMEOUT) {
            return Err(ValidationError::Timeout);
        }
        Ok(())
    }
}

/// Validated configuration shared by every request a [`Master`] serves.
/// Build one with [`MasterConfig::builder`].
pub struct MasterConfig {
    timeout: Duration,
    retries: u32,
    inactivity_timeout: Duration,
    retry_policy: Arc<dyn RetryPolicy>,
    log: Arc<dyn LogSink>,
}

impl MasterConfig {
    #[must_use]
    pub fn builder() -> MasterConfigBuilder {
        MasterConfigBuilder::default()
    }
}

/// Builder for [`MasterConfig`]. `inactivity_timeout` must be greater than
/// zero and `timeout` must be at least [`MIN_TIMEOUT`]; `build` rejects
/// either violation rather than silently disabling the watchdog or
/// accepting a per-request timeout too short for a real round-trip.
pub struct MasterConfigBuilder {
    timeout: Duration,
    retries: u32,
    inactivity_timeout: Duration,
    retry_policy: Arc<dyn RetryPolicy>,
    log: Arc<dyn LogSink>,
}

impl Default for MasterConfigBuilder {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(5),
            retries: 0,
            inactivity_timeout: Duration::from_secs(60),
            retry_policy: Arc::new(DefaultRetryPolicy),
            log: Arc::new(NoopLogSink),
        }
    }
}

impl MasterConfigBuilder {
    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    #[must_use]
    pub fn retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }

    #[must_use]
    pub fn inactivity_timeout(mut self, timeout: Duration) -> Self {
        self.inactivity_timeout = timeout;
        self
    }

    #[must_use]
    pub fn retry_policy(mut self, policy: Arc<dyn RetryPolicy>) -> Self {
        self.retry_policy = policy;
        self
    }

    #[must_use]
    pub fn log(mut self, log: Arc<dyn LogSink>) -> Self {
        self.log = log;
        self
    }

    pub fn build(self) -> Result<MasterConfig, ValidationError> {
        if self.timeout < MIN_TIMEOUT || self.inactivity_timeout.is_zero() {
            return Err(ValidationError::Timeout);
        }
        Ok(MasterConfig {
            timeout: self.timeout,
            retries: self.retries,
            inactivity_timeout: self.inactivity_timeout,
            retry_policy: self.retry_policy,
            log: self.log,
        })
    }
}

/// A cloneable handle to a running Modbus master. Cloning shares the same
/// background task and request queue; dropping every clone closes the
/// connection once the task notices the command channel is empty and
/// disconnected.
#[derive(Clone)]
pub struct Master {
    commands: mpsc::Sender<Command>,
    state: watch::Receiver<ConnectionState>,
}

impl Master {
    /// Attach to an already-open TCP-framed transport.
    #[cfg(feature = "tcp")]
    #[must_use]
    pub fn new_tcp<T>(transport: T, slave: Slave, config: MasterConfig) -> Self
    where
        T: ByteTransport,
    {
        let (tracked, activity) = ActivityTracker::new(transport);
        Self::spawn(Box::new(TcpClient::new(tracked, slave)), config, activity)
    }

    /// Open a plain TCP connection and attach to it.
    #[cfg(feature = "tcp")]
    pub async fn connect_tcp(
        socket_addr: std::net::SocketAddr,
        slave: Slave,
        config: MasterConfig,
    ) -> std::io::Result<Self> {
        let transport = crate::transport::tcp::connect(socket_addr).await?;
        Ok(Self::new_tcp(transport, slave, config))
    }

    /// Attach to an already-open RTU-framed transport.
    #[cfg(feature = "rtu")]
    #[must_use]
    pub fn new_rtu<T>(transport: T, slave: Slave, config: MasterConfig) -> Self
    where
        T: ByteTransport,
    {
        let (tracked, activity) = ActivityTracker::new(transport);
        Self::spawn(Box::new(RtuClient::new(tracked, slave)), config, activity)
    }

    /// Open a serial port and attach to it.
    #[cfg(feature = "rtu")]
    pub fn connect_rtu(
        path: &str,
        baud_rate: u32,
        slave: Slave,
        config: MasterConfig,
    ) -> std::io::Result<Self> {
        let transport = crate::transport::rtu::connect(path, baud_rate)?;
        Ok(Self::new_rtu(transport, slave, config))
    }

    fn spawn(client: Box<dyn Client>, config: MasterConfig, activity: ActivityClock) -> Self {
        let (commands_tx, commands_rx) = mpsc::channel(32);
        let (state_tx, state_rx) = watch::channel(ConnectionState::Opening);
        config.log.connecting();
        tokio::spawn(pipeline::run(client, config, activity, commands_rx, state_tx));
        Self {
            commands: commands_tx,
            state: state_rx,
        }
    }

    /// The connection's current lifecycle state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Waits until the connection has transitioned to `Closed`.
    pub async fn closed(&mut self) {
        let _ = self.state.wait_for(|s| *s == ConnectionState::Closed).await;
    }

    /// Requests a graceful close: the background task finishes any
    /// in-flight exchange, transitions to `Closing`, then `Closed`.
    pub async fn close(&self) -> Result<(), MasterError> {
        let (reply, reply_rx) = oneshot::channel();
        self.commands
            .send(Command::Close { reply })
            .await
            .map_err(|_| MasterError::Cancelled)?;
        reply_rx.await.map_err(|_| MasterError::Cancelled)
    }

    /// Enqueues `request`, honoring `options`' per-call overrides, and
    /// waits for its outcome. Requests queued on the same `Master` (or any
    /// of its clones) are served strictly in order.
    pub async fn request(
        &self,
        request: PduRequest,
        options: RequestOptions,
    ) -> Result<ResponseData, MasterError> {
        options.validate()?;
        let (reply, reply_rx) = oneshot::channel();
        self.commands
            .send(Command::Call {
                request,
                options,
                reply,
            })
            .await
            .map_err(|_| MasterError::Cancelled)?;
        reply_rx.await.map_err(|_| MasterError::Cancelled)?
    }

    pub async fn read_coils(&self, address: u16, quantity: u16) -> Result<Vec<bool>, MasterError> {
        let request = PduRequest::read_coils(address, quantity)?;
        match self.request(request, RequestOptions::default()).await? {
            ResponseData::ReadBits { values } => Ok(values),
            _ => unreachable!("read_coils always decodes to ReadBits"),
        }
    }

    pub async fn read_discrete_inputs(
        &self,
        address: u16,
        quantity: u16,
    ) -> Result<Vec<bool>, MasterError> {
        let request = PduRequest::read_discrete_inputs(address, quantity)?;
        match self.request(request, RequestOptions::default()).await? {
            ResponseData::ReadBits { values } => Ok(values),
            _ => unreachable!("read_discrete_inputs always decodes to ReadBits"),
        }
    }

    pub async fn read_holding_registers(
        &self,
        address: u16,
        quantity: u16,
    ) -> Result<Vec<u16>, MasterError> {
        let request = PduRequest::read_holding_registers(address, quantity)?;
        match self.request(request, RequestOptions::default()).await? {
            ResponseData::ReadRegisters { values } => Ok(values),
            _ => unreachable!("read_holding_registers always decodes to ReadRegisters"),
        }
    }

    pub async fn read_input_registers(
        &self,
        address: u16,
        quantity: u16,
    ) -> Result<Vec<u16>, MasterError> {
        let request = PduRequest::read_input_registers(address, quantity)?;
        match self.request(request, RequestOptions::default()).await? {
            ResponseData::ReadRegisters { values } => Ok(values),
            _ => unreachable!("read_input_registers always decodes to ReadRegisters"),
        }
    }

    pub async fn write_single_coil(&self, address: u16, value: bool) -> Result<(), MasterError> {
        let request = PduRequest::write_single_coil(address, value);
        match self.request(request, RequestOptions::default()).await? {
            ResponseData::WriteSingleCoil { .. } => Ok(()),
            _ => unreachable!("write_single_coil always decodes to WriteSingleCoil"),
        }
    }

    pub async fn write_single_register(
        &self,
        address: u16,
        value: u16,
    ) -> Result<(), MasterError> {
        let request = PduRequest::write_single_register(address, value);
        match self.request(request, RequestOptions::default()).await? {
            ResponseData::WriteSingleRegister { .. } => Ok(()),
            _ => unreachable!("write_single_register always decodes to WriteSingleRegister"),
        }
    }

    pub async fn write_multiple_coils(
        &self,
        address: u16,
        values: Vec<bool>,
    ) -> Result<(), MasterError> {
        let request = PduRequest::write_multiple_coils(address, values)?;
        match self.request(request, RequestOptions::default()).await? {
            ResponseData::WriteMultiple { .. } => Ok(()),
            _ => unreachable!("write_multiple_coils always decodes to WriteMultiple"),
        }
    }

    pub async fn write_multiple_registers(
        &self,
        address: u16,
        values: Vec<u16>,
    ) -> Result<(), MasterError> {
        let request = PduRequest::write_multiple_registers(address, values)?;
        match self.request(request, RequestOptions::default()).await? {
            ResponseData::WriteMultiple { .. } => Ok(()),
            _ => unreachable!("write_multiple_registers always decodes to WriteMultiple"),
        }
    }
}

impl SlaveContext for Master {
    /// Switches the slave/unit id subsequent requests address. Fire and
    /// forget: the channel has spare capacity for this out of the request
    /// path, and a full or closed channel means the connection is already
    /// going away.
    fn set_slave(&mut self, slave: Slave) {
        let _ = self.commands.try_send(Command::SetSlave(slave));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatcher::{dispatch, HandlerSet};
    use crate::adu::tcp::{ResponseAdu, ServerCodec};
    use futures_util::{SinkExt, StreamExt};
    use tokio::io::duplex;
    use tokio_util::codec::Framed;

    use crate::logging::LogSink;
    use crate::pdu::PduException;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct CountingLogSink {
        exceptions: AtomicUsize,
        errors: AtomicUsize,
    }

    impl LogSink for CountingLogSink {
        fn exception(&self, _request: &PduRequest, _exception: &PduException, _attempt: u32) {
            self.exceptions.fetch_add(1, Ordering::SeqCst);
        }

        fn error(&self, _request: &PduRequest, _error: &MasterError, _attempt: u32) {
            self.errors.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn test_config() -> MasterConfig {
        MasterConfig::builder()
            .timeout(Duration::from_millis(200))
            .inactivity_timeout(Duration::from_secs(5))
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn read_holding_registers_round_trips_through_a_mock_slave() {
        let (client_io, server_io) = duplex(1024);
        let master = Master::new_tcp(client_io, Slave::tcp_device(), test_config());

        let server = tokio::spawn(async move {
            let mut framed = Framed::new(server_io, ServerCodec::default());
            let mut handlers = HandlerSet::new();
            handlers.read_holding_registers = Some(Box::new(|address, quantity| {
                Ok((0..quantity).map(|i| address + i).collect())
            }));
            let request = framed.next().await.unwrap().unwrap();
            let response_pdu = dispatch(&handlers, request.pdu);
            framed
                .send(ResponseAdu { hdr: request.hdr, pdu: response_pdu })
                .await
                .unwrap();
        });

        let values = master.read_holding_registers(0x00, 3).await.unwrap();
        assert_eq!(values, vec![0, 1, 2]);
        server.await.unwrap();
    }

    #[tokio::test]
    async fn unsupported_function_surfaces_as_a_master_exception() {
        let (client_io, server_io) = duplex(1024);
        let master = Master::new_tcp(client_io, Slave::tcp_device(), test_config());

        let server = tokio::spawn(async move {
            let mut framed = Framed::new(server_io, ServerCodec::default());
            let handlers = HandlerSet::new();
            let request = framed.next().await.unwrap().unwrap();
            let response_pdu = dispatch(&handlers, request.pdu);
            framed
                .send(ResponseAdu { hdr: request.hdr, pdu: response_pdu })
                .await
                .unwrap();
        });

        let err = master.read_coils(0, 1).await.unwrap_err();
        assert!(matches!(err, MasterError::Exception(_)));
        server.await.unwrap();
    }

    #[tokio::test]
    async fn a_slave_exception_logs_as_exception_not_error() {
        let (client_io, server_io) = duplex(1024);
        let log = Arc::new(CountingLogSink::default());
        let config = MasterConfig::builder()
            .timeout(Duration::from_millis(200))
            .inactivity_timeout(Duration::from_secs(5))
            .log(log.clone())
            .build()
            .unwrap();
        let master = Master::new_tcp(client_io, Slave::tcp_device(), config);

        let server = tokio::spawn(async move {
            let mut framed = Framed::new(server_io, ServerCodec::default());
            let handlers = HandlerSet::new();
            let request = framed.next().await.unwrap().unwrap();
            let response_pdu = dispatch(&handlers, request.pdu);
            framed
                .send(ResponseAdu { hdr: request.hdr, pdu: response_pdu })
                .await
                .unwrap();
        });

        let err = master.read_coils(0, 1).await.unwrap_err();
        assert!(matches!(err, MasterError::Exception(_)));
        server.await.unwrap();

        assert_eq!(log.exceptions.load(Ordering::SeqCst), 1);
        assert_eq!(log.errors.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn a_validation_failure_never_reaches_the_queue() {
        let (client_io, _server_io) = duplex(64);
        let master = Master::new_tcp(client_io, Slave::tcp_device(), test_config());

        let err = master.read_coils(0, 0).await.unwrap_err();
        assert!(matches!(err, MasterError::Validation(_)));
    }

    #[test]
    fn a_sub_minimum_timeout_is_rejected_at_construction() {
        let err = MasterConfig::builder()
            .timeout(Duration::from_millis(10))
            .build()
            .unwrap_err();
        assert!(matches!(err, ValidationError::Timeout));
    }

    #[tokio::test]
    async fn a_sub_minimum_per_call_timeout_never_reaches_the_queue() {
        let (client_io, _server_io) = duplex(64);
        let master = Master::new_tcp(client_io, Slave::tcp_device(), test_config());

        let request = PduRequest::read_coils(0, 1).unwrap();
        let options = RequestOptions {
            timeout: Some(Duration::from_millis(1)),
            retries: None,
        };
        let err = master.request(request, options).await.unwrap_err();
        assert!(matches!(err, MasterError::Validation(_)));
    }

    #[tokio::test]
    async fn an_unanswered_request_times_out_without_retries() {
        let (client_io, _server_io) = duplex(64);
        let master = Master::new_tcp(client_io, Slave::tcp_device(), test_config());

        let err = master.read_coils(0, 1).await.unwrap_err();
        assert!(matches!(err, MasterError::Timeout { attempts: 1 }));
    }

    #[tokio::test]
    async fn queued_requests_fail_with_a_master_error_when_the_connection_dies() {
        // Dropping the peer half makes the in-flight exchange fail with a
        // transport error rather than time out. The two requests still
        // sitting behind it in the queue must come back as MasterError::
        // Master too, not silently as MasterError::Cancelled.
        let (client_io, server_io) = duplex(64);
        let master = Master::new_tcp(client_io, Slave::tcp_device(), test_config());
        drop(server_io);

        let (first, second, third) = tokio::join!(
            master.read_coils(0, 1),
            master.read_coils(1, 1),
            master.read_coils(2, 1),
        );

        for result in [first, second, third] {
            assert!(matches!(result.unwrap_err(), MasterError::Master(_)));
        }
    }
}
