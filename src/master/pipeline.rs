// SPDX-FileCopyrightText: Copyright (c) 2017-2024 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The single background task a [`super::Master`] hands its queue to.
//!
//! One task owns the boxed [`Client`] and drains commands serially, so a
//! request is never sent before the previous one's response (or timeout)
//! has been observed. This is what makes the RTU client's "at most one
//! request in flight" invariant hold.

use std::time::{Duration, Instant};

use tokio::sync::{mpsc, oneshot, watch};

use crate::{
    client::Client,
    error::MasterError,
    pdu::{self, PduRequest, ResponseData},
    slave::{Slave, SlaveContext},
    transport::ActivityClock,
};

use super::{retry::RetryContext, ConnectionState, MasterConfig, RequestOptions};

pub(crate) enum Command {
    Call {
        request: PduRequest,
        options: RequestOptions,
        reply: oneshot::Sender<Result<ResponseData, MasterError>>,
    },
    SetSlave(Slave),
    Close {
        reply: oneshot::Sender<()>,
    },
}

/// How often the watchdog samples the activity clock. A quarter of the
/// configured timeout, floored so a very short `inactivity_timeout` in
/// tests doesn't spin the select loop.
fn watchdog_period(inactivity_timeout: Duration) -> Duration {
    (inactivity_timeout / 4).max(Duration::from_millis(20))
}

/// A fresh [`std::io::Error`] carrying the same kind and message, since
/// `io::Error` itself isn't `Clone` and the original may already have been
/// moved into a reply sent to the caller whose attempt surfaced it.
fn recreate_io_error(err: &std::io::Error) -> std::io::Error {
    std::io::Error::new(err.kind(), err.to_string())
}

pub(crate) async fn run(
    mut client: Box<dyn Client>,
    config: MasterConfig,
    activity: ActivityClock,
    mut commands: mpsc::Receiver<Command>,
    state: watch::Sender<ConnectionState>,
) {
    let _ = state.send(ConnectionState::Open);
    config.log.connected();

    let mut watchdog = tokio::time::interval(watchdog_period(config.inactivity_timeout));

    // `Some(cause)` when the loop is exiting because the connection itself
    // died (fatal transport error or inactivity watchdog), as opposed to a
    // user-initiated `Close` or the last `Master` handle being dropped. Only
    // the former must fail requests still sitting in `commands`: those two
    // other cases already resolve to `MasterError::Cancelled` when their
    // reply channels drop unsent, which is the documented behavior for a
    // request that was still queued when the connection closed gracefully.
    let cause: Option<std::io::Error> = loop {
        tokio::select! {
            biased;

            command = commands.recv() => {
                match command {
                    Some(Command::Call { request, options, reply }) => {
                        let result = execute(client.as_mut(), &config, request, options).await;
                        let fatal = match &result {
                            Err(MasterError::Master(err)) => Some(recreate_io_error(err)),
                            _ => None,
                        };
                        let _ = reply.send(result);
                        if let Some(cause) = fatal {
                            break Some(cause);
                        }
                    }
                    Some(Command::SetSlave(slave)) => {
                        client.set_slave(slave);
                    }
                    Some(Command::Close { reply }) => {
                        let _ = state.send(ConnectionState::Closing);
                        let _ = reply.send(());
                        break None;
                    }
                    None => break None,
                }
            }

            _ = watchdog.tick() => {
                let elapsed = activity
                    .lock()
                    .unwrap_or_else(std::sync::PoisonError::into_inner)
                    .elapsed();
                if elapsed >= config.inactivity_timeout {
                    break Some(std::io::Error::new(
                        std::io::ErrorKind::TimedOut,
                        "connection inactivity timeout exceeded",
                    ));
                }
            }
        }
    };

    if let Some(cause) = cause {
        while let Ok(command) = commands.try_recv() {
            match command {
                Command::Call { reply, .. } => {
                    let _ = reply.send(Err(MasterError::Master(recreate_io_error(&cause))));
                }
                Command::Close { reply } => {
                    let _ = reply.send(());
                }
                Command::SetSlave(_) => {}
            }
        }
    }

    let _ = state.send(ConnectionState::Closed);
    config.log.disconnected();
}

/// One request's full attempt/retry cycle, honoring the per-call
/// [`RequestOptions`] override of the master's default timeout and retry
/// ceiling.
async fn execute(
    client: &mut dyn Client,
    config: &MasterConfig,
    request: PduRequest,
    options: RequestOptions,
) -> Result<ResponseData, MasterError> {
    let timeout = options.timeout.unwrap_or(config.timeout);
    let max_retries = options.retries.unwrap_or(config.retries);

    let mut attempt = 0u32;
    loop {
        attempt += 1;
        config.log.request(&request, attempt);
        let started = Instant::now();

        config.log.bytes_transmitted(pdu::encode_request(&request).len());
        config.log.packets_transmitted(1);

        let error = match tokio::time::timeout(timeout, client.call(request.clone())).await {
            Ok(Ok(data)) => {
                config
                    .log
                    .bytes_received(pdu::encode_response(request.function_code(), &data).len());
                config.log.packets_received(1);
                config.log.response(&request, &data, started.elapsed());
                return Ok(data);
            }
            Ok(Err(err)) => MasterError::from(err),
            Err(_elapsed) => MasterError::Timeout { attempts: attempt },
        };

        if let MasterError::Exception(ref exception) = error {
            // An exception PDU is still one well-formed ADU received: the
            // wire exchange succeeded, only the request was refused.
            config.log.bytes_received(2);
            config.log.packets_received(1);
            config.log.exception(&request, exception, attempt);
        } else {
            config.log.error(&request, &error, attempt);
        }

        let retry = config.retry_policy.retry(&RetryContext {
            error: &error,
            attempt,
            max_retries,
        });
        if !retry {
            return Err(error);
        }
    }
}
