// SPDX-FileCopyrightText: Copyright (c) 2017-2024 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Transport-agnostic plumbing shared by both concrete transports.
//!
//! A transport is specified only at its interface — `AsyncRead +
//! AsyncWrite + Unpin + Send + fmt::Debug` — the same bound the client
//! layer's `attach`-style constructors accept, so any byte stream (a real
//! socket, a serial port, an in-memory duplex pair in tests) works.

#[cfg(feature = "rtu")]
pub mod rtu;
#[cfg(feature = "tcp")]
pub mod tcp;

use std::{
    fmt,
    pin::Pin,
    sync::{Arc, Mutex},
    task::{Context, Poll},
    time::Instant,
};

use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};

/// The bound every concrete transport must satisfy.
pub trait ByteTransport: AsyncRead + AsyncWrite + Unpin + Send + fmt::Debug + 'static {}

impl<T> ByteTransport for T where T: AsyncRead + AsyncWrite + Unpin + Send + fmt::Debug + 'static {}

/// A shared clock the inactivity watchdog polls.
pub(crate) type ActivityClock = Arc<Mutex<Instant>>;

/// Wraps a transport so every successful read or write bumps a shared
/// timestamp, which the master engine's background task compares against
/// `inactivity_timeout` on an interval tick.
#[derive(Debug)]
pub(crate) struct ActivityTracker<T> {
    inner: T,
    last_activity: ActivityClock,
}

impl<T> ActivityTracker<T> {
    pub(crate) fn new(inner: T) -> (Self, ActivityClock) {
        let last_activity = Arc::new(Mutex::new(Instant::now()));
        (
            Self {
                inner,
                last_activity: last_activity.clone(),
            },
            last_activity,
        )
    }

    fn touch(&self) {
        let mut guard = self
            .last_activity
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        *guard = Instant::now();
    }
}

impl<T: AsyncRead + Unpin> AsyncRead for ActivityTracker<T> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        let before = buf.filled().len();
        let this = self.get_mut();
        let result = Pin::new(&mut this.inner).poll_read(cx, buf);
        if matches!(result, Poll::Ready(Ok(()))) && buf.filled().len() > before {
            this.touch();
        }
        result
    }
}

impl<T: AsyncWrite + Unpin> AsyncWrite for ActivityTracker<T> {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<std::io::Result<usize>> {
        let this = self.get_mut();
        let result = Pin::new(&mut this.inner).poll_write(cx, buf);
        if matches!(result, Poll::Ready(Ok(n)) if n > 0) {
            this.touch();
        }
        result
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_shutdown(cx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{duplex, AsyncReadExt, AsyncWriteExt};

    #[tokio::test]
    async fn read_and_write_bump_the_activity_clock() {
        let (a, mut b) = duplex(64);
        let (mut tracked, clock) = ActivityTracker::new(a);
        let before = *clock.lock().unwrap();

        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        b.write_all(b"hi").await.unwrap();
        let mut buf = [0u8; 2];
        tracked.read_exact(&mut buf).await.unwrap();

        assert!(*clock.lock().unwrap() > before);
    }
}
