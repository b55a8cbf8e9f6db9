//! Datagram transport
//!
//! Both halves talk over an unreliable datagram channel. Loss is never
//! repaired here: the device drops what it cannot take and the host gives up
//! on an iteration after its receive deadline.

use async_trait::async_trait;
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, Ordering};
use tokio::net::UdpSocket;

use crate::errors::TransportError;

/// Largest datagram either side ever expects.
pub const MAX_DATAGRAM: usize = 512;

#[async_trait]
pub trait DatagramChannel: Send + Sync {
    async fn send_to(&self, buf: &[u8], target: SocketAddr) -> io::Result<usize>;

    async fn recv_from(&self, buf: &mut [u8]) -> io::Result<(usize, SocketAddr)>;

    /// Non-blocking receive; `WouldBlock` when nothing is queued.
    fn try_recv_from(&self, buf: &mut [u8]) -> io::Result<(usize, SocketAddr)>;

    fn local_addr(&self) -> io::Result<SocketAddr>;
}

#[async_trait]
impl DatagramChannel for UdpSocket {
    async fn send_to(&self, buf: &[u8], target: SocketAddr) -> io::Result<usize> {
        UdpSocket::send_to(self, buf, target).await
    }

    async fn recv_from(&self, buf: &mut [u8]) -> io::Result<(usize, SocketAddr)> {
        UdpSocket::recv_from(self, buf).await
    }

    fn try_recv_from(&self, buf: &mut [u8]) -> io::Result<(usize, SocketAddr)> {
        UdpSocket::try_recv_from(self, buf)
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        UdpSocket::local_addr(self)
    }
}

/// Bind a UDP socket, mapping failure to the socket-creation error class.
pub async fn bind(addr: SocketAddr) -> Result<UdpSocket, TransportError> {
    UdpSocket::bind(addr)
        .await
        .map_err(|source| TransportError::Socket { addr, source })
}

/// Wraps a channel and silently discards every `drop_every`-th outbound
/// datagram, reporting it as sent.
#[derive(Debug)]
pub struct LossyChannel<C> {
    inner: C,
    drop_every: Option<u32>,
    sent: AtomicU32,
    dropped: AtomicU32,
}

impl<C> LossyChannel<C> {
    pub fn new(inner: C, drop_every: Option<u32>) -> Self {
        Self {
            inner,
            drop_every,
            sent: AtomicU32::new(0),
            dropped: AtomicU32::new(0),
        }
    }

    pub fn dropped(&self) -> u32 {
        self.dropped.load(Ordering::Relaxed)
    }

    pub fn inner(&self) -> &C {
        &self.inner
    }
}

#[async_trait]
impl<C: DatagramChannel> DatagramChannel for LossyChannel<C> {
    async fn send_to(&self, buf: &[u8], target: SocketAddr) -> io::Result<usize> {
        let count = self.sent.fetch_add(1, Ordering::Relaxed) + 1;
        if crate::config::FaultPlan::hits(self.drop_every, count) {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(peer = %target, count, "Datagram discarded by lossy channel");
            return Ok(buf.len());
        }
        self.inner.send_to(buf, target).await
    }

    async fn recv_from(&self, buf: &mut [u8]) -> io::Result<(usize, SocketAddr)> {
        self.inner.recv_from(buf).await
    }

    fn try_recv_from(&self, buf: &mut [u8]) -> io::Result<(usize, SocketAddr)> {
        self.inner.try_recv_from(buf)
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        self.inner.local_addr()
    }
}
