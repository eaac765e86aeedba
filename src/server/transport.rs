// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Blocking UDP transport.
//!
//! One socket per server process, shared by the dispatch loop and the
//! periodic service threads behind an `Arc`. `UdpSocket` is already `Sync`,
//! so no extra locking is needed for concurrent `send`; `recv` is only ever
//! called from the single `srv` thread.

use std::io;
use std::net::{SocketAddr, UdpSocket};
use std::time::{Duration, Instant};

use crate::error::TransportError;
use crate::server::codec::{self, PORT_PING};

pub struct UdpTransport {
    socket: UdpSocket,
    started_at: Instant,
}

impl UdpTransport {
    /// Bind a UDP socket to `addr` (port 0 lets the OS pick one) and return
    /// the transport alongside the address actually bound.
    pub fn bind(addr: SocketAddr) -> Result<(Self, SocketAddr), TransportError> {
        let socket = UdpSocket::bind(addr).map_err(TransportError::Bind)?;
        let local_addr = socket.local_addr().map_err(TransportError::Bind)?;
        Ok((
            Self {
                socket,
                started_at: Instant::now(),
            },
            local_addr,
        ))
    }

    pub fn set_recv_timeout(&self, timeout: Option<Duration>) -> Result<(), TransportError> {
        self.socket.set_read_timeout(timeout).map_err(Into::into)
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    /// Receive one datagram, treating a read timeout as `Ok(None)` so the
    /// caller's loop can poll its shutdown token between reads.
    pub fn recv(&self) -> Result<Option<(Vec<u8>, SocketAddr)>, TransportError> {
        let mut buf = [0u8; codec::BUFSIZE];
        match self.socket.recv_from(&mut buf) {
            Ok((len, from)) => Ok(Some((buf[..len].to_vec(), from))),
            Err(e)
                if e.kind() == io::ErrorKind::WouldBlock
                    || e.kind() == io::ErrorKind::TimedOut =>
            {
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }

    pub fn send_to(&self, bytes: &[u8], dest: SocketAddr) -> Result<(), TransportError> {
        self.socket.send_to(bytes, dest).map(|_| ()).map_err(Into::into)
    }

    /// Send a `PORT_PING` control datagram carrying a monotonic timestamp
    /// relative to transport construction (`Instant` can't cross the wire).
    pub fn send_ping(
        &self,
        secret: u32,
        sdid: u8,
        seq: u32,
        dest: SocketAddr,
    ) -> Result<(), TransportError> {
        let elapsed_nanos = self.started_at.elapsed().as_nanos() as u64;
        let payload = elapsed_nanos.to_be_bytes();
        let frame = codec::encode(secret, sdid, PORT_PING, 0, seq, &payload)
            .map_err(|e| TransportError::Io(io::Error::new(io::ErrorKind::InvalidData, e)))?;
        self.send_to(&frame, dest)
    }

    /// Compute round-trip time in milliseconds from a `PORT_PONG` payload
    /// that echoes back the original `PORT_PING` timestamp.
    pub fn measure_pong(&self, payload: &[u8]) -> Option<f64> {
        if payload.len() < 8 {
            return None;
        }
        let sent_nanos = u64::from_be_bytes(payload[0..8].try_into().ok()?);
        let now_nanos = self.started_at.elapsed().as_nanos() as u64;
        Some(now_nanos.saturating_sub(sent_nanos) as f64 / 1_000_000.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bind_assigns_ephemeral_port() {
        let (_t, addr) = UdpTransport::bind("127.0.0.1:0".parse().unwrap()).unwrap();
        assert!(addr.port() > 0);
    }

    #[test]
    fn recv_times_out_without_blocking_forever() {
        let (t, _addr) = UdpTransport::bind("127.0.0.1:0".parse().unwrap()).unwrap();
        t.set_recv_timeout(Some(Duration::from_millis(20))).unwrap();
        let result = t.recv().unwrap();
        assert!(result.is_none());
    }

    #[test]
    fn send_and_recv_roundtrip() {
        let (a, addr_a) = UdpTransport::bind("127.0.0.1:0".parse().unwrap()).unwrap();
        let (b, addr_b) = UdpTransport::bind("127.0.0.1:0".parse().unwrap()).unwrap();
        a.set_recv_timeout(Some(Duration::from_secs(1))).unwrap();
        b.send_to(b"hello", addr_a).unwrap();
        let (bytes, from) = a.recv().unwrap().unwrap();
        assert_eq!(bytes, b"hello");
        assert_eq!(from, addr_b);
    }

    #[test]
    fn ping_pong_measures_nonnegative_latency() {
        let (a, addr_a) = UdpTransport::bind("127.0.0.1:0".parse().unwrap()).unwrap();
        a.set_recv_timeout(Some(Duration::from_secs(1))).unwrap();
        a.send_ping(0xabcd, 3, 1, addr_a).unwrap();
        let (bytes, _from) = a.recv().unwrap().unwrap();
        let decoded = codec::decode(&bytes, 0xabcd).unwrap();
        let rtt = a.measure_pong(&decoded.payload).unwrap();
        assert!(rtt >= 0.0);
    }
}
