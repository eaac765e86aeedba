// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! TCP tunnel bridge.
//!
//! Clients that can't reach the server over UDP (hotel wifi, strict NATs)
//! can instead open a TCP connection on the same port number and tunnel
//! length-prefixed UDP frames through it. Each accepted connection gets a
//! dedicated loopback UDP socket and forwards frames to the real UDP
//! server running on `127.0.0.1`.

use std::io::{Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream, UdpSocket};
use std::time::Duration;

use tracing::{debug, info};

use crate::error::BridgeError;
use crate::server::codec::BUFSIZE;
use crate::shutdown::ShutdownToken;

const ACCEPT_POLL: Duration = Duration::from_millis(200);

pub fn run(port: u16, udp_server_port: u16, shutdown: ShutdownToken) -> Result<(), BridgeError> {
    let listener = TcpListener::bind(("0.0.0.0", port))?;
    listener.set_nonblocking(true)?;
    info!(port, "tcp bridge listening");

    while !shutdown.is_shutting_down() {
        match listener.accept() {
            Ok((stream, peer)) => {
                let shutdown = shutdown.clone();
                std::thread::spawn(move || {
                    if let Err(e) = handle_connection(stream, peer, udp_server_port, shutdown) {
                        debug!(%peer, error = %e, "tcp bridge connection ended");
                    }
                });
            }
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                std::thread::sleep(ACCEPT_POLL);
            }
            Err(e) => return Err(BridgeError::Accept(e)),
        }
    }
    Ok(())
}

fn handle_connection(
    mut stream: TcpStream,
    peer: SocketAddr,
    udp_server_port: u16,
    shutdown: ShutdownToken,
) -> Result<(), BridgeError> {
    stream.set_read_timeout(Some(Duration::from_millis(500)))?;
    let udp = UdpSocket::bind("127.0.0.1:0")?;
    udp.set_read_timeout(Some(Duration::from_millis(200)))?;
    let server_addr: SocketAddr = ([127, 0, 0, 1], udp_server_port).into();

    let mut reader_udp = udp.try_clone()?;
    let mut writer_stream = stream.try_clone()?;
    let downlink_shutdown = shutdown.clone();
    let downlink = std::thread::spawn(move || -> Result<(), BridgeError> {
        let mut buf = [0u8; BUFSIZE];
        loop {
            if downlink_shutdown.is_shutting_down() {
                return Ok(());
            }
            match reader_udp.recv(&mut buf) {
                Ok(len) => write_frame(&mut writer_stream, &buf[..len])?,
                Err(e)
                    if e.kind() == std::io::ErrorKind::WouldBlock
                        || e.kind() == std::io::ErrorKind::TimedOut => {}
                Err(e) => return Err(e.into()),
            }
        }
    });

    let result = uplink_loop(&mut stream, &udp, server_addr, &shutdown);
    let _ = downlink.join();
    result.map_err(BridgeError::from)
}

fn uplink_loop(
    stream: &mut TcpStream,
    udp: &UdpSocket,
    server_addr: SocketAddr,
    shutdown: &ShutdownToken,
) -> std::io::Result<()> {
    loop {
        if shutdown.is_shutting_down() {
            return Ok(());
        }
        let mut len_buf = [0u8; 2];
        match stream.read_exact(&mut len_buf) {
            Ok(()) => {}
            Err(e)
                if e.kind() == std::io::ErrorKind::WouldBlock
                    || e.kind() == std::io::ErrorKind::TimedOut =>
            {
                continue;
            }
            Err(_) => return Ok(()),
        }
        let frame_len = u16::from_le_bytes(len_buf) as usize;
        let mut payload = vec![0u8; frame_len];
        stream.read_exact(&mut payload)?;
        udp.send_to(&payload, server_addr)?;
    }
}

fn write_frame(stream: &mut TcpStream, payload: &[u8]) -> Result<(), BridgeError> {
    if payload.len() > u16::MAX as usize {
        return Err(BridgeError::OversizedFrame(payload.len()));
    }
    let len = payload.len() as u16;
    stream.write_all(&len.to_le_bytes())?;
    stream.write_all(payload)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read as _;
    use std::net::TcpStream as StdTcpStream;

    #[test]
    fn write_frame_rejects_oversized_payload() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let _accepting = std::thread::spawn(move || listener.accept());
        let mut stream = StdTcpStream::connect(addr).unwrap();
        let huge = vec![0u8; u16::MAX as usize + 1];
        assert!(write_frame(&mut stream, &huge).is_err());
    }

    #[test]
    fn write_frame_prefixes_length_little_endian() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let accepting = std::thread::spawn(move || listener.accept().unwrap().0);
        let mut client = StdTcpStream::connect(addr).unwrap();
        write_frame(&mut client, b"hi").unwrap();
        let mut server = accepting.join().unwrap();
        let mut buf = [0u8; 4];
        server.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, &[2, 0, b'h', b'i']);
    }
}
