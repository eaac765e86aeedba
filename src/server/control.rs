// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Control-port message handlers.
//!
//! Each handler validates its payload shape and mutates the registry;
//! malformed payloads are dropped silently, matching the reference
//! server's tolerance for stray or out-of-order control traffic.

use crate::server::protocol::{decode_endpoint, LatencyRecord, ENDPOINT_WIRE_SIZE};
use crate::server::registry::{ParticipantRegistry, RegisterOutcome};
use crate::server::transport::UdpTransport;

const PUBKEY_SIZE: usize = 32;
const PEERLATREP_SIZE: usize = 6 * 8;

/// `PORT_REGISTER`: `seq` carries the mode bitset; the payload is a
/// NUL-terminated version string (the last byte is forced to NUL before
/// conversion, matching the reference server's defensive truncation).
pub fn handle_register(
    registry: &ParticipantRegistry,
    sdid: u8,
    sender_ep: std::net::SocketAddrV4,
    mode: u16,
    payload: &[u8],
) -> Option<RegisterOutcome> {
    let mut version_bytes = payload.to_vec();
    if let Some(last) = version_bytes.last_mut() {
        *last = 0;
    }
    let version = String::from_utf8_lossy(&version_bytes)
        .trim_end_matches('\0')
        .to_string();
    registry.register(sdid, sender_ep, mode, version)
}

/// `PORT_SETLOCALIP`: payload is a 6-byte wire endpoint.
pub fn handle_setlocalip(registry: &ParticipantRegistry, sdid: u8, payload: &[u8]) -> bool {
    if payload.len() != ENDPOINT_WIRE_SIZE {
        return false;
    }
    match decode_endpoint(payload) {
        Some(localep) => registry.set_localip(sdid, localep),
        None => false,
    }
}

/// `PORT_PUBKEY`: payload must be exactly 32 bytes.
pub fn handle_pubkey(registry: &ParticipantRegistry, sdid: u8, payload: &[u8]) -> bool {
    if payload.len() != PUBKEY_SIZE {
        return false;
    }
    let mut key = [0u8; PUBKEY_SIZE];
    key.copy_from_slice(payload);
    registry.set_pubkey(sdid, key)
}

/// `PORT_PONG`: measure round-trip time against the transport's clock and
/// feed the sample into the sender's pingtime window.
pub fn handle_pong(
    registry: &ParticipantRegistry,
    transport: &UdpTransport,
    sdid: u8,
    payload: &[u8],
) -> Option<(f64, f64, f64)> {
    let rtt_ms = transport.measure_pong(payload)?;
    registry.set_pingtime(sdid, rtt_ms)
}

/// `PORT_PEERLATREP`: payload is six big-endian f64s,
/// `[dest, lmin, lmean, lmax, received, lost]`, reported by a client after
/// measuring peer-to-peer jitter against another participant.
pub fn handle_peerlatrep(src_sdid: u8, payload: &[u8]) -> Option<LatencyRecord> {
    if payload.len() != PEERLATREP_SIZE {
        return None;
    }
    let read_f64 = |i: usize| -> f64 {
        f64::from_be_bytes(payload[i * 8..i * 8 + 8].try_into().unwrap())
    };
    let dest = read_f64(0) as u8;
    let lmean = read_f64(2);
    let lmax = read_f64(3);
    Some(LatencyRecord {
        src: src_sdid,
        dest,
        mean_ms: lmean,
        jitter_ms: lmax - lmean,
    })
}

/// `PORT_PING_SRV` / `PORT_PONG_SRV`: the first payload byte names the
/// target stage device; the original datagram is forwarded to it verbatim.
pub fn target_of_relayed_ping(payload: &[u8]) -> Option<u8> {
    payload.first().copied()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{Ipv4Addr, SocketAddrV4};

    #[test]
    fn register_truncates_trailing_byte_to_nul() {
        let registry = ParticipantRegistry::new(10);
        let ep = SocketAddrV4::new(Ipv4Addr::new(10, 0, 0, 5), 9000);
        let outcome = handle_register(&registry, 2, ep, 0, b"1.2.3\xffgarbage");
        assert_eq!(outcome, Some(RegisterOutcome::New));
    }

    #[test]
    fn setlocalip_rejects_wrong_length() {
        let registry = ParticipantRegistry::new(10);
        assert!(!handle_setlocalip(&registry, 0, &[1, 2, 3]));
    }

    #[test]
    fn pubkey_requires_exact_length() {
        let registry = ParticipantRegistry::new(10);
        assert!(!handle_pubkey(&registry, 0, &[0u8; 10]));
        assert!(handle_pubkey(&registry, 0, &[7u8; 32]));
    }

    #[test]
    fn peerlatrep_parses_six_doubles() {
        let mut payload = Vec::new();
        for v in [200.0_f64, 0.0, 5.0, 9.0, 20.0, 1.0] {
            payload.extend_from_slice(&v.to_be_bytes());
        }
        let record = handle_peerlatrep(3, &payload).unwrap();
        assert_eq!(record.src, 3);
        assert_eq!(record.dest, 200);
        assert_eq!(record.mean_ms, 5.0);
        assert_eq!(record.jitter_ms, 4.0);
    }

    #[test]
    fn peerlatrep_rejects_wrong_length() {
        assert!(handle_peerlatrep(3, &[0u8; 10]).is_none());
    }

    #[test]
    fn relayed_ping_target_is_first_byte() {
        assert_eq!(target_of_relayed_ping(&[42, 0, 0]), Some(42));
        assert_eq!(target_of_relayed_ping(&[]), None);
    }
}
