// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Media forwarding truth table.
//!
//! A datagram on a port above `MAXSPECIALPORT` is opaque media and is
//! forwarded verbatim to every other live participant that should receive
//! it. Control ports are handled separately, see [`crate::server::control`].

use crate::server::protocol::{MODE_DONOTSEND, MODE_PEER2PEER, MODE_RECEIVEDOWNMIX, MODE_SENDDOWNMIX};
use crate::server::registry::EndpointSlot;

/// Decide whether `sender`'s media datagram should be forwarded to
/// `candidate`, given their respective mode bits.
pub fn should_forward_media(
    sender_id: u8,
    sender: &EndpointSlot,
    candidate_id: u8,
    candidate: &EndpointSlot,
) -> bool {
    if candidate_id == sender_id {
        return false;
    }
    if !candidate.is_live() {
        return false;
    }
    if candidate.mode & MODE_DONOTSEND != 0 {
        return false;
    }
    let both_peer2peer = sender.mode & MODE_PEER2PEER != 0 && candidate.mode & MODE_PEER2PEER != 0;
    if both_peer2peer {
        // Direct peers exchange media without the server relaying it.
        return false;
    }
    let sender_sends_downmix = sender.mode & MODE_SENDDOWNMIX != 0;
    let candidate_wants_downmix = candidate.mode & MODE_RECEIVEDOWNMIX != 0;
    sender_sends_downmix == candidate_wants_downmix
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{Ipv4Addr, SocketAddrV4};

    fn live_slot(mode: u16) -> EndpointSlot {
        EndpointSlot {
            ep: Some(SocketAddrV4::new(Ipv4Addr::new(127, 0, 0, 1), 9000)),
            timeout: 10,
            mode,
            ..Default::default()
        }
    }

    #[test]
    fn does_not_forward_to_self() {
        let a = live_slot(0);
        assert!(!should_forward_media(1, &a, 1, &a));
    }

    #[test]
    fn does_not_forward_to_dead_slot() {
        let sender = live_slot(0);
        let mut dead = live_slot(0);
        dead.timeout = 0;
        assert!(!should_forward_media(1, &sender, 2, &dead));
    }

    #[test]
    fn does_not_forward_to_donotsend() {
        let sender = live_slot(0);
        let candidate = live_slot(MODE_DONOTSEND);
        assert!(!should_forward_media(1, &sender, 2, &candidate));
    }

    #[test]
    fn peer2peer_pairs_skip_server_relay() {
        let sender = live_slot(MODE_PEER2PEER);
        let candidate = live_slot(MODE_PEER2PEER);
        assert!(!should_forward_media(1, &sender, 2, &candidate));
    }

    #[test]
    fn peer2peer_one_sided_still_relays() {
        let sender = live_slot(MODE_PEER2PEER);
        let candidate = live_slot(0);
        assert!(should_forward_media(1, &sender, 2, &candidate));
    }

    #[test]
    fn downmix_bits_must_match() {
        let sender = live_slot(MODE_SENDDOWNMIX);
        let wants_downmix = live_slot(MODE_RECEIVEDOWNMIX);
        let wants_full = live_slot(0);
        assert!(should_forward_media(1, &sender, 2, &wants_downmix));
        assert!(!should_forward_media(1, &sender, 2, &wants_full));
    }

    #[test]
    fn plain_sender_forwards_to_plain_receiver() {
        let sender = live_slot(0);
        let candidate = live_slot(0);
        assert!(should_forward_media(1, &sender, 2, &candidate));
    }
}
