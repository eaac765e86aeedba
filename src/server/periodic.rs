// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! The three background service loops: ping/callerlist sweep, lobby
//! announcement, and jitter measurement. Each runs on its own
//! `std::thread` for the lifetime of the server and polls the shared
//! [`ShutdownToken`] at its blocking boundary.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::server::codec::{self, PORT_LISTCID, PORT_PUBKEY, PORT_SETLOCALIP, STAGE_ID_SERVER};
use crate::server::lobby::LobbyClient;
use crate::server::protocol::{
    encode_endpoint, LatencyRecord, ANNOUNCEMENTPERIOD_FAILURE_MS, ANNOUNCEMENTPERIOD_SUCCESS_MS,
    PARTICIPANTANNOUNCEPERIOD, PINGPERIODMS,
};
use crate::server::registry::ParticipantRegistry;
use crate::server::transport::UdpTransport;
use crate::shutdown::ShutdownToken;

/// Settings mutated by the background loops and read by the dispatch loop;
/// a single mutex stands in for the reference implementation's collection
/// of loosely related global variables.
pub struct SharedSettings {
    pub secret: AtomicU32,
    pub room_name: Mutex<String>,
    pub group: Mutex<String>,
    pub lobby_url: Mutex<String>,
    pub server_jitter_ms: Mutex<f64>,
    pub ping_seq: AtomicU64,
}

/// The session secret is a 28-bit PIN, matching the reference server's
/// `secret = r & 0xfffffff`.
const SECRET_MASK: u32 = 0x0FFF_FFFF;

impl SharedSettings {
    pub fn new(room_name: String, group: String, lobby_url: String) -> Self {
        Self {
            secret: AtomicU32::new(fastrand::u32(..) & SECRET_MASK),
            room_name: Mutex::new(room_name),
            group: Mutex::new(group),
            lobby_url: Mutex::new(lobby_url),
            server_jitter_ms: Mutex::new(0.0),
            ping_seq: AtomicU64::new(0),
        }
    }

    pub fn secret(&self) -> u32 {
        self.secret.load(Ordering::SeqCst)
    }

    fn rotate_secret(&self) {
        self.secret.store(fastrand::u32(..) & SECRET_MASK, Ordering::SeqCst);
    }

    fn take_jitter(&self) -> f64 {
        let mut guard = self.server_jitter_ms.lock().unwrap();
        let value = *guard;
        *guard = 0.0;
        value
    }

    fn observe_jitter(&self, sample_ms: f64) {
        let mut guard = self.server_jitter_ms.lock().unwrap();
        if sample_ms > *guard {
            *guard = sample_ms;
        }
    }
}

/// Every `PARTICIPANTANNOUNCEPERIOD` ticks, tell every live participant
/// about every other live participant's public and local endpoints.
pub fn ping_and_callerlist_loop(
    transport: Arc<UdpTransport>,
    registry: Arc<ParticipantRegistry>,
    settings: Arc<SharedSettings>,
    shutdown: ShutdownToken,
    rt_priority: i32,
) {
    crate::server::set_thread_priority(rt_priority);
    let period = Duration::from_millis(PINGPERIODMS);
    let mut tick: u32 = 0;

    while !shutdown.is_shutting_down() {
        if shutdown.sleep_or_shutdown(period) {
            break;
        }

        let live = registry.live_snapshot();
        for (sdid, slot) in &live {
            if let Some(ep) = slot.ep {
                let seq = settings.ping_seq.fetch_add(1, Ordering::SeqCst) as u32;
                if let Err(e) = transport.send_ping(settings.secret(), *sdid, seq, ep.into()) {
                    warn!(sdid, error = %e, "ping send failed");
                }
            }
        }

        for sdid in registry.tick() {
            info!(sdid, "participant timed out");
        }

        tick += 1;
        if tick < PARTICIPANTANNOUNCEPERIOD {
            continue;
        }
        tick = 0;
        announce_participant_list(&transport, &registry, &settings, &live);
    }
}

fn announce_participant_list(
    transport: &UdpTransport,
    _registry: &ParticipantRegistry,
    settings: &SharedSettings,
    live: &[(u8, crate::server::registry::EndpointSlot)],
) {
    let secret = settings.secret();
    for (epl_id, epl) in live {
        let Some(epl_addr) = epl.ep else { continue };
        for (cid, _cid_slot) in live {
            if cid == epl_id {
                continue;
            }
            let seq = settings.ping_seq.fetch_add(1, Ordering::SeqCst) as u32;
            let payload = encode_endpoint(epl_addr);
            match codec::encode(secret, STAGE_ID_SERVER, PORT_LISTCID, epl.mode, seq, &payload) {
                Ok(frame) => {
                    if let Some(local) = epl.localep {
                        let _ = transport.send_to(&frame, local.into());
                    }
                }
                Err(e) => warn!(error = %e, "failed to encode PORT_LISTCID"),
            }

            if let Some(localep) = epl.localep {
                let local_payload = encode_endpoint(localep);
                if let Ok(frame) = codec::encode(
                    secret,
                    STAGE_ID_SERVER,
                    PORT_SETLOCALIP,
                    0,
                    settings.ping_seq.fetch_add(1, Ordering::SeqCst) as u32,
                    &local_payload,
                ) {
                    let _ = transport.send_to(&frame, local.into());
                }
            }

            if epl.has_pubkey {
                if let Ok(frame) = codec::encode(
                    secret,
                    STAGE_ID_SERVER,
                    PORT_PUBKEY,
                    0,
                    settings.ping_seq.fetch_add(1, Ordering::SeqCst) as u32,
                    &epl.pubkey,
                ) {
                    if let Some(local) = epl.localep {
                        let _ = transport.send_to(&frame, local.into());
                    }
                }
            }
        }
    }
}

/// Announce occupancy to the lobby directory, rotating the session secret
/// whenever the room drains, and drain the queued peer latency reports.
#[allow(clippy::too_many_arguments)]
pub fn announce_loop(
    port: u16,
    registry: Arc<ParticipantRegistry>,
    settings: Arc<SharedSettings>,
    latency_queue: Arc<Mutex<VecDeque<LatencyRecord>>>,
    lobby: Arc<LobbyClient>,
    shutdown: ShutdownToken,
    rt_priority: i32,
) {
    crate::server::set_thread_priority(rt_priority);
    let mut report_id: u32 = 0;
    let mut next_delay = Duration::from_millis(1);

    while !shutdown.is_shutting_down() {
        if shutdown.sleep_or_shutdown(next_delay) {
            break;
        }

        let num_clients = registry.get_num_clients();
        if num_clients == 0 {
            settings.rotate_secret();
        }

        let room_name = settings.room_name.lock().unwrap().clone();
        let group = settings.group.lock().unwrap().clone();
        let jitter = settings.take_jitter();

        let outcome = lobby.announce(
            port,
            &room_name,
            settings.secret(),
            jitter,
            &group,
            num_clients == 0,
        );

        next_delay = match outcome {
            Ok(()) => Duration::from_millis(ANNOUNCEMENTPERIOD_SUCCESS_MS),
            Err(e) => {
                warn!(error = %e, "lobby announcement failed");
                Duration::from_millis(ANNOUNCEMENTPERIOD_FAILURE_MS)
            }
        };

        loop {
            let record = latency_queue.lock().unwrap().pop_front();
            let Some(record) = record else { break };
            report_id = report_id.wrapping_add(1);
            if let Err(e) =
                lobby.report_latency(report_id, record.src, record.dest, record.mean_ms, record.jitter_ms)
            {
                debug!(error = %e, "latency report failed");
            }
        }
    }
}

/// The highest-priority loop: wakes every 2ms and tracks the worst observed
/// scheduling jitter, which the announce loop reports to the lobby. Runs at
/// one niceness step below the other background threads so its wakeups are
/// scheduled ahead of theirs.
pub fn jitter_measurement_loop(settings: Arc<SharedSettings>, shutdown: ShutdownToken, rt_priority: i32) {
    crate::server::set_thread_priority_biased(rt_priority, 1);
    const TARGET: Duration = Duration::from_micros(2000);
    let mut last = Instant::now();

    while !shutdown.is_shutting_down() {
        if shutdown.sleep_or_shutdown(TARGET) {
            break;
        }
        let now = Instant::now();
        let elapsed_ms = now.duration_since(last).as_secs_f64() * 1000.0;
        last = now;
        let overshoot_ms = elapsed_ms - TARGET.as_secs_f64() * 1000.0;
        settings.observe_jitter(overshoot_ms);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn take_jitter_resets_to_zero() {
        let settings = SharedSettings::new("room".into(), "grp".into(), "http://x".into());
        settings.observe_jitter(12.5);
        assert_eq!(settings.take_jitter(), 12.5);
        assert_eq!(settings.take_jitter(), 0.0);
    }

    #[test]
    fn observe_jitter_keeps_the_worst_sample() {
        let settings = SharedSettings::new("room".into(), "grp".into(), "http://x".into());
        settings.observe_jitter(2.0);
        settings.observe_jitter(1.0);
        assert_eq!(*settings.server_jitter_ms.lock().unwrap(), 2.0);
    }

    #[test]
    fn secret_rotates_to_a_new_value_eventually() {
        let settings = SharedSettings::new("room".into(), "grp".into(), "http://x".into());
        let before = settings.secret();
        let mut changed = false;
        for _ in 0..50 {
            settings.rotate_secret();
            if settings.secret() != before {
                changed = true;
                break;
            }
        }
        assert!(changed);
    }
}
