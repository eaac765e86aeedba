// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! The relay server: wires the codec, transport, registry, dispatch and
//! background service modules together and owns the worker threads.

pub mod codec;
pub mod control;
pub mod dispatch;
pub mod lobby;
pub mod periodic;
pub mod protocol;
pub mod registry;
pub mod tcp_bridge;
pub mod transport;

use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use tracing::{debug, info, warn};

use crate::config::ServerConfig;
use crate::error::ServerError;
use crate::server::codec::{
    DecodedMessage, MAXSPECIALPORT, PORT_PEERLATREP, PORT_PING_SRV, PORT_PONG, PORT_PONG_SRV,
    PORT_PUBKEY, PORT_REGISTER, PORT_SEQREP, PORT_SETLOCALIP,
};
use crate::server::lobby::LobbyClient;
use crate::server::periodic::SharedSettings;
use crate::server::protocol::{to_v4, LatencyRecord};
use crate::server::registry::{ParticipantRegistry, RegisterOutcome};
use crate::server::transport::UdpTransport;
use crate::shutdown::ShutdownToken;

/// Default number of ping ticks a registration stays valid for before it
/// expires, i.e. how many missed pings are tolerated.
const DEFAULT_TIMEOUT_TICKS: u32 = 100;

pub struct RelayServer {
    config: Arc<ServerConfig>,
    transport: Arc<UdpTransport>,
    registry: Arc<ParticipantRegistry>,
    settings: Arc<SharedSettings>,
    latency_queue: Arc<Mutex<VecDeque<LatencyRecord>>>,
    lobby: Arc<LobbyClient>,
    shutdown: ShutdownToken,
    bound_addr: SocketAddr,
    running: AtomicBool,
}

impl RelayServer {
    pub fn new(config: ServerConfig, shutdown: ShutdownToken) -> Result<Self, ServerError> {
        let bind_addr: SocketAddr = ([0, 0, 0, 0], config.port).into();
        let (transport, bound_addr) =
            UdpTransport::bind(bind_addr).map_err(ServerError::Transport)?;
        transport
            .set_recv_timeout(Some(config.recv_timeout()))
            .map_err(ServerError::Transport)?;

        let room_name = config
            .room_name
            .clone()
            .unwrap_or_else(|| format!("relay:{}", bound_addr.port()));
        let settings = Arc::new(SharedSettings::new(
            room_name,
            config.group.clone(),
            config.lobby_url.clone(),
        ));
        let lobby = Arc::new(
            LobbyClient::new(config.lobby_url.clone())
                .map_err(|e| ServerError::Config(e.to_string()))?,
        );

        Ok(Self {
            config: Arc::new(config),
            transport: Arc::new(transport),
            registry: Arc::new(ParticipantRegistry::new(DEFAULT_TIMEOUT_TICKS)),
            settings,
            latency_queue: Arc::new(Mutex::new(VecDeque::new())),
            lobby,
            shutdown,
            bound_addr,
            running: AtomicBool::new(false),
        })
    }

    pub fn bound_addr(&self) -> SocketAddr {
        self.bound_addr
    }

    /// The session secret currently accepted by the codec; rotated by the
    /// announce loop whenever the room drains.
    pub fn secret(&self) -> u32 {
        self.settings.secret()
    }

    /// Spawn all background threads and run the main dispatch loop on the
    /// calling thread until shutdown is requested.
    pub fn run(&self) -> Result<(), ServerError> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(ServerError::AlreadyRunning);
        }

        let rt_priority = self.config.rt_priority;
        set_thread_priority(rt_priority);

        let mut handles: Vec<JoinHandle<()>> = Vec::new();

        handles.push(spawn_loop("ping_and_callerlist", {
            let transport = self.transport.clone();
            let registry = self.registry.clone();
            let settings = self.settings.clone();
            let shutdown = self.shutdown.clone();
            move || {
                periodic::ping_and_callerlist_loop(transport, registry, settings, shutdown, rt_priority)
            }
        }));

        handles.push(spawn_loop("announce", {
            let port = self.bound_addr.port();
            let registry = self.registry.clone();
            let settings = self.settings.clone();
            let latency_queue = self.latency_queue.clone();
            let lobby = self.lobby.clone();
            let shutdown = self.shutdown.clone();
            move || {
                periodic::announce_loop(
                    port,
                    registry,
                    settings,
                    latency_queue,
                    lobby,
                    shutdown,
                    rt_priority,
                )
            }
        }));

        handles.push(spawn_loop("jittermeasurement", {
            let settings = self.settings.clone();
            let shutdown = self.shutdown.clone();
            move || periodic::jitter_measurement_loop(settings, shutdown, rt_priority)
        }));

        if self.config.tcp_bridge {
            let port = self.bound_addr.port();
            let shutdown = self.shutdown.clone();
            handles.push(spawn_loop("tcp_bridge", move || {
                if let Err(e) = tcp_bridge::run(port, port, shutdown) {
                    warn!(error = %e, "tcp bridge exited");
                }
            }));
        }

        info!(addr = %self.bound_addr, "relay server listening");
        self.srv_loop();

        for handle in handles {
            let _ = handle.join();
        }
        self.running.store(false, Ordering::SeqCst);
        Ok(())
    }

    /// The main UDP dispatch loop: every datagram is authenticated, then
    /// routed to a control handler or forwarded as media.
    fn srv_loop(&self) {
        while !self.shutdown.is_shutting_down() {
            let received = match self.transport.recv() {
                Ok(Some(pair)) => pair,
                Ok(None) => continue,
                Err(e) => {
                    warn!(error = %e, "udp recv failed");
                    continue;
                }
            };
            let (bytes, from) = received;

            let decoded = match codec::decode(&bytes, self.settings.secret()) {
                Ok(d) => d,
                Err(_) => continue,
            };

            self.handle_datagram(decoded, from, &bytes);
        }
    }

    fn handle_datagram(&self, msg: DecodedMessage, from: SocketAddr, raw: &[u8]) {
        let sdid = msg.sdid;

        if msg.port > MAXSPECIALPORT {
            self.forward_media(sdid, raw);
            return;
        }

        match msg.port {
            PORT_REGISTER => {
                let Some(from_v4) = to_v4(from) else { return };
                match control::handle_register(&self.registry, sdid, from_v4, msg.flags, &msg.payload) {
                    Some(RegisterOutcome::New) => info!(sdid, %from, "participant registered"),
                    Some(RegisterOutcome::Refreshed) => debug!(sdid, %from, "registration refreshed"),
                    None => debug!(sdid, "register rejected: out of range"),
                }
            }
            PORT_SETLOCALIP => {
                control::handle_setlocalip(&self.registry, sdid, &msg.payload);
            }
            PORT_PUBKEY => {
                control::handle_pubkey(&self.registry, sdid, &msg.payload);
            }
            PORT_PONG => {
                self.registry.refresh(sdid);
                if let Some((_min, mean, max)) =
                    control::handle_pong(&self.registry, &self.transport, sdid, &msg.payload)
                {
                    self.latency_queue.lock().unwrap().push_back(LatencyRecord {
                        src: sdid,
                        dest: protocol::PEER_DEST_SERVER_SENTINEL,
                        mean_ms: mean,
                        jitter_ms: max - mean,
                    });
                }
            }
            PORT_SEQREP => {
                debug!(sdid, seq = msg.seq, "peer reported sequence error");
            }
            PORT_PEERLATREP => {
                if let Some(record) = control::handle_peerlatrep(sdid, &msg.payload) {
                    self.latency_queue.lock().unwrap().push_back(record);
                }
            }
            PORT_PING_SRV | PORT_PONG_SRV => {
                if let Some(target) = control::target_of_relayed_ping(&msg.payload) {
                    let target_ep = self.registry.with_slot(target, |slot| slot.ep).flatten();
                    if let Some(ep) = target_ep {
                        let _ = self.transport.send_to(raw, ep.into());
                    }
                }
            }
            _ => {}
        }
    }

    fn forward_media(&self, sender_id: u8, raw: &[u8]) {
        let Some(sender) = self.registry.with_slot(sender_id, |s| s.clone()) else {
            return;
        };
        if !sender.is_live() {
            return;
        }

        for (candidate_id, candidate) in self.registry.live_snapshot() {
            if !dispatch::should_forward_media(sender_id, &sender, candidate_id, &candidate) {
                continue;
            }
            let Some(dest) = candidate.ep else { continue };
            if self.transport.send_to(raw, dest.into()).is_ok() {
                self.registry.record_forward(candidate_id, raw.len());
            }
        }
    }
}

fn spawn_loop(name: &'static str, f: impl FnOnce() + Send + 'static) -> JoinHandle<()> {
    std::thread::Builder::new()
        .name(name.into())
        .spawn(f)
        .expect("failed to spawn background thread")
}

/// Lower the calling thread's niceness on unix so the relay's threads get
/// favorable scheduling; a no-op on platforms without `libc::nice`. Linux
/// treats nice as a per-task attribute, so each background loop calls this
/// on itself right after spawning rather than relying on inheritance from
/// whichever thread spawned it.
pub(crate) fn set_thread_priority(rt_priority: i32) {
    set_thread_priority_biased(rt_priority, 0)
}

/// As [`set_thread_priority`], but `bias` subtracts further from the
/// resulting niceness. Used to give the jitter-measurement thread strictly
/// better scheduling than its siblings even when `rt_priority` is already
/// clamped to its ceiling.
#[cfg(unix)]
pub(crate) fn set_thread_priority_biased(rt_priority: i32, bias: i32) {
    // SAFETY: `nice` only adjusts the calling thread's scheduling priority
    // and cannot fail in a way that affects memory safety.
    let niceness = 20 - rt_priority.clamp(0, 39) - bias;
    let result = unsafe { libc::nice(niceness) };
    if result == -1 {
        debug!("failed to adjust thread niceness (likely insufficient privilege)");
    }
}

#[cfg(not(unix))]
pub(crate) fn set_thread_priority_biased(_rt_priority: i32, _bias: i32) {}
