// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Participant registry.
//!
//! Each stage device id owns an independent `Mutex<EndpointSlot>`; the
//! registry never locks more than one slot at a time, so a stall on one
//! participant can't block dispatch to the others.

use std::net::SocketAddrV4;
use std::sync::Mutex;
use std::time::Instant;

use crate::server::codec::MAX_STAGE_ID;
use crate::server::protocol::PING_WINDOW;

#[derive(Debug, Clone, Copy, Default)]
pub struct PingStats {
    samples: [f64; PING_WINDOW],
    count: usize,
}

impl PingStats {
    /// Push a sample; returns `Some((min, mean, max))` and resets the
    /// window once `PING_WINDOW` samples have accumulated.
    fn push(&mut self, rtt_ms: f64) -> Option<(f64, f64, f64)> {
        self.samples[self.count] = rtt_ms;
        self.count += 1;
        if self.count < PING_WINDOW {
            return None;
        }
        let min = self.samples.iter().cloned().fold(f64::INFINITY, f64::min);
        let max = self.samples.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
        let mean = self.samples.iter().sum::<f64>() / PING_WINDOW as f64;
        self.count = 0;
        Some((min, mean, max))
    }
}

#[derive(Debug, Clone)]
pub struct EndpointSlot {
    pub ep: Option<SocketAddrV4>,
    pub localep: Option<SocketAddrV4>,
    pub mode: u16,
    pub version: String,
    pub timeout: u32,
    pub has_pubkey: bool,
    pub pubkey: [u8; 32],
    pub registered_at: Option<Instant>,
    pub packets_forwarded: u64,
    pub bytes_forwarded: u64,
    pingstats: PingStats,
}

impl Default for EndpointSlot {
    fn default() -> Self {
        Self {
            ep: None,
            localep: None,
            mode: 0,
            version: String::new(),
            timeout: 0,
            has_pubkey: false,
            pubkey: [0u8; 32],
            registered_at: None,
            packets_forwarded: 0,
            bytes_forwarded: 0,
            pingstats: PingStats::default(),
        }
    }
}

impl EndpointSlot {
    pub fn is_live(&self) -> bool {
        self.timeout > 0
    }
}

/// Outcome of a registration attempt, letting the caller decide whether to
/// announce a new connection without the registry depending on the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegisterOutcome {
    New,
    Refreshed,
}

pub struct ParticipantRegistry {
    slots: Vec<Mutex<EndpointSlot>>,
    default_timeout_ticks: u32,
}

impl ParticipantRegistry {
    pub fn new(default_timeout_ticks: u32) -> Self {
        let mut slots = Vec::with_capacity(MAX_STAGE_ID as usize);
        for _ in 0..MAX_STAGE_ID {
            slots.push(Mutex::new(EndpointSlot::default()));
        }
        Self {
            slots,
            default_timeout_ticks,
        }
    }

    fn slot(&self, sdid: u8) -> Option<&Mutex<EndpointSlot>> {
        self.slots.get(sdid as usize)
    }

    pub fn register(
        &self,
        sdid: u8,
        ep: SocketAddrV4,
        mode: u16,
        version: String,
    ) -> Option<RegisterOutcome> {
        let slot = self.slot(sdid)?;
        let mut guard = slot.lock().unwrap();
        let outcome = if guard.ep.is_some() {
            RegisterOutcome::Refreshed
        } else {
            RegisterOutcome::New
        };
        guard.ep = Some(ep);
        guard.mode = mode;
        guard.version = version;
        guard.timeout = self.default_timeout_ticks;
        if outcome == RegisterOutcome::New {
            guard.registered_at = Some(Instant::now());
        }
        Some(outcome)
    }

    pub fn set_localip(&self, sdid: u8, localep: SocketAddrV4) -> bool {
        match self.slot(sdid) {
            Some(slot) => {
                slot.lock().unwrap().localep = Some(localep);
                true
            }
            None => false,
        }
    }

    pub fn set_pubkey(&self, sdid: u8, pubkey: [u8; 32]) -> bool {
        match self.slot(sdid) {
            Some(slot) => {
                let mut guard = slot.lock().unwrap();
                guard.pubkey = pubkey;
                guard.has_pubkey = true;
                true
            }
            None => false,
        }
    }

    /// Record a measured round-trip time; returns `Some((min, mean, max))`
    /// once a full `PING_WINDOW` of samples has closed.
    pub fn set_pingtime(&self, sdid: u8, rtt_ms: f64) -> Option<(f64, f64, f64)> {
        let slot = self.slot(sdid)?;
        slot.lock().unwrap().pingstats.push(rtt_ms)
    }

    pub fn record_forward(&self, sdid: u8, bytes: usize) {
        if let Some(slot) = self.slot(sdid) {
            let mut guard = slot.lock().unwrap();
            guard.packets_forwarded += 1;
            guard.bytes_forwarded += bytes as u64;
        }
    }

    /// Decrement every live slot's timeout by one tick, expiring any that
    /// reach zero. Returns the sdids that were newly lost this tick.
    pub fn tick(&self) -> Vec<u8> {
        let mut lost = Vec::new();
        for (idx, slot) in self.slots.iter().enumerate() {
            let mut guard = slot.lock().unwrap();
            if guard.timeout == 0 {
                continue;
            }
            guard.timeout -= 1;
            if guard.timeout == 0 {
                *guard = EndpointSlot::default();
                lost.push(idx as u8);
            }
        }
        lost
    }

    pub fn refresh(&self, sdid: u8) -> bool {
        match self.slot(sdid) {
            Some(slot) => {
                let mut guard = slot.lock().unwrap();
                if guard.ep.is_none() {
                    return false;
                }
                guard.timeout = self.default_timeout_ticks;
                true
            }
            None => false,
        }
    }

    pub fn get_num_clients(&self) -> usize {
        self.slots
            .iter()
            .filter(|s| s.lock().unwrap().is_live())
            .count()
    }

    pub fn with_slot<R>(&self, sdid: u8, f: impl FnOnce(&EndpointSlot) -> R) -> Option<R> {
        self.slot(sdid).map(|slot| f(&slot.lock().unwrap()))
    }

    /// Iterate every live (sdid, slot snapshot) pair.
    pub fn live_snapshot(&self) -> Vec<(u8, EndpointSlot)> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(idx, slot)| {
                let guard = slot.lock().unwrap();
                guard.is_live().then(|| (idx as u8, guard.clone()))
            })
            .collect()
    }
}
