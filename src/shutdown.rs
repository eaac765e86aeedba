// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Cooperative shutdown token observed by every background loop.
//!
//! Replaces the reference implementation's free-function signal handler and
//! global `quit_app` flag with a shared, cloneable token. A watcher thread
//! flips it from a `ctrlc` signal handler; every loop polls it at its next
//! suspension point (a `recv` timeout or a periodic sleep).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Shared shutdown flag.
#[derive(Clone, Default)]
pub struct ShutdownToken(Arc<AtomicBool>);

impl ShutdownToken {
    pub fn new() -> Self {
        Self(Arc::new(AtomicBool::new(false)))
    }

    pub fn is_shutting_down(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    pub fn request_shutdown(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Sleep in small increments so shutdown is observed promptly.
    pub fn sleep_or_shutdown(&self, duration: Duration) -> bool {
        const STEP: Duration = Duration::from_millis(20);
        let mut remaining = duration;
        while remaining > Duration::ZERO {
            if self.is_shutting_down() {
                return true;
            }
            let step = remaining.min(STEP);
            std::thread::sleep(step);
            remaining = remaining.saturating_sub(step);
        }
        self.is_shutting_down()
    }

    /// Register the process-wide SIGINT/SIGTERM handler. Mirrors the
    /// reference implementation's `quitwatch` thread, which polled a
    /// global flag every 100ms; `ctrlc` delivers the signal directly
    /// instead, so no polling thread is needed here.
    pub fn install_signal_handler(&self) -> Result<(), ctrlc::Error> {
        let token = self.clone();
        ctrlc::set_handler(move || {
            token.request_shutdown();
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_running() {
        let token = ShutdownToken::new();
        assert!(!token.is_shutting_down());
    }

    #[test]
    fn request_shutdown_is_observed() {
        let token = ShutdownToken::new();
        token.request_shutdown();
        assert!(token.is_shutting_down());
    }

    #[test]
    fn clone_shares_state() {
        let token = ShutdownToken::new();
        let clone = token.clone();
        clone.request_shutdown();
        assert!(token.is_shutting_down());
    }

    #[test]
    fn sleep_or_shutdown_returns_early() {
        let token = ShutdownToken::new();
        let clone = token.clone();
        std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(10));
            clone.request_shutdown();
        });
        let shut_down = token.sleep_or_shutdown(Duration::from_secs(5));
        assert!(shut_down);
    }
}
