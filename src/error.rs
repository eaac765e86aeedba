// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Error taxonomy for the relay server.

use thiserror::Error;

/// Errors raised by the secure datagram codec.
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("datagram too short: {0} bytes")]
    Truncated(usize),
    #[error("secret mismatch")]
    SecretMismatch,
    #[error("payload too large: {len} bytes (max {max})")]
    PayloadTooLarge { len: usize, max: usize },
}

/// Errors raised by the UDP transport.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("bind failed: {0}")]
    Bind(#[source] std::io::Error),
    #[error("I/O error: {0}")]
    Io(#[source] std::io::Error),
}

impl From<std::io::Error> for TransportError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}

/// Errors raised by the TCP tunnel bridge.
#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("accept failed: {0}")]
    Accept(#[source] std::io::Error),
    #[error("oversized frame: {0} bytes")]
    OversizedFrame(usize),
    #[error("I/O error: {0}")]
    Io(#[source] std::io::Error),
}

impl From<std::io::Error> for BridgeError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}

/// Errors raised while talking to the lobby directory.
#[derive(Debug, Error)]
pub enum LobbyError {
    #[error("request failed: {0}")]
    Request(#[source] reqwest::Error),
    #[error("lobby returned a non-empty body")]
    NonEmptyBody,
}

/// Top-level server error, aggregating the component error types.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("configuration error: {0}")]
    Config(String),
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error(transparent)]
    Bridge(#[from] BridgeError),
    #[error("server already running")]
    AlreadyRunning,
}
