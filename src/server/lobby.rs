// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Lobby directory client.
//!
//! A thin wrapper over a blocking `reqwest` client. The reference server
//! used libcurl with a fixed `room:room` basic-auth credential and a
//! `libcurl-agent/1.0` user agent string; both are preserved verbatim so
//! existing lobby deployments keep accepting announcements from this
//! server unmodified.

use reqwest::blocking::Client;

use crate::error::LobbyError;

const USER_AGENT: &str = "libcurl-agent/1.0";
const BASIC_AUTH_USER: &str = "room";
const BASIC_AUTH_PASS: &str = "room";

pub struct LobbyClient {
    http: Client,
    base_url: String,
}

impl LobbyClient {
    pub fn new(base_url: String) -> Result<Self, LobbyError> {
        let http = Client::builder()
            .user_agent(USER_AGENT)
            .build()
            .map_err(LobbyError::Request)?;
        Ok(Self { http, base_url })
    }

    /// Announce room occupancy. `server_jitter_ms` is read-and-reset by the
    /// caller under the shared settings lock before this call.
    pub fn announce(
        &self,
        port: u16,
        name: &str,
        pin: u32,
        server_jitter_ms: f64,
        group: &str,
        empty: bool,
    ) -> Result<(), LobbyError> {
        let mut url = format!(
            "{}?port={}&name={}&pin={}&srvjit={:.1}&grp={}",
            self.base_url, port, name, pin, server_jitter_ms, group
        );
        if empty {
            url.push_str("&empty=1");
        }
        self.get(&url)
    }

    pub fn report_latency(
        &self,
        report_id: u32,
        src: u8,
        dest: u8,
        mean_ms: f64,
        jitter_ms: f64,
    ) -> Result<(), LobbyError> {
        let url = format!(
            "{}?latreport={}&src={}&dest={}&lat={:.1}&jit={:.1}",
            self.base_url, report_id, src, dest, mean_ms, jitter_ms
        );
        self.get(&url)
    }

    fn get(&self, url: &str) -> Result<(), LobbyError> {
        let body = self
            .http
            .get(url)
            .basic_auth(BASIC_AUTH_USER, Some(BASIC_AUTH_PASS))
            .send()
            .map_err(LobbyError::Request)?
            .error_for_status()
            .map_err(LobbyError::Request)?
            .text()
            .map_err(LobbyError::Request)?;
        if !body.is_empty() {
            return Err(LobbyError::NonEmptyBody);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn announce_url_carries_expected_fields() {
        let client = LobbyClient::new("http://127.0.0.1:1".into()).unwrap();
        // Build-only check: a genuinely unroutable host lets the send fail
        // fast without a live server, exercising the error path.
        let result = client.announce(9869, "studio-a", 1234, 0.0, "default", false);
        assert!(result.is_err());
    }
}
