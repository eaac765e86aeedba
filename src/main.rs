// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

use std::path::PathBuf;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use stagecast_relay::config::ServerConfig;
use stagecast_relay::error::ServerError;
use stagecast_relay::server::RelayServer;
use stagecast_relay::shutdown::ShutdownToken;

/// Port used when neither a config file nor `--port` supplies one.
const DEFAULT_PORT: u16 = 9869;

/// Real-time stage-device session relay.
#[derive(Parser, Debug)]
#[command(name = "stagecast-relay", version, about)]
struct Args {
    /// UDP/TCP port to listen on. Defaults to 9869 unless a config file
    /// sets its own `port`.
    #[arg(short = 'p', long)]
    port: Option<u16>,

    /// Room name announced to the lobby directory.
    #[arg(short = 'n', long)]
    name: Option<String>,

    /// Lobby directory base URL.
    #[arg(short = 'l', long)]
    lobbyurl: Option<String>,

    /// Group name announced alongside the room.
    #[arg(short = 'g', long, default_value = "")]
    group: String,

    /// Real-time scheduling priority hint.
    #[arg(short = 'r', long)]
    rtprio: Option<i32>,

    /// Enable the TCP tunnel bridge (on by default; overrides config file).
    #[arg(short = 't', long)]
    tcp: bool,

    /// Disable the TCP tunnel bridge (overrides config file).
    #[arg(long = "no-tcp")]
    no_tcp: bool,

    /// Load settings from a JSON config file; CLI flags override it.
    #[arg(short = 'c', long)]
    config: Option<PathBuf>,

    /// Increase log verbosity (repeatable).
    #[arg(short = 'v', long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress all but error-level logging.
    #[arg(short = 'q', long)]
    quiet: bool,
}

fn init_tracing(verbose: u8, quiet: bool) {
    let default_directive = if quiet {
        "error"
    } else {
        match verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn build_config(args: &Args) -> Result<ServerConfig, ServerError> {
    let mut config = match &args.config {
        Some(path) => {
            ServerConfig::from_file(path).map_err(|e| ServerError::Config(e.to_string()))?
        }
        None => ServerConfig::default(),
    };

    if let Some(port) = args.port {
        config.port = port;
    } else if args.config.is_none() {
        config.port = DEFAULT_PORT;
    }
    if let Some(name) = &args.name {
        config.room_name = Some(name.clone());
    }
    if let Some(url) = &args.lobbyurl {
        config.lobby_url = url.clone();
    }
    if !args.group.is_empty() {
        config.group = args.group.clone();
    }
    if let Some(rtprio) = args.rtprio {
        config.rt_priority = rtprio;
    }
    if args.tcp {
        config.tcp_bridge = true;
    }
    if args.no_tcp {
        config.tcp_bridge = false;
    }

    config
        .validate()
        .map_err(|e| ServerError::Config(e.to_string()))?;
    Ok(config)
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    init_tracing(args.verbose, args.quiet);

    let config = build_config(&args)?;
    let shutdown = ShutdownToken::new();
    if let Err(e) = shutdown.install_signal_handler() {
        tracing::warn!(error = %e, "failed to install signal handler");
    }

    let server = RelayServer::new(config, shutdown)?;
    server.run()?;

    tracing::info!("relay server stopped");
    Ok(())
}
