//! # ocppd
//!
//! OCPP-J server binary: wires the WebSocket transport to the endpoint
//! and registers demo stages (Heartbeat answering, password auth).

#![deny(unsafe_code)]

mod stages;

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use ocppd_engine::{Endpoint, EndpointConfig};
use ocppd_ws::{WsConfig, WsTransport};

use crate::stages::{Heartbeat, PasswordAuth};

/// OCPP-J charge point server.
#[derive(Parser, Debug)]
#[command(name = "ocppd", about = "OCPP-J WebSocket server")]
struct Cli {
    /// Host to bind.
    #[arg(long, default_value = "0.0.0.0")]
    host: String,

    /// Port to bind (0 for auto-assign).
    #[arg(long, default_value = "9220")]
    port: u16,

    /// Route prefix clients connect under.
    #[arg(long, default_value = "ocpp")]
    route: String,

    /// Do not require Basic credentials on upgrade.
    #[arg(long)]
    no_basic_auth: bool,

    /// Password every charge point must present (implies Basic auth).
    #[arg(long)]
    password: Option<String>,

    /// Actions accepted from clients (repeatable).
    #[arg(long = "allow-action", default_values_t = vec!["Heartbeat".to_owned()])]
    allowed_actions: Vec<String>,

    /// Increase log verbosity (-v: debug, -vv: trace).
    #[arg(short, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn init_tracing(verbose: u8) {
    use tracing_subscriber::EnvFilter;

    let level = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .compact();
    let _ = subscriber.try_init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Cli::parse();
    init_tracing(args.verbose);

    let ws_config = WsConfig {
        host: args.host,
        port: args.port,
        route: args.route,
        require_basic_auth: !args.no_basic_auth,
        endpoint: EndpointConfig {
            allowed_actions: args.allowed_actions,
            ..EndpointConfig::default()
        },
        ..WsConfig::default()
    };
    let endpoint_config = ws_config.endpoint.clone();

    let transport = WsTransport::new(ws_config);
    let endpoint = Endpoint::builder(endpoint_config, transport.clone())
        .auth_stage(Arc::new(PasswordAuth::new(args.password)))
        .inbound_stage(Arc::new(Heartbeat))
        .build();
    transport.bind_endpoint(&endpoint);

    endpoint
        .listen()
        .await
        .context("Failed to start listening")?;
    if let Some(addr) = transport.local_addr() {
        tracing::info!(%addr, "ocppd listening");
    }

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl-c")?;

    tracing::info!("Shutting down...");
    endpoint.stop().await.context("Failed to stop endpoint")?;
    Ok(())
}
