//! Tunnel Relay — the publicly reachable half of the tunnel, exposing
//! Agent-registered ports to Users.
//!
//! # Example
//!
//! ```bash
//! tunnel-relay 7000
//! tunnel-relay 7000 --variant quic --host 0.0.0.0 --cert relay.crt --key relay.key
//! ```

use std::net::IpAddr;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use tracing::info;
use tunnel_relay::{DataPlaneVariant, RelayConfig};

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Variant {
    Tcp,
    Quic,
}

#[derive(Parser, Debug)]
#[command(name = "tunnel-relay", about = "Reverse tunnel relay", version)]
struct Args {
    /// Control port (TCP variant) or QUIC endpoint port (QUIC variant).
    port: u16,

    /// Data Plane transport to use.
    #[arg(long, env = "TUNNEL_VARIANT", value_enum, default_value_t = Variant::Tcp)]
    variant: Variant,

    /// Address to bind listeners on.
    #[arg(long, env = "TUNNEL_BIND_HOST", default_value = "0.0.0.0")]
    host: IpAddr,

    /// QUIC variant only: path to the server certificate (auto-generated next
    /// to the binary if omitted).
    #[arg(long, env = "TUNNEL_QUIC_CERT")]
    cert: Option<PathBuf>,

    /// QUIC variant only: path to the server private key (auto-generated
    /// next to the binary if omitted).
    #[arg(long, env = "TUNNEL_QUIC_KEY")]
    key: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, env = "RUST_LOG", default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(&args.log_level)
        .with_target(true)
        .init();

    let variant = match args.variant {
        Variant::Tcp => DataPlaneVariant::Tcp,
        Variant::Quic => DataPlaneVariant::Quic,
    };

    let config = RelayConfig {
        variant,
        bind_host: args.host,
        control_port: args.port,
        quic_cert_path: args.cert,
        quic_key_path: args.key,
        ..RelayConfig::default()
    };

    info!(port = config.control_port, variant = ?config.variant, "starting relay");

    tokio::select! {
        result = tunnel_relay::run(config) => {
            result.context("relay exited with an error")?;
        }
        _ = tokio::signal::ctrl_c() => {
            info!("received Ctrl+C, shutting down");
        }
    }

    Ok(())
}
