//! Tunnel Agent — scans the local host for open ports and tunnels stable
//! ones through a Relay.
//!
//! # Example
//!
//! ```bash
//! tunnel-agent relay.example.com 7000
//! tunnel-agent relay.example.com 7000 --variant quic --quic-cert /etc/tunnel/relay.crt
//! ```

use std::net::IpAddr;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use tracing::info;
use tunnel_agent::{AgentConfig, DataPlaneVariant};

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Variant {
    Tcp,
    Quic,
}

#[derive(Parser, Debug)]
#[command(name = "tunnel-agent", about = "Reverse tunnel agent with autonomous port discovery", version)]
struct Args {
    /// Relay control hostname (TCP variant) or QUIC endpoint hostname.
    relay_host: String,

    /// Relay control port (TCP variant) or QUIC endpoint port.
    relay_control_port: u16,

    /// Host whose ports are scanned and, once stable, tunneled.
    #[arg(long, env = "TUNNEL_TARGET", default_value = "127.0.0.1")]
    target: IpAddr,

    /// Scan tick cadence, in seconds. Defaults to 300s (TCP) or 20s (QUIC)
    /// when omitted.
    #[arg(long, env = "TUNNEL_INTERVAL")]
    interval: Option<u64>,

    /// Restrict scanning to this comma-separated port list; otherwise the
    /// full 1-65535 range is scanned.
    #[arg(long, env = "TUNNEL_PORTS", value_delimiter = ',')]
    ports: Option<Vec<u16>>,

    /// Concurrent connect-scan workers.
    #[arg(long, env = "TUNNEL_WORKERS", default_value_t = 50)]
    workers: usize,

    /// Use bounded-incremental scanning instead of a full sweep each tick.
    #[arg(long, env = "TUNNEL_LAZY")]
    lazy: bool,

    /// Data Plane transport to use.
    #[arg(long, env = "TUNNEL_VARIANT", value_enum, default_value_t = Variant::Tcp)]
    variant: Variant,

    /// Path to the Relay's self-signed certificate (required for --variant quic).
    #[arg(long, env = "TUNNEL_QUIC_CERT")]
    quic_cert: Option<PathBuf>,

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

    if matches!(variant, DataPlaneVariant::Quic) && args.quic_cert.is_none() {
        anyhow::bail!("--quic-cert is required when --variant quic is selected");
    }

    let default_interval_secs = match variant {
        DataPlaneVariant::Tcp => 300,
        DataPlaneVariant::Quic => 20,
    };

    let config = AgentConfig {
        relay_addr: format!("{}:{}", args.relay_host, args.relay_control_port),
        variant,
        scan_host: args.target,
        ports: args.ports,
        scan_workers: args.workers,
        lazy: args.lazy,
        interval: Duration::from_secs(args.interval.unwrap_or(default_interval_secs)),
        quic_cert_path: args.quic_cert,
        ..AgentConfig::default()
    };

    info!(relay = %config.relay_addr, variant = ?config.variant, "starting agent");

    tokio::select! {
        result = tunnel_agent::run(config) => {
            result.context("agent exited with an error")?;
        }
        _ = tokio::signal::ctrl_c() => {
            info!("received Ctrl+C, shutting down");
        }
    }

    Ok(())
}
