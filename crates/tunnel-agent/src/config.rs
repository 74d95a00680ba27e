use std::net::IpAddr;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataPlaneVariant {
    Tcp,
    Quic,
}

#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// `host:port` of the Relay's control endpoint (TCP variant) or QUIC
    /// endpoint (QUIC variant).
    pub relay_addr: String,
    pub variant: DataPlaneVariant,
    /// Host whose ports are scanned and, once stable, tunneled (`--target`).
    pub scan_host: IpAddr,
    /// Explicit ports to scan (`--ports`); `None` scans the full 1-65535
    /// range.
    pub ports: Option<Vec<u16>>,
    pub scan_workers: usize,
    /// Selects bounded-incremental scanning (`--lazy`) over a full sweep
    /// every tick.
    pub lazy: bool,
    /// Scan tick cadence (`--interval`).
    pub interval: Duration,
    pub probe_timeout: Duration,
    pub batch_size: u32,
    pub min_stable_time: Duration,
    pub heartbeat_interval: Duration,
    pub reconnect_attempts: u32,
    pub reconnect_backoff: Duration,
    /// PEM certificate the Agent trusts for the Relay's QUIC endpoint.
    /// Required when `variant == Quic`.
    pub quic_cert_path: Option<PathBuf>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            relay_addr: "127.0.0.1:7000".to_string(),
            variant: DataPlaneVariant::Tcp,
            scan_host: IpAddr::from([127, 0, 0, 1]),
            ports: None,
            scan_workers: 50,
            lazy: false,
            interval: Duration::from_secs(300),
            probe_timeout: Duration::from_millis(300),
            batch_size: 1000,
            min_stable_time: Duration::from_secs(10),
            heartbeat_interval: Duration::from_secs(5),
            reconnect_attempts: 10,
            reconnect_backoff: Duration::from_secs(2),
            quic_cert_path: None,
        }
    }
}
