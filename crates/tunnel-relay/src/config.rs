use std::net::IpAddr;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataPlaneVariant {
    Tcp,
    Quic,
}

#[derive(Debug, Clone)]
pub struct RelayConfig {
    pub variant: DataPlaneVariant,
    pub bind_host: IpAddr,
    /// Control port (TCP variant; data plane listens on `control_port + 1`)
    /// or the single QUIC endpoint port (QUIC variant).
    pub control_port: u16,
    /// Any-frame liveness deadline; the Agent is dropped if nothing arrives
    /// on the control channel within this window.
    pub liveness_timeout: Duration,
    /// How long the Relay waits for a `CONNECTION_ACK` before giving up on
    /// a QUIC data stream handshake.
    pub ack_timeout: Duration,
    pub ack_poll_interval: Duration,
    /// QUIC variant only; auto-generated next to the binary if either is
    /// omitted.
    pub quic_cert_path: Option<PathBuf>,
    pub quic_key_path: Option<PathBuf>,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            variant: DataPlaneVariant::Tcp,
            bind_host: IpAddr::from([0, 0, 0, 0]),
            control_port: 7000,
            liveness_timeout: Duration::from_secs(30),
            ack_timeout: Duration::from_secs(5),
            ack_poll_interval: Duration::from_millis(100),
            quic_cert_path: None,
            quic_key_path: None,
        }
    }
}
