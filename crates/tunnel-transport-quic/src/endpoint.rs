//! QUIC endpoint construction for the Relay (server) and Agent (client)
//! sides of the Data Plane's QUIC variant.

use std::net::SocketAddr;
use std::path::PathBuf;

use quinn::Endpoint;
use tracing::info;

use crate::config::{QuicConfig, QuicConfigError};

/// Binds a QUIC server endpoint on `bind_addr`, generating or reusing the
/// self-signed certificate at `cert_path`/`key_path`.
pub fn server_endpoint(
    bind_addr: SocketAddr,
    config: &QuicConfig,
    cert_path: &PathBuf,
    key_path: &PathBuf,
) -> Result<Endpoint, QuicConfigError> {
    let server_config = config.server_config(cert_path, key_path)?;
    let endpoint = Endpoint::server(server_config, bind_addr)?;
    info!(%bind_addr, "QUIC endpoint bound");
    Ok(endpoint)
}

/// Creates a QUIC client endpoint trusting only the Relay's self-signed
/// certificate at `cert_path`.
pub fn client_endpoint(config: &QuicConfig, cert_path: &PathBuf) -> Result<Endpoint, QuicConfigError> {
    let client_config = config.client_config(cert_path)?;
    let mut endpoint = Endpoint::client("0.0.0.0:0".parse().unwrap())?;
    endpoint.set_default_client_config(client_config);
    Ok(endpoint)
}
