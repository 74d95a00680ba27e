//! Relay: the publicly reachable half of the tunnel. Accepts Agent control
//! sessions, dynamically binds a public TCP listener per registered port,
//! and pairs each arriving User connection with the Agent's matching data
//! connection or QUIC stream.

pub mod config;
pub mod control_quic;
pub mod control_tcp;
pub mod data_tcp;
pub mod error;
pub mod registry;

pub use config::{DataPlaneVariant, RelayConfig};
pub use error::RelayError;

/// Starts the Relay for the configured Data Plane variant and runs until a
/// fatal error (bind failure, QUIC endpoint closed).
pub async fn run(config: RelayConfig) -> Result<(), RelayError> {
    match config.variant {
        DataPlaneVariant::Tcp => control_tcp::run(config).await,
        DataPlaneVariant::Quic => control_quic::run(config).await,
    }
}
