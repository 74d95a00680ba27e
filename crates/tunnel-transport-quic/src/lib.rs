//! QUIC transport for the Data Plane's QUIC variant (spec §4.9): endpoint
//! construction plus the fixed configuration (ALPN, idle timeout, flow
//! control windows) this system requires. The control-command/data-frame
//! handshake itself lives in `tunnel-agent`/`tunnel-relay`, since it needs
//! cross-cutting knowledge of control-session and port-registry state that
//! doesn't belong in a transport-construction crate.

pub mod config;
pub mod endpoint;

pub use config::{QuicConfig, QuicConfigError};
pub use endpoint::{client_endpoint, server_endpoint};
