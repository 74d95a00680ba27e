//! Wire protocol definitions shared by the Agent and Relay.
//!
//! The TCP and QUIC Data Plane variants speak different command-code
//! dialects over the same big-endian, non-length-delimited framing style;
//! both live here so Agent and Relay binaries depend on a single source of
//! truth for the bytes they exchange.

pub mod codec;

pub use codec::CodecError;
