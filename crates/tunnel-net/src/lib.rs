//! Socket tuning and bidirectional byte pumping shared by the Agent and
//! Relay Data Planes.

pub mod pump;
pub mod socket;

pub use pump::{pump_pair, PumpStats};
pub use socket::{bind_reuseaddr, tune};
