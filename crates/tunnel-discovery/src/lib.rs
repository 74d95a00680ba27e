//! Autonomous port discovery: concurrent connect-scan plus an optional
//! stability filter sitting between the Scanner and the Control Session.

pub mod scanner;
pub mod stability;

pub use scanner::{PortScanner, ScanEvent, ScanEventKind, ScanReport, ScannerConfig};
pub use stability::{StabilityFilter, DEFAULT_MIN_STABLE_TIME};
