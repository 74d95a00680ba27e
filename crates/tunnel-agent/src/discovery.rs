//! Wires the Port Discovery Engine (`tunnel-discovery`) into the Agent's
//! Control Session: runs scan rounds on a fixed tick, feeds each round's raw
//! findings through a `StabilityFilter`, and forwards the resulting debounced
//! `new`/`closed` events to whoever owns the control channel.

use std::time::Duration;

use tokio::sync::mpsc;
use tracing::debug;
use tunnel_discovery::{PortScanner, ScanEvent, ScannerConfig, StabilityFilter};

/// Which of the Port Scanner's sweep modes the discovery loop drives on each
/// tick: always a full sweep, pure bounded-incremental (`--lazy`), or the
/// QUIC variant's default combined incremental/periodic-full strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanStrategy {
    Full,
    Incremental,
    Combined,
}

/// Spawns the discovery loop feeding `tx` (the Change-Queue), started by the
/// Supervisor only once the Control Session is up (spec §4.10). Returns the
/// task handle so the Supervisor can stop it LIFO on shutdown.
pub fn spawn(
    scanner_config: ScannerConfig,
    min_stable_time: Duration,
    strategy: ScanStrategy,
    tick: Duration,
    tx: mpsc::Sender<ScanEvent>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut scanner = PortScanner::new(scanner_config);
        let mut filter = StabilityFilter::new(min_stable_time);
        let mut interval = tokio::time::interval(tick);

        loop {
            interval.tick().await;
            let report = match strategy {
                ScanStrategy::Full => scanner.scan_full().await,
                ScanStrategy::Incremental => scanner.scan_incremental().await,
                ScanStrategy::Combined => scanner.scan_combined().await,
            };

            let events = filter.observe_round(&report.probed, &report.active_in_range);
            for event in events {
                debug!(?event, "stable port transition");
                if tx.send(event).await.is_err() {
                    return; // receiver dropped, discovery loop no longer needed
                }
            }
        }
    })
}
