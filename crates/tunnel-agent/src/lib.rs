//! Agent: scans the local host for open ports, tunnels stable ones to the
//! Relay, and forwards inbound connections to the matching local service.

pub mod config;
pub mod control_quic;
pub mod control_tcp;
pub mod discovery;
pub mod error;

pub use config::{AgentConfig, DataPlaneVariant};
pub use error::AgentError;

use tokio::sync::{mpsc, oneshot};
use tracing::warn;
use tunnel_discovery::ScannerConfig;

/// Settle interval between the Control Session reaching `Connected` and the
/// Scanner starting, so the Change-Queue drainer never issues REGISTER_PORT
/// before the control channel is writable (spec §4.10).
const SUPERVISOR_SETTLE: std::time::Duration = std::time::Duration::from_secs(1);

/// Starts the Agent following the Supervisor's startup order (spec §4.10):
/// bring the Control Session up and wait for it to connect, settle briefly,
/// then start the Scanner. The two halves communicate over a bounded
/// channel of `ScanEvent`s (the Change-Queue); shutdown is LIFO by simply
/// awaiting the Control Session, which owns the process's lifetime.
pub async fn run(config: AgentConfig) -> Result<(), AgentError> {
    let (discovery_tx, discovery_rx) = mpsc::channel(256);
    let (ready_tx, ready_rx) = oneshot::channel();

    let control_config = config.clone();
    let control_task = tokio::spawn(async move {
        match control_config.variant {
            DataPlaneVariant::Tcp => control_tcp::run(control_config, discovery_rx, Some(ready_tx)).await,
            DataPlaneVariant::Quic => control_quic::run(control_config, discovery_rx, Some(ready_tx)).await,
        }
    });

    if ready_rx.await.is_err() {
        // The control session ended before ever connecting; report whatever
        // it returned instead of starting a scanner with nothing to drive.
        return control_task.await.map_err(|_| AgentError::ReconnectExhausted)?;
    }
    tokio::time::sleep(SUPERVISOR_SETTLE).await;

    let scanner_config = ScannerConfig {
        target_host: config.scan_host,
        ports: config.ports.clone(),
        workers: config.scan_workers,
        probe_timeout: config.probe_timeout,
        batch_size: config.batch_size,
        full_scan_interval: std::time::Duration::from_secs(600),
    };

    let strategy = if config.lazy {
        discovery::ScanStrategy::Incremental
    } else {
        match config.variant {
            DataPlaneVariant::Tcp => discovery::ScanStrategy::Full,
            DataPlaneVariant::Quic => discovery::ScanStrategy::Combined,
        }
    };

    let scanner_task = discovery::spawn(scanner_config, config.min_stable_time, strategy, config.interval, discovery_tx);

    let result = control_task.await.map_err(|_| AgentError::ReconnectExhausted)?;
    scanner_task.abort(); // LIFO shutdown: scanner (started last) stops first
    if let Err(e) = result.as_ref() {
        warn!(error = %e, "control session exited");
    }
    result
}
