//! Agent-side Control Session and TCP Data Plane client (spec §4.6, §4.8).
//!
//! One long-lived TCP connection to the Relay's control port carries
//! HEARTBEAT/REGISTER_PORT/UNREGISTER_PORT and inbound CONNECTION commands.
//! Each CONNECTION command triggers a fresh outbound TCP connection to the
//! Relay's data port (`control_port + 1`), opened with a `DATA_CONNECT`
//! handshake naming the port, then pumped against a local connection to the
//! scanned service.

use std::collections::{HashSet, VecDeque};
use std::net::SocketAddr;

use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tracing::{info, warn};
use tunnel_discovery::{ScanEvent, ScanEventKind};
use tunnel_net::pump_pair;
use tunnel_proto::codec::tcp::TcpCommand;

use crate::config::AgentConfig;
use crate::error::AgentError;

/// Runs the Control Session until it exhausts its reconnect budget. `ready`
/// fires once, after the very first successful connect, so the Supervisor
/// (`lib::run`) can delay starting the Scanner until the control channel is
/// writable (spec §4.10).
pub async fn run(
    config: AgentConfig,
    mut discovery_rx: mpsc::Receiver<ScanEvent>,
    mut ready: Option<oneshot::Sender<()>>,
) -> Result<(), AgentError> {
    let mut registered: HashSet<u16> = HashSet::new();
    let mut attempt = 0u32;

    loop {
        match run_session(&config, &mut registered, &mut discovery_rx, &mut ready).await {
            Ok(()) => return Ok(()), // graceful shutdown (discovery channel closed)
            Err(e) => {
                attempt += 1;
                warn!(error = %e, attempt, "control session ended, reconnecting");
                if attempt > config.reconnect_attempts {
                    return Err(AgentError::ReconnectExhausted);
                }
                tokio::time::sleep(config.reconnect_backoff).await;
            }
        }
    }
}

async fn run_session(
    config: &AgentConfig,
    registered: &mut HashSet<u16>,
    discovery_rx: &mut mpsc::Receiver<ScanEvent>,
    ready: &mut Option<oneshot::Sender<()>>,
) -> Result<(), AgentError> {
    let mut control = TcpStream::connect(&config.relay_addr)
        .await
        .map_err(|e| AgentError::Connect {
            addr: config.relay_addr.clone(),
            source: e,
        })?;
    info!(relay = %config.relay_addr, "control session established");
    if let Some(ready) = ready.take() {
        let _ = ready.send(());
    }

    // Full re-registration on (re)connect.
    let mut pending_registers: VecDeque<u16> = VecDeque::new();
    for &port in registered.iter() {
        TcpCommand::RegisterPort { port }.write_to(&mut control).await?;
        pending_registers.push_back(port);
    }

    let data_addr = data_plane_addr(&config.relay_addr)?;
    let mut heartbeat = tokio::time::interval(config.heartbeat_interval);
    heartbeat.tick().await;

    loop {
        tokio::select! {
            _ = heartbeat.tick() => {
                TcpCommand::Heartbeat.write_to(&mut control).await?;
            }
            event = discovery_rx.recv() => {
                match event {
                    Some(ScanEvent { kind: ScanEventKind::New, port }) => {
                        registered.insert(port);
                        TcpCommand::RegisterPort { port }.write_to(&mut control).await?;
                        pending_registers.push_back(port);
                    }
                    Some(ScanEvent { kind: ScanEventKind::Closed, port }) => {
                        registered.remove(&port);
                        TcpCommand::UnregisterPort { port }.write_to(&mut control).await?;
                    }
                    None => return Ok(()),
                }
            }
            cmd = TcpCommand::read_from(&mut control) => {
                match cmd? {
                    TcpCommand::Connection { port } => {
                        let scan_host = config.scan_host;
                        tokio::spawn(async move {
                            if let Err(e) = serve_connection(data_addr, scan_host, port).await {
                                warn!(port, error = %e, "data connection failed");
                            }
                        });
                    }
                    TcpCommand::RegisterPort { port } => {
                        // The relay processes REGISTER_PORT in receipt order
                        // and replies immediately, so the oldest outstanding
                        // request is always the one this reply answers —
                        // port=0 on the wire doesn't say which port failed
                        // (spec §4.2), so FIFO order is what resolves it.
                        match pending_registers.pop_front() {
                            Some(requested) if port == 0 => {
                                warn!(port = requested, "register port failed on the relay, marking not registered");
                                registered.remove(&requested);
                            }
                            Some(requested) => {
                                debug_assert_eq!(requested, port, "register port reply out of order");
                                info!(port, "register port acknowledged");
                            }
                            None => warn!(port, "register port reply with no outstanding request"),
                        }
                    }
                    TcpCommand::UnregisterPort { port } => {
                        info!(port, "unregister port acknowledged");
                    }
                    other => warn!(?other, "unexpected command on control channel"),
                }
            }
        }
    }
}

async fn serve_connection(data_addr: SocketAddr, scan_host: std::net::IpAddr, port: u16) -> Result<(), AgentError> {
    let mut data_conn = TcpStream::connect(data_addr).await.map_err(|e| AgentError::Connect {
        addr: data_addr.to_string(),
        source: e,
    })?;
    TcpCommand::DataConnect { port }.write_to(&mut data_conn).await?;

    let local = TcpStream::connect((scan_host, port)).await.map_err(|e| AgentError::Connect {
        addr: format!("{}:{}", scan_host, port),
        source: e,
    })?;

    tunnel_net::tune(&data_conn, tunnel_net::socket::DEFAULT_BUFFER_SIZE);
    tunnel_net::tune(&local, tunnel_net::socket::DEFAULT_BUFFER_SIZE);

    pump_pair(data_conn, local, tunnel_net::pump::DEFAULT_BUFFER_SIZE).await;
    Ok(())
}

fn data_plane_addr(relay_addr: &str) -> Result<SocketAddr, AgentError> {
    let addr: SocketAddr = relay_addr.parse().map_err(|_| AgentError::Connect {
        addr: relay_addr.to_string(),
        source: std::io::Error::new(std::io::ErrorKind::InvalidInput, "relay_addr must be host:port"),
    })?;
    Ok(SocketAddr::new(addr.ip(), addr.port() + 1))
}
