//! Agent-side Control Session and Data Plane client for the QUIC variant
//! (spec §4.6, §4.9).
//!
//! The Agent opens one client-initiated bidirectional stream as the Control
//! Session and keeps it for the life of the QUIC connection. REGISTER_PORT/
//! UNREGISTER_PORT are echoed back by the Relay; a failed REGISTER_PORT
//! comes back with port `0`, resolved to the right port via FIFO order
//! against the outstanding requests this side sent. The Relay opens a fresh
//! server-initiated bidirectional stream per User connection; the Agent
//! learns which local port it serves from a `CONNECTION` control command
//! carrying the stream's id, acks it, and pumps `DataFrame`-framed bytes
//! against a local TCP connection to that port.

use std::collections::{HashMap, VecDeque};
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, Mutex};
use tracing::{info, warn};
use tunnel_discovery::{ScanEvent, ScanEventKind};
use tunnel_proto::codec::quic::{ControlCommand, DataFrame, FrameDecoder};

use crate::config::AgentConfig;
use crate::error::AgentError;

type PendingMap = Arc<Mutex<HashMap<u64, (u16, u32)>>>; // stream_id -> (port, conn_id)

/// Runs the Control Session until it exhausts its reconnect budget. `ready`
/// fires once, after the very first successful connect, so the Supervisor
/// (`lib::run`) can delay starting the Scanner until the control channel is
/// writable (spec §4.10).
pub async fn run(
    config: AgentConfig,
    mut discovery_rx: mpsc::Receiver<ScanEvent>,
    mut ready: Option<oneshot::Sender<()>>,
) -> Result<(), AgentError> {
    let mut registered = std::collections::HashSet::new();
    let mut attempt = 0u32;

    loop {
        match run_session(&config, &mut registered, &mut discovery_rx, &mut ready).await {
            Ok(()) => return Ok(()),
            Err(e) => {
                attempt += 1;
                warn!(error = %e, attempt, "quic control session ended, reconnecting");
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
    registered: &mut std::collections::HashSet<u16>,
    discovery_rx: &mut mpsc::Receiver<ScanEvent>,
    ready: &mut Option<oneshot::Sender<()>>,
) -> Result<(), AgentError> {
    let cert_path = config
        .quic_cert_path
        .as_ref()
        .expect("quic_cert_path required for the QUIC variant");
    let quic_config = tunnel_transport_quic::QuicConfig::default();
    let endpoint = tunnel_transport_quic::client_endpoint(&quic_config, cert_path)?;

    let relay_addr: std::net::SocketAddr = config.relay_addr.parse().map_err(|_| AgentError::Connect {
        addr: config.relay_addr.clone(),
        source: std::io::Error::new(std::io::ErrorKind::InvalidInput, "relay_addr must be host:port"),
    })?;
    let connection = endpoint
        .connect(relay_addr, "relay")
        .map_err(|e| AgentError::Connect {
            addr: config.relay_addr.clone(),
            source: std::io::Error::new(std::io::ErrorKind::Other, e.to_string()),
        })?
        .await?;
    info!(relay = %config.relay_addr, "quic control session established");
    if let Some(ready) = ready.take() {
        let _ = ready.send(());
    }

    let (control_send, mut control_recv) = connection.open_bi().await?;
    let control_send = Arc::new(Mutex::new(control_send));

    let mut pending_registers: VecDeque<u16> = VecDeque::new();
    for &port in registered.iter() {
        ControlCommand::RegisterPort { port }
            .write_to(&mut *control_send.lock().await)
            .await?;
        pending_registers.push_back(port);
    }

    let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));

    let accept_pending = pending.clone();
    let accept_conn = connection.clone();
    let accept_control_send = control_send.clone();
    let scan_host = config.scan_host;
    let accept_task = tokio::spawn(async move {
        loop {
            match accept_conn.accept_bi().await {
                Ok((send, recv)) => {
                    let pending = accept_pending.clone();
                    let control_send = accept_control_send.clone();
                    tokio::spawn(async move {
                        if let Err(e) = serve_data_stream(send, recv, pending, control_send, scan_host).await {
                            warn!(error = %e, "quic data stream failed");
                        }
                    });
                }
                Err(_) => return,
            }
        }
    });

    let mut heartbeat = tokio::time::interval(config.heartbeat_interval);
    heartbeat.tick().await;

    let result = loop {
        tokio::select! {
            _ = heartbeat.tick() => {
                if let Err(e) = ControlCommand::Heartbeat.write_to(&mut *control_send.lock().await).await {
                    break Err(e.into());
                }
            }
            event = discovery_rx.recv() => {
                match event {
                    Some(ScanEvent { kind: ScanEventKind::New, port }) => {
                        registered.insert(port);
                        if let Err(e) = (ControlCommand::RegisterPort { port }).write_to(&mut *control_send.lock().await).await {
                            break Err(e.into());
                        }
                        pending_registers.push_back(port);
                    }
                    Some(ScanEvent { kind: ScanEventKind::Closed, port }) => {
                        registered.remove(&port);
                        if let Err(e) = (ControlCommand::UnregisterPort { port }).write_to(&mut *control_send.lock().await).await {
                            break Err(e.into());
                        }
                    }
                    None => break Ok(()),
                }
            }
            cmd = ControlCommand::read_from(&mut control_recv) => {
                match cmd {
                    Ok(ControlCommand::Connection { stream_id, port, conn_id }) => {
                        pending.lock().await.insert(stream_id as u64, (port, conn_id));
                    }
                    Ok(ControlCommand::RegisterPort { port }) => {
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
                    Ok(ControlCommand::UnregisterPort { port }) => {
                        info!(port, "unregister port acknowledged");
                    }
                    Ok(other) => warn!(?other, "unexpected command on quic control stream"),
                    Err(e) => break Err(e.into()),
                }
            }
        }
    };

    accept_task.abort();
    result
}

async fn serve_data_stream(
    mut send: quinn::SendStream,
    mut recv: quinn::RecvStream,
    pending: PendingMap,
    control_send: Arc<Mutex<quinn::SendStream>>,
    scan_host: IpAddr,
) -> Result<(), AgentError> {
    let stream_id = send.id().index();

    // The CONNECTION announcement may race the stream's arrival; poll
    // briefly for it to show up in the pending map.
    let (port, conn_id) = wait_for_pending(&pending, stream_id).await?;

    ControlCommand::ConnectionAck {
        stream_id: stream_id as u32,
    }
    .write_to(&mut *control_send.lock().await)
    .await?;

    let mut local = TcpStream::connect((scan_host, port)).await.map_err(|e| AgentError::Connect {
        addr: format!("{}:{}", scan_host, port),
        source: e,
    })?;

    let mut decoder = FrameDecoder::new();
    let mut read_buf = [0u8; 16 * 1024];
    let mut local_buf = [0u8; 16 * 1024];

    loop {
        tokio::select! {
            chunk = recv.read(&mut read_buf) => {
                match chunk {
                    Ok(Some(n)) => {
                        decoder.feed(&read_buf[..n]);
                        while let Some(frame) = decoder.try_decode().map_err(AgentError::from)? {
                            use tokio::io::AsyncWriteExt;
                            local.write_all(&frame.payload).await?;
                        }
                    }
                    Ok(None) => break,
                    Err(e) => return Err(AgentError::Io(std::io::Error::new(std::io::ErrorKind::Other, e.to_string()))),
                }
            }
            n = { use tokio::io::AsyncReadExt; local.read(&mut local_buf) } => {
                let n = n?;
                if n == 0 {
                    break;
                }
                let frame = DataFrame { conn_id, payload: bytes::Bytes::copy_from_slice(&local_buf[..n]) };
                use tokio::io::AsyncWriteExt;
                send.write_all(&frame.encode()).await.map_err(|e| AgentError::Io(std::io::Error::new(std::io::ErrorKind::Other, e.to_string())))?;
            }
        }
    }

    let _ = send.finish();
    Ok(())
}

async fn wait_for_pending(pending: &PendingMap, stream_id: u64) -> Result<(u16, u32), AgentError> {
    for _ in 0..50 {
        if let Some(entry) = pending.lock().await.remove(&stream_id) {
            return Ok(entry);
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    Err(AgentError::LivenessTimeout)
}
