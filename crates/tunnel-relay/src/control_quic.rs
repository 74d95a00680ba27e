//! Relay-side Control Session and Data Plane for the QUIC variant
//! (spec §4.6, §4.7, §4.9).
//!
//! The Agent opens one client-initiated bidirectional stream as the Control
//! Session, torn down unconditionally if no frame arrives within the
//! liveness timeout. REGISTER_PORT is echoed back with the same port on
//! success, or port `0` if the bind failed (the session stays up either
//! way); UNREGISTER_PORT is echoed with its port once torn down. For every
//! User connection accepted on a registered port's public TCP listener, the
//! Relay opens a fresh server-initiated bidirectional stream, announces it
//! with a `CONNECTION` command carrying that stream's real numeric id, waits
//! up to 5s (polled every 100ms) for the Agent's `CONNECTION_ACK`, then
//! pumps `DataFrame`-framed bytes against the User's TCP connection.

use std::collections::HashSet;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use quinn::{Connection, SendStream};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tracing::{info, warn};
use tunnel_net::bind_reuseaddr;
use tunnel_proto::codec::quic::{ControlCommand, DataFrame, FrameDecoder};

use crate::config::RelayConfig;
use crate::error::RelayError;
use crate::registry::PortRegistry;

type AckSet = Arc<Mutex<HashSet<u32>>>;

pub async fn run(config: RelayConfig) -> Result<(), RelayError> {
    let bind_addr = SocketAddr::new(config.bind_host, config.control_port);
    let quic_config = tunnel_transport_quic::QuicConfig::default();
    let (cert_path, key_path) = cert_paths(&config);
    let endpoint = tunnel_transport_quic::server_endpoint(bind_addr, &quic_config, &cert_path, &key_path)?;
    info!(%bind_addr, "quic relay endpoint bound");

    loop {
        let Some(incoming) = endpoint.accept().await else {
            return Ok(());
        };
        let config = config.clone();
        tokio::spawn(async move {
            match incoming.await {
                Ok(connection) => {
                    if let Err(e) = serve_agent(connection, &config).await {
                        warn!(error = %e, "quic agent session ended");
                    }
                }
                Err(e) => warn!(error = %e, "quic handshake failed"),
            }
        });
    }
}

fn cert_paths(config: &RelayConfig) -> (PathBuf, PathBuf) {
    (
        config.quic_cert_path.clone().unwrap_or_else(|| PathBuf::from("relay-cert.pem")),
        config.quic_key_path.clone().unwrap_or_else(|| PathBuf::from("relay-key.pem")),
    )
}

async fn serve_agent(connection: Connection, config: &RelayConfig) -> Result<(), RelayError> {
    let (control_send, mut control_recv) = connection.accept_bi().await?;
    let control_send = Arc::new(Mutex::new(control_send));
    let registry = Arc::new(PortRegistry::new());
    let acked: AckSet = Arc::new(Mutex::new(HashSet::new()));
    let next_conn_id = Arc::new(AtomicU32::new(1));

    let mut listener_ports = Vec::new();
    let mut deadline = tokio::time::Instant::now() + config.liveness_timeout;

    let result = loop {
        tokio::select! {
            _ = tokio::time::sleep_until(deadline) => {
                break Err(RelayError::LivenessTimeout);
            }
            cmd = ControlCommand::read_from(&mut control_recv) => {
                deadline = tokio::time::Instant::now() + config.liveness_timeout;
                match cmd {
                    Ok(ControlCommand::Heartbeat) => {}
                    Ok(ControlCommand::RegisterPort { port }) => {
                        info!(port, "registering port (quic)");
                        match spawn_port_listener(
                            connection.clone(),
                            config.bind_host,
                            port,
                            control_send.clone(),
                            acked.clone(),
                            next_conn_id.clone(),
                            config.ack_timeout,
                            config.ack_poll_interval,
                        )
                        .await
                        {
                            Ok(handle) => {
                                if let Some(old) = registry.register(port, handle).await {
                                    old.abort();
                                }
                                listener_ports.push(port);
                                if let Err(e) = (ControlCommand::RegisterPort { port }).write_to(&mut *control_send.lock().await).await {
                                    break Err(e.into());
                                }
                            }
                            Err(e) => {
                                warn!(port, error = %e, "register port failed, replying with port=0");
                                if let Err(e) = (ControlCommand::RegisterPort { port: 0 }).write_to(&mut *control_send.lock().await).await {
                                    break Err(e.into());
                                }
                            }
                        }
                    }
                    Ok(ControlCommand::UnregisterPort { port }) => {
                        info!(port, "unregistering port (quic)");
                        if let Some(handle) = registry.unregister(port).await {
                            handle.abort();
                        }
                        listener_ports.retain(|&p| p != port);
                        if let Err(e) = (ControlCommand::UnregisterPort { port }).write_to(&mut *control_send.lock().await).await {
                            break Err(e.into());
                        }
                    }
                    Ok(ControlCommand::ConnectionAck { stream_id }) => {
                        acked.lock().await.insert(stream_id);
                    }
                    Ok(other) => warn!(?other, "unexpected command on relay quic control channel"),
                    Err(e) => break Err(e.into()),
                }
            }
        }
    };

    for port in &listener_ports {
        if let Some(handle) = registry.unregister(*port).await {
            handle.abort();
        }
    }
    result
}

#[allow(clippy::too_many_arguments)]
async fn spawn_port_listener(
    connection: Connection,
    bind_host: std::net::IpAddr,
    port: u16,
    control_send: Arc<Mutex<SendStream>>,
    acked: AckSet,
    next_conn_id: Arc<AtomicU32>,
    ack_timeout: std::time::Duration,
    ack_poll_interval: std::time::Duration,
) -> Result<tokio::task::JoinHandle<()>, RelayError> {
    let addr = SocketAddr::new(bind_host, port);
    let listener = bind_reuseaddr(addr).map_err(|e| RelayError::Bind { addr, source: e })?;

    Ok(tokio::spawn(async move {
        loop {
            match listener.accept().await {
                Ok((user, peer)) => {
                    info!(port, %peer, "user connected (quic)");
                    let connection = connection.clone();
                    let control_send = control_send.clone();
                    let acked = acked.clone();
                    let conn_id = next_conn_id.fetch_add(1, Ordering::Relaxed);
                    tokio::spawn(async move {
                        if let Err(e) =
                            serve_user(connection, user, port, conn_id, control_send, acked, ack_timeout, ack_poll_interval).await
                        {
                            warn!(port, error = %e, "quic user session failed");
                        }
                    });
                }
                Err(e) => {
                    warn!(port, error = %e, "quic port listener accept failed");
                    return;
                }
            }
        }
    }))
}

#[allow(clippy::too_many_arguments)]
async fn serve_user(
    connection: Connection,
    mut user: TcpStream,
    port: u16,
    conn_id: u32,
    control_send: Arc<Mutex<SendStream>>,
    acked: AckSet,
    ack_timeout: std::time::Duration,
    ack_poll_interval: std::time::Duration,
) -> Result<(), RelayError> {
    let (mut send, mut recv) = connection.open_bi().await?;
    let stream_id = send.id().index() as u32;

    ControlCommand::Connection { stream_id, port, conn_id }
        .write_to(&mut *control_send.lock().await)
        .await?;

    wait_for_ack(&acked, stream_id, ack_timeout, ack_poll_interval).await?;

    tunnel_net::tune(&user, tunnel_net::socket::DEFAULT_BUFFER_SIZE);

    let mut decoder = FrameDecoder::new();
    let mut read_buf = [0u8; 16 * 1024];
    let mut user_buf = [0u8; 16 * 1024];

    loop {
        tokio::select! {
            chunk = recv.read(&mut read_buf) => {
                match chunk {
                    Ok(Some(n)) => {
                        decoder.feed(&read_buf[..n]);
                        while let Some(frame) = decoder.try_decode()? {
                            use tokio::io::AsyncWriteExt;
                            user.write_all(&frame.payload).await?;
                        }
                    }
                    Ok(None) => break,
                    Err(e) => return Err(RelayError::Io(std::io::Error::new(std::io::ErrorKind::Other, e.to_string()))),
                }
            }
            n = { use tokio::io::AsyncReadExt; user.read(&mut user_buf) } => {
                let n = n?;
                if n == 0 {
                    break;
                }
                let frame = DataFrame { conn_id, payload: bytes::Bytes::copy_from_slice(&user_buf[..n]) };
                use tokio::io::AsyncWriteExt;
                send.write_all(&frame.encode()).await.map_err(|e| RelayError::Io(std::io::Error::new(std::io::ErrorKind::Other, e.to_string())))?;
            }
        }
    }

    let _ = send.finish();
    Ok(())
}

async fn wait_for_ack(
    acked: &AckSet,
    stream_id: u32,
    ack_timeout: std::time::Duration,
    ack_poll_interval: std::time::Duration,
) -> Result<(), RelayError> {
    let attempts = (ack_timeout.as_millis() / ack_poll_interval.as_millis().max(1)).max(1) as u32;
    for _ in 0..attempts {
        if acked.lock().await.remove(&stream_id) {
            return Ok(());
        }
        tokio::time::sleep(ack_poll_interval).await;
    }
    Err(RelayError::AckTimeout)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cert_paths_default_next_to_binary() {
        let config = RelayConfig::default();
        let (cert, key) = cert_paths(&config);
        assert_eq!(cert, PathBuf::from("relay-cert.pem"));
        assert_eq!(key, PathBuf::from("relay-key.pem"));
    }

    #[tokio::test]
    async fn wait_for_ack_succeeds_once_inserted() {
        let acked: AckSet = Arc::new(Mutex::new(HashSet::new()));
        acked.lock().await.insert(7);
        let result = wait_for_ack(&acked, 7, std::time::Duration::from_millis(200), std::time::Duration::from_millis(10)).await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn wait_for_ack_times_out_when_never_acked() {
        let acked: AckSet = Arc::new(Mutex::new(HashSet::new()));
        let result = wait_for_ack(&acked, 7, std::time::Duration::from_millis(30), std::time::Duration::from_millis(10)).await;
        assert!(matches!(result, Err(RelayError::AckTimeout)));
    }
}
