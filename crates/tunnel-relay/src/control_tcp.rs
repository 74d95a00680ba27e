//! Relay-side Control Session and Port Registry wiring for the TCP variant
//! (spec §4.6, §4.7, §4.8).
//!
//! Exactly one Agent is served at a time (spec.md's TCP variant is
//! single-Agent-per-Relay); the control loop accepts the next Agent as soon
//! as the previous one's session ends. Each REGISTER_PORT spins up a public
//! TCP listener for that port and is echoed back with the same port on
//! success, or port `0` if the bind failed (the Agent session stays up
//! either way); each User connection a registered listener accepts is
//! parked in the `PortRegistry` and announced to the Agent over the control
//! channel, to be claimed by the Agent's next `DATA_CONNECT` on the data
//! port. UNREGISTER_PORT is echoed with its port once torn down.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{info, warn};
use tunnel_net::bind_reuseaddr;
use tunnel_proto::codec::tcp::TcpCommand;

use crate::config::RelayConfig;
use crate::error::RelayError;
use crate::registry::PortRegistry;

pub async fn run(config: RelayConfig) -> Result<(), RelayError> {
    let control_addr = SocketAddr::new(config.bind_host, config.control_port);
    let listener = bind_reuseaddr(control_addr).map_err(|e| RelayError::Bind {
        addr: control_addr,
        source: e,
    })?;
    info!(addr = %control_addr, "control listener bound");

    loop {
        let (stream, peer) = listener.accept().await?;
        info!(%peer, "agent connected");
        let registry = Arc::new(PortRegistry::new());

        let data_addr = SocketAddr::new(config.bind_host, config.control_port + 1);
        let data_listener = bind_reuseaddr(data_addr).map_err(|e| RelayError::Bind {
            addr: data_addr,
            source: e,
        })?;
        let data_task = {
            let registry = registry.clone();
            tokio::spawn(async move {
                crate::data_tcp::run(data_listener, registry).await;
            })
        };

        if let Err(e) = serve_agent(stream, &config, registry).await {
            warn!(%peer, error = %e, "agent session ended");
        }
        data_task.abort();
    }
}

async fn serve_agent(stream: TcpStream, config: &RelayConfig, registry: Arc<PortRegistry>) -> Result<(), RelayError> {
    let (mut read_half, mut write_half) = tokio::io::split(stream);
    let (notify_tx, mut notify_rx) = mpsc::unbounded_channel::<u16>();
    let mut listeners = Vec::new();
    let mut deadline = Instant::now() + config.liveness_timeout;

    let result = loop {
        tokio::select! {
            _ = tokio::time::sleep_until(deadline) => {
                break Err(RelayError::LivenessTimeout);
            }
            cmd = TcpCommand::read_from(&mut read_half) => {
                deadline = Instant::now() + config.liveness_timeout;
                match cmd {
                    Ok(TcpCommand::Heartbeat) => {}
                    Ok(TcpCommand::RegisterPort { port }) => {
                        info!(port, "registering port");
                        match spawn_port_listener(config, port, registry.clone(), notify_tx.clone()).await {
                            Ok(handle) => {
                                if let Some(old) = registry.register(port, handle).await {
                                    old.abort();
                                }
                                listeners.push(port);
                                if let Err(e) = (TcpCommand::RegisterPort { port }).write_to(&mut write_half).await {
                                    break Err(e.into());
                                }
                            }
                            Err(e) => {
                                warn!(port, error = %e, "register port failed, replying with port=0");
                                if let Err(e) = (TcpCommand::RegisterPort { port: 0 }).write_to(&mut write_half).await {
                                    break Err(e.into());
                                }
                            }
                        }
                    }
                    Ok(TcpCommand::UnregisterPort { port }) => {
                        info!(port, "unregistering port");
                        if let Some(handle) = registry.unregister(port).await {
                            handle.abort();
                        }
                        listeners.retain(|&p| p != port);
                        if let Err(e) = (TcpCommand::UnregisterPort { port }).write_to(&mut write_half).await {
                            break Err(e.into());
                        }
                    }
                    Ok(other) => warn!(?other, "unexpected command on relay control channel"),
                    Err(e) => break Err(e.into()),
                }
            }
            Some(port) = notify_rx.recv() => {
                if let Err(e) = (TcpCommand::Connection { port }).write_to(&mut write_half).await {
                    break Err(e.into());
                }
            }
        }
    };

    for port in listeners {
        if let Some(handle) = registry.unregister(port).await {
            handle.abort();
        }
    }
    result
}

async fn spawn_port_listener(
    config: &RelayConfig,
    port: u16,
    registry: Arc<PortRegistry>,
    notify_tx: mpsc::UnboundedSender<u16>,
) -> Result<tokio::task::JoinHandle<()>, RelayError> {
    let addr = SocketAddr::new(config.bind_host, port);
    let listener = bind_reuseaddr(addr).map_err(|e| RelayError::Bind { addr, source: e })?;

    Ok(tokio::spawn(async move {
        loop {
            match listener.accept().await {
                Ok((user, peer)) => {
                    info!(port, %peer, "user connected");
                    registry.park_user(port, user).await;
                    if notify_tx.send(port).is_err() {
                        return; // control session gone
                    }
                }
                Err(e) => {
                    warn!(port, error = %e, "port listener accept failed");
                    return;
                }
            }
        }
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> &'static RelayConfig {
        Box::leak(Box::new(RelayConfig {
            bind_host: std::net::IpAddr::from([127, 0, 0, 1]),
            ..RelayConfig::default()
        }))
    }

    #[tokio::test]
    async fn register_port_success_echoes_the_port() {
        let config = test_config();
        let (mut agent_side, relay_side) = connected_pair().await;
        let registry = Arc::new(PortRegistry::new());
        let session = tokio::spawn(serve_agent(relay_side, config, registry));

        // A free ephemeral port: bind once to learn it, then free it so the
        // Relay's own bind succeeds.
        let probe = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = probe.local_addr().unwrap().port();
        drop(probe);

        TcpCommand::RegisterPort { port }.write_to(&mut agent_side).await.unwrap();
        let reply = TcpCommand::read_from(&mut agent_side).await.unwrap();
        assert_eq!(reply, TcpCommand::RegisterPort { port });

        session.abort();
    }

    #[tokio::test]
    async fn register_port_bind_failure_echoes_zero_and_keeps_session_up() {
        let config = test_config();
        let (mut agent_side, relay_side) = connected_pair().await;
        let registry = Arc::new(PortRegistry::new());
        let session = tokio::spawn(serve_agent(relay_side, config, registry));

        // Held open for the whole test so the Relay's bind attempt fails.
        let busy = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = busy.local_addr().unwrap().port();

        TcpCommand::RegisterPort { port }.write_to(&mut agent_side).await.unwrap();
        let reply = TcpCommand::read_from(&mut agent_side).await.unwrap();
        assert_eq!(reply, TcpCommand::RegisterPort { port: 0 });

        // The session is still alive: a heartbeat right after is accepted
        // rather than the connection having been torn down.
        TcpCommand::Heartbeat.write_to(&mut agent_side).await.unwrap();
        assert!(!session.is_finished());

        session.abort();
    }

    #[tokio::test]
    async fn unregister_port_echoes_the_port() {
        let config = test_config();
        let (mut agent_side, relay_side) = connected_pair().await;
        let registry = Arc::new(PortRegistry::new());
        let session = tokio::spawn(serve_agent(relay_side, config, registry));

        let probe = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = probe.local_addr().unwrap().port();
        drop(probe);

        TcpCommand::RegisterPort { port }.write_to(&mut agent_side).await.unwrap();
        assert_eq!(TcpCommand::read_from(&mut agent_side).await.unwrap(), TcpCommand::RegisterPort { port });

        TcpCommand::UnregisterPort { port }.write_to(&mut agent_side).await.unwrap();
        assert_eq!(TcpCommand::read_from(&mut agent_side).await.unwrap(), TcpCommand::UnregisterPort { port });

        session.abort();
    }

    async fn connected_pair() -> (TcpStream, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let connect = TcpStream::connect(addr);
        let accept = listener.accept();
        let (client, accepted) = tokio::join!(connect, accept);
        (client.unwrap(), accepted.unwrap().0)
    }

    #[tokio::test]
    async fn spawn_port_listener_parks_and_notifies() {
        let config = RelayConfig {
            bind_host: std::net::IpAddr::from([127, 0, 0, 1]),
            ..RelayConfig::default()
        };
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener); // free the ephemeral port for spawn_port_listener to rebind

        let registry = Arc::new(PortRegistry::new());
        let (tx, mut rx) = mpsc::unbounded_channel();
        let handle = spawn_port_listener(&config, port, registry.clone(), tx).await.unwrap();

        let _user = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
        let notified = rx.recv().await.unwrap();
        assert_eq!(notified, port);
        assert!(registry.take_waiting_user(port).await.is_some());

        handle.abort();
    }
}
