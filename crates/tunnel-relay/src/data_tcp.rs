//! Relay-side Data Plane listener for the TCP variant (spec §4.8).
//!
//! Bound on `control_port + 1`. Every connection the Agent opens here is a
//! `DATA_CONNECT` handshake naming a port; the matching User connection —
//! parked earlier by [`crate::control_tcp`] in FIFO order — is popped from
//! the registry and the two streams are pumped together. There is no
//! connection identifier: a data connection with nothing waiting for its
//! port is logged and dropped.

use std::sync::Arc;

use tokio::net::TcpListener;
use tracing::warn;
use tunnel_net::pump_pair;
use tunnel_proto::codec::tcp::TcpCommand;

use crate::registry::PortRegistry;

pub async fn run(listener: TcpListener, registry: Arc<PortRegistry>) {
    loop {
        let (stream, peer) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(e) => {
                warn!(error = %e, "data listener accept failed");
                return;
            }
        };
        let registry = registry.clone();
        tokio::spawn(async move {
            if let Err(e) = serve_data_connection(stream, &registry).await {
                warn!(%peer, error = %e, "data connection failed");
            }
        });
    }
}

async fn serve_data_connection(mut data_conn: tokio::net::TcpStream, registry: &PortRegistry) -> std::io::Result<()> {
    let port = match TcpCommand::read_from(&mut data_conn).await {
        Ok(TcpCommand::DataConnect { port }) => port,
        Ok(other) => {
            warn!(?other, "expected DATA_CONNECT on the data port");
            return Ok(());
        }
        Err(e) => {
            warn!(error = %e, "failed to read DATA_CONNECT handshake");
            return Ok(());
        }
    };

    let Some(user) = registry.take_waiting_user(port).await else {
        warn!(port, "data connection arrived with no waiting user");
        return Ok(());
    };

    tunnel_net::tune(&data_conn, tunnel_net::socket::DEFAULT_BUFFER_SIZE);
    tunnel_net::tune(&user, tunnel_net::socket::DEFAULT_BUFFER_SIZE);

    pump_pair(data_conn, user, tunnel_net::pump::DEFAULT_BUFFER_SIZE).await;
    Ok(())
}
