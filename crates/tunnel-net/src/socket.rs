//! Socket tuning applied uniformly to every tunneled TCP connection.
//!
//! Mirrors `original_source/frps_standalone.py`'s `optimize_socket`: disable
//! Nagle, enable TCP keepalive with a fixed idle/interval/count, allow
//! address reuse, and size the send/receive buffers for long-lived,
//! high-throughput tunnel flows. Every option is applied best-effort —
//! a platform that rejects one is logged and otherwise ignored.

use socket2::TcpKeepalive;
use std::time::Duration;
use tokio::net::TcpStream;
use tracing::warn;

const KEEPALIVE_IDLE: Duration = Duration::from_secs(30);
const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(10);
const KEEPALIVE_COUNT: u32 = 3;

/// Send/receive buffer size applied to tuned sockets, within the spec's
/// stated 1-4 MiB range.
pub const DEFAULT_BUFFER_SIZE: usize = 2 * 1024 * 1024;

/// Applies the standard tunnel socket options to `stream`.
///
/// Every option is best-effort: a failure is logged at `warn!` and does not
/// prevent the caller from using the socket.
pub fn tune(stream: &TcpStream, buffer_size: usize) {
    if let Err(e) = stream.set_nodelay(true) {
        warn!("failed to set TCP_NODELAY: {}", e);
    }

    let sock = socket2::SockRef::from(stream);

    let keepalive = TcpKeepalive::new()
        .with_time(KEEPALIVE_IDLE)
        .with_interval(KEEPALIVE_INTERVAL);
    #[cfg(not(any(target_os = "windows", target_os = "openbsd")))]
    let keepalive = keepalive.with_retries(KEEPALIVE_COUNT);

    if let Err(e) = sock.set_tcp_keepalive(&keepalive) {
        warn!("failed to configure TCP keepalive: {}", e);
    }

    if let Err(e) = sock.set_send_buffer_size(buffer_size) {
        warn!("failed to set send buffer size: {}", e);
    }
    if let Err(e) = sock.set_recv_buffer_size(buffer_size) {
        warn!("failed to set recv buffer size: {}", e);
    }
}

/// Builds a listening socket with `SO_REUSEADDR` set, bound and listening on
/// `addr`, handed back as a `tokio::net::TcpListener`.
pub fn bind_reuseaddr(addr: std::net::SocketAddr) -> std::io::Result<tokio::net::TcpListener> {
    use socket2::{Domain, Protocol, Socket, Type};

    let domain = if addr.is_ipv6() {
        Domain::IPV6
    } else {
        Domain::IPV4
    };
    let socket = Socket::new(domain, Type::STREAM, Some(Protocol::TCP))?;
    socket.set_reuse_address(true)?;
    socket.bind(&addr.into())?;
    socket.listen(128)?;
    socket.set_nonblocking(true)?;

    let std_listener: std::net::TcpListener = socket.into();
    tokio::net::TcpListener::from_std(std_listener)
}
