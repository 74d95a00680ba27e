//! Bidirectional byte pump between two streams (spec §4.3).
//!
//! Grounded on `tunnel-agent/src/forwarder.rs`'s `copy_bidirectional` (two
//! tasks joined with `tokio::join!`, each owning one half of each stream
//! exclusively) and `original_source/frps_standalone.py`'s `TransferStats`
//! (a periodic summary log while the pump is active).

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{info, warn};

pub const DEFAULT_BUFFER_SIZE: usize = 4 * 1024 * 1024;
const STATS_INTERVAL: Duration = Duration::from_secs(5);

/// Byte totals for a completed pump, one counter per direction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PumpStats {
    pub bytes_a_to_b: u64,
    pub bytes_b_to_a: u64,
}

/// Pumps bytes in both directions between `a` and `b` until both directions
/// have reached EOF or error. A send error on one direction only ends that
/// direction; the other is left to drain to its own EOF. Closure of both
/// streams is idempotent — `shutdown` is safe to call on an already-closed
/// writer.
pub async fn pump_pair<A, B>(a: A, b: B, buffer_size: usize) -> PumpStats
where
    A: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    B: AsyncRead + AsyncWrite + Send + Unpin + 'static,
{
    let (mut a_read, mut a_write) = tokio::io::split(a);
    let (mut b_read, mut b_write) = tokio::io::split(b);

    let a_to_b_bytes = Arc::new(AtomicU64::new(0));
    let b_to_a_bytes = Arc::new(AtomicU64::new(0));

    let reporter = spawn_reporter(a_to_b_bytes.clone(), b_to_a_bytes.clone());

    let a_to_b = copy_direction(&mut a_read, &mut b_write, buffer_size, a_to_b_bytes.clone());
    let b_to_a = copy_direction(&mut b_read, &mut a_write, buffer_size, b_to_a_bytes.clone());
    tokio::join!(a_to_b, b_to_a);

    reporter.abort();

    let _ = a_write.shutdown().await;
    let _ = b_write.shutdown().await;

    PumpStats {
        bytes_a_to_b: a_to_b_bytes.load(Ordering::Relaxed),
        bytes_b_to_a: b_to_a_bytes.load(Ordering::Relaxed),
    }
}

fn spawn_reporter(a_to_b: Arc<AtomicU64>, b_to_a: Arc<AtomicU64>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(STATS_INTERVAL);
        interval.tick().await; // first tick fires immediately
        loop {
            interval.tick().await;
            info!(
                bytes_a_to_b = a_to_b.load(Ordering::Relaxed),
                bytes_b_to_a = b_to_a.load(Ordering::Relaxed),
                "pair pump stats"
            );
        }
    })
}

async fn copy_direction<R, W>(reader: &mut R, writer: &mut W, buffer_size: usize, counter: Arc<AtomicU64>)
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut buf = vec![0u8; buffer_size];
    loop {
        let n = match reader.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) => {
                warn!("pump read error: {}", e);
                break;
            }
        };

        if let Err(e) = writer.write_all(&buf[..n]).await {
            warn!("pump write error: {}", e);
            break;
        }
        counter.fetch_add(n as u64, Ordering::Relaxed);
    }
    let _ = writer.shutdown().await;
}
