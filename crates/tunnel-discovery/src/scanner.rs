//! Concurrent TCP connect-scan port discovery (spec §4.4).
//!
//! Grounded on `original_source/port_scanner.py`'s `PortScanner` (bounded
//! worker pool, per-probe timeout) and `original_source/frpc_standalone.py`'s
//! embedded scanner (incremental cursor with wraparound, combined
//! full/incremental strategy for the QUIC variant).

use std::collections::HashSet;
use std::net::IpAddr;
use std::time::{Duration, Instant};
use tokio::net::TcpStream;
use tokio::sync::Semaphore;
use std::sync::Arc;

const MAX_PORT: u32 = 65536;

/// The edge-triggered result of comparing a probe against the scanner's
/// previously committed active-port set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanEventKind {
    New,
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanEvent {
    pub kind: ScanEventKind,
    pub port: u16,
}

impl ScanEvent {
    pub fn new_port(port: u16) -> Self {
        Self {
            kind: ScanEventKind::New,
            port,
        }
    }

    pub fn closed_port(port: u16) -> Self {
        Self {
            kind: ScanEventKind::Closed,
            port,
        }
    }
}

/// One sweep's raw findings, independent of whether a Stability Filter sits
/// downstream: `probed` is exactly the set of ports examined this round
/// (the whole domain on a full sweep, a cursor-bounded slice on an
/// incremental one), `active_in_range` is the subset found open, and
/// `events` is the scanner's own edge diff against its committed active set.
#[derive(Debug, Clone)]
pub struct ScanReport {
    pub probed: Vec<u16>,
    pub active_in_range: HashSet<u16>,
    pub events: Vec<ScanEvent>,
}

#[derive(Debug, Clone)]
pub struct ScannerConfig {
    pub target_host: IpAddr,
    /// Explicit port list to scan; `None` means the full 1-65535 range.
    pub ports: Option<Vec<u16>>,
    pub workers: usize,
    pub probe_timeout: Duration,
    pub batch_size: u32,
    pub full_scan_interval: Duration,
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            target_host: IpAddr::from([127, 0, 0, 1]),
            ports: None,
            workers: 50,
            probe_timeout: Duration::from_millis(300),
            batch_size: 1000,
            full_scan_interval: Duration::from_secs(600),
        }
    }
}

/// Concurrent connect-scan engine with full-sweep and bounded-incremental
/// modes, holding the committed active-port set `A` described in spec §3.
pub struct PortScanner {
    config: ScannerConfig,
    active: HashSet<u16>,
    cursor: u32,
    last_full_scan: Option<Instant>,
}

impl PortScanner {
    pub fn new(config: ScannerConfig) -> Self {
        Self {
            config,
            active: HashSet::new(),
            cursor: 1,
            last_full_scan: None,
        }
    }

    fn candidate_domain(&self) -> Vec<u16> {
        self.config
            .ports
            .clone()
            .unwrap_or_else(|| (1..=65535u32).map(|p| p as u16).collect())
    }

    async fn probe_many(&self, candidates: &[u16]) -> HashSet<u16> {
        let semaphore = Arc::new(Semaphore::new(self.config.workers.max(1)));
        let mut tasks = Vec::with_capacity(candidates.len());
        for &port in candidates {
            let semaphore = semaphore.clone();
            let host = self.config.target_host;
            let timeout = self.config.probe_timeout;
            tasks.push(tokio::spawn(async move {
                let _permit = semaphore.acquire().await.expect("semaphore not closed");
                if check_port(host, port, timeout).await {
                    Some(port)
                } else {
                    None
                }
            }));
        }

        let mut found = HashSet::new();
        for task in tasks {
            if let Ok(Some(port)) = task.await {
                found.insert(port);
            }
        }
        found
    }

    fn diff_and_commit(&mut self, probed: &[u16], active_in_range: &HashSet<u16>) -> Vec<ScanEvent> {
        let mut events = Vec::new();
        for &port in probed {
            let was_active = self.active.contains(&port);
            let is_active = active_in_range.contains(&port);
            if is_active && !was_active {
                self.active.insert(port);
                events.push(ScanEvent::new_port(port));
            } else if !is_active && was_active {
                self.active.remove(&port);
                events.push(ScanEvent::closed_port(port));
            }
        }
        events
    }

    /// Full sweep: probe the explicit port list if configured, else 1-65535.
    pub async fn scan_full(&mut self) -> ScanReport {
        let probed = self.candidate_domain();
        let active_in_range = self.probe_many(&probed).await;
        let events = self.diff_and_commit(&probed, &active_in_range);
        self.last_full_scan = Some(Instant::now());
        ScanReport {
            probed,
            active_in_range,
            events,
        }
    }

    /// Bounded incremental sweep over `[cursor, cursor+batch_size)`, wrapping
    /// the cursor back to 1 at 65536.
    pub async fn scan_incremental(&mut self) -> ScanReport {
        let start = self.cursor;
        let end = (start + self.config.batch_size).min(MAX_PORT);
        let probed: Vec<u16> = (start..end).map(|p| p as u16).collect();

        self.cursor = if end >= MAX_PORT { 1 } else { end };

        if probed.is_empty() {
            return ScanReport {
                probed,
                active_in_range: HashSet::new(),
                events: Vec::new(),
            };
        }

        let active_in_range = self.probe_many(&probed).await;
        let events = self.diff_and_commit(&probed, &active_in_range);
        ScanReport {
            probed,
            active_in_range,
            events,
        }
    }

    /// Combined strategy used by the QUIC variant: run incremental sweeps,
    /// but force a full sweep once `full_scan_interval` has elapsed.
    pub async fn scan_combined(&mut self) -> ScanReport {
        let due_for_full = match self.last_full_scan {
            None => true,
            Some(last) => last.elapsed() >= self.config.full_scan_interval,
        };
        if due_for_full {
            self.scan_full().await
        } else {
            self.scan_incremental().await
        }
    }

    pub fn committed_active(&self) -> &HashSet<u16> {
        &self.active
    }
}

async fn check_port(host: IpAddr, port: u16, timeout: Duration) -> bool {
    matches!(
        tokio::time::timeout(timeout, TcpStream::connect((host, port))).await,
        Ok(Ok(_))
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn full_scan_detects_a_listening_port() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let mut scanner = PortScanner::new(ScannerConfig {
            ports: Some(vec![port]),
            ..Default::default()
        });

        let report = scanner.scan_full().await;
        assert_eq!(report.events, vec![ScanEvent::new_port(port)]);
        assert!(scanner.committed_active().contains(&port));

        // A second scan with the port still open emits no further event.
        let report2 = scanner.scan_full().await;
        assert!(report2.events.is_empty());
        assert!(report2.active_in_range.contains(&port));
    }

    #[tokio::test]
    async fn closing_a_port_emits_closed_event() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let mut scanner = PortScanner::new(ScannerConfig {
            ports: Some(vec![port]),
            ..Default::default()
        });
        scanner.scan_full().await;

        drop(listener);

        let report = scanner.scan_full().await;
        assert_eq!(report.events, vec![ScanEvent::closed_port(port)]);
        assert!(!scanner.committed_active().contains(&port));
    }

    #[tokio::test]
    async fn incremental_scan_wraps_cursor_at_65536() {
        let mut scanner = PortScanner::new(ScannerConfig {
            ports: None,
            batch_size: 65535,
            ..Default::default()
        });

        let first = scanner.scan_incremental().await;
        assert_eq!(first.probed.first(), Some(&1));
        assert_eq!(scanner.cursor, 1); // wrapped: 1 + 65535 == 65536

        let second = scanner.scan_incremental().await;
        assert_eq!(second.probed.first(), Some(&1));
    }

    #[tokio::test]
    async fn incremental_scan_leaves_ports_outside_its_range_untouched() {
        let mut scanner = PortScanner::new(ScannerConfig {
            ports: None,
            batch_size: 10,
            ..Default::default()
        });

        // Seed the committed set with a port far outside the first batch.
        scanner.active.insert(60000);
        scanner.cursor = 1;

        let report = scanner.scan_incremental().await;
        assert_eq!(report.probed, (1..11u32).map(|p| p as u16).collect::<Vec<_>>());
        assert!(report.events.is_empty());
        assert!(scanner.committed_active().contains(&60000));
    }

    #[tokio::test]
    async fn full_scan_scopes_diff_to_the_explicit_port_list() {
        let listener_a = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port_a = listener_a.local_addr().unwrap().port();
        let listener_b = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port_b = listener_b.local_addr().unwrap().port();

        let mut scanner = PortScanner::new(ScannerConfig {
            ports: Some(vec![port_a, port_b]),
            ..Default::default()
        });

        let report = scanner.scan_full().await;
        assert!(report.events.contains(&ScanEvent::new_port(port_a)));
        assert!(report.events.contains(&ScanEvent::new_port(port_b)));
    }
}
