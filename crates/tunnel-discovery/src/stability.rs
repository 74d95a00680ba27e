//! Stability filtering between the Scanner and the Control Session (spec
//! §4.5).
//!
//! Grounded on `original_source/auto_frpc.py`'s `AutoFrpcManager`, which
//! appends a sighting timestamp for every port seen active on *each* scan
//! round (not only on the scanner's own new/closed edges) and only starts a
//! tunnel once a port has accumulated at least two sightings within the
//! stability window. A port that drops out of the probed round's active set
//! is reported closed immediately and its sighting history is discarded.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use crate::scanner::ScanEvent;

/// Default sliding window within which at least two sightings are required
/// before a port is considered stable.
pub const DEFAULT_MIN_STABLE_TIME: Duration = Duration::from_secs(10);

/// Tracks per-port sighting history and turns raw scan rounds into a
/// debounced `new`/`closed` event stream.
pub struct StabilityFilter {
    min_stable_time: Duration,
    sightings: HashMap<u16, Vec<Instant>>,
    stable: std::collections::HashSet<u16>,
}

impl StabilityFilter {
    pub fn new(min_stable_time: Duration) -> Self {
        Self {
            min_stable_time,
            sightings: HashMap::new(),
            stable: std::collections::HashSet::new(),
        }
    }

    /// Feeds one scan round's raw findings through the filter. `probed` is
    /// the exact set of ports examined this round (full sweep or
    /// incremental slice); `active_in_range` is the subset found open.
    /// Ports outside `probed` are left untouched — no observation was made
    /// of them this round.
    pub fn observe_round(&mut self, probed: &[u16], active_in_range: &std::collections::HashSet<u16>) -> Vec<ScanEvent> {
        let now = Instant::now();
        let mut events = Vec::new();

        for &port in probed {
            if active_in_range.contains(&port) {
                let history = self.sightings.entry(port).or_default();
                history.retain(|&t| now.duration_since(t) <= self.min_stable_time);
                history.push(now);

                if history.len() >= 2 && self.stable.insert(port) {
                    events.push(ScanEvent::new_port(port));
                }
            } else if self.stable.remove(&port) {
                self.sightings.remove(&port);
                events.push(ScanEvent::closed_port(port));
            } else {
                // Never became stable; drop any partial history silently.
                self.sightings.remove(&port);
            }
        }

        events
    }

    pub fn is_stable(&self, port: u16) -> bool {
        self.stable.contains(&port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn single_sighting_does_not_emit_new() {
        let mut filter = StabilityFilter::new(Duration::from_secs(10));
        let probed = vec![8080];
        let active: HashSet<u16> = [8080].into_iter().collect();

        let events = filter.observe_round(&probed, &active);
        assert!(events.is_empty());
        assert!(!filter.is_stable(8080));
    }

    #[test]
    fn second_sighting_within_window_emits_new_once() {
        let mut filter = StabilityFilter::new(Duration::from_secs(10));
        let probed = vec![8080];
        let active: HashSet<u16> = [8080].into_iter().collect();

        filter.observe_round(&probed, &active);
        let events = filter.observe_round(&probed, &active);
        assert_eq!(events, vec![ScanEvent::new_port(8080)]);
        assert!(filter.is_stable(8080));

        // A third sighting does not re-emit `new`.
        let events = filter.observe_round(&probed, &active);
        assert!(events.is_empty());
    }

    #[test]
    fn missing_from_a_round_after_stable_emits_closed_and_clears_history() {
        let mut filter = StabilityFilter::new(Duration::from_secs(10));
        let probed = vec![8080];
        let active: HashSet<u16> = [8080].into_iter().collect();
        filter.observe_round(&probed, &active);
        filter.observe_round(&probed, &active);
        assert!(filter.is_stable(8080));

        let empty: HashSet<u16> = HashSet::new();
        let events = filter.observe_round(&probed, &empty);
        assert_eq!(events, vec![ScanEvent::closed_port(8080)]);
        assert!(!filter.is_stable(8080));
        assert!(filter.sightings.get(&8080).is_none());
    }

    #[test]
    fn sightings_outside_the_window_do_not_count_toward_stability() {
        let mut filter = StabilityFilter::new(Duration::from_millis(1));
        let probed = vec![8080];
        let active: HashSet<u16> = [8080].into_iter().collect();

        filter.observe_round(&probed, &active);
        std::thread::sleep(Duration::from_millis(5));
        // The first sighting has aged out of the window, so this is
        // effectively the first sighting again.
        let events = filter.observe_round(&probed, &active);
        assert!(events.is_empty());
        assert!(!filter.is_stable(8080));
    }

    #[test]
    fn ports_outside_the_probed_round_are_left_untouched() {
        let mut filter = StabilityFilter::new(Duration::from_secs(10));
        let probed_a = vec![8080];
        let active_a: HashSet<u16> = [8080].into_iter().collect();
        filter.observe_round(&probed_a, &active_a);
        filter.observe_round(&probed_a, &active_a);
        assert!(filter.is_stable(8080));

        // A round that never touches 8080 must not evict it.
        let probed_b = vec![9090];
        let active_b: HashSet<u16> = HashSet::new();
        filter.observe_round(&probed_b, &active_b);
        assert!(filter.is_stable(8080));
    }
}
