//! Discovery registry of VBAN senders seen on the wire.
//!
//! The receive loop upserts an entry for every decodable packet, whether or
//! not that sender feeds the audio path, so discovery sees the whole network.
//! Entries age out after [`SOURCE_TIMEOUT`] without traffic.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

use parking_lot::RwLock;

use super::PacketHeader;

/// Sources unseen for this long are dropped on the next eviction pass.
pub const SOURCE_TIMEOUT: Duration = Duration::from_secs(5);

/// A remote sender observed on the VBAN port.
#[derive(Debug, Clone)]
pub struct RemoteSource {
    pub addr: SocketAddr,
    pub stream_name: String,
    pub sample_rate: u32,
    pub channels: u16,
    pub last_seen: Instant,
}

impl RemoteSource {
    /// Seconds since this source last sent a packet.
    pub fn idle_secs(&self, now: Instant) -> f64 {
        now.saturating_duration_since(self.last_seen).as_secs_f64()
    }
}

/// Thread-safe table of currently live senders.
///
/// Writers are the receive loop (upsert, evict); everyone else takes copies
/// via [`SourceRegistry::snapshot`], so no lock is held across caller code.
#[derive(Debug, Default)]
pub struct SourceRegistry {
    inner: RwLock<HashMap<SocketAddr, RemoteSource>>,
}

impl SourceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or refresh a source. Returns true when the address is new,
    /// so the caller can log discoveries exactly once.
    pub fn upsert(&self, addr: SocketAddr, header: &PacketHeader, now: Instant) -> bool {
        let mut table = self.inner.write();
        let newly_seen = !table.contains_key(&addr);
        table.insert(
            addr,
            RemoteSource {
                addr,
                stream_name: header.stream_name.clone(),
                sample_rate: header.sample_rate,
                channels: header.channels,
                last_seen: now,
            },
        );
        newly_seen
    }

    /// Drop sources idle longer than `timeout`, returning the removed
    /// addresses for logging.
    pub fn evict_stale(&self, now: Instant, timeout: Duration) -> Vec<SocketAddr> {
        let mut table = self.inner.write();
        let stale: Vec<SocketAddr> = table
            .values()
            .filter(|s| now.saturating_duration_since(s.last_seen) > timeout)
            .map(|s| s.addr)
            .collect();
        for addr in &stale {
            table.remove(addr);
        }
        stale
    }

    /// Copy of all current entries, sorted by address for stable display.
    pub fn snapshot(&self) -> Vec<RemoteSource> {
        let mut entries: Vec<RemoteSource> = self.inner.read().values().cloned().collect();
        entries.sort_by_key(|s| s.addr);
        entries
    }

    pub fn len(&self) -> usize {
        self.inner.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::SampleFormat;

    fn header(name: &str, sample_rate: u32) -> PacketHeader {
        PacketHeader {
            sample_rate,
            samples_per_frame: 256,
            channels: 2,
            format: SampleFormat::I16,
            stream_name: name.to_string(),
            frame_counter: 0,
        }
    }

    fn addr(last_octet: u8) -> SocketAddr {
        format!("10.0.0.{last_octet}:6980").parse().unwrap()
    }

    #[test]
    fn upsert_returns_true_only_for_new_addresses() {
        let registry = SourceRegistry::new();
        let now = Instant::now();
        assert!(registry.upsert(addr(1), &header("A", 48_000), now));
        assert!(!registry.upsert(addr(1), &header("A", 48_000), now));
        assert!(registry.upsert(addr(2), &header("B", 44_100), now));
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn refresh_updates_metadata_and_last_seen() {
        let registry = SourceRegistry::new();
        let base = Instant::now();
        registry.upsert(addr(1), &header("Old", 44_100), base);
        registry.upsert(addr(1), &header("New", 48_000), base + Duration::from_secs(1));

        let snap = registry.snapshot();
        assert_eq!(snap.len(), 1);
        assert_eq!(snap[0].stream_name, "New");
        assert_eq!(snap[0].sample_rate, 48_000);
        assert_eq!(snap[0].last_seen, base + Duration::from_secs(1));
    }

    #[test]
    fn stale_sources_are_evicted() {
        let registry = SourceRegistry::new();
        let base = Instant::now();
        registry.upsert(addr(1), &header("Stale", 48_000), base);
        registry.upsert(addr(2), &header("Fresh", 48_000), base + Duration::from_secs(4));

        let removed = registry.evict_stale(base + Duration::from_secs(6), SOURCE_TIMEOUT);
        assert_eq!(removed, vec![addr(1)]);
        let snap = registry.snapshot();
        assert_eq!(snap.len(), 1);
        assert_eq!(snap[0].stream_name, "Fresh");
    }

    #[test]
    fn eviction_on_empty_registry_is_a_noop() {
        let registry = SourceRegistry::new();
        assert!(registry
            .evict_stale(Instant::now(), SOURCE_TIMEOUT)
            .is_empty());
        assert!(registry.is_empty());
    }

    #[test]
    fn snapshot_is_sorted_and_detached() {
        let registry = SourceRegistry::new();
        let now = Instant::now();
        registry.upsert(addr(9), &header("C", 48_000), now);
        registry.upsert(addr(1), &header("A", 48_000), now);
        registry.upsert(addr(5), &header("B", 48_000), now);

        let snap = registry.snapshot();
        let addrs: Vec<SocketAddr> = snap.iter().map(|s| s.addr).collect();
        assert_eq!(addrs, vec![addr(1), addr(5), addr(9)]);

        // Mutating the registry afterwards does not touch the copy.
        registry.evict_stale(now + Duration::from_secs(10), SOURCE_TIMEOUT);
        assert_eq!(snap.len(), 3);
        assert_eq!(registry.len(), 0);
    }

    #[test]
    fn idle_secs_measures_from_last_seen() {
        let registry = SourceRegistry::new();
        let base = Instant::now();
        registry.upsert(addr(1), &header("A", 48_000), base);
        let snap = registry.snapshot();
        let idle = snap[0].idle_secs(base + Duration::from_millis(2500));
        assert!((idle - 2.5).abs() < 1e-6);
    }
}
