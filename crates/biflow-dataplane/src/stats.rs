//! Forwarder Statistics
//!
//! Lock-free counters the control plane reads while the fast path writes.
//! Nothing here influences a verdict.

use biflow_common::AtomicCounter;
use dashmap::DashMap;
use serde::Serialize;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};

/// Global decision counters, one instance per forwarder
#[derive(Debug, Default)]
pub struct DecisionCounters {
    /// Frames handed to the forwarder
    pub packets: AtomicCounter,
    /// FORWARD verdicts
    pub forwarded: AtomicCounter,
    /// DROP verdicts
    pub dropped: AtomicCounter,
    /// Truncated or inconsistent headers
    pub malformed: AtomicCounter,
    /// Non-IPv4 or non-TCP/UDP frames
    pub unsupported: AtomicCounter,
    /// Frames from neither attachment point
    pub unknown_ingress: AtomicCounter,
    /// Lookups that found a flow
    pub flow_hits: AtomicCounter,
    /// Lookups that found nothing
    pub flow_misses: AtomicCounter,
    /// Entries created
    pub flows_learned: AtomicCounter,
    /// Inserts refused for capacity
    pub table_full: AtomicCounter,
    /// Miss followed by an insert another context won
    pub insert_lost_race: AtomicCounter,
    /// Inserts abandoned while the same key was publishing
    pub insert_contended: AtomicCounter,
    /// Control-plane table resets
    pub resets: AtomicCounter,
}

impl DecisionCounters {
    /// Copy current values
    pub fn snapshot(&self) -> DecisionSnapshot {
        DecisionSnapshot {
            packets: self.packets.get(),
            forwarded: self.forwarded.get(),
            dropped: self.dropped.get(),
            malformed: self.malformed.get(),
            unsupported: self.unsupported.get(),
            unknown_ingress: self.unknown_ingress.get(),
            flow_hits: self.flow_hits.get(),
            flow_misses: self.flow_misses.get(),
            flows_learned: self.flows_learned.get(),
            table_full: self.table_full.get(),
            insert_lost_race: self.insert_lost_race.get(),
            insert_contended: self.insert_contended.get(),
            resets: self.resets.get(),
        }
    }
}

/// Decision counters snapshot (non-atomic)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DecisionSnapshot {
    /// Frames handed to the forwarder
    pub packets: u64,
    /// FORWARD verdicts
    pub forwarded: u64,
    /// DROP verdicts
    pub dropped: u64,
    /// Truncated or inconsistent headers
    pub malformed: u64,
    /// Non-IPv4 or non-TCP/UDP frames
    pub unsupported: u64,
    /// Frames from neither attachment point
    pub unknown_ingress: u64,
    /// Lookups that found a flow
    pub flow_hits: u64,
    /// Lookups that found nothing
    pub flow_misses: u64,
    /// Entries created
    pub flows_learned: u64,
    /// Inserts refused for capacity
    pub table_full: u64,
    /// Inserts another context won
    pub insert_lost_race: u64,
    /// Inserts abandoned while the same key was publishing
    pub insert_contended: u64,
    /// Control-plane table resets
    pub resets: u64,
}

impl DecisionSnapshot {
    /// Fraction of lookups that hit, 0 when idle
    pub fn flow_hit_rate(&self) -> f64 {
        let total = self.flow_hits + self.flow_misses;
        if total == 0 {
            return 0.0;
        }
        self.flow_hits as f64 / total as f64
    }
}

/// Per-key counters
///
/// The first increment of a key takes a shard lock briefly; later ones only
/// touch the key's atomic under a shard read guard.
#[derive(Debug)]
pub struct KeyedCounters<K: Eq + Hash> {
    counters: DashMap<K, AtomicU64>,
}

impl<K: Eq + Hash + Clone> KeyedCounters<K> {
    /// Create empty counter set
    pub fn new() -> Self {
        Self {
            counters: DashMap::new(),
        }
    }

    /// Add `val` to `key`
    #[inline]
    pub fn add(&self, key: &K, val: u64) {
        if let Some(c) = self.counters.get(key) {
            c.fetch_add(val, Ordering::Relaxed);
            return;
        }
        self.counters
            .entry(key.clone())
            .or_insert_with(|| AtomicU64::new(0))
            .fetch_add(val, Ordering::Relaxed);
    }

    /// Add one to `key`
    #[inline]
    pub fn increment(&self, key: &K) {
        self.add(key, 1);
    }

    /// Current value, 0 for unseen keys
    pub fn get(&self, key: &K) -> u64 {
        self.counters
            .get(key)
            .map(|c| c.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    /// Copy all keys and values, unordered
    pub fn snapshot(&self) -> Vec<(K, u64)> {
        self.counters
            .iter()
            .map(|e| (e.key().clone(), e.value().load(Ordering::Relaxed)))
            .collect()
    }

    /// Number of distinct keys
    pub fn len(&self) -> usize {
        self.counters.len()
    }

    /// No key seen yet
    pub fn is_empty(&self) -> bool {
        self.counters.is_empty()
    }
}

impl<K: Eq + Hash + Clone> Default for KeyedCounters<K> {
    fn default() -> Self {
        Self::new()
    }
}

/// Per-core stats (cache-line aligned)
#[repr(C, align(64))]
pub struct CoreStats {
    /// Packets received
    pub rx_packets: AtomicU64,
    /// Packets transmitted
    pub tx_packets: AtomicU64,
    /// Bytes received
    pub rx_bytes: AtomicU64,
    /// Bytes transmitted
    pub tx_bytes: AtomicU64,
    /// Packets dropped
    pub dropped: AtomicU64,
    /// Forward verdicts whose port had no device installed
    pub redirect_miss: AtomicU64,
    /// Frames refused because the receive queue was full
    pub rx_queue_full: AtomicU64,
    /// Batches drained
    pub batches: AtomicU64,
}

impl Default for CoreStats {
    fn default() -> Self {
        Self {
            rx_packets: AtomicU64::new(0),
            tx_packets: AtomicU64::new(0),
            rx_bytes: AtomicU64::new(0),
            tx_bytes: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
            redirect_miss: AtomicU64::new(0),
            rx_queue_full: AtomicU64::new(0),
            batches: AtomicU64::new(0),
        }
    }
}

impl CoreStats {
    /// Count a received frame
    #[inline(always)]
    pub fn record_rx(&self, bytes: u64) {
        self.rx_packets.fetch_add(1, Ordering::Relaxed);
        self.rx_bytes.fetch_add(bytes, Ordering::Relaxed);
    }

    /// Count a transmitted frame
    #[inline(always)]
    pub fn record_tx(&self, bytes: u64) {
        self.tx_packets.fetch_add(1, Ordering::Relaxed);
        self.tx_bytes.fetch_add(bytes, Ordering::Relaxed);
    }

    /// Count a dropped frame
    #[inline(always)]
    pub fn record_drop(&self) {
        self.dropped.fetch_add(1, Ordering::Relaxed);
    }

    /// Count a forward with no device; also a drop
    #[inline(always)]
    pub fn record_redirect_miss(&self) {
        self.redirect_miss.fetch_add(1, Ordering::Relaxed);
        self.record_drop();
    }

    /// Count a frame refused at the receive queue
    #[inline(always)]
    pub fn record_queue_full(&self) {
        self.rx_queue_full.fetch_add(1, Ordering::Relaxed);
    }

    /// Count a drained batch
    #[inline(always)]
    pub fn record_batch(&self) {
        self.batches.fetch_add(1, Ordering::Relaxed);
    }

    /// Copy current values
    pub fn snapshot(&self) -> CoreStatsSnapshot {
        CoreStatsSnapshot {
            rx_packets: self.rx_packets.load(Ordering::Relaxed),
            tx_packets: self.tx_packets.load(Ordering::Relaxed),
            rx_bytes: self.rx_bytes.load(Ordering::Relaxed),
            tx_bytes: self.tx_bytes.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            redirect_miss: self.redirect_miss.load(Ordering::Relaxed),
            rx_queue_full: self.rx_queue_full.load(Ordering::Relaxed),
            batches: self.batches.load(Ordering::Relaxed),
        }
    }
}

/// Stats snapshot (non-atomic)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CoreStatsSnapshot {
    /// Packets received
    pub rx_packets: u64,
    /// Packets transmitted
    pub tx_packets: u64,
    /// Bytes received
    pub rx_bytes: u64,
    /// Bytes transmitted
    pub tx_bytes: u64,
    /// Packets dropped
    pub dropped: u64,
    /// Forwards with no device installed
    pub redirect_miss: u64,
    /// Frames refused at a full receive queue
    pub rx_queue_full: u64,
    /// Batches drained
    pub batches: u64,
}

impl CoreStatsSnapshot {
    fn accumulate(&mut self, s: &CoreStatsSnapshot) {
        self.rx_packets += s.rx_packets;
        self.tx_packets += s.tx_packets;
        self.rx_bytes += s.rx_bytes;
        self.tx_bytes += s.tx_bytes;
        self.dropped += s.dropped;
        self.redirect_miss += s.redirect_miss;
        self.rx_queue_full += s.rx_queue_full;
        self.batches += s.batches;
    }
}

/// Aggregate stats across all cores
pub struct AggregateStats {
    cores: Vec<CoreStats>,
}

impl AggregateStats {
    /// Create one zeroed slot per worker
    pub fn new(num_cores: usize) -> Self {
        let mut cores = Vec::with_capacity(num_cores);
        for _ in 0..num_cores {
            cores.push(CoreStats::default());
        }
        Self { cores }
    }

    /// Stats of worker `idx`
    pub fn core(&self, idx: usize) -> &CoreStats {
        &self.cores[idx]
    }

    /// Snapshot of every worker
    pub fn per_core(&self) -> Vec<CoreStatsSnapshot> {
        self.cores.iter().map(CoreStats::snapshot).collect()
    }

    /// Sum over workers
    pub fn total(&self) -> CoreStatsSnapshot {
        let mut total = CoreStatsSnapshot::default();
        for core in &self.cores {
            total.accumulate(&core.snapshot());
        }
        total
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_core_stats() {
        let stats = CoreStats::default();
        stats.record_rx(1500);
        stats.record_tx(1500);
        stats.record_redirect_miss();

        let snap = stats.snapshot();
        assert_eq!(snap.rx_packets, 1);
        assert_eq!(snap.rx_bytes, 1500);
        assert_eq!(snap.redirect_miss, 1);
        assert_eq!(snap.dropped, 1);
    }

    #[test]
    fn test_aggregate() {
        let agg = AggregateStats::new(4);
        agg.core(0).record_rx(1000);
        agg.core(1).record_rx(2000);
        agg.core(3).record_queue_full();

        let total = agg.total();
        assert_eq!(total.rx_packets, 2);
        assert_eq!(total.rx_bytes, 3000);
        assert_eq!(total.rx_queue_full, 1);
        assert_eq!(agg.per_core().len(), 4);
    }

    #[test]
    fn test_decision_snapshot() {
        let c = DecisionCounters::default();
        c.flow_hits.inc();
        c.flow_hits.inc();
        c.flow_hits.inc();
        c.flow_misses.inc();

        let snap = c.snapshot();
        assert_eq!(snap.flow_hits, 3);
        assert!((snap.flow_hit_rate() - 0.75).abs() < f64::EPSILON);
        assert_eq!(DecisionSnapshot::default().flow_hit_rate(), 0.0);
    }

    #[test]
    fn test_keyed_counters_concurrent() {
        let counters = Arc::new(KeyedCounters::<u16>::new());
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let counters = counters.clone();
                std::thread::spawn(move || {
                    for i in 0..1000u16 {
                        counters.increment(&(i % 2));
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        assert_eq!(counters.get(&0), 2000);
        assert_eq!(counters.get(&1), 2000);
        assert_eq!(counters.get(&9), 0);
        assert_eq!(counters.len(), 2);

        let mut snap = counters.snapshot();
        snap.sort_unstable();
        assert_eq!(snap, vec![(0, 2000), (1, 2000)]);
    }
}
