//! Lockless Concurrent Flow Table
//!
//! Bidirectional flow tracking for the two-port forwarder.
//!
//! # Design
//!
//! - Open addressing with linear probing over a power-of-two slot array
//! - Each slot holds its key and leaf in atomics, published by a release
//!   store on the slot tag; readers never take a lock
//! - Insert-if-absent claims an empty slot with a single compare-and-swap,
//!   so concurrent first packets of one flow produce exactly one entry
//! - Slots are never freed; the control plane resets by replacing the table
//! - Every probe loop is bounded by the slot count

use serde::Serialize;
use std::fmt;
use std::net::Ipv4Addr;
use std::sync::atomic::{AtomicU32, AtomicU64, AtomicUsize, Ordering};

/// Directional 5-tuple as it appears on the wire (host byte order)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FlowTuple {
    /// IP protocol
    pub protocol: u8,
    /// Source address
    pub ip_src: u32,
    /// Destination address
    pub ip_dst: u32,
    /// Source port
    pub l4_src: u16,
    /// Destination port
    pub l4_dst: u16,
}

impl FlowTuple {
    /// Create new tuple
    pub const fn new(protocol: u8, ip_src: u32, ip_dst: u32, l4_src: u16, l4_dst: u16) -> Self {
        Self {
            protocol,
            ip_src,
            ip_dst,
            l4_src,
            l4_dst,
        }
    }

    /// Tuple of the reply direction
    #[inline(always)]
    pub fn reverse(&self) -> Self {
        Self::new(self.protocol, self.ip_dst, self.ip_src, self.l4_dst, self.l4_src)
    }

    /// Reduce to a direction-independent key
    #[inline(always)]
    pub fn canonicalize(&self, mode: Canonicalization) -> FlowKey {
        let (ip_src, ip_dst, l4_src, l4_dst) = match mode {
            Canonicalization::PerField => {
                let (ip_src, ip_dst) = ordered(self.ip_src, self.ip_dst);
                let (l4_src, l4_dst) = ordered(self.l4_src, self.l4_dst);
                (ip_src, ip_dst, l4_src, l4_dst)
            }
            Canonicalization::Endpoint => {
                if (self.ip_src, self.l4_src) > (self.ip_dst, self.l4_dst) {
                    (self.ip_dst, self.ip_src, self.l4_dst, self.l4_src)
                } else {
                    (self.ip_src, self.ip_dst, self.l4_src, self.l4_dst)
                }
            }
        };

        FlowKey {
            protocol: self.protocol as u16,
            l4_src,
            l4_dst,
            ip_src,
            ip_dst,
        }
    }
}

#[inline(always)]
fn ordered<T: Ord>(a: T, b: T) -> (T, T) {
    if a > b {
        (b, a)
    } else {
        (a, b)
    }
}

/// How a directional tuple is folded into a canonical key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, serde::Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Canonicalization {
    /// Order the address pair and the port pair independently.
    ///
    /// Two unrelated flows whose address order and port order disagree can
    /// fold onto one key. Kept as the default for compatibility with
    /// deployed tables.
    #[default]
    PerField,
    /// Order whole `(address, port)` endpoints, a true symmetric match
    Endpoint,
}

/// Canonical flow key, laid out as the control plane reads it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[repr(C)]
pub struct FlowKey {
    /// IP protocol (TCP=6, UDP=17)
    pub protocol: u16,
    /// First port after canonicalization
    pub l4_src: u16,
    /// Second port after canonicalization
    pub l4_dst: u16,
    /// First address after canonicalization
    pub ip_src: u32,
    /// Second address after canonicalization
    pub ip_dst: u32,
}

impl FlowKey {
    /// Build a key from already-canonical fields
    pub const fn new(protocol: u16, l4_src: u16, l4_dst: u16, ip_src: u32, ip_dst: u32) -> Self {
        Self {
            protocol,
            l4_src,
            l4_dst,
            ip_src,
            ip_dst,
        }
    }

    /// Compute hash using FNV-1a
    #[inline(always)]
    pub fn hash(&self) -> u64 {
        const FNV_OFFSET: u64 = 0xcbf29ce484222325;
        const FNV_PRIME: u64 = 0x100000001b3;

        let mut h = FNV_OFFSET;
        for byte in self
            .ip_src
            .to_ne_bytes()
            .into_iter()
            .chain(self.ip_dst.to_ne_bytes())
            .chain(self.l4_src.to_ne_bytes())
            .chain(self.l4_dst.to_ne_bytes())
            .chain(self.protocol.to_ne_bytes())
        {
            h ^= byte as u64;
            h = h.wrapping_mul(FNV_PRIME);
        }
        h
    }

    #[inline(always)]
    fn pack(&self) -> (u64, u64) {
        let ips = (self.ip_src as u64) << 32 | self.ip_dst as u64;
        let ports = (self.protocol as u64) << 32 | (self.l4_src as u64) << 16 | self.l4_dst as u64;
        (ips, ports)
    }

    #[inline(always)]
    fn unpack(ips: u64, ports: u64) -> Self {
        Self {
            protocol: (ports >> 32) as u16,
            l4_src: (ports >> 16) as u16,
            l4_dst: ports as u16,
            ip_src: (ips >> 32) as u32,
            ip_dst: ips as u32,
        }
    }
}

impl fmt::Display for FlowKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "proto {} {}:{} <-> {}:{}",
            self.protocol,
            Ipv4Addr::from(self.ip_src),
            self.l4_src,
            Ipv4Addr::from(self.ip_dst),
            self.l4_dst
        )
    }
}

/// Where return traffic for a learned flow goes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[repr(C)]
pub struct FlowLeaf {
    /// Attachment point matching return traffic is redirected to
    pub out_port: u8,
    /// Attachment point recorded at creation
    pub in_port: u16,
}

impl FlowLeaf {
    /// Create new leaf
    pub const fn new(out_port: u8, in_port: u16) -> Self {
        Self { out_port, in_port }
    }

    #[inline(always)]
    fn pack(&self) -> u32 {
        (self.in_port as u32) << 8 | self.out_port as u32
    }

    #[inline(always)]
    fn unpack(v: u32) -> Self {
        Self {
            out_port: v as u8,
            in_port: (v >> 8) as u16,
        }
    }
}

/// Slot tag layout: low two bits are the state, the rest is a fingerprint
/// of the key hash. A zero tag is an empty slot.
const STATE_MASK: u64 = 0b11;
const PUBLISHING: u64 = 0b01;
const OCCUPIED: u64 = 0b10;

/// Spins allowed while another inserter publishes the same key
const PUBLISH_SPIN_LIMIT: u32 = 1024;

#[inline(always)]
fn fingerprint(hash: u64) -> u64 {
    hash & !STATE_MASK
}

/// Flow table slot
#[repr(C, align(32))]
struct Slot {
    tag: AtomicU64,
    ips: AtomicU64,
    ports: AtomicU64,
    leaf: AtomicU32,
}

impl Slot {
    const fn empty() -> Self {
        Self {
            tag: AtomicU64::new(0),
            ips: AtomicU64::new(0),
            ports: AtomicU64::new(0),
            leaf: AtomicU32::new(0),
        }
    }

    /// Only meaningful after an acquire load observed `OCCUPIED`
    #[inline(always)]
    fn key(&self) -> FlowKey {
        FlowKey::unpack(
            self.ips.load(Ordering::Relaxed),
            self.ports.load(Ordering::Relaxed),
        )
    }

    #[inline(always)]
    fn leaf(&self) -> FlowLeaf {
        FlowLeaf::unpack(self.leaf.load(Ordering::Relaxed))
    }

    /// Wait a bounded number of spins while this slot publishes our fingerprint
    #[inline]
    fn settle(&self, fp: u64) -> u64 {
        let mut tag = self.tag.load(Ordering::Acquire);
        let mut spins = 0;
        while tag == fp | PUBLISHING && spins < PUBLISH_SPIN_LIMIT {
            std::hint::spin_loop();
            spins += 1;
            tag = self.tag.load(Ordering::Acquire);
        }
        tag
    }
}

/// Lockless concurrent flow table
///
/// # Performance
/// - Lookup: O(1) average, bounded by slot count
/// - Insert-if-absent: O(1) average, one CAS on the claimed slot
/// - Load factor never exceeds 50%
pub struct FlowTable {
    /// Table slots
    slots: Box<[Slot]>,
    /// Size mask for modulo
    mask: usize,
    /// Maximum number of entries
    capacity: usize,
    /// Entries reserved or published
    count: AtomicUsize,
}

impl FlowTable {
    /// Create new flow table holding at most `capacity` flows
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let size = (capacity * 2).next_power_of_two();
        let slots: Box<[Slot]> = (0..size).map(|_| Slot::empty()).collect();

        Self {
            slots,
            mask: size - 1,
            capacity,
            count: AtomicUsize::new(0),
        }
    }

    /// Lookup flow by canonical key. Never blocks.
    ///
    /// A slot still being published is skipped, so a lookup racing the
    /// insert of the same key may miss it.
    #[inline]
    pub fn lookup(&self, key: &FlowKey) -> Option<FlowLeaf> {
        let hash = key.hash();
        let occupied = fingerprint(hash) | OCCUPIED;
        let mut idx = (hash as usize) & self.mask;

        for _ in 0..self.slots.len() {
            let slot = &self.slots[idx];
            let tag = slot.tag.load(Ordering::Acquire);

            if tag == 0 {
                return None;
            }
            if tag == occupied && slot.key() == *key {
                return Some(slot.leaf());
            }
            // Other fingerprints, and slots still publishing, are skipped

            idx = (idx + 1) & self.mask;
        }

        None
    }

    /// Insert a flow unless one with this key already exists.
    ///
    /// Existing entries are never overwritten. Reservation against
    /// `capacity` happens before a slot is claimed, so an insert racing the
    /// last free entry can report `TableFull` while the loser of that race
    /// backs out.
    ///
    /// Returns `Contended` when a slot carrying this key's fingerprint is
    /// still publishing after a bounded spin. Until that publish completes,
    /// concurrent lookups miss the key, so the first outside reply racing
    /// the first inside packet can be dropped.
    #[inline]
    pub fn try_insert(&self, key: FlowKey, leaf: FlowLeaf) -> Result<(), FlowTableError> {
        let hash = key.hash();
        let fp = fingerprint(hash);
        let (ips, ports) = key.pack();
        let mut idx = (hash as usize) & self.mask;
        let mut probes = 0;

        while probes < self.slots.len() {
            let slot = &self.slots[idx];
            let tag = slot.settle(fp);

            if tag == fp | PUBLISHING {
                // Most likely our own key mid-publish elsewhere; never risk a duplicate
                return Err(FlowTableError::Contended);
            }

            if tag == fp | OCCUPIED && slot.key() == key {
                return Err(FlowTableError::Exists);
            }

            if tag != 0 {
                idx = (idx + 1) & self.mask;
                probes += 1;
                continue;
            }

            // Empty: reserve capacity, then race for the slot
            self.reserve()?;
            match slot.tag.compare_exchange(
                0,
                fp | PUBLISHING,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => {
                    slot.ips.store(ips, Ordering::Relaxed);
                    slot.ports.store(ports, Ordering::Relaxed);
                    slot.leaf.store(leaf.pack(), Ordering::Relaxed);
                    slot.tag.store(fp | OCCUPIED, Ordering::Release);
                    return Ok(());
                }
                Err(_) => {
                    // Someone else took it; re-examine the same slot
                    self.count.fetch_sub(1, Ordering::AcqRel);
                }
            }
        }

        Err(FlowTableError::TableFull)
    }

    /// Insert-if-absent returning whether this call created the entry
    #[inline]
    pub fn insert_if_absent(&self, key: FlowKey, leaf: FlowLeaf) -> bool {
        self.try_insert(key, leaf).is_ok()
    }

    #[inline(always)]
    fn reserve(&self) -> Result<(), FlowTableError> {
        self.count
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                (n < self.capacity).then_some(n + 1)
            })
            .map(|_| ())
            .map_err(|_| FlowTableError::TableFull)
    }

    /// Best-effort snapshot of published entries.
    ///
    /// Not transactional: entries inserted while iterating may or may not
    /// appear.
    pub fn entries(&self) -> impl Iterator<Item = (FlowKey, FlowLeaf)> + '_ {
        self.slots.iter().filter_map(|slot| {
            (slot.tag.load(Ordering::Acquire) & STATE_MASK == OCCUPIED)
                .then(|| (slot.key(), slot.leaf()))
        })
    }

    /// Current flow count (includes in-flight reservations)
    pub fn len(&self) -> usize {
        self.count.load(Ordering::Relaxed)
    }

    /// Check if empty
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether the next new flow would be refused
    pub fn is_full(&self) -> bool {
        self.len() >= self.capacity
    }

    /// Maximum number of flows
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of slots backing the table
    pub fn slot_count(&self) -> usize {
        self.slots.len()
    }
}

impl fmt::Debug for FlowTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FlowTable")
            .field("len", &self.len())
            .field("capacity", &self.capacity)
            .field("slots", &self.slots.len())
            .finish()
    }
}

/// Flow table errors
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum FlowTableError {
    /// Capacity reached
    #[error("flow table is full")]
    TableFull,

    /// Key already present; the entry is left as is
    #[error("flow already present")]
    Exists,

    /// Same key still being published by another context
    #[error("same flow is being inserted concurrently")]
    Contended,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::{IPPROTO_TCP, IPPROTO_UDP};
    use proptest::prelude::*;
    use std::sync::{Arc, Barrier};
    use std::thread;

    fn ip(a: u8, b: u8, c: u8, d: u8) -> u32 {
        u32::from(Ipv4Addr::new(a, b, c, d))
    }

    #[test]
    fn test_per_field_scenario() {
        // 10.0.0.5:40000 -> 10.0.0.3:53 swaps both pairs
        let p1 = FlowTuple::new(IPPROTO_UDP, ip(10, 0, 0, 5), ip(10, 0, 0, 3), 40000, 53);
        let key = p1.canonicalize(Canonicalization::PerField);
        assert_eq!(
            key,
            FlowKey::new(IPPROTO_UDP as u16, 53, 40000, ip(10, 0, 0, 3), ip(10, 0, 0, 5))
        );

        // Same addresses, ports already ordered
        let p2 = FlowTuple::new(IPPROTO_UDP, ip(10, 0, 0, 5), ip(10, 0, 0, 3), 53, 40000);
        assert_eq!(p2.canonicalize(Canonicalization::PerField), key);
    }

    #[test]
    fn test_per_field_collision_is_preserved() {
        // 1.1.1.1:80 -> 2.2.2.2:90 and 1.1.1.1:90 -> 2.2.2.2:80 are different
        // flows but fold together per-field; endpoint mode keeps them apart.
        let a = FlowTuple::new(IPPROTO_TCP, ip(1, 1, 1, 1), ip(2, 2, 2, 2), 80, 90);
        let b = FlowTuple::new(IPPROTO_TCP, ip(1, 1, 1, 1), ip(2, 2, 2, 2), 90, 80);
        assert_eq!(
            a.canonicalize(Canonicalization::PerField),
            b.canonicalize(Canonicalization::PerField)
        );
        assert_ne!(
            a.canonicalize(Canonicalization::Endpoint),
            b.canonicalize(Canonicalization::Endpoint)
        );
    }

    #[test]
    fn test_endpoint_mode_matches_reverse() {
        let t = FlowTuple::new(IPPROTO_UDP, ip(10, 0, 0, 5), ip(10, 0, 0, 3), 40000, 53);
        assert_eq!(
            t.canonicalize(Canonicalization::Endpoint),
            t.reverse().canonicalize(Canonicalization::Endpoint)
        );
    }

    proptest! {
        #[test]
        fn prop_ip_pair_commutes(a: u32, b: u32, sp: u16, dp: u16) {
            let k1 = FlowTuple::new(IPPROTO_UDP, a, b, sp, dp).canonicalize(Canonicalization::PerField);
            let k2 = FlowTuple::new(IPPROTO_UDP, b, a, sp, dp).canonicalize(Canonicalization::PerField);
            prop_assert_eq!((k1.ip_src, k1.ip_dst), (k2.ip_src, k2.ip_dst));
            prop_assert!(k1.ip_src <= k1.ip_dst);
        }

        #[test]
        fn prop_port_pair_commutes(a: u32, b: u32, sp: u16, dp: u16) {
            let k1 = FlowTuple::new(IPPROTO_TCP, a, b, sp, dp).canonicalize(Canonicalization::PerField);
            let k2 = FlowTuple::new(IPPROTO_TCP, a, b, dp, sp).canonicalize(Canonicalization::PerField);
            prop_assert_eq!((k1.l4_src, k1.l4_dst), (k2.l4_src, k2.l4_dst));
            prop_assert!(k1.l4_src <= k1.l4_dst);
        }

        #[test]
        fn prop_reverse_matches(proto in prop_oneof![Just(IPPROTO_TCP), Just(IPPROTO_UDP)],
                                a: u32, b: u32, sp: u16, dp: u16) {
            let t = FlowTuple::new(proto, a, b, sp, dp);
            for mode in [Canonicalization::PerField, Canonicalization::Endpoint] {
                prop_assert_eq!(t.canonicalize(mode), t.reverse().canonicalize(mode));
                prop_assert_eq!(t.canonicalize(mode).protocol, proto as u16);
            }
        }

        #[test]
        fn prop_key_pack_roundtrip(proto: u8, a: u32, b: u32, sp: u16, dp: u16) {
            let key = FlowKey::new(proto as u16, sp, dp, a, b);
            let (ips, ports) = key.pack();
            prop_assert_eq!(FlowKey::unpack(ips, ports), key);
        }
    }

    #[test]
    fn test_flow_key_hash() {
        let key1 = FlowKey::new(6, 443, 12345, ip(8, 8, 8, 8), ip(192, 168, 1, 1));
        let key2 = FlowKey::new(6, 443, 12345, ip(8, 8, 8, 8), ip(192, 168, 1, 1));
        let key3 = FlowKey::new(6, 443, 12345, ip(8, 8, 8, 9), ip(192, 168, 1, 1));

        assert_eq!(key1.hash(), key2.hash());
        assert_ne!(key1.hash(), key3.hash());
    }

    #[test]
    fn test_insert_lookup() {
        let table = FlowTable::new(1024);
        let key = FlowKey::new(17, 53, 40000, ip(10, 0, 0, 3), ip(10, 0, 0, 5));

        assert!(table.lookup(&key).is_none());
        assert!(table.insert_if_absent(key, FlowLeaf::new(6, 7)));
        assert_eq!(table.len(), 1);
        assert_eq!(table.lookup(&key), Some(FlowLeaf::new(6, 7)));
    }

    #[test]
    fn test_never_overwrites() {
        let table = FlowTable::new(16);
        let key = FlowKey::new(6, 1, 2, 3, 4);

        assert_eq!(table.try_insert(key, FlowLeaf::new(6, 7)), Ok(()));
        assert_eq!(table.try_insert(key, FlowLeaf::new(9, 9)), Err(FlowTableError::Exists));
        assert!(!table.insert_if_absent(key, FlowLeaf::new(9, 9)));
        assert_eq!(table.lookup(&key), Some(FlowLeaf::new(6, 7)));
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_publishing_slot_is_invisible_and_contended() {
        let table = FlowTable::new(16);
        let key = FlowKey::new(17, 53, 40000, ip(10, 0, 0, 3), ip(10, 0, 0, 5));
        assert!(table.insert_if_absent(key, FlowLeaf::new(6, 7)));

        // Put the entry back into the state an inserter holds mid-publish
        let fp = fingerprint(key.hash());
        let slot = table
            .slots
            .iter()
            .find(|s| s.tag.load(Ordering::Relaxed) == fp | OCCUPIED)
            .unwrap();
        slot.tag.store(fp | PUBLISHING, Ordering::Release);

        assert_eq!(table.lookup(&key), None);
        assert_eq!(
            table.try_insert(key, FlowLeaf::new(9, 9)),
            Err(FlowTableError::Contended)
        );
        // Unrelated keys are not held up
        let other = FlowKey::new(17, 80, 1234, ip(10, 0, 0, 1), ip(10, 0, 0, 2));
        assert_eq!(table.try_insert(other, FlowLeaf::new(6, 7)), Ok(()));

        slot.tag.store(fp | OCCUPIED, Ordering::Release);
        assert_eq!(table.lookup(&key), Some(FlowLeaf::new(6, 7)));
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn test_capacity_enforced() {
        let table = FlowTable::new(4);
        for i in 0..4 {
            assert!(table.insert_if_absent(FlowKey::new(17, 1, 2, i, 100), FlowLeaf::new(6, 7)));
        }
        assert!(table.is_full());
        assert_eq!(
            table.try_insert(FlowKey::new(17, 1, 2, 99, 100), FlowLeaf::new(6, 7)),
            Err(FlowTableError::TableFull)
        );
        // Existing keys are still found and still refuse overwrite
        assert_eq!(
            table.try_insert(FlowKey::new(17, 1, 2, 0, 100), FlowLeaf::new(6, 7)),
            Err(FlowTableError::Exists)
        );
        assert_eq!(table.len(), 4);
        assert_eq!(table.entries().count(), 4);
    }

    #[test]
    fn test_slot_sizing() {
        let table = FlowTable::new(1000);
        assert_eq!(table.capacity(), 1000);
        assert_eq!(table.slot_count(), 2048);

        let tiny = FlowTable::new(0);
        assert_eq!(tiny.capacity(), 1);
        assert_eq!(tiny.slot_count(), 2);
    }

    #[test]
    fn test_entries_snapshot() {
        let table = FlowTable::new(64);
        let keys: Vec<_> = (0..10).map(|i| FlowKey::new(6, i, 1000, 1, 2)).collect();
        for k in &keys {
            table.insert_if_absent(*k, FlowLeaf::new(6, 7));
        }

        let mut seen: Vec<_> = table.entries().map(|(k, _)| k.l4_src).collect();
        seen.sort_unstable();
        assert_eq!(seen, (0..10).collect::<Vec<_>>());
        assert!(table.entries().all(|(_, l)| l == FlowLeaf::new(6, 7)));
    }

    #[test]
    fn test_concurrent_insert() {
        let table = Arc::new(FlowTable::new(65536));
        let mut handles = Vec::new();

        for t in 0..4u32 {
            let table = table.clone();
            handles.push(thread::spawn(move || {
                for i in 0..1000 {
                    let key = FlowKey::new(6, 443, 12345, t * 10000 + i, ip(8, 8, 8, 8));
                    assert!(table.insert_if_absent(key, FlowLeaf::new(6, 7)));
                }
            }));
        }

        for h in handles {
            h.join().unwrap();
        }

        assert_eq!(table.len(), 4000);
        assert_eq!(table.entries().count(), 4000);
    }

    #[test]
    fn test_concurrent_same_key_single_winner() {
        for round in 0..50u32 {
            let table = Arc::new(FlowTable::new(1024));
            let threads = 8;
            let barrier = Arc::new(Barrier::new(threads));
            let key = FlowKey::new(17, 53, 40000 + round as u16, 1, 2);

            let handles: Vec<_> = (0..threads)
                .map(|_| {
                    let table = table.clone();
                    let barrier = barrier.clone();
                    thread::spawn(move || {
                        barrier.wait();
                        table.try_insert(key, FlowLeaf::new(6, 7))
                    })
                })
                .collect();

            let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
            let wins = results.iter().filter(|r| r.is_ok()).count();

            assert_eq!(wins, 1, "round {}: {:?}", round, results);
            assert_eq!(table.len(), 1);
            assert_eq!(table.entries().count(), 1);
            assert_eq!(table.lookup(&key), Some(FlowLeaf::new(6, 7)));
        }
    }

    #[test]
    fn test_concurrent_fill_respects_capacity() {
        let table = Arc::new(FlowTable::new(100));
        let handles: Vec<_> = (0..4u32)
            .map(|t| {
                let table = table.clone();
                thread::spawn(move || {
                    (0..100u32)
                        .filter(|i| {
                            table.insert_if_absent(FlowKey::new(17, 1, 2, t * 1000 + i, 7), FlowLeaf::new(6, 7))
                        })
                        .count()
                })
            })
            .collect();

        let inserted: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
        assert!(inserted > 0 && inserted <= 100);
        assert_eq!(table.len(), inserted);
        assert_eq!(table.entries().count(), inserted);
    }
}
