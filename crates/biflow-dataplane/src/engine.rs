//! Forwarding Decision Engine
//!
//! Two states, chosen by the ingress attachment point of the current packet:
//!
//! ```text
//!  frame ──► parse ──► canonicalize ──► side?
//!    │                                   │
//!    │ malformed / unsupported           ├─ outside: lookup ── hit ──► FORWARD(leaf.out_port)
//!    ▼                                   │                └─ miss ──► DROP
//!   DROP                                 └─ inside:  lookup ── miss ─► insert-if-absent
//!                                                    └──────────────► FORWARD(outside)
//! ```
//!
//! No state is kept between packets other than the flow table itself.

use crate::flow::{Canonicalization, FlowKey, FlowLeaf, FlowTable, FlowTableError};
use crate::parser::{self, ParseError};
use crate::stats::{DecisionCounters, DecisionSnapshot, KeyedCounters};
use crate::DEFAULT_FLOW_TABLE_SIZE;
use arc_swap::ArcSwap;
use biflow_common::{PortId, PortPair, Side};
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, trace, warn};

/// Per-packet decision
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Verdict {
    /// Discard the frame
    Drop,
    /// Redirect the frame to an attachment point
    Forward(PortId),
}

/// Forwarder configuration
#[derive(Debug, Clone, Copy)]
pub struct ForwarderConfig {
    /// Inside (PORT_A) and outside (PORT_B) attachment points
    pub ports: PortPair,
    /// Maximum number of learned flows
    pub table_capacity: usize,
    /// Tuple folding
    pub canonicalization: Canonicalization,
}

impl Default for ForwarderConfig {
    fn default() -> Self {
        Self {
            ports: PortPair::default(),
            table_capacity: DEFAULT_FLOW_TABLE_SIZE,
            canonicalization: Canonicalization::PerField,
        }
    }
}

/// The per-packet decision engine.
///
/// Shared by reference between all workers. `process` never blocks and
/// always returns a verdict.
pub struct Forwarder {
    config: ForwarderConfig,
    /// Leaf written for every flow learned from the inside
    learned_leaf: FlowLeaf,
    table: ArcSwap<FlowTable>,
    counters: DecisionCounters,
    ingress_counters: KeyedCounters<PortId>,
}

impl Forwarder {
    /// Create forwarder with an empty flow table
    pub fn new(config: ForwarderConfig) -> Self {
        let ports = config.ports;
        // PortPair guarantees the inside id fits the leaf's 8-bit out_port
        let out_port = ports.inside().as_u8().unwrap_or(u8::MAX);
        Self {
            learned_leaf: FlowLeaf::new(out_port, ports.outside().get()),
            table: ArcSwap::from_pointee(FlowTable::new(config.table_capacity)),
            counters: DecisionCounters::default(),
            ingress_counters: KeyedCounters::new(),
            config,
        }
    }

    /// Decide what to do with `frame`, which arrived on `ingress`
    #[inline]
    pub fn process(&self, ingress: PortId, frame: &[u8]) -> Verdict {
        self.counters.packets.inc();
        self.ingress_counters.increment(&ingress);

        let verdict = self.decide(ingress, frame);
        match verdict {
            Verdict::Drop => self.counters.dropped.inc(),
            Verdict::Forward(_) => self.counters.forwarded.inc(),
        };
        verdict
    }

    #[inline(always)]
    fn decide(&self, ingress: PortId, frame: &[u8]) -> Verdict {
        let Some(side) = self.config.ports.classify(ingress) else {
            self.counters.unknown_ingress.inc();
            trace!(%ingress, "frame from unknown attachment point");
            return Verdict::Drop;
        };

        let headers = match parser::parse(frame) {
            Ok(h) => h,
            Err(e) => {
                self.record_parse_error(e);
                return Verdict::Drop;
            }
        };

        let key = headers.tuple().canonicalize(self.config.canonicalization);
        let table = self.table.load();

        match side {
            Side::Outside => match table.lookup(&key) {
                Some(leaf) => {
                    self.counters.flow_hits.inc();
                    Verdict::Forward(PortId::from(leaf.out_port))
                }
                None => {
                    self.counters.flow_misses.inc();
                    trace!(%key, "no learned flow for outside frame");
                    Verdict::Drop
                }
            },
            Side::Inside => {
                if table.lookup(&key).is_some() {
                    self.counters.flow_hits.inc();
                } else {
                    self.counters.flow_misses.inc();
                    self.learn(&table, key);
                }
                Verdict::Forward(self.config.ports.outside())
            }
        }
    }

    /// Insert return-path state; failures degrade silently
    #[inline]
    fn learn(&self, table: &FlowTable, key: FlowKey) {
        match table.try_insert(key, self.learned_leaf) {
            Ok(()) => {
                self.counters.flows_learned.inc();
                debug!(%key, "flow learned");
            }
            Err(FlowTableError::Exists) => {
                self.counters.insert_lost_race.inc();
            }
            Err(FlowTableError::Contended) => {
                self.counters.insert_contended.inc();
            }
            Err(FlowTableError::TableFull) => {
                if self.counters.table_full.inc() == 0 {
                    warn!(
                        capacity = table.capacity(),
                        "flow table full, new flows are forwarded without return state"
                    );
                }
            }
        }
    }

    #[inline]
    fn record_parse_error(&self, err: ParseError) {
        if err.is_malformed() {
            self.counters.malformed.inc();
        } else {
            self.counters.unsupported.inc();
        }
        trace!(error = %err, "dropping unparsable frame");
    }

    /// Replace the flow table with an empty one, returning how many entries
    /// were discarded. Packets already holding the old table finish on it.
    pub fn reset_flows(&self) -> usize {
        let old = self
            .table
            .swap(Arc::new(FlowTable::new(self.config.table_capacity)));
        self.counters.resets.inc();
        let discarded = old.entries().count();
        debug!(discarded, "flow table reset");
        discarded
    }

    /// Current flow table
    pub fn table(&self) -> Arc<FlowTable> {
        self.table.load_full()
    }

    /// Best-effort copy of all learned flows
    pub fn flows(&self) -> Vec<(FlowKey, FlowLeaf)> {
        self.table.load().entries().collect()
    }

    /// Decision counters
    pub fn counters(&self) -> DecisionSnapshot {
        self.counters.snapshot()
    }

    /// Packets seen per ingress attachment point
    pub fn ingress_counts(&self) -> Vec<(PortId, u64)> {
        let mut v = self.ingress_counters.snapshot();
        v.sort_unstable();
        v
    }

    /// Configured attachment points
    pub fn ports(&self) -> PortPair {
        self.config.ports
    }
}
