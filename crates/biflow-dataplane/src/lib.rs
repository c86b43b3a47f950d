//! Bidirectional Flow Forwarder
//!
//! Stateful two-port fast path: flows first seen on the inside port are
//! learned, and traffic arriving on the outside port is forwarded back only
//! when it belongs to a learned flow.
//!
//! # Architecture
//!
//! ```text
//!   inside port (A)                                outside port (B)
//!        │                                                │
//!        ▼                                                ▼
//! ┌──────────────┐   ┌──────────────┐   ┌──────────────────────────┐
//! │ RX queue 0..N│──▶│    parser    │──▶│ canonicalize (biflow key)│
//! └──────────────┘   └──────────────┘   └────────────┬─────────────┘
//!                                                    │
//!                     ┌──────────────────────────────┴─────────┐
//!                     ▼                                        ▼
//!            ingress == A: learn                   ingress == B: lookup
//!            insert-if-absent {in=B,out=A}         hit → forward A
//!            forward B                             miss → drop
//!                     │                                        │
//!                     └──────────────┬─────────────────────────┘
//!                                    ▼
//!                       ┌──────────────────────────┐
//!                       │ device map → egress      │
//!                       └──────────────────────────┘
//! ```
//!
//! # Key Properties
//!
//! 1. **Run-to-Completion**: one worker per receive queue, no per-packet locks
//! 2. **Shared Flow Table**: lock-free insert-if-absent, never overwrites
//! 3. **Bounded**: a full table degrades to plain inside→outside forwarding
//! 4. **Direction-free keys**: both directions of a flow share one entry

#![warn(missing_docs)]

pub mod builder;
pub mod core;
pub mod devmap;
pub mod engine;
pub mod flow;
pub mod parser;
pub mod stats;

pub use builder::FrameBuilder;
pub use self::core::{EngineConfig, EngineError, FastPathEngine, Frame};
pub use devmap::{DeviceMap, DiscardEgress, Egress};
pub use engine::{Forwarder, ForwarderConfig, Verdict};
pub use flow::{Canonicalization, FlowKey, FlowLeaf, FlowTable, FlowTableError, FlowTuple};
pub use parser::{parse, Headers, ParseError};
pub use stats::{CoreStatsSnapshot, DecisionSnapshot, KeyedCounters};

/// Batch size for packet processing
pub const BATCH_SIZE: usize = 64;

/// Default flow table capacity
pub const DEFAULT_FLOW_TABLE_SIZE: usize = 1024;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_constants() {
        assert_eq!(BATCH_SIZE, 64);
        assert_eq!(DEFAULT_FLOW_TABLE_SIZE, 1024);
        assert_eq!(ForwarderConfig::default().table_capacity, DEFAULT_FLOW_TABLE_SIZE);
    }
}
