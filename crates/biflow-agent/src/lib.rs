//! biflow control plane
//!
//! Provisions the redirect map and flow table, attaches the fast path to
//! both attachment points, reports table contents on an interval and
//! detaches on shutdown.

pub mod agent;
pub mod config;
pub mod egress;
pub mod poller;
pub mod trafficgen;

pub use agent::{Agent, TrafficPlan};
pub use config::AgentConfig;
