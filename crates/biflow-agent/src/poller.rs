//! Flow table poller
//!
//! Periodically dumps the learned flows and the counters, and optionally
//! resets the table on its own schedule.

use crate::config::{ControlConfig, OutputFormat};
use crate::egress::{CountingEgress, DeviceTotals};
use biflow_common::PortId;
use biflow_dataplane::{CoreStatsSnapshot, DecisionSnapshot, FastPathEngine, FlowKey, FlowLeaf};
use serde::Serialize;
use std::fmt::Write as _;
use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{interval_at, Instant, Interval, MissedTickBehavior};
use tracing::{info, warn};

/// One learned flow, as printed
#[derive(Debug, Clone, Serialize)]
pub struct FlowEntry {
    #[serde(flatten)]
    pub key: FlowKey,
    #[serde(flatten)]
    pub leaf: FlowLeaf,
}

/// Everything one poll observes
#[derive(Debug, Clone, Serialize)]
pub struct PollReport {
    pub flows: Vec<FlowEntry>,
    pub table_capacity: usize,
    pub decisions: DecisionSnapshot,
    pub engine: CoreStatsSnapshot,
    pub ingress: Vec<(PortId, u64)>,
    pub egress: Vec<DeviceTotals>,
}

/// Render one flow in the classic table layout
pub fn format_flow(key: &FlowKey, leaf: &FlowLeaf) -> String {
    format!(
        "[ {} | ip s {} d {} | l4 s {} d {} | in {} out {} ]",
        key.protocol,
        Ipv4Addr::from(key.ip_src),
        Ipv4Addr::from(key.ip_dst),
        key.l4_src,
        key.l4_dst,
        leaf.in_port,
        leaf.out_port
    )
}

impl PollReport {
    /// Render for the operator
    pub fn render(&self, format: OutputFormat, print_flows: bool) -> String {
        match format {
            OutputFormat::Json => {
                let value = if print_flows {
                    serde_json::to_value(self)
                } else {
                    serde_json::to_value(Summary::from(self))
                };
                value.map(|v| v.to_string()).unwrap_or_default()
            }
            OutputFormat::Text => self.render_text(print_flows),
        }
    }

    fn render_text(&self, print_flows: bool) -> String {
        let mut out = String::new();
        if print_flows {
            let _ = writeln!(out, "Flow table: [ ip_proto | ip s d | l4 s d | in out ]");
            for entry in &self.flows {
                let _ = writeln!(out, "{}", format_flow(&entry.key, &entry.leaf));
            }
        }

        let d = &self.decisions;
        let _ = writeln!(
            out,
            "flows {}/{} | packets {} forwarded {} dropped {} | hits {} misses {} ({:.1}% hit) learned {} | malformed {} unsupported {} unknown-ingress {} | table-full {} resets {}",
            self.flows.len(),
            self.table_capacity,
            d.packets,
            d.forwarded,
            d.dropped,
            d.flow_hits,
            d.flow_misses,
            d.flow_hit_rate() * 100.0,
            d.flows_learned,
            d.malformed,
            d.unsupported,
            d.unknown_ingress,
            d.table_full,
            d.resets
        );
        let e = &self.engine;
        let _ = write!(
            out,
            "engine rx {} tx {} dropped {} redirect-miss {} queue-full {}",
            e.rx_packets, e.tx_packets, e.dropped, e.redirect_miss, e.rx_queue_full
        );
        for t in &self.egress {
            let _ = write!(out, " | {} {} frames", t.device, t.frames);
        }
        out.push('\n');
        out
    }
}

/// JSON report without the flow list
#[derive(Serialize)]
struct Summary<'a> {
    flows: usize,
    table_capacity: usize,
    decisions: &'a DecisionSnapshot,
    engine: &'a CoreStatsSnapshot,
    ingress: &'a [(PortId, u64)],
    egress: &'a [DeviceTotals],
}

impl<'a> From<&'a PollReport> for Summary<'a> {
    fn from(r: &'a PollReport) -> Self {
        Self {
            flows: r.flows.len(),
            table_capacity: r.table_capacity,
            decisions: &r.decisions,
            engine: &r.engine,
            ingress: &r.ingress,
            egress: &r.egress,
        }
    }
}

/// Control-plane poller
pub struct Poller {
    engine: Arc<FastPathEngine>,
    egress: Arc<CountingEgress>,
    control: ControlConfig,
    reset_interval: Option<Duration>,
}

impl Poller {
    pub fn new(
        engine: Arc<FastPathEngine>,
        egress: Arc<CountingEgress>,
        control: ControlConfig,
        reset_interval_secs: u64,
    ) -> Self {
        Self {
            engine,
            egress,
            control,
            reset_interval: (reset_interval_secs > 0).then(|| Duration::from_secs(reset_interval_secs)),
        }
    }

    /// Collect one report
    pub fn poll(&self) -> PollReport {
        let forwarder = self.engine.forwarder();
        let table = forwarder.table();
        PollReport {
            flows: table
                .entries()
                .map(|(key, leaf)| FlowEntry { key, leaf })
                .collect(),
            table_capacity: table.capacity(),
            decisions: forwarder.counters(),
            engine: self.engine.stats(),
            ingress: forwarder.ingress_counts(),
            egress: self.egress.totals(),
        }
    }

    /// Print one report to stdout
    pub fn print(&self) {
        print!("{}", self.poll().render(self.control.format, self.control.print_flows));
    }

    /// Poll until `shutdown` flips to true
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let period = Duration::from_secs(self.control.poll_interval_secs.max(1));
        let mut poll = ticker(period);
        let mut reset = self.reset_interval.map(ticker);

        info!(
            interval_secs = period.as_secs(),
            reset_secs = self.reset_interval.map(|d| d.as_secs()),
            "poller started"
        );

        loop {
            tokio::select! {
                _ = poll.tick() => self.print(),

                _ = next_tick(&mut reset) => {
                    let discarded = self.engine.forwarder().reset_flows();
                    info!(discarded, "flow table reset");
                }

                changed = shutdown.changed() => {
                    if changed.is_err() {
                        warn!("shutdown channel closed");
                    }
                    break;
                }
            }
        }

        info!("poller stopped");
    }
}

/// Interval whose first tick is one period from now
fn ticker(period: Duration) -> Interval {
    let mut i = interval_at(Instant::now() + period, period);
    i.set_missed_tick_behavior(MissedTickBehavior::Delay);
    i
}

async fn next_tick(interval: &mut Option<Interval>) {
    match interval {
        Some(i) => {
            i.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}
