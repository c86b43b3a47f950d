//! Agent lifecycle

use crate::config::AgentConfig;
use crate::egress::CountingEgress;
use crate::poller::Poller;
use crate::trafficgen::{self, TrafficGenerator};
use anyhow::{Context, Result};
use biflow_dataplane::{DeviceMap, FastPathEngine, Forwarder};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{info, warn};

/// Synthetic traffic to replay after attaching
#[derive(Debug, Clone, Copy)]
pub struct TrafficPlan {
    pub flows: usize,
    pub rounds: usize,
    pub seed: Option<u64>,
}

/// Control-plane agent
pub struct Agent {
    config: AgentConfig,
    engine: FastPathEngine,
    egress: Arc<CountingEgress>,
}

impl Agent {
    /// Build forwarder, redirect map and engine from configuration
    pub fn new(config: AgentConfig) -> Result<Self> {
        config.validate().context("invalid configuration")?;

        let forwarder = Arc::new(Forwarder::new(config.forwarder_config()?));

        let devices = Arc::new(DeviceMap::new());
        for (port, device) in config.redirects() {
            info!(%port, %device, "installing redirect");
            devices.install(port, device);
        }

        let egress = Arc::new(CountingEgress::new());
        let engine = FastPathEngine::new(config.engine_config(), forwarder, devices, egress.clone())
            .context("failed to build fast path engine")?;

        Ok(Self {
            config,
            engine,
            egress,
        })
    }

    /// Attach, run until interrupted (or until the replay finishes when
    /// `exit_when_done` is set), then detach
    pub async fn run(self, traffic: Option<TrafficPlan>, exit_when_done: bool) -> Result<()> {
        let Self {
            config,
            mut engine,
            egress,
        } = self;

        engine.attach().context("failed to attach forwarder")?;
        let engine = Arc::new(engine);

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let poller = Poller::new(
            engine.clone(),
            egress.clone(),
            config.control,
            config.flow_table.reset_interval_secs,
        );
        let final_report = Poller::new(engine.clone(), egress, config.control, 0);
        let poller_handle = tokio::spawn(poller.run(shutdown_rx));

        let replay = traffic.map(|plan| {
            let generator = TrafficGenerator::new(plan.flows, plan.seed);
            tokio::spawn(trafficgen::replay(engine.clone(), generator, plan.rounds))
        });

        match (replay, exit_when_done) {
            (Some(handle), true) => {
                tokio::select! {
                    res = handle => {
                        res.context("traffic replay task failed")?;
                        wait_for_drain(&engine).await;
                    }
                    res = shutdown_signal() => res?,
                }
            }
            (replay, _) => {
                if exit_when_done {
                    warn!("nothing to replay, waiting for a signal");
                }
                shutdown_signal().await?;
                if let Some(handle) = replay {
                    handle.abort();
                }
            }
        }

        let _ = shutdown_tx.send(true);
        if let Err(e) = poller_handle.await {
            warn!(error = %e, "poller task failed");
        }

        engine.detach();
        final_report.print();
        Ok(())
    }
}

/// Give the workers a moment to empty their queues
async fn wait_for_drain(engine: &FastPathEngine) {
    for _ in 0..100 {
        if engine.pending() == 0 {
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }
}

/// Resolve on Ctrl-C or, on unix, SIGTERM
async fn shutdown_signal() -> Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut term = signal(SignalKind::terminate()).context("failed to install SIGTERM handler")?;
        tokio::select! {
            res = tokio::signal::ctrl_c() => res.context("failed to listen for Ctrl-C")?,
            _ = term.recv() => {}
        }
    }
    #[cfg(not(unix))]
    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for Ctrl-C")?;

    info!("shutdown requested");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DeviceConfig, OutputFormat};

    fn config() -> AgentConfig {
        let mut config = AgentConfig::default();
        config.engine.workers = 2;
        config.engine.queue_depth = 1024;
        config.control.poll_interval_secs = 3600;
        config.control.print_flows = false;
        config.control.format = OutputFormat::Json;
        config
    }

    #[test]
    fn test_new_installs_default_redirects() {
        let agent = Agent::new(config()).unwrap();
        let devices = agent.engine.devices().entries();
        assert_eq!(devices.len(), 2);
        assert_eq!(devices[0].1.name, "port6");
        assert_eq!(devices[1].1.name, "port7");
        assert!(!agent.engine.is_attached());
    }

    #[test]
    fn test_new_rejects_invalid() {
        let mut config = config();
        config.ports.outside = config.ports.inside;
        assert!(Agent::new(config).is_err());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_replay_until_done() {
        let agent = Agent::new(config()).unwrap();
        let egress = agent.egress.clone();
        let forwarder = agent.engine.forwarder().clone();
        let plan = TrafficPlan {
            flows: 8,
            rounds: 2,
            seed: Some(3),
        };

        agent.run(Some(plan), true).await.unwrap();

        // Every request leaves on the outside, every reply returns inside
        assert_eq!(egress.frames("port7"), 2 * 8);
        assert_eq!(egress.frames("port6"), 2 * 8);

        let c = forwarder.counters();
        assert_eq!(c.flows_learned, 8);
        assert_eq!(c.forwarded, 2 * 8 * 2);
        // One unsolicited segment and one non-IPv4 frame per round
        assert_eq!(c.dropped, 2 * 2);
        assert_eq!(c.unsupported, 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_replay_without_inside_device_loses_replies() {
        let mut config = config();
        config.devices = vec![DeviceConfig {
            port: config.ports.outside,
            name: "wan0".into(),
            ifindex: 7,
        }];
        let agent = Agent::new(config).unwrap();
        let egress = agent.egress.clone();
        let forwarder = agent.engine.forwarder().clone();
        let plan = TrafficPlan {
            flows: 8,
            rounds: 2,
            seed: Some(3),
        };

        agent.run(Some(plan), true).await.unwrap();

        assert_eq!(egress.frames("wan0"), 2 * 8);
        assert_eq!(egress.totals().len(), 1);
        // Replies were still decided as forwards; only the redirect failed
        assert_eq!(forwarder.counters().forwarded, 2 * 8 * 2);
    }
}
