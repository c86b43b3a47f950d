//! Synthetic traffic replay
//!
//! Random UDP conversations between inside clients and outside servers.
//! Every round sends one request per flow from the inside, the matching
//! reply from the outside, an unsolicited outside segment and a non-IPv4
//! frame.

use biflow_common::PortPair;
use biflow_dataplane::{FastPathEngine, Frame, FrameBuilder};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::net::Ipv4Addr;
use std::ops::RangeInclusive;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// UDP ports drawn for generated flows
pub const PORT_RANGE: RangeInclusive<u16> = 2000..=49151;

/// Size of request frames
pub const FRAME_SIZE: usize = 1500;

/// Payload fill pattern
const PAYLOAD_PATTERN: &[u8] = b"sal";

const ETHERTYPE_IPV6: u16 = 0x86DD;

/// Injection attempts per frame before it is given up
const INJECT_RETRIES: u32 = 3;

/// One generated conversation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlowSpec {
    pub client: Ipv4Addr,
    pub client_port: u16,
    pub server: Ipv4Addr,
    pub server_port: u16,
}

/// Frame plus the conversation it belongs to, used to steer all frames of
/// one conversation onto the same receive queue
#[derive(Debug, Clone)]
pub struct SteeredFrame {
    pub flow: usize,
    pub frame: Frame,
}

/// Outcome of a replay
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReplayReport {
    pub injected: u64,
    pub refused: u64,
}

/// Random flow generator
pub struct TrafficGenerator {
    rng: StdRng,
    flows: Vec<FlowSpec>,
}

impl TrafficGenerator {
    /// Generate `num_flows` random flows; a seed makes the set reproducible
    pub fn new(num_flows: usize, seed: Option<u64>) -> Self {
        let mut rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let flows = (0..num_flows)
            .map(|_| FlowSpec {
                client: Ipv4Addr::from(rng.gen::<u32>()),
                client_port: rng.gen_range(PORT_RANGE),
                server: Ipv4Addr::from(rng.gen::<u32>()),
                server_port: rng.gen_range(PORT_RANGE),
            })
            .collect();
        Self { rng, flows }
    }

    pub fn flows(&self) -> &[FlowSpec] {
        &self.flows
    }

    /// Frames of one round
    pub fn round(&mut self, ports: PortPair) -> Vec<SteeredFrame> {
        let mut frames = Vec::with_capacity(self.flows.len() * 2 + 2);

        for (idx, flow) in self.flows.iter().enumerate() {
            let request = FrameBuilder::udp(flow.client, flow.client_port, flow.server, flow.server_port)
                .frame_size(FRAME_SIZE, PAYLOAD_PATTERN)
                .build();
            let reply = FrameBuilder::udp(flow.server, flow.server_port, flow.client, flow.client_port)
                .payload(PAYLOAD_PATTERN)
                .build();
            frames.push(SteeredFrame {
                flow: idx,
                frame: Frame::new(ports.inside(), request),
            });
            frames.push(SteeredFrame {
                flow: idx,
                frame: Frame::new(ports.outside(), reply),
            });
        }

        // TCP never matches a generated UDP flow, so this is always dropped
        let stray = FrameBuilder::tcp(
            Ipv4Addr::from(self.rng.gen::<u32>()),
            self.rng.gen_range(PORT_RANGE),
            Ipv4Addr::from(self.rng.gen::<u32>()),
            self.rng.gen_range(PORT_RANGE),
        )
        .build();
        let not_ipv4 = FrameBuilder::udp(Ipv4Addr::UNSPECIFIED, 0, Ipv4Addr::UNSPECIFIED, 0)
            .ethertype(ETHERTYPE_IPV6)
            .build();
        let next = self.flows.len();
        frames.push(SteeredFrame {
            flow: next,
            frame: Frame::new(ports.outside(), stray),
        });
        frames.push(SteeredFrame {
            flow: next + 1,
            frame: Frame::new(ports.inside(), not_ipv4),
        });

        frames
    }
}

/// Push `rounds` rounds of traffic into an attached engine
pub async fn replay(engine: Arc<FastPathEngine>, mut generator: TrafficGenerator, rounds: usize) -> ReplayReport {
    let ports = engine.forwarder().ports();
    let queues = engine.num_queues().max(1);
    let mut report = ReplayReport::default();

    info!(flows = generator.flows().len(), rounds, "replaying synthetic traffic");

    for round in 0..rounds {
        for steered in generator.round(ports) {
            let queue = steered.flow % queues;
            let mut attempt = 0;
            loop {
                match engine.inject_on(queue, steered.frame.clone()) {
                    Ok(()) => {
                        report.injected += 1;
                        break;
                    }
                    Err(e) if attempt + 1 < INJECT_RETRIES => {
                        debug!(queue, error = %e, "injection refused, retrying");
                        attempt += 1;
                        tokio::time::sleep(Duration::from_millis(1)).await;
                    }
                    Err(e) => {
                        debug!(queue, error = %e, "injection refused, giving up");
                        report.refused += 1;
                        break;
                    }
                }
            }
        }
        debug!(round, "round injected");
        tokio::task::yield_now().await;
    }

    info!(injected = report.injected, refused = report.refused, "replay finished");
    report
}
