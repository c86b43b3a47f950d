//! Agent Configuration
//!
//! Loaded from TOML. Every section is optional and falls back to the
//! defaults of the classic two-port deployment (inside 6, outside 7).

use biflow_common::{BiflowError, BiflowResult, Device, PortId, PortPair};
use biflow_dataplane::{Canonicalization, EngineConfig, ForwarderConfig, BATCH_SIZE, DEFAULT_FLOW_TABLE_SIZE};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;

/// Complete agent configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AgentConfig {
    /// Redirect map entries; empty means one `port<N>` device per port
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub devices: Vec<DeviceConfig>,
    /// Attachment points
    pub ports: PortsConfig,
    /// Flow table sizing and behaviour
    pub flow_table: FlowTableConfig,
    /// Worker threads and queues
    pub engine: EngineSection,
    /// Poller output
    pub control: ControlConfig,
}

/// Attachment points
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PortsConfig {
    /// PORT_A, where flows are learned
    pub inside: PortId,
    /// PORT_B, where only return traffic is let through
    pub outside: PortId,
}

impl Default for PortsConfig {
    fn default() -> Self {
        let pair = PortPair::default();
        Self {
            inside: pair.inside(),
            outside: pair.outside(),
        }
    }
}

/// One redirect map entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DeviceConfig {
    /// Logical port the entry belongs to
    pub port: PortId,
    /// Interface name
    pub name: String,
    /// Interface index
    pub ifindex: u32,
}

/// Flow table settings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FlowTableConfig {
    /// Maximum learned flows
    pub capacity: usize,
    /// How tuples fold into keys
    pub canonicalization: Canonicalization,
    /// Seconds between full table resets, 0 disables
    pub reset_interval_secs: u64,
}

impl Default for FlowTableConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_FLOW_TABLE_SIZE,
            canonicalization: Canonicalization::default(),
            reset_interval_secs: 0,
        }
    }
}

/// Engine settings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineSection {
    pub workers: usize,
    pub queue_depth: usize,
    pub batch_size: usize,
}

impl Default for EngineSection {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            queue_depth: 4096,
            batch_size: BATCH_SIZE,
        }
    }
}

fn default_workers() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get().min(4))
        .unwrap_or(2)
}

/// Poller settings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ControlConfig {
    /// Seconds between table dumps
    pub poll_interval_secs: u64,
    /// Dump individual flows, not only counters
    pub print_flows: bool,
    pub format: OutputFormat,
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: 10,
            print_flows: true,
            format: OutputFormat::Text,
        }
    }
}

/// Poller output format
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

impl AgentConfig {
    /// Load and validate a TOML file
    pub fn load(path: impl AsRef<Path>) -> BiflowResult<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml_str(&content)
    }

    /// Parse and validate TOML text
    pub fn from_toml_str(s: &str) -> BiflowResult<Self> {
        let config: Self = toml::from_str(s).map_err(|e| BiflowError::ConfigError(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Render as TOML
    pub fn to_toml(&self) -> BiflowResult<String> {
        toml::to_string_pretty(self).map_err(|e| BiflowError::ConfigError(e.to_string()))
    }

    /// Check cross-field constraints
    pub fn validate(&self) -> BiflowResult<()> {
        let ports = self.port_pair()?;

        if self.flow_table.capacity == 0 {
            return Err(BiflowError::ConfigError("flow_table.capacity must be at least 1".into()));
        }
        if self.engine.workers == 0 {
            return Err(BiflowError::ConfigError("engine.workers must be at least 1".into()));
        }
        if self.engine.queue_depth == 0 {
            return Err(BiflowError::ConfigError("engine.queue_depth must be at least 1".into()));
        }
        if self.engine.batch_size == 0 {
            return Err(BiflowError::ConfigError("engine.batch_size must be at least 1".into()));
        }
        if self.control.poll_interval_secs == 0 {
            return Err(BiflowError::ConfigError(
                "control.poll_interval_secs must be at least 1".into(),
            ));
        }

        let mut seen = HashSet::new();
        for device in &self.devices {
            if ports.classify(device.port).is_none() {
                return Err(BiflowError::ConfigError(format!(
                    "device {} is bound to port {}, which is neither inside ({}) nor outside ({})",
                    device.name,
                    device.port,
                    ports.inside(),
                    ports.outside()
                )));
            }
            if !seen.insert(device.port) {
                return Err(BiflowError::ConfigError(format!(
                    "more than one device bound to port {}",
                    device.port
                )));
            }
        }

        Ok(())
    }

    /// Validated attachment points
    pub fn port_pair(&self) -> BiflowResult<PortPair> {
        PortPair::new(self.ports.inside, self.ports.outside)
    }

    /// Redirect map entries to install, defaults filled in
    pub fn redirects(&self) -> Vec<(PortId, Device)> {
        if self.devices.is_empty() {
            return [self.ports.inside, self.ports.outside]
                .into_iter()
                .map(|p| (p, Device::new(format!("port{}", p), p.get() as u32)))
                .collect();
        }
        self.devices
            .iter()
            .map(|d| (d.port, Device::new(d.name.clone(), d.ifindex)))
            .collect()
    }

    /// Forwarder settings
    pub fn forwarder_config(&self) -> BiflowResult<ForwarderConfig> {
        Ok(ForwarderConfig {
            ports: self.port_pair()?,
            table_capacity: self.flow_table.capacity,
            canonicalization: self.flow_table.canonicalization,
        })
    }

    /// Engine settings
    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            num_workers: self.engine.workers,
            queue_depth: self.engine.queue_depth,
            batch_size: self.engine.batch_size,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_file_is_default() {
        let config = AgentConfig::from_toml_str("").unwrap();
        assert_eq!(config, AgentConfig::default());
        assert_eq!(config.ports.inside, PortId(6));
        assert_eq!(config.ports.outside, PortId(7));
        assert_eq!(config.flow_table.capacity, 1024);
        assert_eq!(config.flow_table.canonicalization, Canonicalization::PerField);
        assert_eq!(config.control.poll_interval_secs, 10);
    }

    #[test]
    fn test_full_file() {
        let config = AgentConfig::from_toml_str(
            r#"
            [ports]
            inside = 1
            outside = 2

            [[devices]]
            port = 2
            name = "wan0"
            ifindex = 12

            [flow_table]
            capacity = 64
            canonicalization = "endpoint"
            reset_interval_secs = 300

            [engine]
            workers = 2
            queue_depth = 128
            batch_size = 8

            [control]
            poll_interval_secs = 1
            print_flows = false
            format = "json"
            "#,
        )
        .unwrap();

        assert_eq!(config.flow_table.canonicalization, Canonicalization::Endpoint);
        assert_eq!(config.control.format, OutputFormat::Json);
        assert_eq!(config.redirects(), vec![(PortId(2), Device::new("wan0", 12))]);

        let fwd = config.forwarder_config().unwrap();
        assert_eq!(fwd.ports.inside(), PortId(1));
        assert_eq!(fwd.table_capacity, 64);
        assert_eq!(config.engine_config().queue_depth, 128);
    }

    #[test]
    fn test_default_redirects() {
        let redirects = AgentConfig::default().redirects();
        assert_eq!(
            redirects,
            vec![
                (PortId(6), Device::new("port6", 6)),
                (PortId(7), Device::new("port7", 7)),
            ]
        );
    }

    #[test]
    fn test_rejects_invalid() {
        let cases = [
            "[ports]\ninside = 7\noutside = 7",
            "[ports]\ninside = 300\noutside = 7",
            "[flow_table]\ncapacity = 0",
            "[engine]\nworkers = 0",
            "[engine]\nbatch_size = 0",
            "[control]\npoll_interval_secs = 0",
            "[[devices]]\nport = 9\nname = \"x\"\nifindex = 1",
            "[[devices]]\nport = 7\nname = \"a\"\nifindex = 1\n[[devices]]\nport = 7\nname = \"b\"\nifindex = 2",
            "[flow_table]\ncanonicalization = \"sorted\"",
            "[flow_table]\nsize = 10",
        ];
        for case in cases {
            assert!(
                matches!(AgentConfig::from_toml_str(case), Err(BiflowError::ConfigError(_)) | Err(BiflowError::SamePort(_)) | Err(BiflowError::PortOutOfRange { .. })),
                "accepted: {case}"
            );
        }
    }

    #[test]
    fn test_outside_port_may_be_wide() {
        let config = AgentConfig::from_toml_str("[ports]\ninside = 6\noutside = 4000").unwrap();
        assert_eq!(config.port_pair().unwrap().outside(), PortId(4000));
    }

    #[test]
    fn test_default_renders_and_parses_back() {
        let rendered = AgentConfig::default().to_toml().unwrap();
        assert!(rendered.contains("[flow_table]"));
        assert!(rendered.contains("canonicalization = \"per-field\""));
        let parsed = AgentConfig::from_toml_str(&rendered).unwrap();
        assert_eq!(parsed, AgentConfig::default());
    }
}
