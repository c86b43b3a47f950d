//! Device redirect map
//!
//! Maps logical attachment points to concrete output devices. The fast path
//! only reads it; the control plane swaps in a new map on change.

use arc_swap::ArcSwap;
use biflow_common::{Device, PortId};
use std::collections::HashMap;
use std::sync::Arc;

/// Transmit side of the forwarder.
///
/// Implementations must not block for long: they run on the worker that
/// produced the verdict.
pub trait Egress: Send + Sync {
    /// Hand a frame to `device`
    fn transmit(&self, device: &Device, frame: &[u8]);
}

/// Egress that discards everything
#[derive(Debug, Default, Clone, Copy)]
pub struct DiscardEgress;

impl Egress for DiscardEgress {
    fn transmit(&self, _device: &Device, _frame: &[u8]) {}
}

/// Lock-free port → device map with atomic updates
pub struct DeviceMap {
    devices: ArcSwap<HashMap<PortId, Arc<Device>>>,
}

impl DeviceMap {
    /// Create empty map
    pub fn new() -> Self {
        Self {
            devices: ArcSwap::from_pointee(HashMap::new()),
        }
    }

    /// Resolve the device for a port
    #[inline]
    pub fn resolve(&self, port: PortId) -> Option<Arc<Device>> {
        self.devices.load().get(&port).cloned()
    }

    /// Install or replace the device behind `port`
    pub fn install(&self, port: PortId, device: Device) {
        let device = Arc::new(device);
        self.devices.rcu(|current| {
            let mut next = HashMap::clone(current);
            next.insert(port, device.clone());
            next
        });
        tracing::debug!(%port, device = %device, "redirect entry installed");
    }

    /// Remove the device behind `port`
    pub fn remove(&self, port: PortId) -> Option<Arc<Device>> {
        let mut removed = None;
        self.devices.rcu(|current| {
            let mut next = HashMap::clone(current);
            removed = next.remove(&port);
            next
        });
        removed
    }

    /// Number of installed redirects
    pub fn len(&self) -> usize {
        self.devices.load().len()
    }

    /// Check if empty
    pub fn is_empty(&self) -> bool {
        self.devices.load().is_empty()
    }

    /// Current entries, sorted by port
    pub fn entries(&self) -> Vec<(PortId, Arc<Device>)> {
        let mut v: Vec<_> = self
            .devices
            .load()
            .iter()
            .map(|(p, d)| (*p, d.clone()))
            .collect();
        v.sort_by_key(|(p, _)| *p);
        v
    }
}

impl Default for DeviceMap {
    fn default() -> Self {
        Self::new()
    }
}
