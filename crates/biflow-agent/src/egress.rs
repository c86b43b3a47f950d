//! Counting egress
//!
//! Stands in for NIC transmit: frames are accounted per device and dropped.

use biflow_common::Device;
use biflow_dataplane::{Egress, KeyedCounters};
use serde::Serialize;

/// Per-device transmit totals
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeviceTotals {
    pub device: String,
    pub frames: u64,
    pub bytes: u64,
}

/// Egress that counts frames and bytes per device
#[derive(Debug, Default)]
pub struct CountingEgress {
    frames: KeyedCounters<String>,
    bytes: KeyedCounters<String>,
}

impl CountingEgress {
    pub fn new() -> Self {
        Self::default()
    }

    /// Totals sorted by device name
    pub fn totals(&self) -> Vec<DeviceTotals> {
        let mut totals: Vec<_> = self
            .frames
            .snapshot()
            .into_iter()
            .map(|(device, frames)| DeviceTotals {
                bytes: self.bytes.get(&device),
                device,
                frames,
            })
            .collect();
        totals.sort_by(|a, b| a.device.cmp(&b.device));
        totals
    }

    /// Frames sent to one device
    pub fn frames(&self, device: &str) -> u64 {
        self.frames.get(&device.to_string())
    }
}

impl Egress for CountingEgress {
    fn transmit(&self, device: &Device, frame: &[u8]) {
        self.frames.increment(&device.name);
        self.bytes.add(&device.name, frame.len() as u64);
    }
}
