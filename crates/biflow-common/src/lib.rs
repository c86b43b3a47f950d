//! biflow Common - Shared types for the flow-steering forwarder
//!
//! This crate provides the small, dependency-light primitives that both the
//! fast path and the control plane agree on:
//! - Attachment point identifiers (the "inside" and "outside" ports)
//! - Egress device descriptors
//! - Error handling
//! - Lock-free counters

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod port;

pub use error::*;
pub use port::*;

use std::sync::atomic::{AtomicU64, Ordering};

/// Lock-free counter for fast-path metrics
#[derive(Debug, Default)]
pub struct AtomicCounter(AtomicU64);

impl AtomicCounter {
    /// Create new counter
    pub const fn new(value: u64) -> Self {
        Self(AtomicU64::new(value))
    }

    /// Increment and return previous value
    #[inline(always)]
    pub fn inc(&self) -> u64 {
        self.0.fetch_add(1, Ordering::Relaxed)
    }

    /// Add value and return previous
    #[inline(always)]
    pub fn add(&self, val: u64) -> u64 {
        self.0.fetch_add(val, Ordering::Relaxed)
    }

    /// Get current value
    #[inline(always)]
    pub fn get(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_atomic_counter() {
        let counter = AtomicCounter::new(0);
        assert_eq!(counter.inc(), 0);
        assert_eq!(counter.inc(), 1);
        assert_eq!(counter.add(5), 2);
        assert_eq!(counter.get(), 7);
    }

    #[test]
    fn test_counter_shared_across_threads() {
        let counter = std::sync::Arc::new(AtomicCounter::default());
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let counter = counter.clone();
                std::thread::spawn(move || {
                    for _ in 0..1000 {
                        counter.inc();
                    }
                })
            })
            .collect();

        for h in handles {
            h.join().unwrap();
        }

        assert_eq!(counter.get(), 4000);
    }
}
