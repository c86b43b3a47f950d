//! Attachment points and egress devices
//!
//! The forwarder is attached to exactly two logical ports. Which one is
//! "inside" and which one is "outside" is configuration, never a literal in
//! the fast path.

use crate::{BiflowError, BiflowResult};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Logical attachment point identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
#[repr(transparent)]
pub struct PortId(pub u16);

impl PortId {
    /// Raw identifier
    #[inline(always)]
    pub const fn get(self) -> u16 {
        self.0
    }

    /// Narrow to the 8-bit form stored in flow leaves
    #[inline]
    pub fn as_u8(self) -> Option<u8> {
        u8::try_from(self.0).ok()
    }
}

impl From<u8> for PortId {
    fn from(v: u8) -> Self {
        Self(v as u16)
    }
}

impl From<u16> for PortId {
    fn from(v: u16) -> Self {
        Self(v)
    }
}

impl fmt::Display for PortId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Which side of the forwarder a packet arrived on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    /// PORT_A: traffic is always forwarded and teaches return state
    Inside,
    /// PORT_B: traffic is forwarded only on a learned flow
    Outside,
}

/// The two attachment points the forwarder is installed on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PortPair {
    inside: PortId,
    outside: PortId,
}

impl PortPair {
    /// Validate and build a port pair.
    ///
    /// The inside identifier is written into the 8-bit `out_port` of every
    /// learned leaf, so it must fit in a byte.
    pub fn new(inside: PortId, outside: PortId) -> BiflowResult<Self> {
        if inside == outside {
            return Err(BiflowError::SamePort(inside.get()));
        }
        if inside.as_u8().is_none() {
            return Err(BiflowError::PortOutOfRange {
                port: inside.get(),
                bits: 8,
            });
        }
        Ok(Self { inside, outside })
    }

    /// PORT_A
    #[inline(always)]
    pub fn inside(&self) -> PortId {
        self.inside
    }

    /// PORT_B
    #[inline(always)]
    pub fn outside(&self) -> PortId {
        self.outside
    }

    /// Map an ingress identifier onto a side, if it is one of ours
    #[inline(always)]
    pub fn classify(&self, ingress: PortId) -> Option<Side> {
        if ingress == self.outside {
            Some(Side::Outside)
        } else if ingress == self.inside {
            Some(Side::Inside)
        } else {
            None
        }
    }
}

impl Default for PortPair {
    fn default() -> Self {
        Self {
            inside: PortId(6),
            outside: PortId(7),
        }
    }
}

/// Concrete output device a logical port redirects to
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Device {
    /// Interface name
    pub name: String,
    /// Kernel interface index
    pub ifindex: u32,
}

impl Device {
    /// Create device descriptor
    pub fn new(name: impl Into<String>, ifindex: u32) -> Self {
        Self {
            name: name.into(),
            ifindex,
        }
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.name, self.ifindex)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify() {
        let ports = PortPair::new(PortId(6), PortId(7)).unwrap();
        assert_eq!(ports.classify(PortId(6)), Some(Side::Inside));
        assert_eq!(ports.classify(PortId(7)), Some(Side::Outside));
        assert_eq!(ports.classify(PortId(8)), None);
    }

    #[test]
    fn test_rejects_same_port() {
        assert!(matches!(
            PortPair::new(PortId(3), PortId(3)),
            Err(BiflowError::SamePort(3))
        ));
    }

    #[test]
    fn test_rejects_wide_inside_port() {
        assert!(matches!(
            PortPair::new(PortId(300), PortId(7)),
            Err(BiflowError::PortOutOfRange { port: 300, bits: 8 })
        ));
        // Outside is stored as a 16-bit in_port, wide ids are fine there
        assert!(PortPair::new(PortId(6), PortId(300)).is_ok());
    }

    #[test]
    fn test_port_id_serde_transparent() {
        let json = serde_json::to_string(&PortId(7)).unwrap();
        assert_eq!(json, "7");
        let back: PortId = serde_json::from_str("6").unwrap();
        assert_eq!(back, PortId(6));
    }
}
