//! L2-L4 Header Parser
//!
//! Extracts the Ethernet/IPv4/transport fields the forwarder needs from an
//! untrusted frame. Every layer is read through [`Cursor::take`], which only
//! hands out a fixed-size array after checking that it lies inside the
//! buffer, so an out-of-bounds read cannot be expressed.

use crate::flow::FlowTuple;
use std::fmt;

/// Ethernet header length
pub const ETH_HDR_LEN: usize = 14;
/// Minimum IPv4 header length (IHL = 5)
pub const IPV4_MIN_HDR_LEN: usize = 20;
/// UDP header length
pub const UDP_HDR_LEN: usize = 8;
/// Minimum TCP header length (data offset = 5)
pub const TCP_MIN_HDR_LEN: usize = 20;

/// EtherType for IPv4
pub const ETHERTYPE_IPV4: u16 = 0x0800;
/// IP protocol number for TCP
pub const IPPROTO_TCP: u8 = 6;
/// IP protocol number for UDP
pub const IPPROTO_UDP: u8 = 17;

/// Header layer a parse step was reading
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Layer {
    /// Ethernet II header
    Ethernet,
    /// IPv4 header including options
    Ipv4,
    /// TCP or UDP header
    Transport,
}

impl fmt::Display for Layer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Layer::Ethernet => "ethernet",
            Layer::Ipv4 => "ipv4",
            Layer::Transport => "transport",
        })
    }
}

/// Parse failure. Both kinds end in a drop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    /// Buffer too short, or a length field that contradicts the layer
    #[error("malformed {0} header")]
    Malformed(Layer),

    /// Frame is not Ethernet/IPv4
    #[error("unsupported ethertype {0:#06x}")]
    UnsupportedEtherType(u16),

    /// IPv4 payload is neither TCP nor UDP
    #[error("unsupported ip protocol {0}")]
    UnsupportedProtocol(u8),
}

impl ParseError {
    /// Whether this failure is a bounds/shape violation rather than a filter miss
    pub fn is_malformed(&self) -> bool {
        matches!(self, ParseError::Malformed(_))
    }
}

/// Validated header set of an Ethernet/IPv4/TCP-or-UDP frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Headers {
    /// EtherType, always IPv4 on success
    pub ethertype: u16,
    /// IP protocol, TCP or UDP
    pub protocol: u8,
    /// Source address, host order
    pub ip_src: u32,
    /// Destination address, host order
    pub ip_dst: u32,
    /// Source port
    pub l4_src: u16,
    /// Destination port
    pub l4_dst: u16,
    /// Offset of the transport header from the start of the frame
    pub l4_offset: usize,
}

impl Headers {
    /// Directional 5-tuple of this frame
    #[inline(always)]
    pub fn tuple(&self) -> FlowTuple {
        FlowTuple {
            protocol: self.protocol,
            ip_src: self.ip_src,
            ip_dst: self.ip_dst,
            l4_src: self.l4_src,
            l4_dst: self.l4_dst,
        }
    }
}

/// Bounds-checked read cursor over a frame
struct Cursor<'a> {
    buf: &'a [u8],
    off: usize,
}

impl<'a> Cursor<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, off: 0 }
    }

    /// Consume the next `N` bytes, or fail with `Malformed(layer)`
    #[inline(always)]
    fn take<const N: usize>(&mut self, layer: Layer) -> Result<&'a [u8; N], ParseError> {
        let end = self.off.checked_add(N).ok_or(ParseError::Malformed(layer))?;
        let bytes = self
            .buf
            .get(self.off..end)
            .and_then(|s| <&[u8; N]>::try_from(s).ok())
            .ok_or(ParseError::Malformed(layer))?;
        self.off = end;
        Ok(bytes)
    }

    /// Skip `n` bytes that must still lie inside the buffer
    #[inline(always)]
    fn skip(&mut self, n: usize, layer: Layer) -> Result<(), ParseError> {
        let end = self.off.checked_add(n).ok_or(ParseError::Malformed(layer))?;
        if end > self.buf.len() {
            return Err(ParseError::Malformed(layer));
        }
        self.off = end;
        Ok(())
    }
}

#[inline(always)]
fn be16(b: [u8; 2]) -> u16 {
    u16::from_be_bytes(b)
}

#[inline(always)]
fn be32(b: [u8; 4]) -> u32 {
    u32::from_be_bytes(b)
}

/// Parse a frame down to its transport ports.
///
/// Each layer is a separate checked step; the first failure wins.
#[inline]
pub fn parse(frame: &[u8]) -> Result<Headers, ParseError> {
    let mut cur = Cursor::new(frame);

    let ethertype = parse_ethernet(&mut cur)?;
    if ethertype != ETHERTYPE_IPV4 {
        return Err(ParseError::UnsupportedEtherType(ethertype));
    }

    let (protocol, ip_src, ip_dst) = parse_ipv4(&mut cur)?;
    let l4_offset = cur.off;
    let (l4_src, l4_dst) = parse_transport(&mut cur, protocol)?;

    Ok(Headers {
        ethertype,
        protocol,
        ip_src,
        ip_dst,
        l4_src,
        l4_dst,
        l4_offset,
    })
}

fn parse_ethernet(cur: &mut Cursor<'_>) -> Result<u16, ParseError> {
    let eth: &[u8; ETH_HDR_LEN] = cur.take(Layer::Ethernet)?;
    Ok(be16([eth[12], eth[13]]))
}

fn parse_ipv4(cur: &mut Cursor<'_>) -> Result<(u8, u32, u32), ParseError> {
    let ip: &[u8; IPV4_MIN_HDR_LEN] = cur.take(Layer::Ipv4)?;

    if ip[0] >> 4 != 4 {
        return Err(ParseError::Malformed(Layer::Ipv4));
    }
    let ihl = ((ip[0] & 0x0F) as usize) * 4;
    if ihl < IPV4_MIN_HDR_LEN {
        return Err(ParseError::Malformed(Layer::Ipv4));
    }
    // Options
    cur.skip(ihl - IPV4_MIN_HDR_LEN, Layer::Ipv4)?;

    let protocol = ip[9];
    match protocol {
        IPPROTO_TCP | IPPROTO_UDP => {}
        other => return Err(ParseError::UnsupportedProtocol(other)),
    }

    let src = be32([ip[12], ip[13], ip[14], ip[15]]);
    let dst = be32([ip[16], ip[17], ip[18], ip[19]]);
    Ok((protocol, src, dst))
}

fn parse_transport(cur: &mut Cursor<'_>, protocol: u8) -> Result<(u16, u16), ParseError> {
    let ports = if protocol == IPPROTO_TCP {
        let tcp: &[u8; TCP_MIN_HDR_LEN] = cur.take(Layer::Transport)?;
        [tcp[0], tcp[1], tcp[2], tcp[3]]
    } else {
        let udp: &[u8; UDP_HDR_LEN] = cur.take(Layer::Transport)?;
        [udp[0], udp[1], udp[2], udp[3]]
    };
    Ok((be16([ports[0], ports[1]]), be16([ports[2], ports[3]])))
}
