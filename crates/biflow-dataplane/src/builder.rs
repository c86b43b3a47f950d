//! Frame builder
//!
//! Assembles Ethernet/IPv4/TCP-or-UDP frames for tests, benches and the
//! agent's traffic replay. Fields the forwarder never reads are left zero.

use crate::parser::{
    ETHERTYPE_IPV4, ETH_HDR_LEN, IPPROTO_TCP, IPPROTO_UDP, IPV4_MIN_HDR_LEN, TCP_MIN_HDR_LEN,
    UDP_HDR_LEN,
};
use std::net::Ipv4Addr;

/// Builder for a single frame
#[derive(Debug, Clone)]
pub struct FrameBuilder {
    src_mac: [u8; 6],
    dst_mac: [u8; 6],
    ethertype: u16,
    protocol: u8,
    ttl: u8,
    ip_src: Ipv4Addr,
    ip_dst: Ipv4Addr,
    ip_options: Vec<u8>,
    l4_src: u16,
    l4_dst: u16,
    payload: Vec<u8>,
}

impl FrameBuilder {
    fn new(protocol: u8, ip_src: Ipv4Addr, l4_src: u16, ip_dst: Ipv4Addr, l4_dst: u16) -> Self {
        Self {
            src_mac: [0x02, 0, 0, 0, 0, 0x01],
            dst_mac: [0x02, 0, 0, 0, 0, 0x02],
            ethertype: ETHERTYPE_IPV4,
            protocol,
            ttl: 64,
            ip_src,
            ip_dst,
            ip_options: Vec::new(),
            l4_src,
            l4_dst,
            payload: Vec::new(),
        }
    }

    /// UDP datagram `src:sport -> dst:dport`
    pub fn udp(src: Ipv4Addr, sport: u16, dst: Ipv4Addr, dport: u16) -> Self {
        Self::new(IPPROTO_UDP, src, sport, dst, dport)
    }

    /// TCP segment `src:sport -> dst:dport`
    pub fn tcp(src: Ipv4Addr, sport: u16, dst: Ipv4Addr, dport: u16) -> Self {
        Self::new(IPPROTO_TCP, src, sport, dst, dport)
    }

    /// Override the EtherType
    pub fn ethertype(mut self, ethertype: u16) -> Self {
        self.ethertype = ethertype;
        self
    }

    /// Override the IP protocol number. The transport header is still laid
    /// out as UDP unless the protocol is TCP.
    pub fn protocol(mut self, protocol: u8) -> Self {
        self.protocol = protocol;
        self
    }

    /// Append IPv4 options. Padded to a 4-byte boundary.
    pub fn ip_options(mut self, options: &[u8]) -> Self {
        self.ip_options = options.to_vec();
        while self.ip_options.len() % 4 != 0 {
            self.ip_options.push(0);
        }
        self
    }

    /// Set payload
    pub fn payload(mut self, payload: &[u8]) -> Self {
        self.payload = payload.to_vec();
        self
    }

    /// Pad payload with a repeating pattern until the frame is `size` bytes
    pub fn frame_size(mut self, size: usize, pattern: &[u8]) -> Self {
        let headers = ETH_HDR_LEN + IPV4_MIN_HDR_LEN + self.ip_options.len() + self.l4_len();
        let want = size.saturating_sub(headers);
        self.payload = if pattern.is_empty() {
            vec![0; want]
        } else {
            pattern.iter().copied().cycle().take(want).collect()
        };
        self
    }

    fn l4_len(&self) -> usize {
        if self.protocol == IPPROTO_TCP {
            TCP_MIN_HDR_LEN
        } else {
            UDP_HDR_LEN
        }
    }

    /// Serialize the frame
    pub fn build(&self) -> Vec<u8> {
        let ip_hdr_len = IPV4_MIN_HDR_LEN + self.ip_options.len();
        let l4_len = self.l4_len();
        let ip_total = ip_hdr_len + l4_len + self.payload.len();

        let mut frame = Vec::with_capacity(ETH_HDR_LEN + ip_total);

        // Ethernet
        frame.extend_from_slice(&self.dst_mac);
        frame.extend_from_slice(&self.src_mac);
        frame.extend_from_slice(&self.ethertype.to_be_bytes());

        // IPv4
        let ip_start = frame.len();
        frame.push(0x40 | (ip_hdr_len / 4) as u8);
        frame.push(0); // TOS
        frame.extend_from_slice(&(ip_total.min(u16::MAX as usize) as u16).to_be_bytes());
        frame.extend_from_slice(&[0, 0, 0x40, 0]); // id, DF
        frame.push(self.ttl);
        frame.push(self.protocol);
        frame.extend_from_slice(&[0, 0]); // checksum
        frame.extend_from_slice(&self.ip_src.octets());
        frame.extend_from_slice(&self.ip_dst.octets());
        frame.extend_from_slice(&self.ip_options);
        let csum = ipv4_checksum(&frame[ip_start..ip_start + ip_hdr_len]);
        frame[ip_start + 10..ip_start + 12].copy_from_slice(&csum.to_be_bytes());

        // Transport
        frame.extend_from_slice(&self.l4_src.to_be_bytes());
        frame.extend_from_slice(&self.l4_dst.to_be_bytes());
        if self.protocol == IPPROTO_TCP {
            frame.extend_from_slice(&[0; 8]); // seq, ack
            frame.push(0x50); // data offset 5
            frame.push(0x02); // SYN
            frame.extend_from_slice(&[0xFF, 0xFF, 0, 0, 0, 0]); // window, csum, urg
        } else {
            let udp_len = (UDP_HDR_LEN + self.payload.len()).min(u16::MAX as usize) as u16;
            frame.extend_from_slice(&udp_len.to_be_bytes());
            frame.extend_from_slice(&[0, 0]); // checksum optional over IPv4
        }

        frame.extend_from_slice(&self.payload);
        frame
    }
}

/// RFC 1071 one's-complement checksum over an IPv4 header
pub fn ipv4_checksum(header: &[u8]) -> u16 {
    let mut sum: u32 = 0;
    for chunk in header.chunks(2) {
        let word = match chunk {
            [hi, lo] => u16::from_be_bytes([*hi, *lo]),
            [hi] => u16::from_be_bytes([*hi, 0]),
            _ => 0,
        };
        sum += word as u32;
    }
    while sum >> 16 != 0 {
        sum = (sum & 0xFFFF) + (sum >> 16);
    }
    !(sum as u16)
}
