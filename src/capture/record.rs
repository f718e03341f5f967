//! Capture record types
//!
//! A record is one packet as seen by the reader. Field accessors are total:
//! they return `None` when the layer carrying the field is absent instead of
//! failing.

use std::fmt;
use std::net::IpAddr;

use serde::{Deserialize, Serialize};

/// Transport protocol carried by an IP record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TransportProtocol {
    Tcp,
    Udp,
    Other,
}

impl fmt::Display for TransportProtocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportProtocol::Tcp => write!(f, "TCP"),
            TransportProtocol::Udp => write!(f, "UDP"),
            TransportProtocol::Other => write!(f, "OTHER"),
        }
    }
}

/// TCP or UDP port pair
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ports {
    pub src: u16,
    pub dst: u16,
}

/// Packet with an IPv4 or IPv6 layer
#[derive(Debug, Clone, PartialEq)]
pub struct IpRecord {
    pub index: u64,
    /// Original frame length on the wire
    pub length: u32,
    /// TTL for IPv4, hop limit for IPv6
    pub ttl: u8,
    /// IP protocol number (IPv4) or payload next header (IPv6)
    pub ip_proto: u8,
    pub src_addr: IpAddr,
    pub dst_addr: IpAddr,
    pub transport: TransportProtocol,
    /// Ports, only for TCP and UDP
    pub ports: Option<Ports>,
    pub highest_layer: String,
}

/// Frame without an IP layer (ARP, management frames, unknown link types)
#[derive(Debug, Clone, PartialEq)]
pub struct NonIpRecord {
    pub index: u64,
    pub length: u32,
    pub highest_layer: String,
}

/// Frame that could not be decoded
#[derive(Debug, Clone, PartialEq)]
pub struct MalformedRecord {
    pub index: u64,
    pub reason: String,
}

/// One packet read from a capture source
#[derive(Debug, Clone, PartialEq)]
pub enum CaptureRecord {
    Ip(IpRecord),
    NonIp(NonIpRecord),
    Malformed(MalformedRecord),
}

impl CaptureRecord {
    /// Position of the record in the capture (0-based)
    pub fn index(&self) -> u64 {
        match self {
            CaptureRecord::Ip(r) => r.index,
            CaptureRecord::NonIp(r) => r.index,
            CaptureRecord::Malformed(r) => r.index,
        }
    }

    pub fn length(&self) -> Option<u32> {
        match self {
            CaptureRecord::Ip(r) => Some(r.length),
            CaptureRecord::NonIp(r) => Some(r.length),
            CaptureRecord::Malformed(_) => None,
        }
    }

    pub fn transport(&self) -> TransportProtocol {
        match self {
            CaptureRecord::Ip(r) => r.transport,
            _ => TransportProtocol::Other,
        }
    }

    pub fn ttl(&self) -> Option<u8> {
        self.as_ip().map(|r| r.ttl)
    }

    pub fn ip_proto(&self) -> Option<u8> {
        self.as_ip().map(|r| r.ip_proto)
    }

    pub fn src_addr(&self) -> Option<IpAddr> {
        self.as_ip().map(|r| r.src_addr)
    }

    pub fn dst_addr(&self) -> Option<IpAddr> {
        self.as_ip().map(|r| r.dst_addr)
    }

    pub fn src_port(&self) -> Option<u16> {
        self.as_ip().and_then(|r| r.ports).map(|p| p.src)
    }

    pub fn dst_port(&self) -> Option<u16> {
        self.as_ip().and_then(|r| r.ports).map(|p| p.dst)
    }

    /// Name of the highest decoded layer, e.g. "TCP", "ARP", "WLAN"
    pub fn highest_layer(&self) -> Option<&str> {
        match self {
            CaptureRecord::Ip(r) => Some(&r.highest_layer),
            CaptureRecord::NonIp(r) => Some(&r.highest_layer),
            CaptureRecord::Malformed(_) => None,
        }
    }

    pub fn is_malformed(&self) -> bool {
        matches!(self, CaptureRecord::Malformed(_))
    }

    fn as_ip(&self) -> Option<&IpRecord> {
        match self {
            CaptureRecord::Ip(r) => Some(r),
            _ => None,
        }
    }
}
