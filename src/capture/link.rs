//! Link-layer decoding
//!
//! Turns the raw bytes of one captured frame into a [`CaptureRecord`].
//! Ethernet and raw IP go straight to etherparse; Linux cooked capture,
//! IEEE 802.11 and radiotap headers are stripped here first, since ns-3
//! wifi traces are written with 802.11 link types.

use std::net::IpAddr;

use etherparse::{NetSlice, SlicedPacket, TransportSlice};
use pcap_file::DataLink;

use super::record::{
    CaptureRecord, IpRecord, MalformedRecord, NonIpRecord, Ports, TransportProtocol,
};

const ETHERTYPE_IPV4: u16 = 0x0800;
const ETHERTYPE_ARP: u16 = 0x0806;
const ETHERTYPE_IPV6: u16 = 0x86DD;

const SLL_HEADER_LEN: usize = 16;
const DOT11_HEADER_LEN: usize = 24;
const LLC_SNAP_LEN: usize = 8;

/// Link types the reader knows how to decode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkType {
    Ethernet,
    RawIp,
    LinuxSll,
    Ieee80211,
    Radiotap,
    Unsupported(u32),
}

impl From<DataLink> for LinkType {
    fn from(link: DataLink) -> Self {
        match link {
            DataLink::ETHERNET => LinkType::Ethernet,
            DataLink::RAW | DataLink::IPV4 | DataLink::IPV6 => LinkType::RawIp,
            DataLink::LINUX_SLL => LinkType::LinuxSll,
            DataLink::IEEE802_11 => LinkType::Ieee80211,
            DataLink::IEEE802_11_RADIOTAP => LinkType::Radiotap,
            other => LinkType::Unsupported(u32::from(other)),
        }
    }
}

/// Result of peeling the link header off a frame
enum LinkPayload<'a> {
    Ethernet(&'a [u8]),
    Ip(&'a [u8]),
    NonIp(&'static str),
}

/// Decode one frame into a record
///
/// `length` is the original wire length reported by the capture, which may
/// exceed `data.len()` when the capture used a snap length.
pub fn decode_frame(link: LinkType, index: u64, length: u32, data: &[u8]) -> CaptureRecord {
    let payload = match strip_link(link, data) {
        Ok(payload) => payload,
        Err(reason) => return malformed(index, reason),
    };

    let sliced = match payload {
        LinkPayload::NonIp(layer) => {
            return CaptureRecord::NonIp(NonIpRecord {
                index,
                length,
                highest_layer: layer.to_string(),
            })
        }
        LinkPayload::Ethernet(bytes) => SlicedPacket::from_ethernet(bytes),
        LinkPayload::Ip(bytes) => SlicedPacket::from_ip(bytes),
    };

    match sliced {
        Ok(sliced) => record_from_sliced(index, length, &sliced),
        Err(e) => malformed(index, e.to_string()),
    }
}

fn malformed(index: u64, reason: impl Into<String>) -> CaptureRecord {
    CaptureRecord::Malformed(MalformedRecord {
        index,
        reason: reason.into(),
    })
}

fn strip_link(link: LinkType, data: &[u8]) -> Result<LinkPayload<'_>, String> {
    match link {
        LinkType::Ethernet => Ok(LinkPayload::Ethernet(data)),
        LinkType::RawIp => Ok(LinkPayload::Ip(data)),
        LinkType::LinuxSll => strip_linux_sll(data),
        LinkType::Ieee80211 => strip_ieee80211(data),
        LinkType::Radiotap => strip_radiotap(data),
        LinkType::Unsupported(_) => Ok(LinkPayload::NonIp("UNKNOWN")),
    }
}

fn ethertype_payload(ethertype: u16, rest: &[u8]) -> LinkPayload<'_> {
    match ethertype {
        ETHERTYPE_IPV4 | ETHERTYPE_IPV6 => LinkPayload::Ip(rest),
        ETHERTYPE_ARP => LinkPayload::NonIp("ARP"),
        _ => LinkPayload::NonIp("ETH"),
    }
}

fn strip_linux_sll(data: &[u8]) -> Result<LinkPayload<'_>, String> {
    if data.len() < SLL_HEADER_LEN {
        return Err(format!("linux sll header truncated ({} bytes)", data.len()));
    }
    let ethertype = u16::from_be_bytes([data[14], data[15]]);
    Ok(ethertype_payload(ethertype, &data[SLL_HEADER_LEN..]))
}

fn strip_radiotap(data: &[u8]) -> Result<LinkPayload<'_>, String> {
    if data.len() < 4 {
        return Err("radiotap header truncated".to_string());
    }
    let header_len = u16::from_le_bytes([data[2], data[3]]) as usize;
    if header_len < 4 || header_len > data.len() {
        return Err(format!("radiotap length {} out of range", header_len));
    }
    strip_ieee80211(&data[header_len..])
}

fn strip_ieee80211(data: &[u8]) -> Result<LinkPayload<'_>, String> {
    if data.len() < 2 {
        return Err("802.11 frame control truncated".to_string());
    }
    let fc0 = data[0];
    let fc1 = data[1];
    let frame_type = (fc0 >> 2) & 0b11;
    let subtype = (fc0 >> 4) & 0b1111;

    match frame_type {
        0 => return Ok(LinkPayload::NonIp("WLAN_MGT")),
        1 => return Ok(LinkPayload::NonIp("WLAN")),
        2 => {}
        _ => return Err("reserved 802.11 frame type".to_string()),
    }

    // Null-function subtypes carry no body
    if subtype & 0b0100 != 0 {
        return Ok(LinkPayload::NonIp("WLAN"));
    }
    // Protected frames cannot be looked into
    if fc1 & 0x40 != 0 {
        return Ok(LinkPayload::NonIp("WLAN"));
    }

    let mut header_len = DOT11_HEADER_LEN;
    if fc1 & 0b11 == 0b11 {
        header_len += 6;
    }
    if subtype & 0b1000 != 0 {
        header_len += 2;
        if fc1 & 0x80 != 0 {
            header_len += 4;
        }
    }

    if data.len() < header_len + LLC_SNAP_LEN {
        return Err(format!(
            "802.11 data frame truncated ({} bytes, header {})",
            data.len(),
            header_len
        ));
    }

    let body = &data[header_len..];
    if body[0] != 0xAA || body[1] != 0xAA || body[2] != 0x03 {
        return Ok(LinkPayload::NonIp("LLC"));
    }
    let ethertype = u16::from_be_bytes([body[6], body[7]]);
    Ok(ethertype_payload(ethertype, &body[LLC_SNAP_LEN..]))
}

fn record_from_sliced(index: u64, length: u32, sliced: &SlicedPacket<'_>) -> CaptureRecord {
    let (ttl, ip_proto, src_addr, dst_addr, ip_layer) = match &sliced.net {
        Some(NetSlice::Ipv4(ipv4)) => {
            let header = ipv4.header();
            (
                header.ttl(),
                header.protocol().0,
                IpAddr::V4(header.source_addr()),
                IpAddr::V4(header.destination_addr()),
                "IP",
            )
        }
        Some(NetSlice::Ipv6(ipv6)) => {
            let header = ipv6.header();
            (
                header.hop_limit(),
                ipv6.payload().ip_number.0,
                IpAddr::V6(header.source_addr()),
                IpAddr::V6(header.destination_addr()),
                "IPV6",
            )
        }
        _ => {
            return CaptureRecord::NonIp(NonIpRecord {
                index,
                length,
                highest_layer: non_ip_layer_name(sliced).to_string(),
            })
        }
    };

    let (transport, ports, highest_layer) = match &sliced.transport {
        Some(TransportSlice::Tcp(tcp)) => (
            TransportProtocol::Tcp,
            Some(Ports {
                src: tcp.source_port(),
                dst: tcp.destination_port(),
            }),
            "TCP",
        ),
        Some(TransportSlice::Udp(udp)) => (
            TransportProtocol::Udp,
            Some(Ports {
                src: udp.source_port(),
                dst: udp.destination_port(),
            }),
            "UDP",
        ),
        Some(TransportSlice::Icmpv4(_)) => (TransportProtocol::Other, None, "ICMP"),
        Some(TransportSlice::Icmpv6(_)) => (TransportProtocol::Other, None, "ICMPV6"),
        _ => (TransportProtocol::Other, None, ip_layer),
    };

    CaptureRecord::Ip(IpRecord {
        index,
        length,
        ttl,
        ip_proto,
        src_addr,
        dst_addr,
        transport,
        ports,
        highest_layer: highest_layer.to_string(),
    })
}

fn non_ip_layer_name(sliced: &SlicedPacket<'_>) -> &'static str {
    match &sliced.link {
        Some(etherparse::LinkSlice::Ethernet2(eth)) if eth.ether_type().0 == ETHERTYPE_ARP => "ARP",
        Some(_) => "ETH",
        None => "UNKNOWN",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use etherparse::PacketBuilder;

    fn tcp_ipv4_frame() -> Vec<u8> {
        let builder = PacketBuilder::ethernet2([1, 2, 3, 4, 5, 6], [6, 5, 4, 3, 2, 1])
            .ipv4([10, 0, 0, 1], [10, 0, 0, 2], 64)
            .tcp(40000, 80, 1, 1024);
        let payload = [0u8; 6];
        let mut frame = Vec::with_capacity(builder.size(payload.len()));
        builder.write(&mut frame, &payload).unwrap();
        frame
    }

    fn udp_ip_packet() -> Vec<u8> {
        let builder = PacketBuilder::ipv4([10, 1, 1, 2], [192, 168, 1, 1], 32).udp(49153, 9);
        let payload = [0u8; 12];
        let mut packet = Vec::with_capacity(builder.size(payload.len()));
        builder.write(&mut packet, &payload).unwrap();
        packet
    }

    #[test]
    fn test_decode_ethernet_tcp() {
        let frame = tcp_ipv4_frame();
        assert_eq!(frame.len(), 60);
        let record = decode_frame(LinkType::Ethernet, 0, frame.len() as u32, &frame);
        assert_eq!(record.length(), Some(60));
        assert_eq!(record.ttl(), Some(64));
        assert_eq!(record.ip_proto(), Some(6));
        assert_eq!(record.transport(), TransportProtocol::Tcp);
        assert_eq!(record.src_port(), Some(40000));
        assert_eq!(record.dst_port(), Some(80));
        assert_eq!(record.highest_layer(), Some("TCP"));
    }

    #[test]
    fn test_decode_raw_ip_udp() {
        let packet = udp_ip_packet();
        let record = decode_frame(LinkType::RawIp, 1, packet.len() as u32, &packet);
        assert_eq!(record.transport(), TransportProtocol::Udp);
        assert_eq!(record.dst_port(), Some(9));
        assert_eq!(record.src_addr(), Some("10.1.1.2".parse().unwrap()));
    }

    #[test]
    fn test_decode_ieee80211_qos_data() {
        // QoS data frame: fc0 = type 2, subtype 8
        let mut frame = vec![0x88, 0x00];
        frame.extend_from_slice(&[0u8; 22]); // rest of the 24-byte header
        frame.extend_from_slice(&[0u8; 2]); // QoS control
        frame.extend_from_slice(&[0xAA, 0xAA, 0x03, 0x00, 0x00, 0x00, 0x08, 0x00]);
        frame.extend_from_slice(&udp_ip_packet());

        let record = decode_frame(LinkType::Ieee80211, 2, frame.len() as u32, &frame);
        assert_eq!(record.transport(), TransportProtocol::Udp);
        assert_eq!(record.ttl(), Some(32));
    }

    #[test]
    fn test_decode_radiotap_wraps_80211() {
        let mut frame = vec![0x00, 0x00, 0x08, 0x00, 0x00, 0x00, 0x00, 0x00];
        frame.extend_from_slice(&[0x08, 0x00]); // plain data frame
        frame.extend_from_slice(&[0u8; 22]);
        frame.extend_from_slice(&[0xAA, 0xAA, 0x03, 0x00, 0x00, 0x00, 0x08, 0x00]);
        frame.extend_from_slice(&udp_ip_packet());

        let record = decode_frame(LinkType::Radiotap, 0, frame.len() as u32, &frame);
        assert_eq!(record.dst_port(), Some(9));
    }

    #[test]
    fn test_management_frame_is_non_ip() {
        let frame = [0x80u8, 0x00, 0x00, 0x00];
        let record = decode_frame(LinkType::Ieee80211, 0, 4, &frame);
        assert_eq!(record.highest_layer(), Some("WLAN_MGT"));
        assert!(record.src_addr().is_none());
    }

    #[test]
    fn test_truncated_frame_is_malformed() {
        let frame = tcp_ipv4_frame();
        let record = decode_frame(LinkType::Ethernet, 5, 60, &frame[..20]);
        assert!(record.is_malformed());
        assert_eq!(record.index(), 5);
    }

    #[test]
    fn test_unsupported_link_is_non_ip() {
        let record = decode_frame(LinkType::Unsupported(147), 0, 10, &[0u8; 10]);
        assert_eq!(record.highest_layer(), Some("UNKNOWN"));
    }

    /// Linux cooked header: packet type, ARPHRD, address length, address, protocol
    fn sll_header(protocol: u16) -> Vec<u8> {
        let mut header = vec![0x00, 0x00, 0x00, 0x01, 0x00, 0x06];
        header.extend_from_slice(&[0x02, 0x00, 0x00, 0x00, 0x00, 0x01, 0x00, 0x00]);
        header.extend_from_slice(&protocol.to_be_bytes());
        header
    }

    #[test]
    fn test_decode_linux_sll_ipv4() {
        let mut frame = sll_header(ETHERTYPE_IPV4);
        assert_eq!(frame.len(), SLL_HEADER_LEN);
        frame.extend_from_slice(&udp_ip_packet());

        let record = decode_frame(LinkType::LinuxSll, 3, frame.len() as u32, &frame);
        assert_eq!(record.index(), 3);
        assert_eq!(record.length(), Some(frame.len() as u32));
        assert_eq!(record.ttl(), Some(32));
        assert_eq!(record.transport(), TransportProtocol::Udp);
        assert_eq!(record.src_port(), Some(49153));
        assert_eq!(record.dst_addr(), Some("192.168.1.1".parse().unwrap()));
    }

    #[test]
    fn test_decode_linux_sll_arp_is_non_ip() {
        let mut frame = sll_header(ETHERTYPE_ARP);
        frame.extend_from_slice(&[0u8; 28]);
        let record = decode_frame(LinkType::LinuxSll, 0, frame.len() as u32, &frame);
        assert_eq!(record.highest_layer(), Some("ARP"));
        assert!(record.ttl().is_none());
    }

    #[test]
    fn test_decode_linux_sll_truncated_header() {
        let record = decode_frame(LinkType::LinuxSll, 0, 10, &sll_header(ETHERTYPE_IPV4)[..10]);
        assert!(record.is_malformed());
    }

    #[test]
    fn test_linux_sll_link_type_mapping() {
        assert_eq!(LinkType::from(DataLink::LINUX_SLL), LinkType::LinuxSll);
    }
}
