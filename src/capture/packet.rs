//! Link, network and transport header parsing for captured frames.

use std::{
    net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr},
    time::SystemTime,
};

use bytes::Bytes;

use crate::{
    byte_order::{read_network_u16, read_network_u32},
    segment::{Segment, TcpFlags},
};

const ETHERTYPE_IPV4: u16 = 0x0800;
const ETHERTYPE_IPV6: u16 = 0x86dd;
const ETHERTYPE_VLAN: u16 = 0x8100;
const ETHERTYPE_QINQ: u16 = 0x88a8;
const IPPROTO_TCP: u8 = 6;

/// Link-layer header types understood by the parser.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LinkType {
    /// BSD loopback: a 4-byte address family in host order.
    Null,
    /// Ethernet II, with optional 802.1Q tags.
    Ethernet,
    /// Bare IPv4 or IPv6.
    Raw,
    /// Linux cooked capture.
    LinuxSll,
    /// Linux cooked capture v2.
    LinuxSll2,
}

impl LinkType {
    /// Map a libpcap `DLT_*` value.
    #[must_use]
    pub const fn from_datalink(value: i32) -> Option<Self> {
        match value {
            0 => Some(Self::Null),
            1 => Some(Self::Ethernet),
            // DLT_RAW differs between platforms; 101 is the file-format value.
            12 | 14 | 101 => Some(Self::Raw),
            113 => Some(Self::LinuxSll),
            276 => Some(Self::LinuxSll2),
            _ => None,
        }
    }
}

fn u16_at(data: &[u8], at: usize) -> Option<u16> {
    data.get(at..at + 2).map(|b| read_network_u16([b[0], b[1]]))
}

fn u32_at(data: &[u8], at: usize) -> Option<u32> {
    data.get(at..at + 4)
        .map(|b| read_network_u32([b[0], b[1], b[2], b[3]]))
}

/// Extract the TCP segment carried by one captured frame.
///
/// Returns `None` for anything that is not a complete, unfragmented TCP
/// segment over IPv4 or IPv6.
#[must_use]
pub fn parse_packet(link: LinkType, frame: &[u8], timestamp: SystemTime) -> Option<Segment> {
    let network = match link {
        LinkType::Null => {
            let family = frame.get(..4)?;
            // Written in the capturing host's byte order.
            match (family[0], family[3]) {
                (2, 0) | (0, 2) => (ETHERTYPE_IPV4, &frame[4..]),
                (24 | 28 | 30, 0) | (0, 24 | 28 | 30) => (ETHERTYPE_IPV6, &frame[4..]),
                _ => return None,
            }
        }
        LinkType::Ethernet => {
            let mut offset = 12;
            let mut ethertype = u16_at(frame, offset)?;
            while matches!(ethertype, ETHERTYPE_VLAN | ETHERTYPE_QINQ) {
                offset += 4;
                ethertype = u16_at(frame, offset)?;
            }
            (ethertype, frame.get(offset + 2..)?)
        }
        LinkType::Raw => match frame.first()? >> 4 {
            4 => (ETHERTYPE_IPV4, frame),
            6 => (ETHERTYPE_IPV6, frame),
            _ => return None,
        },
        LinkType::LinuxSll => (u16_at(frame, 14)?, frame.get(16..)?),
        LinkType::LinuxSll2 => (u16_at(frame, 0)?, frame.get(20..)?),
    };
    let (src, dst, tcp) = match network {
        (ETHERTYPE_IPV4, packet) => ipv4(packet)?,
        (ETHERTYPE_IPV6, packet) => ipv6(packet)?,
        _ => return None,
    };
    tcp_segment(src, dst, tcp, timestamp)
}

fn ipv4(packet: &[u8]) -> Option<(IpAddr, IpAddr, &[u8])> {
    let header_len = usize::from(packet.first()? & 0x0f) * 4;
    let total_len = usize::from(u16_at(packet, 2)?);
    let fragment = u16_at(packet, 6)?;
    // More-fragments set or a non-zero offset.
    if fragment & 0x3fff != 0 || *packet.get(9)? != IPPROTO_TCP || header_len < 20 {
        return None;
    }
    let src = Ipv4Addr::from(u32_at(packet, 12)?);
    let dst = Ipv4Addr::from(u32_at(packet, 16)?);
    // Ethernet pads short frames; trust the IP length over the capture.
    let end = total_len.min(packet.len());
    Some((src.into(), dst.into(), packet.get(header_len..end)?))
}

fn ipv6(packet: &[u8]) -> Option<(IpAddr, IpAddr, &[u8])> {
    if *packet.get(6)? != IPPROTO_TCP {
        return None;
    }
    let payload_len = usize::from(u16_at(packet, 4)?);
    let addr = |at: usize| -> Option<Ipv6Addr> {
        let bytes: [u8; 16] = packet.get(at..at + 16)?.try_into().ok()?;
        Some(Ipv6Addr::from(bytes))
    };
    let src = addr(8)?;
    let dst = addr(24)?;
    let end = (40 + payload_len).min(packet.len());
    Some((src.into(), dst.into(), packet.get(40..end)?))
}

fn tcp_segment(src: IpAddr, dst: IpAddr, tcp: &[u8], timestamp: SystemTime) -> Option<Segment> {
    let src_port = u16_at(tcp, 0)?;
    let dst_port = u16_at(tcp, 2)?;
    let seq = u32_at(tcp, 4)?;
    let data_offset = usize::from(tcp.get(12)? >> 4) * 4;
    let flags = TcpFlags::from_bits(*tcp.get(13)?);
    let payload = tcp.get(data_offset..)?;
    Some(
        Segment::new(
            SocketAddr::new(src, src_port),
            SocketAddr::new(dst, dst_port),
            Bytes::copy_from_slice(payload),
            timestamp,
        )
        .with_seq(seq)
        .with_flags(flags),
    )
}

#[cfg(test)]
pub(crate) mod tests {
    use std::time::SystemTime;

    use rstest::rstest;

    use super::{LinkType, parse_packet};

    /// An Ethernet/IPv4/TCP frame from 10.0.0.1:50000 to 10.0.0.2:2379.
    pub(crate) fn ethernet_frame(seq: u32, flags: u8, payload: &[u8]) -> Vec<u8> {
        let mut frame = vec![0; 12];
        frame.extend_from_slice(&[0x08, 0x00]);
        frame.extend_from_slice(&ipv4_packet(seq, flags, payload));
        frame
    }

    pub(crate) fn ipv4_packet(seq: u32, flags: u8, payload: &[u8]) -> Vec<u8> {
        let total = u16::try_from(40 + payload.len()).expect("small payload");
        let mut packet = vec![0x45, 0];
        packet.extend_from_slice(&total.to_be_bytes());
        packet.extend_from_slice(&[0, 0, 0x40, 0, 64, 6, 0, 0]);
        packet.extend_from_slice(&[10, 0, 0, 1, 10, 0, 0, 2]);
        packet.extend_from_slice(&50_000_u16.to_be_bytes());
        packet.extend_from_slice(&2379_u16.to_be_bytes());
        packet.extend_from_slice(&seq.to_be_bytes());
        packet.extend_from_slice(&[0, 0, 0, 0, 0x50, flags, 0xff, 0xff, 0, 0, 0, 0]);
        packet.extend_from_slice(payload);
        packet
    }

    #[test]
    fn ethernet_ipv4_tcp_is_parsed() {
        let frame = ethernet_frame(1000, 0x18, b"hello");
        let segment = parse_packet(LinkType::Ethernet, &frame, SystemTime::UNIX_EPOCH).expect("tcp segment");
        assert_eq!(segment.src.to_string(), "10.0.0.1:50000");
        assert_eq!(segment.dst.to_string(), "10.0.0.2:2379");
        assert_eq!(segment.seq, Some(1000));
        assert!(segment.flags.ack);
        assert_eq!(segment.payload.as_ref(), b"hello");
    }

    #[test]
    fn ethernet_padding_is_trimmed() {
        let mut frame = ethernet_frame(1, 0x10, b"");
        frame.extend_from_slice(&[0; 6]);
        let segment = parse_packet(LinkType::Ethernet, &frame, SystemTime::UNIX_EPOCH).expect("tcp segment");
        assert!(segment.payload.is_empty());
    }

    #[test]
    fn vlan_tags_are_skipped() {
        let mut frame = vec![0; 12];
        frame.extend_from_slice(&[0x81, 0x00, 0x00, 0x05, 0x08, 0x00]);
        frame.extend_from_slice(&ipv4_packet(7, 0x02, b""));
        let segment = parse_packet(LinkType::Ethernet, &frame, SystemTime::UNIX_EPOCH).expect("tcp segment");
        assert!(segment.flags.syn);
    }

    #[test]
    fn raw_ipv6_is_parsed() {
        let tcp = {
            let mut tcp = Vec::new();
            tcp.extend_from_slice(&443_u16.to_be_bytes());
            tcp.extend_from_slice(&50_001_u16.to_be_bytes());
            tcp.extend_from_slice(&9_u32.to_be_bytes());
            tcp.extend_from_slice(&[0, 0, 0, 0, 0x50, 0x11, 0, 0, 0, 0, 0, 0]);
            tcp
        };
        let mut packet = vec![0x60, 0, 0, 0];
        packet.extend_from_slice(&u16::try_from(tcp.len()).expect("small").to_be_bytes());
        packet.extend_from_slice(&[6, 64]);
        let mut src = [0; 16];
        src[15] = 1;
        packet.extend_from_slice(&src);
        packet.extend_from_slice(&src);
        packet.extend_from_slice(&tcp);
        let segment = parse_packet(LinkType::Raw, &packet, SystemTime::UNIX_EPOCH).expect("tcp segment");
        assert_eq!(segment.src.to_string(), "[::1]:443");
        assert!(segment.flags.fin);
    }

    #[rstest]
    #[case::fragment(0x20)]
    #[case::udp(0xff)]
    fn non_tcp_or_fragmented_is_skipped(#[case] marker: u8) {
        let mut packet = ipv4_packet(1, 0x10, b"x");
        if marker == 0x20 {
            packet[6] = 0x20;
        } else {
            packet[9] = 17;
        }
        assert!(parse_packet(LinkType::Raw, &packet, SystemTime::UNIX_EPOCH).is_none());
    }

    #[test]
    fn truncated_frames_are_skipped() {
        let frame = ethernet_frame(1, 0x10, b"");
        assert!(parse_packet(LinkType::Ethernet, &frame[..30], SystemTime::UNIX_EPOCH).is_none());
    }
}
