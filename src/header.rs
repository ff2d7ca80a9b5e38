//! Header classifier (spec section 4.7 step 1, sections 4.5/4.6 static and
//! dynamic chains).
//!
//! Parses a raw uncompressed packet into the typed field sets the rest of
//! the crate needs, split the way RFC 3095 splits them: a static part that
//! never changes for the life of a flow, and a dynamic part that changes
//! slowly and is tracked by the generic engine's change detection. Parsing
//! itself is delegated to the `etherparse` crate rather than hand-rolled,
//! the same way this pack's `JulianSchmid-etherparse` example parses IP/UDP
//! headers -- there is no reason to re-derive IHL/version/checksum bit
//! layouts this crate doesn't own.

use etherparse::{NetHeaders, PacketHeaders, TransportHeader};

use crate::error::{Error, Result};

/// The flow-identifying 4/5-tuple used to match an incoming packet against
/// an existing context (spec section 4.7 step 2).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FlowKey {
    pub ip_version: u8,
    pub protocol: u8,
    pub source: IpAddrBytes,
    pub destination: IpAddrBytes,
    /// `None` unless the next header is UDP (IP-only profile flows carry no
    /// ports, so this stays `None` for them).
    pub ports: Option<(u16, u16)>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IpAddrBytes {
    V4([u8; 4]),
    V6([u8; 16]),
}

/// Static IP fields (spec section 4.5 "Static chain").
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IpStatic {
    pub version: u8,
    pub protocol: u8,
    pub source: IpAddrBytes,
    pub destination: IpAddrBytes,
    /// IPv6 only.
    pub flow_label: u32,
}

/// Dynamic IP fields (spec section 4.5 "Dynamic chain").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IpDynamic {
    pub tos_tc: u8,
    pub ttl_hl: u8,
    /// IPv4 only.
    pub identification: u16,
    /// IPv4 only.
    pub dont_fragment: bool,
}

/// Static UDP fields (spec section 4.6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UdpStatic {
    pub source_port: u16,
    pub destination_port: u16,
}

/// Dynamic UDP fields (spec section 4.6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UdpDynamic {
    pub checksum: u16,
}

/// The outcome of classifying one raw packet.
pub struct Classified<'a> {
    pub flow: FlowKey,
    pub ip_static: IpStatic,
    pub ip_dynamic: IpDynamic,
    pub udp: Option<(UdpStatic, UdpDynamic)>,
    /// Number of header bytes consumed (IP [+ UDP]); the caller copies
    /// everything from this offset onward as payload.
    pub header_len: usize,
    pub payload: &'a [u8],
}

/// Parse `packet` (starting at the IP header, per spec section 6.1's
/// `compress(comp, ip_bytes, ...)`) into its classified fields.
///
/// Returns `Error::Unsupported` for anything that isn't a well-formed IPv4
/// or IPv6 packet; per spec section 7 this is never surfaced to the
/// compressor's caller as an error -- the context table catches it and
/// falls back to the Uncompressed profile, which never needs to classify
/// fields at all.
pub fn classify(packet: &[u8]) -> Result<Classified<'_>> {
    let parsed = PacketHeaders::from_ip_slice(packet).map_err(|_| Error::Unsupported)?;
    let net = parsed.net.ok_or(Error::Unsupported)?;

    let (ip_static, ip_dynamic, ip_header_len) = match &net {
        NetHeaders::Ipv4(header, _ext) => (
            IpStatic {
                version: 4,
                protocol: header.protocol.0,
                source: IpAddrBytes::V4(header.source),
                destination: IpAddrBytes::V4(header.destination),
                flow_label: 0,
            },
            IpDynamic {
                tos_tc: (header.dscp.value() << 2) | header.ecn.value(),
                ttl_hl: header.time_to_live,
                identification: header.identification,
                dont_fragment: header.dont_fragment,
            },
            header.header_len(),
        ),
        NetHeaders::Ipv6(header, _ext) => (
            IpStatic {
                version: 6,
                protocol: header.next_header.0,
                source: IpAddrBytes::V6(header.source),
                destination: IpAddrBytes::V6(header.destination),
                flow_label: header.flow_label.value(),
            },
            IpDynamic {
                tos_tc: header.traffic_class,
                ttl_hl: header.hop_limit,
                identification: 0,
                dont_fragment: false,
            },
            etherparse::Ipv6Header::LEN,
        ),
    };

    let (udp, ports, udp_len) = match parsed.transport {
        Some(TransportHeader::Udp(udp)) => (
            Some((
                UdpStatic {
                    source_port: udp.source_port,
                    destination_port: udp.destination_port,
                },
                UdpDynamic {
                    checksum: udp.checksum,
                },
            )),
            Some((udp.source_port, udp.destination_port)),
            etherparse::UdpHeader::LEN,
        ),
        _ => (None, None, 0),
    };

    let flow = FlowKey {
        ip_version: ip_static.version,
        protocol: ip_static.protocol,
        source: ip_static.source,
        destination: ip_static.destination,
        ports,
    };

    Ok(Classified {
        flow,
        ip_static,
        ip_dynamic,
        udp,
        header_len: ip_header_len + udp_len,
        payload: parsed.payload.slice(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn build_udp_packet(id: u16, checksum_override: Option<u16>) -> Vec<u8> {
        let builder = etherparse::PacketBuilder::ipv4([192, 168, 1, 1], [192, 168, 1, 2], 64)
            .udp(1000, 2000);
        let payload = [1u8, 2, 3, 4];
        let mut out = Vec::with_capacity(builder.size(payload.len()));
        builder.write(&mut out, &payload).unwrap();
        // tweak identification field (bytes 4-5 of the ipv4 header)
        out[4] = (id >> 8) as u8;
        out[5] = (id & 0xff) as u8;
        if let Some(cs) = checksum_override {
            // udp header starts right after a 20-byte ipv4 header; checksum
            // is the last two bytes of the 8-byte udp header.
            out[20 + 6] = (cs >> 8) as u8;
            out[20 + 7] = (cs & 0xff) as u8;
        }
        out
    }

    #[test]
    fn classifies_udp_over_ipv4() {
        let packet = build_udp_packet(100, None);
        let classified = classify(&packet).unwrap();
        assert_eq!(classified.ip_static.version, 4);
        assert_eq!(classified.ip_static.protocol, 17);
        assert_eq!(classified.ip_dynamic.identification, 100);
        let (udp_static, _udp_dynamic) = classified.udp.unwrap();
        assert_eq!(udp_static.source_port, 1000);
        assert_eq!(udp_static.destination_port, 2000);
        assert_eq!(classified.payload, &[1, 2, 3, 4]);
    }

    #[test]
    fn flow_key_distinguishes_ports() {
        let a = classify(&build_udp_packet(1, None)).unwrap().flow;
        let packet_b = {
            let builder = etherparse::PacketBuilder::ipv4([192, 168, 1, 1], [192, 168, 1, 2], 64)
                .udp(1000, 3000);
            let payload = [0u8; 2];
            let mut out = Vec::with_capacity(builder.size(payload.len()));
            builder.write(&mut out, &payload).unwrap();
            out
        };
        let b = classify(&packet_b).unwrap().flow;
        assert_ne!(a, b);
    }

    #[test]
    fn non_ip_bytes_are_unsupported() {
        let garbage = [0xffu8; 8];
        assert!(matches!(classify(&garbage), Err(Error::Unsupported)));
    }
}
