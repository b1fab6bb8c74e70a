use super::{transport_ports, FilterResult, FlowTuple, PacketFilter};
use crate::cells::Packet;
use etherparse::{EtherType, Ipv6HeaderSlice};
use std::net::IpAddr;
use tracing::trace;

/// Hashes the 5-tuple of IPv6 packets.
///
/// The protocol is the Next Header field of the fixed header; extension headers are
/// not walked, so a packet carrying them is hashed with that extension's number and
/// zero ports.
#[derive(Debug, Default, Clone, Copy)]
pub struct Ipv6PacketFilter;

impl<P> PacketFilter<P> for Ipv6PacketFilter
where
    P: Packet,
{
    fn classify(&self, packet: &P) -> FilterResult {
        let Some((EtherType::IPV6, l3)) = packet.l3_slice() else {
            trace!("No match");
            return FilterResult::NoMatch;
        };
        let ip_hdr = match Ipv6HeaderSlice::from_slice(l3) {
            Ok(ip_hdr) => ip_hdr,
            Err(e) => {
                trace!("No match, malformed IPv6 header: {}", e);
                return FilterResult::NoMatch;
            }
        };
        let protocol = ip_hdr.next_header();
        let transport = l3.get(ip_hdr.slice().len()..).unwrap_or(&[]);
        let (src_port, dst_port) = transport_ports(protocol, transport, true);

        let tuple = FlowTuple::new(
            IpAddr::V6(ip_hdr.source_addr()),
            IpAddr::V6(ip_hdr.destination_addr()),
            protocol.0,
            src_port,
            dst_port,
        );
        let key = tuple.key();
        trace!(%tuple, %key, "Found a match");
        FilterResult::Match(key)
    }
}
