use super::{transport_ports, FilterResult, FlowTuple, PacketFilter};
use crate::cells::Packet;
use etherparse::{EtherType, Ipv4HeaderSlice};
use std::net::IpAddr;
use tracing::trace;

/// Hashes the 5-tuple of IPv4 packets. Anything else is left to the next filter.
#[derive(Debug, Default, Clone, Copy)]
pub struct Ipv4PacketFilter;

impl<P> PacketFilter<P> for Ipv4PacketFilter
where
    P: Packet,
{
    fn classify(&self, packet: &P) -> FilterResult {
        let Some((EtherType::IPV4, l3)) = packet.l3_slice() else {
            trace!("No match");
            return FilterResult::NoMatch;
        };
        let ip_hdr = match Ipv4HeaderSlice::from_slice(l3) {
            Ok(ip_hdr) => ip_hdr,
            Err(e) => {
                trace!("No match, malformed IPv4 header: {}", e);
                return FilterResult::NoMatch;
            }
        };
        let protocol = ip_hdr.protocol();
        let transport = l3.get(ip_hdr.slice().len()..).unwrap_or(&[]);
        let first_fragment = ip_hdr.fragments_offset().value() == 0;
        let (src_port, dst_port) = transport_ports(protocol, transport, first_fragment);

        let tuple = FlowTuple::new(
            IpAddr::V4(ip_hdr.source_addr()),
            IpAddr::V4(ip_hdr.destination_addr()),
            protocol.0,
            src_port,
            dst_port,
        );
        let key = tuple.key();
        trace!(%tuple, %key, "Found a match");
        FilterResult::Match(key)
    }
}
