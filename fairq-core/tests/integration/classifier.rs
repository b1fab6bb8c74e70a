use etherparse::{EtherType, PacketBuilder};
use fairq_core::cells::{Packet, StdPacket};
use fairq_core::filter::{
    classify_chain, FilterKind, FilterResult, FlowTuple, Ipv4PacketFilter, Ipv6PacketFilter,
    PacketFilter,
};

use crate::{tcp_v6, udp_v4, udp_v4_key};

#[test_log::test]
fn same_tuple_same_key() {
    let filter = Ipv4PacketFilter;
    let a = filter.classify(&udp_v4(5000, 53, 100, 1));
    let b = filter.classify(&udp_v4(5000, 53, 900, 2));
    assert_eq!(a, b);
    assert_eq!(a, FilterResult::Match(udp_v4_key(5000, 53)));
}

#[test_log::test]
fn chain_routes_by_family() {
    let chain: Vec<Box<dyn PacketFilter<StdPacket>>> = FilterKind::defaults()
        .into_iter()
        .map(FilterKind::build)
        .collect();

    let v6 = tcp_v6(443, 40000, 10);
    let expected = FlowTuple::new([0xfd; 16].into(), [0xfe; 16].into(), 6, 443, 40000).key();
    assert_eq!(classify_chain(&chain, &v6), FilterResult::Match(expected));
    assert_eq!(Ipv4PacketFilter.classify(&v6), FilterResult::NoMatch);
    assert_eq!(
        Ipv6PacketFilter.classify(&v6),
        FilterResult::Match(expected)
    );

    let v4 = udp_v4(1, 2, 64, 0);
    assert_eq!(
        classify_chain(&chain, &v4),
        FilterResult::Match(udp_v4_key(1, 2))
    );
}

#[test_log::test]
fn icmp_is_matched_without_ports() {
    let builder = PacketBuilder::ethernet2([2; 6], [4; 6])
        .ipv4([10, 0, 0, 1], [10, 0, 0, 2], 64)
        .icmpv4_echo_request(7, 1);
    let mut buffer = Vec::new();
    builder.write(&mut buffer, &[0u8; 24]).unwrap();
    let packet = StdPacket::from_raw_buffer(&buffer);
    let expected = FlowTuple::new([10, 0, 0, 1].into(), [10, 0, 0, 2].into(), 1, 0, 0).key();
    assert_eq!(
        Ipv4PacketFilter.classify(&packet),
        FilterResult::Match(expected)
    );
}

#[test_log::test]
fn non_ip_is_unmatched() {
    let mut arp = vec![0xffu8; 6];
    arp.extend_from_slice(&[2, 0, 0, 0, 0, 1]);
    arp.extend_from_slice(&EtherType::ARP.0.to_be_bytes());
    arp.extend_from_slice(&[0u8; 28]);
    let arp = StdPacket::from_raw_buffer(&arp);
    assert!(arp.l3_slice().is_some());

    let chain = [Ipv4PacketFilter];
    assert_eq!(classify_chain(&chain, &arp), FilterResult::NoMatch);
    assert_eq!(Ipv6PacketFilter.classify(&arp), FilterResult::NoMatch);
}
