use bytesize::ByteSize;
use fairq_core::cells::queue::{DropTailQueueConfig, InfiniteQueueConfig, InnerQueueConfig};
use fairq_core::cells::{Packet, StdPacket};
use fairq_core::config::DrrCellBuildConfig;
use fairq_core::filter::FilterKind;
use fairq_core::DrrScheduler;
use itertools::Itertools;
use rand::{rngs::StdRng, Rng, SeedableRng};
use tracing::{span, Level};

use crate::{distinct_ports, marker, tcp_v6, udp_v4, udp_v4_key};

const FLOWS: u32 = 1024;

fn scheduler(config: DrrCellBuildConfig) -> DrrScheduler<StdPacket> {
    config.into_scheduler().unwrap()
}

#[test_log::test]
fn deficit_walkthrough_over_real_packets() {
    let _span = span!(Level::INFO, "deficit_walkthrough_over_real_packets").entered();
    let ports = distinct_ports(2, FLOWS, 20000);
    let mut drr = scheduler(DrrCellBuildConfig {
        quantum: Some(1000),
        queue: Some(InnerQueueConfig::Infinite(InfiniteQueueConfig::new())),
        ..Default::default()
    });
    let a = udp_v4_key(ports[0], 53).bucket(FLOWS);
    let b = udp_v4_key(ports[1], 53).bucket(FLOWS);

    for i in 0..3 {
        drr.enqueue(udp_v4(ports[0], 53, 800, i));
    }
    drr.enqueue(udp_v4(ports[1], 53, 800, 9));

    let mut served = Vec::new();
    let mut deficits = Vec::new();
    while let Some(packet) = drr.dequeue() {
        let bucket = packet.get_flow_id();
        served.push(bucket);
        deficits.push(drr.flow(bucket).unwrap().deficit());
    }
    assert_eq!(served, vec![a, b, a, a]);
    assert_eq!(deficits, vec![200, 0, 400, 0]);
    assert_eq!(drr.stats().dequeued_bytes, 3200);
}

#[test_log::test]
fn overlimit_evicts_front_of_heaviest() {
    let ports = distinct_ports(2, FLOWS, 30000);
    let mut drr = scheduler(DrrCellBuildConfig {
        byte_limit: Some(ByteSize::b(1600)),
        queue: Some(InnerQueueConfig::DropTail(DropTailQueueConfig::default())),
        ..Default::default()
    });
    drr.enqueue(udp_v4(ports[0], 53, 800, 1));
    drr.enqueue(udp_v4(ports[0], 53, 800, 2));
    assert_eq!(drr.stats().overlimit_drops, 0);
    drr.enqueue(udp_v4(ports[1], 53, 400, 3));

    assert_eq!(drr.stats().overlimit_drops, 1);
    assert_eq!(drr.backlog(), 1200);
    let markers: Vec<u8> = std::iter::from_fn(|| drr.dequeue())
        .map(|p| marker(&p))
        .collect();
    assert_eq!(markers, vec![2, 3]);
}

#[test_log::test]
fn backlogged_flows_share_fairly() {
    let ports = distinct_ports(5, FLOWS, 40000);
    let mut drr = scheduler(DrrCellBuildConfig {
        queue: Some(InnerQueueConfig::Infinite(InfiniteQueueConfig::new())),
        ..Default::default()
    });
    // One heavy sender against four light ones
    for _ in 0..40 {
        drr.enqueue(udp_v4(ports[0], 53, 1000, 0));
    }
    for port in &ports[1..] {
        for _ in 0..10 {
            drr.enqueue(udp_v4(*port, 53, 1000, 0));
        }
    }
    let first_pass: Vec<u32> = (0..50)
        .filter_map(|_| drr.dequeue())
        .map(|p| p.get_flow_id())
        .collect();
    // Five flows served round robin: the heavy one gets one slot in five.
    let shares = first_pass.iter().counts();
    assert_eq!(shares.len(), 5);
    assert!(shares.values().all(|served| *served == 10));
    let heavy = udp_v4_key(ports[0], 53).bucket(FLOWS);
    assert_eq!(shares.get(&heavy), Some(&10));
    for chunk in first_pass.chunks(5) {
        let mut chunk = chunk.to_vec();
        chunk.sort_unstable();
        chunk.dedup();
        assert_eq!(chunk.len(), 5);
    }
}

#[test_log::test]
fn unmatched_traffic_uses_overflow_flow() {
    let mut drr = scheduler(DrrCellBuildConfig {
        flows: Some(8),
        filters: Some(vec![FilterKind::Ipv4]),
        ..Default::default()
    });
    drr.enqueue(tcp_v6(1, 2, 100));
    drr.enqueue(tcp_v6(3, 4, 100));
    drr.enqueue(udp_v4(1, 2, 100, 0));
    assert_eq!(drr.flow(8).unwrap().len(), 2);
    assert_eq!(drr.peek().unwrap().get_flow_id(), 8);
    assert_eq!(drr.dequeue().unwrap().get_flow_id(), 8);
    assert_eq!(drr.stats().drops(), 0);
}

#[test_log::test]
fn random_mix_stays_within_limit() {
    let mut rng = StdRng::seed_from_u64(7);
    let mut drr = scheduler(DrrCellBuildConfig {
        byte_limit: Some(ByteSize::kib(16)),
        flows: Some(32),
        ..Default::default()
    });
    for _ in 0..2000 {
        let sport = rng.random_range(1000..1100);
        let len = rng.random_range(64..1500);
        if rng.random_bool(0.2) {
            drr.enqueue(tcp_v6(sport, 80, len));
        } else {
            drr.enqueue(udp_v4(sport, 53, len, 0));
        }
        if rng.random_bool(0.3) {
            drr.dequeue();
        }
        assert!(drr.backlog() <= 16 * 1024);
        assert_eq!(drr.active_flows().count() > 0, !drr.is_empty());
        for flow in drr.active_flows() {
            assert!(!flow.is_empty());
            assert!(flow.deficit() >= 0);
        }
    }
    while drr.dequeue().is_some() {}
    assert!(drr.is_empty());
    assert_eq!(drr.backlog(), 0);
    let stats = drr.stats();
    assert_eq!(stats.enqueued_packets, stats.dequeued_packets + stats.drops());
}
