use etherparse::PacketBuilder;
use fairq_core::cells::{Packet, StdPacket};
use fairq_core::filter::{FlowKey, FlowTuple};

mod cell;
mod classifier;
#[cfg(feature = "serde")]
mod config;
mod drr;

const MAC_A: [u8; 6] = [0x02, 0, 0, 0, 0, 0xa];
const MAC_B: [u8; 6] = [0x02, 0, 0, 0, 0, 0xb];
const V4_SRC: [u8; 4] = [10, 0, 0, 1];
const V4_DST: [u8; 4] = [10, 0, 0, 2];

/// IPv4 UDP frame whose network layer is `l3_len` bytes, payload filled with `marker`.
pub fn udp_v4(sport: u16, dport: u16, l3_len: usize, marker: u8) -> StdPacket {
    let builder = PacketBuilder::ethernet2(MAC_A, MAC_B)
        .ipv4(V4_SRC, V4_DST, 64)
        .udp(sport, dport);
    let payload = vec![marker; l3_len - 28];
    let mut buffer = Vec::with_capacity(builder.size(payload.len()));
    builder.write(&mut buffer, &payload).unwrap();
    let packet = StdPacket::from_raw_buffer(&buffer);
    assert_eq!(packet.l3_length(), l3_len);
    packet
}

pub fn tcp_v6(sport: u16, dport: u16, payload_len: usize) -> StdPacket {
    let builder = PacketBuilder::ethernet2(MAC_A, MAC_B)
        .ipv6([0xfd; 16], [0xfe; 16], 64)
        .tcp(sport, dport, 1, 65535);
    let payload = vec![0u8; payload_len];
    let mut buffer = Vec::with_capacity(builder.size(payload_len));
    builder.write(&mut buffer, &payload).unwrap();
    StdPacket::from_raw_buffer(&buffer)
}

pub fn udp_v4_key(sport: u16, dport: u16) -> FlowKey {
    FlowTuple::new(V4_SRC.into(), V4_DST.into(), 17, sport, dport).key()
}

/// Source ports, starting at `from`, whose UDP flows all land in distinct buckets.
pub fn distinct_ports(count: usize, flows: u32, from: u16) -> Vec<u16> {
    let mut ports: Vec<u16> = Vec::with_capacity(count);
    let mut buckets = Vec::with_capacity(count);
    let mut port = from;
    while ports.len() < count {
        let bucket = udp_v4_key(port, 53).bucket(flows);
        if !buckets.contains(&bucket) {
            buckets.push(bucket);
            ports.push(port);
        }
        port += 1;
    }
    ports
}

/// First payload byte of an IPv4 UDP frame built by [`udp_v4`].
pub fn marker(packet: &StdPacket) -> u8 {
    packet.as_slice()[14 + 28]
}
