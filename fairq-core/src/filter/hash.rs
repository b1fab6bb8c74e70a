//! Flow tuple serialization and hashing.

use std::fmt;
use std::net::IpAddr;
use xxhash_rust::xxh3::xxh3_64;

/// Serialized size of an IPv4 tuple: two addresses, protocol, two ports.
pub const IPV4_TUPLE_LEN: usize = 4 + 4 + 1 + 2 + 2;
/// Serialized size of an IPv6 tuple.
pub const IPV6_TUPLE_LEN: usize = 16 + 16 + 1 + 2 + 2;

/// 32-bit hash of a flow tuple.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FlowKey(pub u32);

impl FlowKey {
    /// Hash bucket for a table of `flows` buckets. `flows` must be non-zero.
    #[inline]
    pub fn bucket(self, flows: u32) -> u32 {
        self.0 % flows
    }
}

impl From<u32> for FlowKey {
    fn from(value: u32) -> Self {
        FlowKey(value)
    }
}

impl fmt::Display for FlowKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#010x}", self.0)
    }
}

/// Reduces a byte sequence to 32 bits: xxh3-64 with the upper half kept.
#[inline]
pub fn tuple_hash(bytes: &[u8]) -> u32 {
    (xxh3_64(bytes) >> 32) as u32
}

/// Classification key of a packet. Both addresses must belong to the same family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FlowTuple {
    pub src: IpAddr,
    pub dst: IpAddr,
    pub protocol: u8,
    pub src_port: u16,
    pub dst_port: u16,
}

impl FlowTuple {
    pub fn new(src: IpAddr, dst: IpAddr, protocol: u8, src_port: u16, dst_port: u16) -> Self {
        Self {
            src,
            dst,
            protocol,
            src_port,
            dst_port,
        }
    }

    /// Writes the tuple into `buf` and returns the number of bytes written.
    ///
    /// Layout: source address, destination address, protocol, source port and
    /// destination port, multi-byte fields in network byte order.
    pub fn write_bytes(&self, buf: &mut [u8; IPV6_TUPLE_LEN]) -> usize {
        let mut offset = 0;
        for addr in [self.src, self.dst] {
            offset += match addr {
                IpAddr::V4(addr) => put(buf, offset, &addr.octets()),
                IpAddr::V6(addr) => put(buf, offset, &addr.octets()),
            };
        }
        offset += put(buf, offset, &[self.protocol]);
        offset += put(buf, offset, &self.src_port.to_be_bytes());
        offset += put(buf, offset, &self.dst_port.to_be_bytes());
        offset
    }

    pub fn key(&self) -> FlowKey {
        let mut buf = [0u8; IPV6_TUPLE_LEN];
        let len = self.write_bytes(&mut buf);
        FlowKey(tuple_hash(&buf[..len]))
    }
}

fn put(buf: &mut [u8], offset: usize, bytes: &[u8]) -> usize {
    buf[offset..offset + bytes.len()].copy_from_slice(bytes);
    bytes.len()
}

impl fmt::Display for FlowTuple {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {}:{} -> {}:{}",
            self.protocol, self.src, self.src_port, self.dst, self.dst_port
        )
    }
}
