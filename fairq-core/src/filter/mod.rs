//! Packet classification into flows.
//!
//! A filter inspects a packet and either produces a [`FlowKey`] or declines it. The DRR
//! scheduler runs its filters in order and keeps the first match.

use crate::cells::Packet;
use etherparse::IpNumber;
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use std::fmt::Debug;
use tracing::{debug, warn};

pub mod hash;
pub mod ipv4;
pub mod ipv6;

pub use hash::{FlowKey, FlowTuple};
pub use ipv4::Ipv4PacketFilter;
pub use ipv6::Ipv6PacketFilter;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterResult {
    Match(FlowKey),
    NoMatch,
}

impl FilterResult {
    pub fn key(self) -> Option<FlowKey> {
        match self {
            FilterResult::Match(key) => Some(key),
            FilterResult::NoMatch => None,
        }
    }
}

pub trait PacketFilter<P>: Debug + Send + Sync
where
    P: Packet,
{
    fn classify(&self, packet: &P) -> FilterResult;
}

impl<P, F> PacketFilter<P> for Box<F>
where
    P: Packet,
    F: PacketFilter<P> + ?Sized,
{
    fn classify(&self, packet: &P) -> FilterResult {
        (**self).classify(packet)
    }
}

/// Runs `filters` in order; the first match wins.
pub fn classify_chain<P, F>(filters: &[F], packet: &P) -> FilterResult
where
    P: Packet,
    F: PacketFilter<P>,
{
    filters
        .iter()
        .map(|filter| filter.classify(packet))
        .find(|result| matches!(result, FilterResult::Match(_)))
        .unwrap_or(FilterResult::NoMatch)
}

/// Filter selector used by configuration files.
#[cfg_attr(
    feature = "serde",
    derive(Deserialize, Serialize),
    serde(rename_all = "lowercase")
)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterKind {
    Ipv4,
    Ipv6,
}

impl FilterKind {
    pub fn build<P: Packet>(self) -> Box<dyn PacketFilter<P>> {
        match self {
            FilterKind::Ipv4 => Box::new(Ipv4PacketFilter),
            FilterKind::Ipv6 => Box::new(Ipv6PacketFilter),
        }
    }

    pub fn defaults() -> Vec<FilterKind> {
        vec![FilterKind::Ipv4, FilterKind::Ipv6]
    }
}

/// Source and destination ports of a TCP or UDP segment, zero otherwise.
///
/// `with_ports` is false when the transport header is not present in this packet,
/// e.g. a non-first IPv4 fragment.
pub(crate) fn transport_ports(protocol: IpNumber, transport: &[u8], with_ports: bool) -> (u16, u16) {
    if protocol != IpNumber::TCP && protocol != IpNumber::UDP {
        warn!(
            protocol = protocol.0,
            "Unknown transport protocol, no port number included in hash computation"
        );
        return (0, 0);
    }
    if !with_ports {
        return (0, 0);
    }
    match transport {
        [s0, s1, d0, d1, ..] => (
            u16::from_be_bytes([*s0, *s1]),
            u16::from_be_bytes([*d0, *d1]),
        ),
        _ => {
            debug!(
                protocol = protocol.0,
                len = transport.len(),
                "Transport header truncated, hashing with zero ports"
            );
            (0, 0)
        }
    }
}
