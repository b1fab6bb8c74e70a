use async_trait::async_trait;
use etherparse::{EtherType, Ethernet2HeaderSlice};
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use std::{
    fmt::Debug,
    sync::{
        atomic::{AtomicU8, Ordering},
        Arc,
    },
};
use tokio::time::Instant;

use crate::error::Error;

pub mod drr;
pub mod queue;

/// Length of an Ethernet II header without VLAN tags.
pub const ETHER_HEADER_LEN: usize = 14;

pub trait Packet: Debug + 'static + Send {
    fn from_raw_buffer(buf: &[u8]) -> Self;

    // Raw buffer length
    fn length(&self) -> usize;
    // Network layer length, the size every queue and scheduler accounts in
    fn l3_length(&self) -> usize;
    fn as_slice(&self) -> &[u8];
    fn as_raw_buffer(&mut self) -> &mut [u8];

    /// EtherType and network layer bytes of the frame, or `None` if the
    /// Ethernet header cannot be parsed.
    fn l3_slice(&self) -> Option<(EtherType, &[u8])> {
        let buf = self.as_slice();
        let ether_hdr = Ethernet2HeaderSlice::from_slice(buf).ok()?;
        let ether_type = ether_hdr.ether_type();
        let offset = ether_hdr.slice().len();
        buf.get(offset..).map(|l3| (ether_type, l3))
    }

    // Timestamp
    fn get_timestamp(&self) -> Instant;
    fn set_timestamp(&mut self, timestamp: Instant);

    fn set_flow_id(&mut self, _flow_id: u32) {}
    fn get_flow_id(&self) -> u32 {
        0
    }
}

#[derive(Clone, Debug)]
pub struct StdPacket {
    buf: Vec<u8>,
    timestamp: Instant,
    flow_id: u32,
}

impl StdPacket {
    pub fn with_timestamp(buf: &[u8], timestamp: Instant) -> Self {
        Self {
            buf: buf.to_vec(),
            timestamp,
            flow_id: 0,
        }
    }
}

impl Packet for StdPacket {
    fn from_raw_buffer(buf: &[u8]) -> Self {
        Self::with_timestamp(buf, Instant::now())
    }

    fn length(&self) -> usize {
        self.buf.len()
    }

    fn l3_length(&self) -> usize {
        self.buf.len().saturating_sub(ETHER_HEADER_LEN)
    }

    fn as_slice(&self) -> &[u8] {
        self.buf.as_slice()
    }

    fn as_raw_buffer(&mut self) -> &mut [u8] {
        self.buf.as_mut_slice()
    }

    fn get_timestamp(&self) -> Instant {
        self.timestamp
    }

    fn set_timestamp(&mut self, timestamp: Instant) {
        self.timestamp = timestamp;
    }

    fn set_flow_id(&mut self, flow_id: u32) {
        self.flow_id = flow_id;
    }

    fn get_flow_id(&self) -> u32 {
        self.flow_id
    }
}

/// What an egress does with the packets it receives.
#[cfg_attr(feature = "serde", derive(Deserialize, Serialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum CellState {
    /// Discard everything.
    Drop = 0,
    /// Forward packets without scheduling them.
    PassThrough = 1,
    Normal = 2,
}

impl From<u8> for CellState {
    fn from(value: u8) -> Self {
        match value {
            0 => CellState::Drop,
            1 => CellState::PassThrough,
            _ => CellState::Normal,
        }
    }
}

#[derive(Debug)]
pub struct AtomicCellState(AtomicU8);

impl AtomicCellState {
    pub fn new(state: CellState) -> Self {
        Self(AtomicU8::new(state as u8))
    }

    pub fn load(&self, order: Ordering) -> CellState {
        self.0.load(order).into()
    }

    pub fn store(&self, state: CellState, order: Ordering) {
        self.0.store(state as u8, order);
    }
}

pub trait Ingress<P>: Send + Sync
where
    P: Packet,
{
    fn enqueue(&self, packet: P) -> Result<(), Error>;
}

#[async_trait]
pub trait Egress<P>: Send
where
    P: Packet,
{
    async fn dequeue(&mut self) -> Option<P>;

    fn reset(&mut self) {}

    fn change_state(&self, _state: CellState) {}
}

pub trait ControlInterface: Send + Sync + 'static {
    #[cfg(feature = "serde")]
    type Config: for<'a> Deserialize<'a> + Send;
    #[cfg(not(feature = "serde"))]
    type Config: Send;
    fn set_config(&self, config: Self::Config) -> Result<(), Error>;
}

#[cfg(feature = "serde")]
pub trait JsonControlInterface: Send + Sync {
    fn config_cell(&self, payload: serde_json::Value) -> Result<(), Error>;
}

#[cfg(feature = "serde")]
impl<T> JsonControlInterface for T
where
    T: ControlInterface,
{
    fn config_cell(&self, payload: serde_json::Value) -> Result<(), Error> {
        match serde_json::from_value(payload) {
            Ok(payload) => self.set_config(payload),
            Err(e) => Err(Error::ConfigError(e.to_string())),
        }
    }
}

pub trait Cell<P>
where
    P: Packet,
{
    type IngressType: Ingress<P> + 'static;
    type EgressType: Egress<P> + 'static;
    type ControlInterfaceType: ControlInterface;

    fn sender(&self) -> Arc<Self::IngressType>;
    fn receiver(&mut self) -> &mut Self::EgressType;
    fn into_receiver(self) -> Self::EgressType;
    fn control_interface(&self) -> Arc<Self::ControlInterfaceType>;
}
