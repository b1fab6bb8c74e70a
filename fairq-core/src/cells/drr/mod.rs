//! Deficit Round Robin fair queueing.
//!
//! Packets are hashed into one of `flows` buckets by a chain of [packet
//! filters](crate::filter), each bucket owning its own [`PacketQueue`]. The
//! [`DrrScheduler`] serves the non-empty buckets round robin, letting each send up to
//! `quantum` bytes per round, and evicts from the heaviest bucket whenever the total
//! backlog grows beyond the byte limit.
//!
//! [`DrrCell`] puts a scheduler behind the ingress / egress / control interface of a
//! cell.
//!
//! [`PacketQueue`]: crate::cells::queue::PacketQueue

pub mod cell;
pub mod flow;
mod overlimit;
pub mod scheduler;

pub use cell::{DrrCell, DrrCellConfig, DrrCellControlInterface, DrrCellEgress, DrrCellIngress};
pub use flow::{Flow, FlowId, FlowStatus, FlowTable};
pub use scheduler::{
    DropReason, DrrScheduler, DrrSchedulerBuilder, DrrStats, DEFAULT_BYTE_LIMIT, DEFAULT_FLOWS,
    DEFAULT_QUANTUM,
};
