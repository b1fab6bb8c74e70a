//! Deficit Round Robin fair queueing for packet processing pipelines.
//!
//! [`filter`] hashes packets into flows, [`cells::drr`] schedules those flows and
//! [`config`] builds schedulers and cells from TOML or JSON.

pub mod cells;
pub mod config;
pub mod error;
pub mod filter;
pub(crate) mod utils;

pub use cells::drr::{DrrCell, DrrScheduler, DrrSchedulerBuilder, DrrStats};
pub use cells::{Packet, StdPacket};
pub use error::{DrrConfigError, Error, Result};
