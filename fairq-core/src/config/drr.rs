#[cfg(feature = "serde")]
use std::path::Path;

use bytesize::ByteSize;
#[cfg(feature = "serde")]
use figment::{
    providers::{Format, Json, Toml},
    Figment,
};
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
#[cfg(feature = "serde")]
use tracing::{debug, error};

use crate::{
    cells::{
        drr::{DrrCell, DrrScheduler, DrrSchedulerBuilder},
        queue::{InnerQueue, InnerQueueConfig},
        Packet,
    },
    error::Error,
    filter::FilterKind,
};

/// Build configuration of a DRR scheduler or cell. Unset fields take their defaults:
/// a 1000 KiB byte limit, 1024 flows, the MTU or 1500 bytes as quantum, the IPv4 and
/// IPv6 filters and CoDel flow queues.
#[cfg_attr(
    feature = "serde",
    serde_with::skip_serializing_none,
    derive(Serialize, Deserialize),
    serde(deny_unknown_fields)
)]
#[derive(Clone, Debug, Default, PartialEq)]
pub struct DrrCellBuildConfig {
    #[cfg_attr(
        feature = "serde",
        serde(default, with = "crate::utils::serde::byte")
    )]
    pub byte_limit: Option<ByteSize>,
    pub flows: Option<u32>,
    pub quantum: Option<u32>,
    pub mtu: Option<u32>,
    pub filters: Option<Vec<FilterKind>>,
    pub queue: Option<InnerQueueConfig>,
}

impl DrrCellBuildConfig {
    pub fn new() -> Self {
        Default::default()
    }

    /// Loads a `.toml` or `.json` file.
    #[cfg(feature = "serde")]
    pub fn from_file<T: AsRef<Path>>(path: T) -> Result<Self, Error> {
        let path = path.as_ref();
        let figment = match path.extension().and_then(|ext| ext.to_str()) {
            Some("toml") => Figment::new().merge(Toml::file_exact(path)),
            Some("json") => Figment::new().merge(Json::file_exact(path)),
            _ => {
                error!("Unsupported config file {}", path.display());
                return Err(Error::ConfigError(format!(
                    "Unsupported config file {}, expected .toml or .json",
                    path.display()
                )));
            }
        };
        let config: Self = figment.extract().map_err(|e| {
            error!("Failed to load config file {}", path.display());
            Error::ConfigError(e.to_string())
        })?;
        debug!(?config, "Loaded DRR config from {}", path.display());
        Ok(config)
    }

    pub fn into_builder<P: Packet>(self) -> DrrSchedulerBuilder<P, InnerQueue<P>> {
        let mut builder = DrrSchedulerBuilder::new()
            .filters(self.filters.unwrap_or_else(FilterKind::defaults))
            .queue_config(self.queue.unwrap_or_default());
        if let Some(byte_limit) = self.byte_limit {
            builder = builder.byte_limit(byte_limit.as_u64() as usize);
        }
        if let Some(flows) = self.flows {
            builder = builder.flows(flows);
        }
        if let Some(quantum) = self.quantum {
            builder = builder.quantum(quantum);
        }
        if let Some(mtu) = self.mtu {
            builder = builder.mtu(mtu);
        }
        builder
    }

    pub fn into_scheduler<P: Packet>(self) -> Result<DrrScheduler<P>, Error> {
        self.into_builder().build()
    }

    pub fn into_cell<P: Packet>(self) -> Result<DrrCell<P>, Error> {
        DrrCell::new(self.into_scheduler()?)
    }
}
