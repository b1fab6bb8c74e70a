use std::process::{ExitCode, Termination};

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Encounter IO error, {0}")]
    IoError(#[from] std::io::Error),
    #[error("DRR config error: {0}")]
    DrrConfig(#[from] DrrConfigError),
    #[error("Config error: {0}")]
    ConfigError(String),
    #[error("Channel error: {0}")]
    ChannelError(String),
    #[cfg(feature = "serde")]
    #[error("Serde error: {0}")]
    SerdeError(#[from] serde_json::Error),
}

/// Static configuration mistakes that keep a DRR scheduler from being built.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum DrrConfigError {
    #[error("DRR scheduler cannot have static classes, {0} attached")]
    StaticClasses(usize),
    #[error("DRR scheduler needs at least one packet filter")]
    NoPacketFilter,
    #[error("DRR scheduler cannot have internal queues, {0} attached")]
    InternalQueues(usize),
    #[error("The number of flows must be greater than zero")]
    ZeroFlows,
}

impl Termination for Error {
    fn report(self) -> ExitCode {
        match self {
            Error::IoError(_) => ExitCode::from(74),
            Error::DrrConfig(_) => ExitCode::from(78),
            Error::ConfigError(_) => ExitCode::from(78),
            Error::ChannelError(_) => ExitCode::from(69),
            #[cfg(feature = "serde")]
            Error::SerdeError(_) => ExitCode::from(65),
        }
    }
}
