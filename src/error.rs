// src/error.rs
use std::{io, path::PathBuf};

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("{}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Invalid spec format: '{0}'. Expected '<device_name>/<filename>'.")]
    Spec(String),

    #[error("No hwmon directory found for device name '{0}'")]
    HwmonNotFound(String),

    #[error("Multiple hwmon directories found for device name '{0}'")]
    HwmonAmbiguous(String),

    #[error("Scheduler has no free timer slot (limit {0})")]
    SchedulerFull(usize),

    #[error("Malformed message from remote: {0}")]
    Protocol(String),
}

impl Error {
    pub fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Error::Io {
            path: path.into(),
            source,
        }
    }
}
