//! Error taxonomy for the simulation engine.
//!
//! Only `Configuration` and `Data` ever reach a caller: telemetry failures are
//! swallowed by the orchestrator and arithmetic hazards are floored away.

use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum SimError {
    /// Model artifacts missing, unreadable, or inconsistent with the fixed
    /// feature order.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Expected rows or columns are absent or malformed.
    #[error("data error: {0}")]
    Data(String),

    /// Best-effort external read failed.
    #[error("transient I/O error: {0}")]
    TransientIo(String),

    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
}

impl SimError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        SimError::Io { path: path.into(), source }
    }

    /// Short machine-readable tag used in structured logs.
    pub fn kind(&self) -> &'static str {
        match self {
            SimError::Configuration(_) => "configuration",
            SimError::Data(_) => "data",
            SimError::TransientIo(_) => "transient_io",
            SimError::Io { .. } => "io",
            SimError::Csv(_) => "csv",
        }
    }
}

pub type SimResult<T> = Result<T, SimError>;
