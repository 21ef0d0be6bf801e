use crate::config::ConfigError;
use crate::telemetry::TelemetryError;
use crate::workflows::applications::{EngineError, RunLockError, StorageError, TrackerError};
use std::fmt;

#[derive(Debug)]
pub enum AppError {
    Config(ConfigError),
    Telemetry(TelemetryError),
    Io(std::io::Error),
    Input(serde_json::Error),
    Storage(StorageError),
    Ledger(TrackerError),
    Run(EngineError),
    Lock(RunLockError),
    Export(csv::Error),
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::Config(err) => write!(f, "configuration error: {}", err),
            AppError::Telemetry(err) => write!(f, "telemetry error: {}", err),
            AppError::Io(err) => write!(f, "io error: {}", err),
            AppError::Input(err) => write!(f, "invalid input file: {}", err),
            AppError::Storage(err) => write!(f, "storage error: {}", err),
            AppError::Ledger(err) => write!(f, "ledger error: {}", err),
            AppError::Run(err) => write!(f, "run aborted: {}", err),
            AppError::Lock(err) => write!(f, "ledger busy: {}", err),
            AppError::Export(err) => write!(f, "export error: {}", err),
        }
    }
}

impl std::error::Error for AppError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            AppError::Config(err) => Some(err),
            AppError::Telemetry(err) => Some(err),
            AppError::Io(err) => Some(err),
            AppError::Input(err) => Some(err),
            AppError::Storage(err) => Some(err),
            AppError::Ledger(err) => Some(err),
            AppError::Run(err) => Some(err),
            AppError::Lock(err) => Some(err),
            AppError::Export(err) => Some(err),
        }
    }
}

impl From<ConfigError> for AppError {
    fn from(value: ConfigError) -> Self {
        Self::Config(value)
    }
}

impl From<TelemetryError> for AppError {
    fn from(value: TelemetryError) -> Self {
        Self::Telemetry(value)
    }
}

impl From<std::io::Error> for AppError {
    fn from(value: std::io::Error) -> Self {
        Self::Io(value)
    }
}

impl From<serde_json::Error> for AppError {
    fn from(value: serde_json::Error) -> Self {
        Self::Input(value)
    }
}

impl From<StorageError> for AppError {
    fn from(value: StorageError) -> Self {
        Self::Storage(value)
    }
}

impl From<TrackerError> for AppError {
    fn from(value: TrackerError) -> Self {
        Self::Ledger(value)
    }
}

impl From<EngineError> for AppError {
    fn from(value: EngineError) -> Self {
        Self::Run(value)
    }
}

impl From<RunLockError> for AppError {
    fn from(value: RunLockError) -> Self {
        Self::Lock(value)
    }
}

impl From<csv::Error> for AppError {
    fn from(value: csv::Error) -> Self {
        Self::Export(value)
    }
}
