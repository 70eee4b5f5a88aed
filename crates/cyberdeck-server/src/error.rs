//! Lifecycle and registry errors.

use cyberdeck_core::ConfigError;
use thiserror::Error;

/// Errors returned by subsystem operations.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SubsystemError {
    /// Configuration mutation failed.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// The input device is absent, unpowered or not usable by this subsystem.
    #[error("Input device unavailable: {0}")]
    DeviceUnavailable(String),

    /// The input device is held by another pipeline.
    #[error("Input device busy: {0}")]
    DeviceBusy(String),

    #[error("Process is already running")]
    AlreadyRunning,

    #[error("Process is already stopped")]
    AlreadyStopped,

    /// The subsystem variant lacks the requested capability.
    #[error("Operation {0} not supported for this subsystem")]
    UnsupportedOperation(String),

    /// The underlying call failed.
    #[error("Operation failed: {0}")]
    OperationFailed(String),
}

/// Errors returned by the registry.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RegistryError {
    #[error("System with id {0} not found")]
    NotFound(String),

    /// Unknown operation name or bad arguments.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error(transparent)]
    Subsystem(#[from] SubsystemError),

    /// Startup configuration is unusable.
    #[error(transparent)]
    Config(#[from] ConfigError),
}
