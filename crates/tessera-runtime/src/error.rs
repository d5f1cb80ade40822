//! Error types for the runtime crate.

use std::fmt;
use thiserror::Error;

/// Pipeline errors.
///
/// Every variant is fatal for the pipeline that raised it: nothing in this
/// crate retries or falls back to another device.
#[derive(Debug, Error)]
pub enum RuntimeError {
    /// No compute platform enumerated at all.
    #[error("Device discovery failed: no compute platform found")]
    NoPlatformFound,

    /// Platforms exist, but no device satisfied the selection policy.
    #[error("Device discovery failed: no device matches {policy}")]
    NoMatchingDevice { policy: String },

    /// The logical device or its queue could not be created.
    #[error("Context creation failed: {0}")]
    ContextCreation(String),

    /// A profiling queue was requested on a device without timestamp queries.
    #[error("Profiling unavailable: {0}")]
    ProfilingUnavailable(String),

    /// Buffer allocation failed.
    #[error("Buffer allocation failed: {0}")]
    AllocationFailed(String),

    /// A host/device transfer was rejected or did not complete.
    #[error("Buffer transfer failed: {0}")]
    TransferFailed(String),

    /// The host side of a host-backed buffer was read after the device wrote it.
    #[error("Stale host data: {0}")]
    StaleHostData(String),

    /// Mapping a staging buffer failed.
    #[error("Buffer async error: {0}")]
    BufferAsyncError(#[from] wgpu::BufferAsyncError),

    /// A kernel source could not be obtained from its provider.
    #[error("Kernel source unavailable: {0}")]
    SourceUnavailable(String),

    /// Program build failed. `log` is the complete compiler diagnostic.
    #[error("Program build failed:\n{log}")]
    BuildFailed { log: String },

    /// The program has no compute entry point with the requested name.
    #[error("Kernel entry point not found: {0}")]
    EntryPointNotFound(String),

    /// An argument could not be bound to a kernel parameter.
    #[error("Argument binding failed: {0}")]
    ArgumentBinding(String),

    /// The device rejected the work domain or the dispatch did not complete.
    #[error("Dispatch failed: {0}")]
    DispatchFailed(String),

    /// Invalid pipeline configuration.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Pipeline stage an error originated from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Discovery,
    Context,
    Allocation,
    Transfer,
    Build,
    Binding,
    Dispatch,
    Configuration,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Discovery => "device discovery",
            Stage::Context => "context creation",
            Stage::Allocation => "buffer allocation",
            Stage::Transfer => "buffer transfer",
            Stage::Build => "program build",
            Stage::Binding => "argument binding",
            Stage::Dispatch => "dispatch",
            Stage::Configuration => "configuration",
        };
        f.write_str(name)
    }
}

impl RuntimeError {
    /// The pipeline stage that failed.
    pub fn stage(&self) -> Stage {
        match self {
            RuntimeError::NoPlatformFound | RuntimeError::NoMatchingDevice { .. } => {
                Stage::Discovery
            }
            RuntimeError::ContextCreation(_) | RuntimeError::ProfilingUnavailable(_) => {
                Stage::Context
            }
            RuntimeError::AllocationFailed(_) => Stage::Allocation,
            RuntimeError::TransferFailed(_)
            | RuntimeError::StaleHostData(_)
            | RuntimeError::BufferAsyncError(_) => Stage::Transfer,
            RuntimeError::SourceUnavailable(_) | RuntimeError::BuildFailed { .. } => Stage::Build,
            RuntimeError::EntryPointNotFound(_) | RuntimeError::ArgumentBinding(_) => {
                Stage::Binding
            }
            RuntimeError::DispatchFailed(_) => Stage::Dispatch,
            RuntimeError::InvalidConfig(_) => Stage::Configuration,
        }
    }
}

/// Specialized Result type for runtime operations.
pub type Result<T> = std::result::Result<T, RuntimeError>;
