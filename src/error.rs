//! Error types for sandboxed execution.

use thiserror::Error;

/// Top-level error type for sandbox operations.
///
/// A command that exits non-zero is not an error: it is reported through
/// [`ExecResult::exit_code`](crate::sandbox::ExecResult). The same holds for
/// spawn failures, which are captured into the result's stderr.
#[derive(Error, Debug)]
pub enum Error {
    /// No plugin is registered for the requested provider type.
    #[error("unknown sandbox provider '{provider_type}' (registered: {})", registered.join(", "))]
    UnknownProvider {
        provider_type: String,
        registered: Vec<String>,
    },

    /// A provider failed to initialize.
    #[error("failed to initialize sandbox provider '{provider_type}': {reason}")]
    Initialization {
        provider_type: String,
        reason: String,
    },

    /// A required executable could not be found on the host.
    #[error("{0} is not installed")]
    NotInstalled(String),

    /// Installing script dependencies failed before entering the sandbox.
    #[error("failed to install {runtime} packages: {reason}")]
    PackageInstall { runtime: String, reason: String },

    /// The provider does not support the requested operation.
    #[error("sandbox provider '{provider_type}' does not support {operation}")]
    Unsupported {
        provider_type: String,
        operation: String,
    },

    /// Not even the native provider could be initialized.
    #[error("no sandbox provider available: {0}")]
    NoProviderAvailable(String),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// IO error during provider operations.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for sandbox operations.
pub type Result<T> = std::result::Result<T, Error>;
