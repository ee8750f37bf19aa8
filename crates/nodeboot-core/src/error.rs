//! Error types for the `nodeboot` core library.

use thiserror::Error;

/// Result type alias using the core [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

/// Core error types for bootstrap operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Invalid or inconsistent settings
    #[error("Configuration error: {0}")]
    Config(String),

    /// Tunnel credentials could not be interpreted
    #[error("Tunnel error: {0}")]
    Tunnel(String),

    /// A child process could not be started or signalled
    #[error("Process error: {0}")]
    Process(String),

    /// The tunnel never reported a public hostname
    #[error("Hostname discovery failed after {attempts} restart attempts")]
    DiscoveryFailed { attempts: u32 },

    /// Subscription document is not valid base64 / UTF-8
    #[error("Subscription decode error: {0}")]
    Decode(String),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
