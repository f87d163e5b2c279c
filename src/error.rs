//! Error types
//!
//! Errors are handled where they occur: transport failures end one
//! connection, producer start failures become a `415` response. Only setup
//! errors (binding, configuration) propagate out of the server.

use std::io;

use crate::registry::RegistryError;

/// Result alias used throughout the crate
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level error type
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Socket or file I/O failure
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The listen address did not resolve to anything
    #[error("failed to resolve address {0}")]
    Resolve(String),

    /// None of the resolved candidates could be bound
    #[error("failed to bind {address}: {source}")]
    Bind {
        address: String,
        #[source]
        source: io::Error,
    },

    /// Invalid registry operation
    #[error(transparent)]
    Registry(#[from] RegistryError),

    /// A producer could not be started
    #[error(transparent)]
    Start(#[from] StartError),

    /// Invalid configuration value
    #[error("configuration error: {0}")]
    Config(String),
}

/// Failure to construct or start a producer
///
/// Surfaced to the requesting client as `415 Unsupported Media Type`. The
/// resource stays idle and the next request retries.
#[derive(Debug, thiserror::Error)]
pub enum StartError {
    /// The pipeline description could not be turned into a pipeline
    #[error("invalid pipeline description '{0}'")]
    InvalidPipeline(String),

    /// The capture device is missing or busy
    #[error("capture device unavailable: {0}")]
    DeviceUnavailable(String),

    /// The backend process or thread could not be launched
    #[error("failed to launch producer: {0}")]
    Launch(#[source] io::Error),

    /// The resource serves a handler, not a stream
    #[error("resource has no pipeline")]
    NotAStream,
}
