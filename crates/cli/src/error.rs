//! CLI error types.

use std::path::PathBuf;
use thiserror::Error;

/// CLI errors.
///
/// This enum is marked `#[non_exhaustive]` to allow adding new variants
/// in future versions without breaking downstream code.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// No config file was given and none of the defaults exist.
    #[error("no server config found (searched {searched:?}). Pass --config or set TOOLWIRE_CONFIG")]
    ConfigNotFound { searched: Vec<PathBuf> },

    /// `--args` was not valid JSON.
    #[error("invalid --args JSON: {0}")]
    InvalidArguments(#[source] serde_json::Error),

    /// An error occurred in the client library.
    #[error(transparent)]
    Client(#[from] toolclient::Error),

    /// The config file could not be read or parsed.
    #[error(transparent)]
    Config(#[from] toolclient::ConfigError),

    /// An I/O error occurred.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
