//! Tool client error types.

use std::time::Duration;

use serde_json::Value;
use thiserror::Error;

use crate::config::ConfigError;

/// Errors surfaced by [`ToolClient`](crate::ToolClient) and
/// [`ClientRegistry`](crate::ClientRegistry).
///
/// Transport failures are never retried internally and never downgraded to
/// an empty result. A [`Error::Tool`] is an ordinary outcome reported by the
/// server and is kept separate from the transport variants.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// The server executable could not be started.
    #[error("failed to spawn server '{server}': {source}")]
    Spawn {
        server: String,
        #[source]
        source: std::io::Error,
    },

    /// The `initialize` round trip failed or returned an error frame.
    #[error("initialize handshake with '{server}' failed: {source}")]
    Handshake {
        server: String,
        #[source]
        source: Box<Error>,
    },

    /// The server closed its output before a response line arrived.
    #[error("server '{server}' closed its output before responding")]
    NoResponse { server: String },

    /// A response line was not a valid JSON-RPC response.
    #[error("malformed response from '{server}': {reason}")]
    MalformedResponse { server: String, reason: String },

    /// The server answered with an error frame.
    #[error("tool error from '{server}': {error}")]
    Tool { server: String, error: ToolError },

    /// A tool result was flagged with `isError`.
    #[error("tool '{tool}' reported failure: {message}")]
    ToolFailed { tool: String, message: String },

    /// No configuration exists for the requested server name.
    #[error("unknown server: {0}")]
    UnknownServer(String),

    /// The client was used after `close()`.
    #[error("client for '{0}' is closed")]
    ClientClosed(String),

    /// No response arrived within the request timeout.
    #[error("timed out after {timeout:?} waiting for '{server}'")]
    Timeout { server: String, timeout: Duration },

    #[error("failed to serialize request: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Returns the server's error payload if this is a [`Error::Tool`].
    pub fn tool_error(&self) -> Option<&ToolError> {
        match self {
            Error::Tool { error, .. } => Some(error),
            _ => None,
        }
    }

    /// Whether the failure happened below the tool layer (process or framing).
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            Error::Spawn { .. }
                | Error::Handshake { .. }
                | Error::NoResponse { .. }
                | Error::MalformedResponse { .. }
                | Error::Timeout { .. }
                | Error::Io(_)
        )
    }
}

/// The `error` member of a JSON-RPC response, kept exactly as received.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolError {
    payload: Value,
}

impl ToolError {
    pub fn new(payload: Value) -> Self {
        Self { payload }
    }

    /// The raw error payload.
    pub fn payload(&self) -> &Value {
        &self.payload
    }

    pub fn into_payload(self) -> Value {
        self.payload
    }

    /// The JSON-RPC error code, when the payload carries one.
    pub fn code(&self) -> Option<i64> {
        self.payload.get("code").and_then(Value::as_i64)
    }

    pub fn message(&self) -> Option<&str> {
        self.payload.get("message").and_then(Value::as_str)
    }
}

impl std::fmt::Display for ToolError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match (self.code(), self.message()) {
            (Some(code), Some(message)) => write!(f, "[{code}] {message}"),
            (None, Some(message)) => f.write_str(message),
            _ => write!(f, "{}", self.payload),
        }
    }
}

impl std::error::Error for ToolError {}

pub type Result<T> = std::result::Result<T, Error>;
