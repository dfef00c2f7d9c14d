//! Client library for JSON-RPC tool servers running as child processes.
//!
//! Each server is an external program that reads newline-delimited JSON-RPC
//! 2.0 requests on stdin and writes one response line per request on stdout.
//! A [`ToolClient`] owns one such process: it spawns it, performs the
//! `initialize` handshake, runs `tools/call` and `tools/list` round trips one
//! at a time, and shuts the process down. A [`ClientRegistry`] hands out one
//! shared client per configured server name.
//!
//! # Example
//!
//! ```no_run
//! use toolclient::{ClientRegistry, ServersConfig, ToolOutput};
//!
//! # async fn example() -> toolclient::Result<()> {
//! let config = ServersConfig::from_toml(r#"
//!     [trials]
//!     command = "trials-server"
//!     args = ["--stdio"]
//! "#)?;
//!
//! let registry = ClientRegistry::new(config);
//! let client = registry.get_client("trials").await?;
//!
//! for tool in client.list_tools().await? {
//!     println!("Tool: {}", tool.name);
//! }
//!
//! let output = client
//!     .call_tool_output("search", serde_json::json!({ "condition": "asthma" }))
//!     .await?;
//! match output {
//!     ToolOutput::Structured(value) => println!("{value:#}"),
//!     ToolOutput::Text(text) => println!("{text}"),
//!     ToolOutput::Data(data) => println!("binary payload: {data}"),
//! }
//!
//! registry.close_all().await;
//! # Ok(())
//! # }
//! ```

mod client;
mod config;
mod error;
mod output;
mod protocol;
mod registry;
mod transport;

pub use client::ToolClient;
pub use config::{
    ClientOptions, ConfigError, DEFAULT_REQUEST_TIMEOUT, DEFAULT_SHUTDOWN_TIMEOUT, ServerConfig,
    ServersConfig,
};
pub use error::{Error, Result, ToolError};
pub use output::ToolOutput;
pub use protocol::{
    ClientInfo, InitializeResult, JsonRpcRequest, JsonRpcResponse, PROTOCOL_VERSION, RequestId,
    ServerCapabilities, ServerInfo, Tool,
};
pub use registry::ClientRegistry;
pub use transport::Connection;
