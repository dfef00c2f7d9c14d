//! Server configuration loading.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::protocol::ClientInfo;

/// Default bound on one request/response round trip.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// Default grace period between SIGTERM and a forced kill.
pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// How to launch one tool server.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ServerConfig {
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    /// Merged over the inherited environment; these win on collision.
    #[serde(default)]
    pub env: HashMap<String, String>,
    #[serde(default)]
    pub cwd: Option<PathBuf>,
}

impl ServerConfig {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            args: Vec::new(),
            env: HashMap::new(),
            cwd: None,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }
}

/// The full set of configured servers, keyed by name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServersConfig {
    servers: BTreeMap<String, ServerConfig>,
}

/// Accepted file shapes: a flat map, or one nested under `mcpServers`.
#[derive(Deserialize)]
#[serde(untagged)]
enum ConfigFile {
    Wrapped {
        #[serde(rename = "mcpServers")]
        mcp_servers: BTreeMap<String, ServerConfig>,
    },
    Flat(BTreeMap<String, ServerConfig>),
}

impl From<ConfigFile> for ServersConfig {
    fn from(file: ConfigFile) -> Self {
        let servers = match file {
            ConfigFile::Wrapped { mcp_servers } => mcp_servers,
            ConfigFile::Flat(servers) => servers,
        };
        Self { servers }
    }
}

impl ServersConfig {
    /// Load from a file; `.json` files are JSON, everything else is TOML.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;

        let is_json = path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));

        if is_json {
            Self::from_json(&content)
        } else {
            Self::from_toml(&content)
        }
    }

    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        serde_json::from_str::<ConfigFile>(json)
            .map(Self::from)
            .map_err(|e| ConfigError::Parse(e.to_string()))
    }

    pub fn from_toml(toml: &str) -> Result<Self, ConfigError> {
        toml::from_str::<ConfigFile>(toml)
            .map(Self::from)
            .map_err(|e| ConfigError::Parse(e.to_string()))
    }

    pub fn get(&self, name: &str) -> Option<&ServerConfig> {
        self.servers.get(name)
    }

    pub fn insert(&mut self, name: impl Into<String>, config: ServerConfig) {
        self.servers.insert(name.into(), config);
    }

    /// Server names in sorted order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.servers.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &ServerConfig)> {
        self.servers.iter().map(|(name, config)| (name.as_str(), config))
    }

    pub fn len(&self) -> usize {
        self.servers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.servers.is_empty()
    }
}

impl FromIterator<(String, ServerConfig)> for ServersConfig {
    fn from_iter<I: IntoIterator<Item = (String, ServerConfig)>>(iter: I) -> Self {
        Self {
            servers: iter.into_iter().collect(),
        }
    }
}

/// Per-client tunables shared by every client a registry opens.
#[derive(Debug, Clone)]
pub struct ClientOptions {
    pub request_timeout: Duration,
    pub shutdown_timeout: Duration,
    pub client_info: ClientInfo,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
            client_info: ClientInfo::default(),
        }
    }
}

impl ClientOptions {
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    pub fn with_client_info(mut self, name: impl Into<String>, version: impl Into<String>) -> Self {
        self.client_info = ClientInfo {
            name: name.into(),
            version: version.into(),
        };
        self
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(String),
}
