//! Shared clients keyed by server name.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;

use crate::client::ToolClient;
use crate::config::{ClientOptions, ServersConfig};
use crate::error::{Error, Result};

/// Get-or-create access to one [`ToolClient`] per configured server.
///
/// A registry is an ordinary value owned by the application. Servers are
/// spawned lazily on first use and stay up until [`close_all`](Self::close_all)
/// is called. Dropping the registry without `close_all` still kills every
/// server whose last handle goes away, but skips the graceful SIGTERM.
pub struct ClientRegistry {
    config: ServersConfig,
    options: ClientOptions,
    clients: Mutex<HashMap<String, Arc<ToolClient>>>,
}

impl ClientRegistry {
    pub fn new(config: ServersConfig) -> Self {
        Self::with_options(config, ClientOptions::default())
    }

    pub fn with_options(config: ServersConfig, options: ClientOptions) -> Self {
        Self {
            config,
            options,
            clients: Mutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &ServersConfig {
        &self.config
    }

    /// Configured server names, whether or not they are running.
    pub fn server_names(&self) -> impl Iterator<Item = &str> {
        self.config.names()
    }

    /// Return the client for `name`, spawning the server on first use.
    ///
    /// The lock is held while a new server starts, so concurrent callers asking
    /// for the same name never spawn it twice. A failed open leaves nothing
    /// behind and the next call tries again. A cached client is returned as is;
    /// a server that died since shows up as an error on its next call.
    pub async fn get_client(&self, name: &str) -> Result<Arc<ToolClient>> {
        let config = self
            .config
            .get(name)
            .ok_or_else(|| Error::UnknownServer(name.to_string()))?;

        let mut clients = self.clients.lock().await;
        if let Some(client) = clients.get(name) {
            return Ok(Arc::clone(client));
        }

        let client = Arc::new(ToolClient::open_with(name, config, &self.options).await?);
        clients.insert(name.to_string(), Arc::clone(&client));
        Ok(client)
    }

    /// Close every client and forget them all.
    pub async fn close_all(&self) {
        let clients: Vec<_> = self.clients.lock().await.drain().collect();
        for (name, client) in clients {
            if let Err(e) = client.close().await {
                tracing::warn!(server = %name, error = %e, "failed to close tool client");
            }
        }
    }

    /// Number of running clients.
    pub async fn len(&self) -> usize {
        self.clients.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.clients.lock().await.is_empty()
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::client::tests::{IDLE, reply, script_server};
    use crate::config::ServerConfig;
    use serde_json::json;
    use std::path::Path;

    /// A server that appends a line to `log` every time it starts.
    fn counted_server(log: &Path) -> ServerConfig {
        let mut config = script_server(IDLE);
        let script = config.args.pop().unwrap();
        config
            .arg(format!("echo started >> \"$SPAWN_LOG\"; {script}"))
            .env("SPAWN_LOG", log.to_str().unwrap())
    }

    fn spawn_count(log: &Path) -> usize {
        std::fs::read_to_string(log)
            .map(|s| s.lines().count())
            .unwrap_or(0)
    }

    #[tokio::test]
    async fn same_name_returns_same_client() {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("spawns.log");
        let config: ServersConfig = [("x".to_string(), counted_server(&log))].into_iter().collect();
        let registry = ClientRegistry::new(config);

        let first = registry.get_client("x").await.unwrap();
        let second = registry.get_client("x").await.unwrap();
        let third = registry.get_client("x").await.unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert!(Arc::ptr_eq(&first, &third));
        assert_eq!(registry.len().await, 1);
        assert_eq!(spawn_count(&log), 1);

        registry.close_all().await;
    }

    #[tokio::test]
    async fn concurrent_first_use_spawns_once() {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("spawns.log");
        let config: ServersConfig = [("x".to_string(), counted_server(&log))].into_iter().collect();
        let registry = Arc::new(ClientRegistry::new(config));

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let registry = Arc::clone(&registry);
                tokio::spawn(async move { registry.get_client("x").await.unwrap() })
            })
            .collect();

        let mut clients = Vec::new();
        for handle in handles {
            clients.push(handle.await.unwrap());
        }

        assert!(clients.iter().all(|c| Arc::ptr_eq(c, &clients[0])));
        assert_eq!(spawn_count(&log), 1);
        registry.close_all().await;
    }

    #[tokio::test]
    async fn unknown_server_spawns_nothing() {
        let registry = ClientRegistry::new(ServersConfig::default());
        let err = registry.get_client("does-not-exist").await.unwrap_err();
        assert!(matches!(err, Error::UnknownServer(ref name) if name == "does-not-exist"));
        assert!(registry.is_empty().await);
    }

    #[tokio::test]
    async fn failed_open_is_not_cached() {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("spawns.log");
        let broken = ServerConfig::new("sh")
            .arg("-c")
            .arg("echo started >> \"$SPAWN_LOG\"; exit 1")
            .env("SPAWN_LOG", log.to_str().unwrap());
        let config: ServersConfig = [("broken".to_string(), broken)].into_iter().collect();
        let registry = ClientRegistry::new(config);

        let err = registry.get_client("broken").await.unwrap_err();
        assert!(matches!(err, Error::Handshake { .. }), "{err:?}");
        assert!(registry.is_empty().await);

        registry.get_client("broken").await.unwrap_err();
        assert_eq!(spawn_count(&log), 2);
    }

    #[tokio::test]
    async fn close_all_closes_and_clears() {
        let config: ServersConfig = [
            ("a".to_string(), script_server(IDLE)),
            ("b".to_string(), script_server(&format!("{}{IDLE}", reply(2, r#"{"tools":[]}"#)))),
        ]
        .into_iter()
        .collect();
        let registry = ClientRegistry::new(config);
        assert_eq!(registry.server_names().collect::<Vec<_>>(), ["a", "b"]);

        let a = registry.get_client("a").await.unwrap();
        let b = registry.get_client("b").await.unwrap();
        assert!(b.list_tools().await.unwrap().is_empty());
        assert_eq!(registry.len().await, 2);

        registry.close_all().await;
        assert!(registry.is_empty().await);
        assert!(a.is_closed().await);
        assert!(b.is_closed().await);

        let err = a.call_tool("ping", json!({})).await.unwrap_err();
        assert!(matches!(err, Error::ClientClosed(_)));

        // A fresh client is opened after teardown.
        let again = registry.get_client("a").await.unwrap();
        assert!(!Arc::ptr_eq(&a, &again));
        registry.close_all().await;
    }
}
