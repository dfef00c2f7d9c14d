//! Tool server process management (spawn, round trips, teardown).

use std::process::Stdio;
use std::time::Duration;

use serde_json::{Value, json};
use tokio::io::BufReader;
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::Mutex;
use tokio::time::timeout;

use crate::config::{ClientOptions, ServerConfig};
use crate::error::{Error, Result};
use crate::output::{ToolOutput, reported_failure};
use crate::protocol::{CallToolParams, InitializeParams, InitializeResult, ListToolsResult, Tool};
use crate::transport::Connection;

type StdioConnection = Connection<BufReader<ChildStdout>, ChildStdin>;

enum State {
    Open { child: Child, conn: StdioConnection },
    Closed,
}

/// A live connection to one tool server process.
///
/// Created by [`ToolClient::open`], which spawns the process and completes the
/// `initialize` handshake before returning. Round trips hold an internal lock
/// for their full duration, so concurrent callers are served one at a time.
///
/// Call [`close`](Self::close) to shut the server down. Dropping the last
/// handle kills the process instead.
pub struct ToolClient {
    name: String,
    options: ClientOptions,
    server_info: InitializeResult,
    state: Mutex<State>,
}

impl ToolClient {
    /// Spawn a server with default options and run the handshake.
    pub async fn open(name: impl Into<String>, config: &ServerConfig) -> Result<Self> {
        Self::open_with(name, config, &ClientOptions::default()).await
    }

    /// Spawn a server and run the handshake.
    pub async fn open_with(
        name: impl Into<String>,
        config: &ServerConfig,
        options: &ClientOptions,
    ) -> Result<Self> {
        let name = name.into();

        let mut cmd = Command::new(&config.command);
        cmd.args(&config.args)
            .envs(&config.env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true);
        if let Some(cwd) = &config.cwd {
            cmd.current_dir(cwd);
        }

        let mut child = cmd.spawn().map_err(|source| Error::Spawn {
            server: name.clone(),
            source,
        })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| spawn_error(&name, "failed to capture stdin"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| spawn_error(&name, "failed to capture stdout"))?;

        tracing::debug!(
            server = %name,
            command = %config.command,
            pid = ?child.id(),
            "spawned tool server"
        );

        let mut conn = Connection::new(name.clone(), BufReader::new(stdout), stdin);

        let server_info = match handshake(&mut conn, options).await {
            Ok(info) => info,
            Err(source) => {
                drop(conn);
                terminate(&name, child, options.shutdown_timeout).await;
                return Err(Error::Handshake {
                    server: name,
                    source: Box::new(source),
                });
            }
        };

        tracing::info!(
            server = %name,
            server_name = server_info.server_info.as_ref().map(|i| i.name.as_str()),
            "tool server initialized"
        );

        Ok(Self {
            name,
            options: options.clone(),
            server_info,
            state: Mutex::new(State::Open { child, conn }),
        })
    }

    /// The configured server name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// What the server reported during the handshake.
    pub fn server_info(&self) -> &InitializeResult {
        &self.server_info
    }

    /// Call a tool and return the raw `result` value.
    pub async fn call_tool(&self, tool: &str, arguments: Value) -> Result<Value> {
        let params = serde_json::to_value(CallToolParams {
            name: tool,
            arguments,
        })?;
        self.request("tools/call", params).await
    }

    /// Call a tool and decode its result into a [`ToolOutput`].
    ///
    /// Fails with [`Error::ToolFailed`] when the result is flagged `isError`.
    pub async fn call_tool_output(&self, tool: &str, arguments: Value) -> Result<ToolOutput> {
        let result = self.call_tool(tool, arguments).await?;

        if let Some(message) = reported_failure(&result) {
            return Err(Error::ToolFailed {
                tool: tool.to_string(),
                message,
            });
        }

        Ok(ToolOutput::from_result(result))
    }

    /// List the tools the server exposes.
    pub async fn list_tools(&self) -> Result<Vec<Tool>> {
        let result = self.request("tools/list", json!({})).await?;
        let list: ListToolsResult =
            serde_json::from_value(result).map_err(|e| Error::MalformedResponse {
                server: self.name.clone(),
                reason: format!("invalid tools/list result: {e}"),
            })?;
        Ok(list.tools)
    }

    /// Whether the server process is still running.
    pub async fn is_running(&self) -> bool {
        match &mut *self.state.lock().await {
            State::Open { child, .. } => matches!(child.try_wait(), Ok(None)),
            State::Closed => false,
        }
    }

    pub async fn is_closed(&self) -> bool {
        matches!(*self.state.lock().await, State::Closed)
    }

    /// Shut the server down: close its stdin, send SIGTERM, and wait up to the
    /// shutdown timeout before killing it.
    ///
    /// Closing an already closed client does nothing.
    pub async fn close(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        let State::Open { child, conn } = std::mem::replace(&mut *state, State::Closed) else {
            return Ok(());
        };

        drop(conn);
        terminate(&self.name, child, self.options.shutdown_timeout).await;
        tracing::debug!(server = %self.name, "tool client closed");
        Ok(())
    }

    async fn request(&self, method: &str, params: Value) -> Result<Value> {
        let mut state = self.state.lock().await;
        let State::Open { conn, .. } = &mut *state else {
            return Err(Error::ClientClosed(self.name.clone()));
        };

        let request_timeout = self.options.request_timeout;
        match timeout(request_timeout, conn.request(method, params)).await {
            Ok(result) => result,
            Err(_) => {
                // The read position is now unknown; nothing after this can be trusted.
                tracing::warn!(
                    server = %self.name,
                    method,
                    timeout = ?request_timeout,
                    "request timed out, closing client"
                );
                if let State::Open { child, conn } = std::mem::replace(&mut *state, State::Closed) {
                    drop(conn);
                    terminate(&self.name, child, self.options.shutdown_timeout).await;
                }
                Err(Error::Timeout {
                    server: self.name.clone(),
                    timeout: request_timeout,
                })
            }
        }
    }
}

impl std::fmt::Debug for ToolClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolClient")
            .field("name", &self.name)
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

async fn handshake(
    conn: &mut StdioConnection,
    options: &ClientOptions,
) -> Result<InitializeResult> {
    let params = serde_json::to_value(InitializeParams::new(options.client_info.clone()))?;

    let exchange = async {
        let result = conn.request("initialize", params).await?;
        let info: InitializeResult =
            serde_json::from_value(result).map_err(|e| Error::MalformedResponse {
                server: conn.server().to_string(),
                reason: format!("invalid initialize result: {e}"),
            })?;
        conn.notify("notifications/initialized", None).await?;
        Ok::<_, Error>(info)
    };

    match timeout(options.request_timeout, exchange).await {
        Ok(result) => result,
        Err(_) => Err(Error::Timeout {
            server: conn.server().to_string(),
            timeout: options.request_timeout,
        }),
    }
}

fn spawn_error(server: &str, reason: &str) -> Error {
    Error::Spawn {
        server: server.to_string(),
        source: std::io::Error::other(reason.to_string()),
    }
}

/// Stop a child that may or may not still be running. Never fails.
async fn terminate(server: &str, mut child: Child, grace: Duration) {
    match child.try_wait() {
        Ok(Some(status)) => {
            tracing::debug!(server, %status, "tool server already exited");
            return;
        }
        Ok(None) => {}
        Err(e) => tracing::warn!(server, error = %e, "failed to poll tool server"),
    }

    send_terminate(server, &mut child);

    match timeout(grace, child.wait()).await {
        Ok(Ok(status)) => tracing::debug!(server, %status, "tool server exited"),
        Ok(Err(e)) => tracing::warn!(server, error = %e, "failed to wait for tool server"),
        Err(_) => {
            tracing::warn!(server, grace = ?grace, "tool server ignored SIGTERM, killing");
            if let Err(e) = child.kill().await {
                tracing::warn!(server, error = %e, "failed to kill tool server");
            }
        }
    }
}

#[cfg(unix)]
fn send_terminate(server: &str, child: &mut Child) {
    use nix::sys::signal::{self, Signal};
    use nix::unistd::Pid;

    let Some(pid) = child.id() else {
        return;
    };
    if let Err(e) = signal::kill(Pid::from_raw(pid as i32), Signal::SIGTERM) {
        tracing::warn!(server, pid, error = %e, "failed to send SIGTERM");
    }
}

#[cfg(not(unix))]
fn send_terminate(server: &str, child: &mut Child) {
    if let Err(e) = child.start_kill() {
        tracing::warn!(server, error = %e, "failed to terminate tool server");
    }
}
