//! Line-delimited JSON-RPC framing over a byte stream pair.
//!
//! A [`Connection`] writes one request line and then reads lines until the
//! next response arrives. Responses are paired with requests by read order.
//! There is no pipelining: the caller must hold exclusive access for the whole
//! round trip, which `&mut self` enforces.

use std::io::ErrorKind;

use serde_json::Value;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::{Error, Result, ToolError};
use crate::protocol::{Incoming, JsonRpcNotification, JsonRpcRequest, JsonRpcResponse, RequestId};

/// JSON-RPC "method not found".
const METHOD_NOT_FOUND: i64 = -32601;

/// One request sink and one response source talking to a single server.
pub struct Connection<R, W> {
    server: String,
    reader: R,
    writer: W,
    next_id: i64,
}

impl<R, W> Connection<R, W>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    pub fn new(server: impl Into<String>, reader: R, writer: W) -> Self {
        Self {
            server: server.into(),
            reader,
            writer,
            next_id: 1,
        }
    }

    pub fn server(&self) -> &str {
        &self.server
    }

    /// The id the next request will carry.
    pub fn next_id(&self) -> i64 {
        self.next_id
    }

    /// Send a request and wait for its response.
    ///
    /// Returns the `result` member, or [`Error::Tool`] when the server sent an
    /// error frame.
    pub async fn request(&mut self, method: &str, params: Value) -> Result<Value> {
        let id = RequestId::Number(self.next_id);
        self.next_id += 1;

        let request = JsonRpcRequest::new(id.clone(), method, params);
        tracing::trace!(server = %self.server, %id, method, "sending request");
        self.write_frame(&request).await?;

        let response = self.read_response(&id).await?;
        response.into_result().map_err(|payload| Error::Tool {
            server: self.server.clone(),
            error: ToolError::new(payload),
        })
    }

    /// Send a notification; no response is read.
    pub async fn notify(&mut self, method: &str, params: Option<Value>) -> Result<()> {
        let notification = JsonRpcNotification::new(method, params);
        self.write_frame(&notification).await
    }

    async fn write_frame(&mut self, frame: &impl serde::Serialize) -> Result<()> {
        let mut line = serde_json::to_string(frame)?;
        line.push('\n');

        let written = async {
            self.writer.write_all(line.as_bytes()).await?;
            self.writer.flush().await
        }
        .await;

        written.map_err(|e| self.io_error(e))
    }

    async fn read_response(&mut self, id: &RequestId) -> Result<JsonRpcResponse> {
        let mut line = String::new();

        loop {
            line.clear();
            let bytes_read = self
                .reader
                .read_line(&mut line)
                .await
                .map_err(|e| self.io_error(e))?;

            if bytes_read == 0 {
                return Err(Error::NoResponse {
                    server: self.server.clone(),
                });
            }

            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }

            let value: Value =
                serde_json::from_str(trimmed).map_err(|e| self.malformed(e.to_string()))?;

            match Incoming::classify(value).map_err(|reason| self.malformed(reason))? {
                Incoming::Response(response) => {
                    // Correlation is by read order; the id is informational.
                    if let Some(got) = response.id.as_ref().filter(|got| *got != id) {
                        tracing::warn!(
                            server = %self.server,
                            expected = %id,
                            %got,
                            "response id differs from request id"
                        );
                    }
                    return Ok(response);
                }
                Incoming::Notification(method) => {
                    tracing::debug!(server = %self.server, method, "skipping server notification");
                }
                Incoming::Request { id, method } => {
                    tracing::debug!(server = %self.server, %id, method, "rejecting server request");
                    let reply = JsonRpcResponse::error(
                        id,
                        METHOD_NOT_FOUND,
                        format!("method not supported by client: {method}"),
                    );
                    self.write_frame(&reply).await?;
                }
            }
        }
    }

    fn malformed(&self, reason: String) -> Error {
        Error::MalformedResponse {
            server: self.server.clone(),
            reason,
        }
    }

    /// A peer that hung up looks the same whether we notice on write or read.
    fn io_error(&self, e: std::io::Error) -> Error {
        match e.kind() {
            ErrorKind::BrokenPipe | ErrorKind::ConnectionReset | ErrorKind::UnexpectedEof => {
                Error::NoResponse {
                    server: self.server.clone(),
                }
            }
            _ => Error::Io(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio::io::{BufReader, DuplexStream};

    type TestConnection = Connection<BufReader<DuplexStream>, DuplexStream>;

    /// One pipe per direction, so either side can hang up independently.
    fn pipes(server: &str) -> (TestConnection, DuplexStream, DuplexStream) {
        let (to_server, server_in) = tokio::io::duplex(64 * 1024);
        let (server_out, from_server) = tokio::io::duplex(64 * 1024);
        let conn = Connection::new(server, BufReader::new(from_server), to_server);
        (conn, server_in, server_out)
    }

    /// Spawn an in-memory server. `respond` maps each frame it receives to
    /// the lines written back (possibly none).
    fn fake_server<F>(respond: F) -> (TestConnection, tokio::task::JoinHandle<Vec<Value>>)
    where
        F: Fn(&Value) -> Vec<String> + Send + 'static,
    {
        let (conn, server_in, mut server_out) = pipes("fake");

        let handle = tokio::spawn(async move {
            let mut lines = BufReader::new(server_in).lines();
            let mut seen = Vec::new();
            while let Ok(Some(line)) = lines.next_line().await {
                let frame: Value = serde_json::from_str(&line).unwrap();
                for reply in respond(&frame) {
                    server_out.write_all(reply.as_bytes()).await.unwrap();
                    server_out.write_all(b"\n").await.unwrap();
                }
                seen.push(frame);
            }
            seen
        });

        (conn, handle)
    }

    fn echo_params(frame: &Value) -> Vec<String> {
        if frame.get("id").is_none() {
            return Vec::new();
        }
        let reply = json!({"jsonrpc": "2.0", "id": frame["id"], "result": frame["params"]});
        vec![reply.to_string()]
    }

    #[tokio::test]
    async fn ids_strictly_increase() {
        let (mut conn, server) = fake_server(echo_params);

        for _ in 0..5 {
            conn.request("tools/call", json!({"name": "noop", "arguments": {}}))
                .await
                .unwrap();
        }
        assert_eq!(conn.next_id(), 6);
        drop(conn);

        let seen = server.await.unwrap();
        let ids: Vec<i64> = seen.iter().map(|f| f["id"].as_i64().unwrap()).collect();
        assert_eq!(ids, [1, 2, 3, 4, 5]);
    }

    #[tokio::test]
    async fn params_round_trip_unchanged() {
        let (mut conn, _server) = fake_server(echo_params);
        let params = json!({
            "name": "search",
            "arguments": {"query": "aspirin", "limit": 10, "nested": [1, null, {"k": "ü"}]}
        });

        let result = conn.request("tools/call", params.clone()).await.unwrap();
        assert_eq!(result, params);
    }

    #[tokio::test]
    async fn request_frame_shape() {
        let (mut conn, server) = fake_server(echo_params);
        conn.request("tools/list", json!({})).await.unwrap();
        drop(conn);

        let seen = server.await.unwrap();
        assert_eq!(
            seen[0],
            json!({"jsonrpc": "2.0", "id": 1, "method": "tools/list", "params": {}})
        );
    }

    #[tokio::test]
    async fn error_frame_is_tool_error() {
        let (mut conn, _server) = fake_server(|frame| {
            let error = json!({"code": -1, "message": "boom"});
            vec![json!({"jsonrpc": "2.0", "id": frame["id"], "error": error}).to_string()]
        });

        let err = conn.request("tools/call", json!({})).await.unwrap_err();
        match err {
            Error::Tool { server, error } => {
                assert_eq!(server, "fake");
                assert_eq!(error.payload(), &json!({"code": -1, "message": "boom"}));
            }
            other => panic!("expected tool error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn eof_before_response_is_no_response() {
        let (mut conn, server_in, server_out) = pipes("gone");
        drop(server_out);

        let err = conn.request("tools/call", json!({})).await.unwrap_err();
        assert!(matches!(err, Error::NoResponse { ref server } if server == "gone"), "{err:?}");
        drop(server_in);
    }

    #[tokio::test]
    async fn write_to_closed_peer_is_no_response() {
        let (mut conn, server_in, _server_out) = pipes("gone");
        drop(server_in);

        let err = conn.request("tools/call", json!({})).await.unwrap_err();
        assert!(matches!(err, Error::NoResponse { .. }), "{err:?}");
    }

    #[tokio::test]
    async fn garbage_line_is_malformed() {
        let (mut conn, _server) = fake_server(|_| vec!["this is not json".to_string()]);
        let err = conn.request("tools/call", json!({})).await.unwrap_err();
        assert!(matches!(err, Error::MalformedResponse { .. }), "{err:?}");
    }

    #[tokio::test]
    async fn response_without_id_is_taken_in_read_order() {
        let (mut conn, _server) = fake_server(|_| {
            vec![r#"{"result":{"content":[{"text":"{\"pong\":true}"}]}}"#.to_string()]
        });

        let result = conn.request("tools/call", json!({"name": "ping"})).await.unwrap();
        assert_eq!(
            crate::output::ToolOutput::from_result(result),
            crate::output::ToolOutput::Structured(json!({"pong": true}))
        );
    }

    #[tokio::test]
    async fn null_id_error_frame_is_tool_error() {
        let (mut conn, _server) = fake_server(|_| {
            let error = json!({"code": -32700, "message": "parse error"});
            vec![json!({"jsonrpc": "2.0", "id": null, "error": error}).to_string()]
        });

        let err = conn.request("tools/call", json!({})).await.unwrap_err();
        let tool_error = err.tool_error().expect("expected a tool error");
        assert_eq!(tool_error.code(), Some(-32700));
        assert_eq!(tool_error.message(), Some("parse error"));
    }

    #[tokio::test]
    async fn differing_ids_do_not_reject_the_response() {
        let (mut conn, _server) = fake_server(|frame| {
            let reply = if frame["id"] == 1 {
                json!({"jsonrpc": "2.0", "id": "1", "result": {"ok": true}})
            } else {
                json!({"jsonrpc": "2.0", "id": 99, "result": {"ok": 2}})
            };
            vec![reply.to_string()]
        });

        let first = conn.request("tools/call", json!({})).await.unwrap();
        assert_eq!(first, json!({"ok": true}));
        let second = conn.request("tools/call", json!({})).await.unwrap();
        assert_eq!(second, json!({"ok": 2}));
    }

    #[tokio::test]
    async fn skips_notifications_and_blank_lines() {
        let (mut conn, _server) = fake_server(|frame| {
            let log = json!({"level": "info"});
            vec![
                String::new(),
                json!({"jsonrpc": "2.0", "method": "notifications/message", "params": log})
                    .to_string(),
                json!({"jsonrpc": "2.0", "id": frame["id"], "result": {"ok": true}}).to_string(),
            ]
        });

        let result = conn.request("tools/call", json!({})).await.unwrap();
        assert_eq!(result, json!({"ok": true}));
    }

    #[tokio::test]
    async fn answers_server_requests_with_method_not_found() {
        let (mut conn, server) = fake_server(|frame| {
            if frame.get("method").is_none() {
                return Vec::new();
            }
            vec![
                json!({"jsonrpc": "2.0", "id": "srv-1", "method": "roots/list"}).to_string(),
                json!({"jsonrpc": "2.0", "id": frame["id"], "result": {}}).to_string(),
            ]
        });

        conn.request("tools/list", json!({})).await.unwrap();
        drop(conn);

        let seen = server.await.unwrap();
        let reply = seen
            .iter()
            .find(|f| f["id"] == "srv-1")
            .expect("client should answer the server request");
        assert_eq!(reply["error"]["code"], METHOD_NOT_FOUND);
    }

    #[tokio::test]
    async fn notify_writes_frame_without_id() {
        let (mut conn, server) = fake_server(|_| Vec::new());
        conn.notify("notifications/initialized", None).await.unwrap();
        drop(conn);

        let seen = server.await.unwrap();
        assert_eq!(
            seen,
            [json!({"jsonrpc": "2.0", "method": "notifications/initialized"})]
        );
    }
}
