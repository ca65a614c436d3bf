//! 远程工具服务器连接：每个 JSON-RPC 请求一次 HTTP POST

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use reqwest::Client;
use serde_json::{json, Value};

use super::jsonrpc::{JsonRpcError, JsonRpcRequest, JsonRpcResponse, CLIENT_NAME, PROTOCOL_VERSION};

pub struct HttpConnection {
    server: String,
    client: Client,
    url: String,
    bearer_token: Option<String>,
    next_id: AtomicU64,
}

impl HttpConnection {
    pub async fn connect(
        server: &str,
        url: &str,
        bearer_token_env: Option<&str>,
        request_timeout: Duration,
    ) -> Result<Self, JsonRpcError> {
        let client = Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| JsonRpcError::Transport(e.to_string()))?;
        let bearer_token = bearer_token_env.and_then(|var| std::env::var(var).ok());
        if bearer_token_env.is_some() && bearer_token.is_none() {
            tracing::warn!(server = %server, "Bearer token env var not set, connecting without auth");
        }
        let conn = Self {
            server: server.to_string(),
            client,
            url: url.to_string(),
            bearer_token,
            next_id: AtomicU64::new(1),
        };
        let params = json!({
            "protocolVersion": PROTOCOL_VERSION,
            "capabilities": {},
            "clientInfo": {"name": CLIENT_NAME, "version": env!("CARGO_PKG_VERSION")},
        });
        conn.request("initialize", Some(params)).await?;
        Ok(conn)
    }

    pub async fn request(&self, method: &str, params: Option<Value>) -> Result<Value, JsonRpcError> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let mut builder = self
            .client
            .post(&self.url)
            .json(&JsonRpcRequest::new(id, method, params));
        if let Some(token) = &self.bearer_token {
            builder = builder.bearer_auth(token);
        }

        let response = builder.send().await.map_err(|e| {
            if e.is_timeout() {
                JsonRpcError::Timeout(method.to_string())
            } else {
                JsonRpcError::Transport(e.to_string())
            }
        })?;
        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(JsonRpcError::Transport(format!(
                "{} returned {}: {}",
                self.server, status, text
            )));
        }
        let body: JsonRpcResponse = response
            .json()
            .await
            .map_err(|e| JsonRpcError::Decode(e.to_string()))?;
        body.into_result()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_unreachable_server_is_transport_error() {
        let err = HttpConnection::connect("remote", "http://127.0.0.1:9/rpc", None, Duration::from_secs(2))
            .await
            .err()
            .unwrap();
        assert!(matches!(err, JsonRpcError::Transport(_) | JsonRpcError::Timeout(_)));
    }
}
