//! 本地子进程工具服务器连接（stdin / stdout 上逐行 JSON-RPC）
//!
//! 读循环按响应 id 唤醒对应的等待者，因此同一连接上的并发调用可以交错进行。
//! 带 method 的行是服务器发来的请求或通知，不参与 id 匹配（双方 id 各自从 1 计数）；`ping` 直接应答。

use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinHandle;

use super::jsonrpc::{JsonRpcError, JsonRpcRequest, JsonRpcResponse, CLIENT_NAME, PROTOCOL_VERSION};

type PendingMap = Arc<Mutex<HashMap<u64, oneshot::Sender<JsonRpcResponse>>>>;

pub struct StdioConnection {
    server: String,
    stdin: Arc<Mutex<ChildStdin>>,
    child: Mutex<Child>,
    pending: PendingMap,
    next_id: AtomicU64,
    closed: Arc<AtomicBool>,
    request_timeout: Duration,
    reader: JoinHandle<()>,
}

impl StdioConnection {
    /// 启动子进程并完成 initialize 握手
    pub async fn connect(
        server: &str,
        command: &str,
        args: &[String],
        env: &BTreeMap<String, String>,
        cwd: Option<&Path>,
        request_timeout: Duration,
    ) -> Result<Self, JsonRpcError> {
        let mut cmd = Command::new(command);
        cmd.args(args)
            .envs(env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true);
        if let Some(dir) = cwd {
            cmd.current_dir(dir);
        }
        let mut child = cmd
            .spawn()
            .map_err(|e| JsonRpcError::Transport(format!("failed to spawn '{command}': {e}")))?;
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| JsonRpcError::Transport("child stdin not piped".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| JsonRpcError::Transport("child stdout not piped".to_string()))?;

        let stdin = Arc::new(Mutex::new(stdin));
        let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));
        let closed = Arc::new(AtomicBool::new(false));
        let reader = tokio::spawn(read_loop(
            server.to_string(),
            stdout,
            stdin.clone(),
            pending.clone(),
            closed.clone(),
        ));

        let conn = Self {
            server: server.to_string(),
            stdin,
            child: Mutex::new(child),
            pending,
            next_id: AtomicU64::new(1),
            closed,
            request_timeout,
            reader,
        };
        conn.initialize().await?;
        Ok(conn)
    }

    async fn initialize(&self) -> Result<(), JsonRpcError> {
        let params = json!({
            "protocolVersion": PROTOCOL_VERSION,
            "capabilities": {},
            "clientInfo": {"name": CLIENT_NAME, "version": env!("CARGO_PKG_VERSION")},
        });
        self.request("initialize", Some(params)).await?;
        self.write_line(&JsonRpcRequest::notification("notifications/initialized"))
            .await
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    async fn write_line(&self, request: &JsonRpcRequest) -> Result<(), JsonRpcError> {
        let line = serde_json::to_vec(request)?;
        write_json_line(&self.stdin, line).await.map_err(|e| {
            tracing::warn!(server = %self.server, error = %e, "Failed to write to tool server stdin");
            self.closed.store(true, Ordering::SeqCst);
            JsonRpcError::Closed
        })
    }

    /// 发送请求并等待同 id 的响应
    pub async fn request(&self, method: &str, params: Option<Value>) -> Result<Value, JsonRpcError> {
        if self.is_closed() {
            return Err(JsonRpcError::Closed);
        }
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(id, tx);

        if let Err(e) = self.write_line(&JsonRpcRequest::new(id, method, params)).await {
            self.pending.lock().await.remove(&id);
            return Err(e);
        }

        match tokio::time::timeout(self.request_timeout, rx).await {
            Ok(Ok(response)) => response.into_result(),
            Ok(Err(_)) => Err(JsonRpcError::Closed),
            Err(_) => {
                self.pending.lock().await.remove(&id);
                Err(JsonRpcError::Timeout(method.to_string()))
            }
        }
    }

    pub async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.reader.abort();
        if let Err(e) = self.child.lock().await.start_kill() {
            tracing::debug!(server = %self.server, error = %e, "Tool server already exited");
        }
    }
}

impl Drop for StdioConnection {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

async fn write_json_line(stdin: &Mutex<ChildStdin>, mut line: Vec<u8>) -> std::io::Result<()> {
    line.push(b'\n');
    let mut stdin = stdin.lock().await;
    stdin.write_all(&line).await?;
    stdin.flush().await
}

/// 应答服务器发来的请求：ping 返回空结果，其余返回 method not found
async fn answer_server_request(server: &str, stdin: &Mutex<ChildStdin>, id: Value, method: &str) {
    let reply = if method == "ping" {
        json!({"jsonrpc": "2.0", "id": id, "result": {}})
    } else {
        json!({
            "jsonrpc": "2.0",
            "id": id,
            "error": {"code": -32601, "message": format!("method not supported by client: {method}")},
        })
    };
    let written = match serde_json::to_vec(&reply) {
        Ok(line) => write_json_line(stdin, line).await,
        Err(e) => Err(std::io::Error::new(std::io::ErrorKind::InvalidData, e)),
    };
    if let Err(e) = written {
        tracing::warn!(server = %server, method = %method, error = %e, "Failed to answer tool server request");
    }
}

async fn read_loop(
    server: String,
    stdout: ChildStdout,
    stdin: Arc<Mutex<ChildStdin>>,
    pending: PendingMap,
    closed: Arc<AtomicBool>,
) {
    let mut lines = BufReader::new(stdout).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                if line.trim().is_empty() {
                    continue;
                }
                let response = match serde_json::from_str::<JsonRpcResponse>(&line) {
                    Ok(r) => r,
                    Err(e) => {
                        tracing::warn!(server = %server, error = %e, "Ignoring non JSON-RPC line from tool server");
                        continue;
                    }
                };
                if let Some(method) = response.method.clone() {
                    match response.id.clone() {
                        Some(id) => {
                            tracing::debug!(server = %server, method = %method, "Tool server request");
                            answer_server_request(&server, &stdin, id, &method).await;
                        }
                        None => {
                            tracing::debug!(server = %server, method = %method, "Tool server notification");
                        }
                    }
                    continue;
                }
                match response.id_u64() {
                    Some(id) => {
                        if let Some(waiter) = pending.lock().await.remove(&id) {
                            let _ = waiter.send(response);
                        } else {
                            tracing::debug!(server = %server, id, "Response for unknown request id");
                        }
                    }
                    None => {
                        tracing::debug!(server = %server, "Ignoring tool server message without id");
                    }
                }
            }
            Ok(None) => {
                tracing::debug!(server = %server, "Tool server stdout closed");
                break;
            }
            Err(e) => {
                tracing::warn!(server = %server, error = %e, "Error reading tool server stdout");
                break;
            }
        }
    }
    closed.store(true, Ordering::SeqCst);
    // 丢弃所有等待者，使其收到 Closed
    pending.lock().await.clear();
}
