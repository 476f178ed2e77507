//! RPC Correlator：把行流变成「请求 / 响应」语义
//!
//! - 请求 id 从 1 开始严格递增、永不复用
//! - 待决请求表 id -> oneshot::Sender；响应到达与超时两条路径竞争「从表中移除」，只有移除者能完成请求，
//!   因此同一个 id 至多完成一次
//! - 入站行解析失败、无 id、id 无人认领（已超时或伪造）一律记日志后丢弃，不影响其他请求

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use serde_json::Value;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use crate::core::AgentError;
use crate::mcp::channel::{LineReceiver, LineSink};
use crate::mcp::protocol::{JsonRpcRequest, JsonRpcResponse, RpcErrorObject};
use crate::observability;

/// 日志中原始行的最大预览长度
const LINE_PREVIEW_CHARS: usize = 200;

type Outcome = Result<Value, RpcErrorObject>;

/// 一个在途请求；只存在于待决表中
struct PendingRequest {
    method: String,
    created_at: Instant,
    tx: oneshot::Sender<Outcome>,
}

type PendingMap = Arc<Mutex<HashMap<u64, PendingRequest>>>;

fn lock(pending: &PendingMap) -> MutexGuard<'_, HashMap<u64, PendingRequest>> {
    pending.lock().unwrap_or_else(|e| e.into_inner())
}

fn preview(line: &str) -> String {
    observability::preview(line, LINE_PREVIEW_CHARS)
}

/// 处理一条入站行：解析、按 id 取出待决请求并完成它
fn dispatch_line(pending: &PendingMap, line: &str) {
    let response: JsonRpcResponse = match serde_json::from_str(line) {
        Ok(r) => r,
        Err(e) => {
            tracing::warn!(error = %e, line = %preview(line), "discarding malformed line from subprocess");
            return;
        }
    };

    // 子进程发起的请求 / 通知（带 method），不是对我们的响应
    if let Some(method) = response.method.as_deref() {
        tracing::debug!(method = %method, "ignoring server-initiated message");
        return;
    }

    let Some(id) = response.numeric_id() else {
        tracing::debug!(line = %preview(line), "discarding message without numeric id");
        return;
    };

    let entry = lock(pending).remove(&id);
    match entry {
        Some(req) => {
            tracing::debug!(
                id,
                method = %req.method,
                elapsed_ms = req.created_at.elapsed().as_millis() as u64,
                "rpc response"
            );
            if req.tx.send(response.into_outcome()).is_err() {
                tracing::debug!(id, "caller already gone");
            }
        }
        None => {
            tracing::warn!(id, "no pending request for response (late or spurious), discarded");
        }
    }
}

/// 请求关联器：持有行输出端、待决表与入站分发任务
pub struct RpcCorrelator {
    sink: Arc<dyn LineSink>,
    pending: PendingMap,
    next_id: AtomicU64,
    default_timeout: Duration,
    dispatcher: JoinHandle<()>,
}

impl RpcCorrelator {
    /// 挂接到一个行输出端与对应的入站行队列；必须在 tokio 运行时内调用
    pub fn new(sink: Arc<dyn LineSink>, mut lines: LineReceiver, default_timeout: Duration) -> Self {
        let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));
        let pending_reader = Arc::clone(&pending);
        let dispatcher = tokio::spawn(async move {
            while let Some(line) = lines.recv().await {
                dispatch_line(&pending_reader, &line);
            }
            let left = lock(&pending_reader).len();
            tracing::info!(pending = left, "line stream ended; pending requests will time out");
        });

        Self {
            sink,
            pending,
            next_id: AtomicU64::new(1),
            default_timeout,
            dispatcher,
        }
    }

    /// 当前在途请求数
    pub fn pending_count(&self) -> usize {
        lock(&self.pending).len()
    }

    /// 以默认超时发起调用
    pub async fn call(&self, method: &str, params: Option<Value>) -> Result<Value, AgentError> {
        self.call_with_timeout(method, params, self.default_timeout)
            .await
    }

    /// 发起调用并挂起，直到匹配响应到达、收到错误或超时
    ///
    /// 超时覆盖写出与等待两段；调用方中途丢弃 future 时待决项同样被移除。
    pub async fn call_with_timeout(
        &self,
        method: &str,
        params: Option<Value>,
        timeout: Duration,
    ) -> Result<Value, AgentError> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let line = JsonRpcRequest::new(id, method, params).to_line()?;

        let (tx, rx) = oneshot::channel();
        lock(&self.pending).insert(
            id,
            PendingRequest {
                method: method.to_string(),
                created_at: Instant::now(),
                tx,
            },
        );
        let _guard = PendingGuard {
            pending: &self.pending,
            id,
        };
        tracing::debug!(id, method = %method, "rpc request");

        let exchange = async {
            if let Err(e) = self.sink.send_line(line).await {
                tracing::warn!(id, method = %method, error = %e, "rpc request not sent");
                return Err(e);
            }
            rx.await.map_err(|_| AgentError::ChannelClosed)
        };

        match tokio::time::timeout(timeout, exchange).await {
            Ok(Ok(Ok(result))) => Ok(result),
            Ok(Ok(Err(err))) => Err(AgentError::RemoteToolError {
                code: err.code,
                message: err.message,
            }),
            Ok(Err(e)) => Err(e),
            Err(_) => {
                tracing::warn!(id, method = %method, timeout_ms = timeout.as_millis() as u64, "rpc request timed out");
                Err(AgentError::RequestTimeout {
                    id,
                    method: method.to_string(),
                    timeout_ms: timeout.as_millis() as u64,
                })
            }
        }
    }
}

/// 离开调用作用域时移除待决项（正常完成、超时、写出失败或被取消）
struct PendingGuard<'a> {
    pending: &'a PendingMap,
    id: u64,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        lock(self.pending).remove(&self.id);
    }
}

impl Drop for RpcCorrelator {
    fn drop(&mut self) {
        self.dispatcher.abort();
    }
}
