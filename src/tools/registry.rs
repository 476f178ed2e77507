//! 工具注册表
//!
//! 两类工具共用一张表：远程工具由 MCP 握手（initialize + tools/list）发现，经 tools/call 调用；
//! 本地工具实现 Tool trait，启动时注册，调用时经 ToolExecutor 加超时并审计。
//! 同名时本地优先，冲突的远程工具在发现阶段即被丢弃。

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::AgentError;
use crate::mcp::protocol::{
    CallToolParams, ClientInfo, InitializeParams, ListToolsResult, METHOD_INITIALIZE,
    METHOD_TOOLS_CALL, METHOD_TOOLS_LIST,
};
use crate::mcp::RpcCorrelator;
use crate::tools::ToolExecutor;

/// 默认本地工具超时
pub const DEFAULT_TOOL_TIMEOUT: Duration = Duration::from_secs(30);

/// 工具描述：名称、说明与输入参数 JSON Schema（与 MCP tools/list 的条目同形）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDescriptor {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(rename = "inputSchema", default = "empty_object")]
    pub input_schema: Value,
}

fn empty_object() -> Value {
    Value::Object(Default::default())
}

/// 工具 trait：名称、描述（供 LLM 理解）、参数 schema、异步执行（args 为 JSON）
#[async_trait]
pub trait Tool: Send + Sync {
    /// 工具名称（即 function_call 中的 tool_name）
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    /// 参数 JSON Schema；默认表示无参数
    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {},
            "required": []
        })
    }

    async fn execute(&self, args: Value) -> Result<String, String>;
}

/// 工具注册表：远程描述 + 本地实现 + 可选的 RPC 关联器
pub struct ToolRegistry {
    local: HashMap<String, Arc<dyn Tool>>,
    remote: Vec<ToolDescriptor>,
    rpc: Option<Arc<RpcCorrelator>>,
    executor: ToolExecutor,
    diagnostics: Vec<String>,
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new(DEFAULT_TOOL_TIMEOUT)
    }
}

impl ToolRegistry {
    pub fn new(tool_timeout: Duration) -> Self {
        Self {
            local: HashMap::new(),
            remote: Vec::new(),
            rpc: None,
            executor: ToolExecutor::new(tool_timeout),
            diagnostics: Vec::new(),
        }
    }

    /// 注册本地工具；同名覆盖
    pub fn register(&mut self, tool: impl Tool + 'static) {
        let name = tool.name().to_string();
        if self.local.insert(name.clone(), Arc::new(tool)).is_some() {
            tracing::warn!(tool = %name, "local tool re-registered, previous one replaced");
        }
    }

    /// 挂接子进程并完成握手与工具发现，返回发现的远程工具数
    ///
    /// 任何一步失败都不致命：远程工具集保持为空，记录一条诊断信息。关联器无论成败都会保留。
    pub async fn discover_remote(
        &mut self,
        rpc: Arc<RpcCorrelator>,
        protocol_version: &str,
        client_info: ClientInfo,
    ) -> usize {
        self.rpc = Some(Arc::clone(&rpc));
        self.remote.clear();

        let init = InitializeParams::new(protocol_version, client_info);
        let init = match serde_json::to_value(&init) {
            Ok(v) => v,
            Err(e) => {
                self.record_diagnostic(format!("initialize params: {e}"));
                return 0;
            }
        };
        match rpc.call(METHOD_INITIALIZE, Some(init)).await {
            Ok(server) => {
                let server_info = server.get("serverInfo").cloned().unwrap_or_default();
                tracing::info!(server = %server_info, "mcp handshake completed");
            }
            Err(e) => {
                self.record_diagnostic(format!("initialize failed: {e}"));
                return 0;
            }
        }

        let listed = match rpc.call(METHOD_TOOLS_LIST, None).await {
            Ok(v) => v,
            Err(e) => {
                self.record_diagnostic(format!("tools/list failed: {e}"));
                return 0;
            }
        };
        let listed: ListToolsResult = match serde_json::from_value(listed) {
            Ok(l) => l,
            Err(e) => {
                self.record_diagnostic(format!("tools/list returned malformed result: {e}"));
                return 0;
            }
        };

        for tool in listed.tools {
            if self.local.contains_key(&tool.name) {
                tracing::warn!(tool = %tool.name, "remote tool shadows a local tool, dropped");
                continue;
            }
            self.remote.push(tool);
        }
        tracing::info!(
            count = self.remote.len(),
            tools = ?self.remote.iter().map(|t| t.name.as_str()).collect::<Vec<_>>(),
            "remote tools discovered"
        );
        self.remote.len()
    }

    pub(crate) fn record_diagnostic(&mut self, msg: String) {
        tracing::warn!(diagnostic = %msg, "remote tool discovery failed, continuing with local tools only");
        self.diagnostics.push(msg);
    }

    /// 发现阶段记录的诊断信息
    pub fn diagnostics(&self) -> &[String] {
        &self.diagnostics
    }

    /// (远程, 本地)；本地按名称排序，保证 prompt 稳定
    pub fn describe_all(&self) -> (Vec<ToolDescriptor>, Vec<ToolDescriptor>) {
        let mut local: Vec<ToolDescriptor> = self
            .local
            .values()
            .map(|t| ToolDescriptor {
                name: t.name().to_string(),
                description: t.description().to_string(),
                input_schema: t.parameters_schema(),
            })
            .collect();
        local.sort_by(|a, b| a.name.cmp(&b.name));
        (self.remote.clone(), local)
    }

    pub fn is_local(&self, name: &str) -> bool {
        self.local.contains_key(name)
    }

    pub fn is_remote(&self, name: &str) -> bool {
        self.remote.iter().any(|t| t.name == name)
    }

    /// 经子进程调用远程工具，返回 tools/call 的原始结果
    pub async fn invoke_remote(&self, name: &str, params: Value) -> Result<Value, AgentError> {
        let rpc = self.rpc.as_ref().ok_or(AgentError::ChannelClosed)?;
        if !self.is_remote(name) {
            tracing::debug!(tool = %name, "tool not in discovered set, forwarding anyway");
        }
        let params = serde_json::to_value(CallToolParams {
            name: name.to_string(),
            arguments: params,
        })?;
        rpc.call(METHOD_TOOLS_CALL, Some(params)).await
    }

    /// 调用本地工具（带超时与审计）
    pub async fn invoke_local(&self, name: &str, params: Value) -> Result<String, AgentError> {
        let tool = self
            .local
            .get(name)
            .cloned()
            .ok_or_else(|| AgentError::UnknownTool(name.to_string()))?;
        self.executor.execute(tool.as_ref(), params).await
    }
}
