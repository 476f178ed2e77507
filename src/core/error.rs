//! Agent 错误类型
//!
//! 覆盖子进程、JSON-RPC、工具调度与配置各层；除启动阶段外，这些错误都不会逃出 handle_message，
//! 而是在 Agent 循环里被降级为一段文本回复。

use thiserror::Error;

/// Agent 运行过程中可能出现的错误（子进程、RPC、工具、解析、配置）
#[derive(Error, Debug)]
pub enum AgentError {
    /// 子进程无法启动，或 stdin/stdout 管道不可用；只影响远程工具
    #[error("Failed to spawn subprocess '{command}': {reason}")]
    SpawnError { command: String, reason: String },

    #[error("Failed to write to subprocess: {0}")]
    WriteError(String),

    /// 通道已关闭（子进程退出或已 close）
    #[error("Subprocess channel closed")]
    ChannelClosed,

    #[error("Request {id} ({method}) timed out after {timeout_ms}ms")]
    RequestTimeout {
        id: u64,
        method: String,
        timeout_ms: u64,
    },

    /// 子进程返回的结构化错误 {"code", "message"}
    #[error("Remote tool error {code}: {message}")]
    RemoteToolError { code: i64, message: String },

    /// 模型臆造了不存在的工具名
    #[error("Unknown tool: {0}")]
    UnknownTool(String),

    #[error("JSON parse error: {0}")]
    JsonParseError(String),

    #[error("Tool execution failed: {0}")]
    ToolExecutionFailed(String),

    #[error("Tool timeout: {0}")]
    ToolTimeout(String),

    #[error("Config error: {0}")]
    ConfigError(String),
}

impl From<serde_json::Error> for AgentError {
    fn from(e: serde_json::Error) -> Self {
        AgentError::JsonParseError(e.to_string())
    }
}

impl From<config::ConfigError> for AgentError {
    fn from(e: config::ConfigError) -> Self {
        AgentError::ConfigError(e.to_string())
    }
}
