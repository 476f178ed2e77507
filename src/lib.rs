//! mcp-agent - 基于 MCP 子进程的智能体编排客户端
//!
//! 模块划分：
//! - **agent**: 无头 Agent 运行时（启动、handle_message、shutdown）
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **core**: 错误类型与优雅关闭
//! - **llm**: 补全客户端抽象、OpenAI 兼容实现与重试
//! - **mcp**: 子进程通道、JSON-RPC 线格式与请求关联
//! - **memory**: 对话记录
//! - **react**: 动作解析、System prompt、Agent 主循环
//! - **tools**: 工具注册表（远程 MCP 工具 + 本地工具）与 RAGFlow 检索

pub mod agent;
pub mod config;
pub mod core;
pub mod llm;
pub mod mcp;
pub mod memory;
pub mod observability;
pub mod react;
pub mod tools;

pub use agent::{Agent, AgentSettings};
