//! 工具层：注册表（远程 MCP 工具 + 本地工具）、本地执行器、RAGFlow 检索、动作 Schema

pub mod executor;
pub mod ragflow;
pub mod registry;
pub mod schema;

pub use executor::ToolExecutor;
pub use ragflow::{RagflowSettings, RagflowTool};
pub use registry::{Tool, ToolDescriptor, ToolRegistry, DEFAULT_TOOL_TIMEOUT};
pub use schema::agent_action_schema_json;
