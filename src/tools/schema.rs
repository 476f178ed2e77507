//! 动作 JSON Schema 生成（schemars）
//!
//! 把「合法动作」的 JSON 结构注入 system prompt，减少 LLM 输出格式错误。

use std::collections::HashMap;

use schemars::{schema_for, JsonSchema};

/// 动作类型
#[allow(dead_code)]
#[derive(JsonSchema)]
#[serde(rename_all = "snake_case")]
enum ActionType {
    ToolCall,
    FunctionCall,
    Finish,
    Text,
}

/// 模型每一步输出的 JSON 结构（仅用于 Schema 生成）
#[allow(dead_code)]
#[derive(JsonSchema)]
struct ActionFormat {
    /// tool_call 调用 MCP 工具；function_call 调用本地函数；finish 给出最终答案
    #[serde(rename = "type")]
    pub kind: ActionType,
    /// 工具名称，tool_call / function_call 时必填
    pub tool_name: Option<String>,
    /// 工具参数，依工具的输入参数 schema 而定
    pub params: Option<HashMap<String, serde_json::Value>>,
    /// finish / text 时为给用户的中文回答
    pub content: Option<String>,
}

/// 返回动作的 JSON Schema 字符串，可拼入 system prompt
pub fn agent_action_schema_json() -> String {
    let schema = schema_for!(ActionFormat);
    serde_json::to_string_pretty(&schema).unwrap_or_default()
}
