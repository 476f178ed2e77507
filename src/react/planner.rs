//! Planner：请求下一步动作并解析
//!
//! 把对话快照交给补全客户端；parse_agent_action 从文本中提取 JSON 并解析为 AgentAction。

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::core::AgentError;
use crate::llm::RetryingLlmClient;
use crate::memory::Transcript;

/// 模型每一步输出的动作（`{"type": ..., "tool_name"?, "params"?, "content"?}`）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentAction {
    /// 调用子进程提供的远程工具
    ToolCall {
        tool_name: String,
        #[serde(default = "empty_params")]
        params: Value,
        #[serde(default)]
        content: Option<String>,
    },
    /// 调用本地函数，结果回灌给模型继续推理
    FunctionCall {
        tool_name: String,
        #[serde(default = "empty_params")]
        params: Value,
        #[serde(default)]
        content: Option<String>,
    },
    Finish {
        #[serde(default, deserialize_with = "null_as_empty")]
        content: String,
    },
    Text {
        #[serde(default, deserialize_with = "null_as_empty")]
        content: String,
    },
}

fn empty_params() -> Value {
    Value::Object(Default::default())
}

fn null_as_empty<'de, D>(de: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<String>::deserialize(de)?.unwrap_or_default())
}

impl AgentAction {
    pub fn kind(&self) -> &'static str {
        match self {
            AgentAction::ToolCall { .. } => "tool_call",
            AgentAction::FunctionCall { .. } => "function_call",
            AgentAction::Finish { .. } => "finish",
            AgentAction::Text { .. } => "text",
        }
    }
}

/// 从文本中取出 JSON 片段：优先 ```json 代码块，其次最外层 `{…}`
fn extract_json(output: &str) -> Option<&str> {
    let trimmed = output.trim();
    if let Some(start) = trimmed.find("```json") {
        let rest = &trimmed[start + 7..];
        let block = rest.find("```").map(|end| &rest[..end]).unwrap_or(rest);
        return Some(block.trim());
    }
    let start = trimmed.find('{')?;
    let end = trimmed.rfind('}')?;
    (end > start).then(|| &trimmed[start..=end])
}

/// 解析模型输出为 AgentAction；失败时由调用方原样返回文本
pub fn parse_agent_action(output: &str) -> Result<AgentAction, AgentError> {
    let json_str = extract_json(output)
        .ok_or_else(|| AgentError::JsonParseError("no JSON object in output".to_string()))?;
    serde_json::from_str(json_str)
        .map_err(|e| AgentError::JsonParseError(format!("{}: {}", e, json_str)))
}

/// Planner：持有补全客户端，按当前对话快照请求下一步
pub struct Planner {
    completion: RetryingLlmClient,
}

impl Planner {
    pub fn new(completion: RetryingLlmClient) -> Self {
        Self { completion }
    }

    /// 重试耗尽时为 None
    pub async fn plan(&self, transcript: &Transcript) -> Option<String> {
        self.completion.complete(&transcript.snapshot()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_finish() {
        let action = parse_agent_action(r#"{"type":"finish","content":"答案A"}"#).unwrap();
        assert_eq!(
            action,
            AgentAction::Finish {
                content: "答案A".into()
            }
        );
    }

    #[test]
    fn test_parse_tool_call_in_fenced_block() {
        let raw = "好的，我先看看目录。\n```json\n{\"type\": \"tool_call\", \"tool_name\": \"list_directory\", \"params\": {\"path\": \"/tmp\"}}\n```";
        match parse_agent_action(raw).unwrap() {
            AgentAction::ToolCall {
                tool_name,
                params,
                content,
            } => {
                assert_eq!(tool_name, "list_directory");
                assert_eq!(params, json!({"path": "/tmp"}));
                assert!(content.is_none());
            }
            other => panic!("unexpected action: {other:?}"),
        }
    }

    #[test]
    fn test_parse_outermost_braces_with_prose() {
        let raw = r#"思考完毕 {"type":"function_call","tool_name":"ragflow","params":{"query":"q"}} 以上"#;
        let action = parse_agent_action(raw).unwrap();
        assert_eq!(action.kind(), "function_call");
    }

    #[test]
    fn test_missing_params_and_content_default() {
        match parse_agent_action(r#"{"type":"function_call","tool_name":"ragflow"}"#).unwrap() {
            AgentAction::FunctionCall { params, .. } => assert_eq!(params, json!({})),
            other => panic!("unexpected action: {other:?}"),
        }
        assert_eq!(
            parse_agent_action(r#"{"type":"text"}"#).unwrap(),
            AgentAction::Text {
                content: String::new()
            }
        );
        assert_eq!(
            parse_agent_action(r#"{"type":"finish","content":null}"#).unwrap(),
            AgentAction::Finish {
                content: String::new()
            }
        );
    }

    #[test]
    fn test_non_json_is_error() {
        assert!(parse_agent_action("just chatting").is_err());
        assert!(parse_agent_action("} backwards {").is_err());
    }

    #[test]
    fn test_unknown_type_is_error() {
        assert!(parse_agent_action(r#"{"type":"dance"}"#).is_err());
        assert!(parse_agent_action(r#"{"tool":"echo","args":{}}"#).is_err());
    }
}
