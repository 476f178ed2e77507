//! Agent 主循环
//!
//! 追加用户消息 -> 请求补全 -> 解析动作 -> 分发：
//! tool_call 调用远程工具并直接返回结果；function_call 调用本地工具，把结果合成一条用户消息后再请求补全；
//! finish / text 返回 content。每次 function_call 消耗一个轮次，轮次耗尽时返回兜底回复。
//! 任何失败都降级为文本，不会向调用方抛出错误。

use crate::memory::Transcript;
use crate::react::{parse_agent_action, AgentAction, Planner};
use crate::tools::ToolRegistry;

/// 单条用户消息内允许的本地函数调用次数
pub const DEFAULT_MAX_TOOL_TURNS: usize = 8;

/// 一轮对话所需的全部协作者
pub struct LoopContext<'a> {
    pub planner: &'a Planner,
    pub registry: &'a ToolRegistry,
    pub transcript: &'a Transcript,
    pub max_tool_turns: usize,
}

/// 本地函数结果回灌给模型的消息
pub fn function_result_message(tool_name: &str, result: &str) -> String {
    format!(
        "函数 {tool_name} 的执行结果如下：\n{result}\n\n请基于以上结果继续思考：如信息已足够，请使用 finish 类型给出最终答案；否则继续调用合适的工具。"
    )
}

fn turn_limit_reply(max_tool_turns: usize, last_result: Option<&str>) -> String {
    match last_result {
        Some(result) => format!(
            "已达到最大工具调用次数（{max_tool_turns}），以下为最近一次检索结果：\n{result}"
        ),
        None => format!("已达到最大工具调用次数（{max_tool_turns}），暂时无法给出答案。"),
    }
}

/// 处理一条（非空）用户消息；补全重试耗尽时返回 None
pub async fn agent_loop(ctx: &LoopContext<'_>, user_input: &str) -> Option<String> {
    ctx.transcript.append_user(user_input);

    let mut remaining = ctx.max_tool_turns;
    let mut last_local: Option<String> = None;

    loop {
        let Some(raw) = ctx.planner.plan(ctx.transcript).await else {
            tracing::error!("no completion after retries, turn yields nothing");
            return None;
        };

        let action = match parse_agent_action(&raw) {
            Ok(action) => action,
            Err(e) => {
                tracing::warn!(error = %e, "model output is not an action, returning it as text");
                return Some(raw);
            }
        };
        tracing::info!(action = action.kind(), "action parsed");

        match action {
            AgentAction::Finish { content } | AgentAction::Text { content } => return Some(content),

            AgentAction::ToolCall {
                tool_name,
                params,
                content,
            } => {
                return match ctx.registry.invoke_remote(&tool_name, params).await {
                    Ok(result) => Some(result.to_string()),
                    Err(e) => {
                        tracing::warn!(tool = %tool_name, error = %e, "remote tool failed, falling back to text");
                        Some(content.unwrap_or_else(|| format!("工具 {tool_name} 调用失败：{e}")))
                    }
                };
            }

            AgentAction::FunctionCall {
                tool_name,
                params,
                content,
            } => {
                if !ctx.registry.is_local(&tool_name) {
                    tracing::warn!(tool = %tool_name, "unknown local function, falling back to text");
                    return Some(content.unwrap_or_else(|| format!("未知的工具：{tool_name}")));
                }
                if remaining == 0 {
                    tracing::warn!(max = ctx.max_tool_turns, "tool turn budget exhausted");
                    return Some(turn_limit_reply(ctx.max_tool_turns, last_local.as_deref()));
                }
                remaining -= 1;

                match ctx.registry.invoke_local(&tool_name, params).await {
                    Ok(result) => {
                        ctx.transcript.append_assistant(raw);
                        ctx.transcript
                            .append_user(function_result_message(&tool_name, &result));
                        last_local = Some(result);
                    }
                    Err(e) => {
                        tracing::warn!(tool = %tool_name, error = %e, "local function failed, falling back to text");
                        return Some(
                            content.unwrap_or_else(|| format!("工具 {tool_name} 调用失败：{e}")),
                        );
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use async_trait::async_trait;
    use serde_json::Value;

    use crate::llm::{MockLlmClient, RetryConfig, RetryingLlmClient};
    use crate::memory::Role;
    use crate::tools::Tool;

    struct Lookup;

    #[async_trait]
    impl Tool for Lookup {
        fn name(&self) -> &str {
            "ragflow"
        }
        fn description(&self) -> &str {
            "lookup"
        }
        async fn execute(&self, _args: Value) -> Result<String, String> {
            Ok("T".into())
        }
    }

    fn planner(mock: &Arc<MockLlmClient>) -> Planner {
        Planner::new(RetryingLlmClient::new(
            Arc::clone(mock) as Arc<dyn crate::llm::LlmClient>,
            RetryConfig::default(),
        ))
    }

    #[tokio::test]
    async fn test_function_call_reenters_once() {
        let mock = Arc::new(MockLlmClient::with_replies([
            r#"{"type":"function_call","tool_name":"ragflow","params":{"query":"q"}}"#,
            r#"{"type":"finish","content":"基于 T 的答案"}"#,
        ]));
        let planner = planner(&mock);
        let mut registry = ToolRegistry::default();
        registry.register(Lookup);
        let transcript = Transcript::new("sys");
        let ctx = LoopContext {
            planner: &planner,
            registry: &registry,
            transcript: &transcript,
            max_tool_turns: DEFAULT_MAX_TOOL_TURNS,
        };

        let out = agent_loop(&ctx, "问题").await;
        assert_eq!(out.as_deref(), Some("基于 T 的答案"));
        assert_eq!(mock.call_count(), 2);

        let second = &mock.received()[1];
        let last = second.last().unwrap();
        assert_eq!(last.role(), Role::User);
        assert!(last.text().contains("T"));
        assert_eq!(second[second.len() - 2].role(), Role::Assistant);
    }

    #[tokio::test]
    async fn test_turn_budget_stops_loop() {
        let call = r#"{"type":"function_call","tool_name":"ragflow","params":{"query":"q"}}"#;
        let mock = Arc::new(MockLlmClient::with_replies(vec![call; 10]));
        let planner = planner(&mock);
        let mut registry = ToolRegistry::default();
        registry.register(Lookup);
        let transcript = Transcript::new("sys");
        let ctx = LoopContext {
            planner: &planner,
            registry: &registry,
            transcript: &transcript,
            max_tool_turns: 2,
        };

        let out = agent_loop(&ctx, "问题").await.unwrap();
        assert!(out.contains("最大工具调用次数（2）"));
        assert!(out.ends_with('T'));
        // 两次执行 + 第三次被拦下
        assert_eq!(mock.call_count(), 3);
    }

    #[tokio::test]
    async fn test_unknown_function_falls_back_to_content() {
        let mock = Arc::new(MockLlmClient::with_replies([
            r#"{"type":"function_call","tool_name":"nope","content":"我查不到"}"#,
        ]));
        let planner = planner(&mock);
        let registry = ToolRegistry::default();
        let transcript = Transcript::new("sys");
        let ctx = LoopContext {
            planner: &planner,
            registry: &registry,
            transcript: &transcript,
            max_tool_turns: DEFAULT_MAX_TOOL_TURNS,
        };
        assert_eq!(agent_loop(&ctx, "q").await.as_deref(), Some("我查不到"));
    }

    #[tokio::test]
    async fn test_tool_call_without_channel_falls_back() {
        let mock = Arc::new(MockLlmClient::with_replies([
            r#"{"type":"tool_call","tool_name":"read_file","params":{"path":"a"}}"#,
        ]));
        let planner = planner(&mock);
        let registry = ToolRegistry::default();
        let transcript = Transcript::new("sys");
        let ctx = LoopContext {
            planner: &planner,
            registry: &registry,
            transcript: &transcript,
            max_tool_turns: DEFAULT_MAX_TOOL_TURNS,
        };
        let out = agent_loop(&ctx, "q").await.unwrap();
        assert!(out.contains("read_file"));
    }
}
