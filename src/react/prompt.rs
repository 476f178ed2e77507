//! System prompt 构建
//!
//! 由注册表的实时内容生成：每个工具的类型、名称、描述与输入参数 schema（原样 pretty JSON），
//! 加上当前时间、动作 JSON Schema、执行规则、完成标准与示例。

use crate::tools::{agent_action_schema_json, ToolDescriptor};

fn describe_tools(tools: &[ToolDescriptor], kind: &str) -> String {
    tools
        .iter()
        .map(|tool| {
            let schema = serde_json::to_string_pretty(&tool.input_schema)
                .unwrap_or_else(|_| tool.input_schema.to_string());
            format!(
                "---\n工具类型：{kind}\n工具名称：{}\n工具描述：{}\n输入参数：{schema}\n---",
                tool.name, tool.description
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// 用远程（tool_call）与本地（function_call）工具描述生成 system prompt
pub fn build_system_prompt(remote: &[ToolDescriptor], local: &[ToolDescriptor]) -> String {
    let now = chrono::Local::now().format("%Y-%m-%d %H:%M:%S");
    let remote_tools = describe_tools(remote, "tool_call");
    let local_tools = describe_tools(local, "function_call");
    let action_schema = agent_action_schema_json();

    format!(
        r#"# Act as a professional knowledge Q&A expert with strong reasoning abilities, skilled at finding and summarizing information to address user inquiries while strictly following the operational rules outlined below.

## Thinking Framework

Before performing any action, you must:

1. Deeply Understand User Intent: Analyze the user's core problem to be solved, plan to address it step-by-step, and never act arbitrarily.
2. Develop an Execution Plan: Break down complex tasks into executable steps and provide optimal solutions.
3. Predict Risk Points: Identify potential issues and errors, and adjust the execution strategy accordingly. Ask users for missing information when necessary.

## Context
- 当前时间: {now}

## Usable Tools

### Tools of tool_call
{remote_tools}

### Tools of function_call
{local_tools}

## Tool Usage Rules

**Use the tools strictly in accordance with Usable Tools**

### Execution Rules

1. One Tool at a Time: Only invoke one tool per action.
2. Explore Before Acting: First gather the information the user may need, then summarize, and finally generate results.
3. Complete Closed-Loop: Ensure each task has a clear start, execution, verification, and completion process.
4. Same Tool Repeated Use: If the same tool is repeatedly used but no useful information is obtained, stop.

### Tool Call Format

{{
    "type": <工具类型>,
    "tool_name": <工具名称>,
    "params": {{
        <工具参数1>: <参数值>,
        <工具参数2>: <参数值>
    }}
}}

### Action JSON Schema

{action_schema}

## Task Completion Standards

The finish type can only be used when ALL of the following conditions are met:

- The user's question has been fully resolved.
- No unresolved issues remain.
- The result meets the user's expectations.
- If still unresolved after many attempts, stop.

## Output

1. **Must use JSON format for all outputs**.
2. Tool Invocation: Use the tool_call or function_call type with the format above, matching the tool's 工具类型.
3. Task Completion: Use the finish type only when all completion standards are met. The content of finish must be an accurate, detailed and specific answer to the user's original question (do not return raw tool results directly), and the content must be in Chinese.

## Examples

### tool_call Example
{{
    "type": "tool_call",
    "tool_name": "read_file",
    "params": {{
        "path": "README.md"
    }}
}}

### function_call Example
{{
    "type": "function_call",
    "tool_name": "ragflow",
    "params": {{
        "query": "退货政策"
    }}
}}

### finish Example
{{
    "type": "finish",
    "content": "任务完成"
}}

## Notes

1. Follow the thinking framework to keep problem-solving logical and systematic.
2. Always follow the tool call format and execution rules.
3. Keep the finish content clear and specific, directly addressing the user's original inquiry."#
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn read_file() -> ToolDescriptor {
        ToolDescriptor {
            name: "read_file".into(),
            description: "Read the complete contents of a file from the file system.".into(),
            input_schema: json!({
                "type": "object",
                "properties": {"path": {"type": "string"}},
                "required": ["path"]
            }),
        }
    }

    #[test]
    fn test_prompt_contains_tool_verbatim() {
        let tool = read_file();
        let prompt = build_system_prompt(&[tool.clone()], &[]);
        assert!(prompt.contains("工具类型：tool_call\n工具名称：read_file"));
        assert!(prompt.contains(&tool.description));
        assert!(prompt.contains(&serde_json::to_string_pretty(&tool.input_schema).unwrap()));
    }

    #[test]
    fn test_local_tools_are_function_call() {
        let local = ToolDescriptor {
            name: "ragflow".into(),
            description: "知识库检索".into(),
            input_schema: json!({"type": "object"}),
        };
        let prompt = build_system_prompt(&[], &[local]);
        assert!(prompt.contains("工具类型：function_call\n工具名称：ragflow\n工具描述：知识库检索"));
    }

    #[test]
    fn test_prompt_has_rules_and_schema() {
        let prompt = build_system_prompt(&[], &[]);
        assert!(prompt.contains("One Tool at a Time"));
        assert!(prompt.contains("当前时间"));
        assert!(prompt.contains("tool_name"));
        assert!(prompt.contains("must be in Chinese"));
    }
}
