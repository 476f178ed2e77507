//! Agent 主循环集成测试：内存 MCP server + 脚本化补全后端

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use mcp_agent::core::AgentError;
use mcp_agent::llm::{LlmClient, MockLlmClient, RetryConfig, RetryingLlmClient};
use mcp_agent::mcp::{ClientInfo, LineSink, RpcCorrelator, DEFAULT_PROTOCOL_VERSION};
use mcp_agent::memory::Role;
use mcp_agent::tools::{RagflowSettings, RagflowTool, ToolRegistry};
use mcp_agent::{Agent, AgentSettings};
use serde_json::{json, Value};
use tokio::sync::mpsc;
use wiremock::matchers::{body_json, method};
use wiremock::{Mock, MockServer, ResponseTemplate};

struct ForwardSink(mpsc::UnboundedSender<String>);

#[async_trait]
impl LineSink for ForwardSink {
    async fn send_line(&self, line: String) -> Result<(), AgentError> {
        self.0.send(line).map_err(|_| AgentError::ChannelClosed)
    }
}

/// 内存中的 filesystem 风格 MCP server
fn fake_mcp_server() -> Arc<RpcCorrelator> {
    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<String>();
    let (in_tx, in_rx) = mpsc::unbounded_channel::<String>();
    tokio::spawn(async move {
        while let Some(line) = out_rx.recv().await {
            let req: Value = serde_json::from_str(&line).unwrap();
            let body = match req["method"].as_str().unwrap_or_default() {
                "initialize" => json!({"result": {
                    "protocolVersion": "2024-11-05",
                    "capabilities": {"tools": {}},
                    "serverInfo": {"name": "secure-filesystem-server", "version": "0.2.0"}
                }}),
                "tools/list" => json!({"result": {"tools": [{
                    "name": "list_dir",
                    "description": "List directory entries",
                    "inputSchema": {"type": "object", "properties": {"path": {"type": "string"}}, "required": ["path"]}
                }]}}),
                "tools/call" if req["params"]["name"] == "list_dir" => {
                    json!({"result": {"entries": ["a.txt", "b.txt"]}})
                }
                _ => json!({"error": {"code": -32602, "message": "Unknown tool"}}),
            };
            let mut resp = body;
            resp["jsonrpc"] = json!("2.0");
            resp["id"] = req["id"].clone();
            if in_tx.send(resp.to_string()).is_err() {
                break;
            }
        }
    });
    Arc::new(RpcCorrelator::new(
        Arc::new(ForwardSink(out_tx)),
        in_rx,
        Duration::from_secs(5),
    ))
}

async fn discovered_registry() -> ToolRegistry {
    let mut registry = ToolRegistry::default();
    let n = registry
        .discover_remote(fake_mcp_server(), DEFAULT_PROTOCOL_VERSION, ClientInfo::default())
        .await;
    assert_eq!(n, 1);
    registry
}

fn agent(registry: ToolRegistry, mock: &Arc<MockLlmClient>, settings: AgentSettings) -> Agent {
    let llm: Arc<dyn LlmClient> = mock.clone();
    Agent::new(
        registry,
        RetryingLlmClient::new(llm, RetryConfig::default()),
        settings,
    )
}

#[tokio::test]
async fn test_finish_returns_content() {
    let mock = Arc::new(MockLlmClient::with_replies([r#"{"type":"finish","content":"答案A"}"#]));
    let agent = agent(discovered_registry().await, &mock, AgentSettings::default());

    assert_eq!(agent.handle_message("问题").await.as_deref(), Some("答案A"));
    assert_eq!(mock.call_count(), 1);
    // system + user
    assert_eq!(agent.transcript().len(), 2);
}

#[tokio::test]
async fn test_tool_call_returns_serialized_result() {
    let mock = Arc::new(MockLlmClient::with_replies([
        r#"{"type":"tool_call","tool_name":"list_dir","params":{"path":"/tmp"}}"#,
    ]));
    let agent = agent(discovered_registry().await, &mock, AgentSettings::default());

    let out = agent.handle_message("看看 /tmp").await.unwrap();
    let v: Value = serde_json::from_str(&out).unwrap();
    assert_eq!(v, json!({"entries": ["a.txt", "b.txt"]}));
    assert_eq!(mock.call_count(), 1);
}

#[tokio::test]
async fn test_remote_error_falls_back_to_content() {
    let mock = Arc::new(MockLlmClient::with_replies([
        r#"{"type":"tool_call","tool_name":"write_file","params":{},"content":"暂时无法写入"}"#,
    ]));
    let agent = agent(discovered_registry().await, &mock, AgentSettings::default());
    assert_eq!(
        agent.handle_message("写个文件").await.as_deref(),
        Some("暂时无法写入")
    );
}

#[tokio::test]
async fn test_non_json_output_returned_unchanged() {
    let mock = Arc::new(MockLlmClient::with_replies(["just chatting"]));
    let agent = agent(ToolRegistry::default(), &mock, AgentSettings::default());
    assert_eq!(
        agent.handle_message("hi").await.as_deref(),
        Some("just chatting")
    );
}

#[tokio::test]
async fn test_prompt_lists_discovered_tool_verbatim() {
    let mock = Arc::new(MockLlmClient::new());
    let agent = agent(discovered_registry().await, &mock, AgentSettings::default());
    let prompt = agent.system_prompt();
    let (remote, _) = agent.registry().describe_all();

    assert!(prompt.contains("工具名称：list_dir"));
    assert!(prompt.contains("List directory entries"));
    assert!(prompt.contains(&serde_json::to_string_pretty(&remote[0].input_schema).unwrap()));
}

#[tokio::test]
async fn test_function_call_via_ragflow_reenters_once() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(body_json(json!({"question": "q", "dataset_ids": ["kb"]})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": {"chunks": [{"content_ltks": "T"}]}
        })))
        .expect(1)
        .mount(&server)
        .await;

    let mut registry = ToolRegistry::default();
    registry.register(
        RagflowTool::new(RagflowSettings {
            url: server.uri(),
            api_key: "k".into(),
            dataset_ids: vec!["kb".into()],
            document_ids: vec![],
            separator: "\n---\n".into(),
            timeout: Duration::from_secs(5),
        })
        .unwrap(),
    );

    let mock = Arc::new(MockLlmClient::with_replies([
        r#"{"type":"function_call","tool_name":"ragflow","params":{"query":"q"}}"#,
        r#"{"type":"finish","content":"根据知识库：T"}"#,
    ]));
    let agent = agent(registry, &mock, AgentSettings::default());

    assert_eq!(
        agent.handle_message("q").await.as_deref(),
        Some("根据知识库：T")
    );
    assert_eq!(mock.call_count(), 2);

    let second = mock.received().pop().unwrap();
    let follow_up = second.last().unwrap();
    assert_eq!(follow_up.role(), Role::User);
    assert!(follow_up.text().contains("函数 ragflow 的执行结果如下：\nT"));
}

#[tokio::test]
async fn test_turn_budget_caps_function_calls() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": {"chunks": [{"content_ltks": "same"}]}
        })))
        .mount(&server)
        .await;

    let mut registry = ToolRegistry::default();
    registry.register(
        RagflowTool::new(RagflowSettings {
            url: server.uri(),
            api_key: "k".into(),
            dataset_ids: vec![],
            document_ids: vec![],
            separator: "\n---\n".into(),
            timeout: Duration::from_secs(5),
        })
        .unwrap(),
    );

    let call = r#"{"type":"function_call","tool_name":"ragflow","params":{"query":"q"}}"#;
    let mock = Arc::new(MockLlmClient::with_replies(vec![call; 20]));
    let settings = AgentSettings {
        max_tool_turns: 3,
        ..AgentSettings::default()
    };
    let agent = agent(registry, &mock, settings);

    let out = agent.handle_message("q").await.unwrap();
    assert!(out.contains("最大工具调用次数（3）"));
    assert!(out.ends_with("same"));
    assert_eq!(mock.call_count(), 4);
}

#[tokio::test(start_paused = true)]
async fn test_completion_exhaustion_yields_none() {
    let mock = Arc::new(MockLlmClient::new());
    let agent = agent(ToolRegistry::default(), &mock, AgentSettings::default());
    assert!(agent.handle_message("hi").await.is_none());
    assert_eq!(mock.call_count(), 3);
}

#[tokio::test]
async fn test_empty_input_is_answered_locally() {
    let mock = Arc::new(MockLlmClient::new());
    let agent = agent(ToolRegistry::default(), &mock, AgentSettings::default());
    assert_eq!(agent.handle_message("").await.as_deref(), Some(""));
    assert_eq!(mock.call_count(), 0);
}
