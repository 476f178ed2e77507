//! RAGFlow 检索工具（本地 function_call）
//!
//! POST `{question, dataset_ids, document_ids?}` 到检索端点（Bearer 鉴权），
//! 从 `data.chunks[].content_ltks` 取片段文本，用分隔符拼成一段作为工具结果。

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::tools::Tool;

/// 检索为空时的固定回复
pub const NO_RESULT_TEXT: &str = "知识库中没有检索到相关内容。";

#[derive(Serialize)]
struct RetrievalRequest<'a> {
    question: &'a str,
    dataset_ids: &'a [String],
    #[serde(skip_serializing_if = "<[String]>::is_empty")]
    document_ids: &'a [String],
}

#[derive(Deserialize)]
struct RetrievalResponse {
    data: RetrievalData,
}

#[derive(Deserialize)]
struct RetrievalData {
    #[serde(default)]
    chunks: Vec<Chunk>,
}

#[derive(Deserialize)]
struct Chunk {
    #[serde(default)]
    content_ltks: String,
}

/// 检索工具配置
#[derive(Debug, Clone)]
pub struct RagflowSettings {
    pub url: String,
    pub api_key: String,
    pub dataset_ids: Vec<String>,
    pub document_ids: Vec<String>,
    pub separator: String,
    pub timeout: Duration,
}

pub struct RagflowTool {
    client: Client,
    settings: RagflowSettings,
}

impl RagflowTool {
    pub fn new(settings: RagflowSettings) -> Result<Self, String> {
        let client = Client::builder()
            .timeout(settings.timeout)
            .build()
            .map_err(|e| e.to_string())?;
        Ok(Self { client, settings })
    }

    async fn retrieve(&self, question: &str) -> Result<String, String> {
        let body = RetrievalRequest {
            question,
            dataset_ids: &self.settings.dataset_ids,
            document_ids: &self.settings.document_ids,
        };
        let response = self
            .client
            .post(&self.settings.url)
            .bearer_auth(&self.settings.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| format!("retrieval request failed: {e}"))?;

        let status = response.status();
        if !status.is_success() {
            return Err(format!("retrieval backend returned HTTP {}", status.as_u16()));
        }

        let parsed: RetrievalResponse = response
            .json()
            .await
            .map_err(|e| format!("malformed retrieval payload: {e}"))?;

        let texts: Vec<&str> = parsed
            .data
            .chunks
            .iter()
            .map(|c| c.content_ltks.as_str())
            .filter(|t| !t.trim().is_empty())
            .collect();
        tracing::debug!(chunks = texts.len(), "retrieval finished");

        if texts.is_empty() {
            return Ok(NO_RESULT_TEXT.to_string());
        }
        Ok(texts.join(&self.settings.separator))
    }
}

#[async_trait]
impl Tool for RagflowTool {
    fn name(&self) -> &str {
        "ragflow"
    }

    fn description(&self) -> &str {
        "从知识库中检索与问题相关的文档片段。当用户的问题涉及业务知识、产品资料或内部文档时使用。"
    }

    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "query": {
                    "type": "string",
                    "description": "要检索的问题或关键词"
                }
            },
            "required": ["query"]
        })
    }

    async fn execute(&self, args: Value) -> Result<String, String> {
        let question = args
            .get("query")
            .or_else(|| args.get("question"))
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|q| !q.is_empty())
            .ok_or_else(|| "missing 'query' parameter".to_string())?;
        self.retrieve(question).await
    }
}
