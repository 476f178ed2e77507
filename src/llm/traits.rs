//! LLM 客户端抽象
//!
//! 所有后端（OpenAI 兼容 / Mock）实现 LlmClient：complete 只做一次尝试；
//! 重试由 RetryingLlmClient 统一包一层，耗尽后返回 None 而不是错误。

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::memory::Message;

/// 单次补全失败的原因；对重试层而言全部可重试
#[derive(Error, Debug, Clone, PartialEq)]
pub enum LlmError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("backend returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    /// 响应不是 `{choices: [{message: {content}}]}`
    #[error("malformed completion payload: {0}")]
    MalformedPayload(String),
}

/// LLM 客户端 trait：发送完整对话快照，返回原始文本
#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn complete(&self, messages: &[Message]) -> Result<String, LlmError>;
}

/// 重试策略：固定间隔，最多 max_retries 次尝试
#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            delay: Duration::from_secs(2),
        }
    }
}

/// 带重试的补全客户端
#[derive(Clone)]
pub struct RetryingLlmClient {
    inner: Arc<dyn LlmClient>,
    config: RetryConfig,
}

impl RetryingLlmClient {
    pub fn new(inner: Arc<dyn LlmClient>, config: RetryConfig) -> Self {
        Self { inner, config }
    }

    /// 依次尝试；成功立即返回，失败后等待 delay 再试，全部失败返回 None
    pub async fn complete(&self, messages: &[Message]) -> Option<String> {
        let attempts = self.config.max_retries.max(1);
        for attempt in 1..=attempts {
            match self.inner.complete(messages).await {
                Ok(text) => {
                    tracing::debug!(attempt, raw = %text, "completion received");
                    return Some(text);
                }
                Err(e) => {
                    tracing::warn!(attempt, max = attempts, error = %e, "completion attempt failed");
                    if attempt < attempts {
                        tokio::time::sleep(self.config.delay).await;
                    }
                }
            }
        }
        tracing::error!(attempts, "all completion attempts failed");
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::MockLlmClient;
    use tokio::time::Instant;

    fn retrying(mock: Arc<MockLlmClient>) -> RetryingLlmClient {
        RetryingLlmClient::new(mock, RetryConfig::default())
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhaustion_returns_none() {
        let mock = Arc::new(MockLlmClient::new());
        for _ in 0..3 {
            mock.push_error(LlmError::Transport("connection refused".into()));
        }
        let client = retrying(Arc::clone(&mock));

        let start = Instant::now();
        let out = client.complete(&[Message::user("hi")]).await;
        assert!(out.is_none());
        assert_eq!(mock.call_count(), 3);
        // 两次失败之间各等待 2s，最后一次失败后不再等待
        assert_eq!(start.elapsed(), Duration::from_secs(4));
    }

    #[tokio::test(start_paused = true)]
    async fn test_later_success_is_returned() {
        let mock = Arc::new(MockLlmClient::new());
        mock.push_error(LlmError::MalformedPayload("no choices".into()));
        mock.push_reply("ok");
        let client = retrying(Arc::clone(&mock));

        assert_eq!(client.complete(&[Message::user("hi")]).await.as_deref(), Some("ok"));
        assert_eq!(mock.call_count(), 2);
    }

    #[tokio::test]
    async fn test_first_success_no_retry() {
        let mock = Arc::new(MockLlmClient::with_replies(["done"]));
        let client = retrying(Arc::clone(&mock));
        assert_eq!(client.complete(&[]).await.as_deref(), Some("done"));
        assert_eq!(mock.call_count(), 1);
    }
}
