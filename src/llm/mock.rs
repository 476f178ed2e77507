//! Mock LLM 客户端（用于测试，无需 API）
//!
//! 按顺序吐出预置的回复或错误；脚本用完后返回 Transport 错误。每次收到的消息快照都会被记录。

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::llm::{LlmClient, LlmError};
use crate::memory::Message;

/// Mock 客户端：脚本化回复
#[derive(Debug, Default)]
pub struct MockLlmClient {
    script: Mutex<VecDeque<Result<String, LlmError>>>,
    received: Mutex<Vec<Vec<Message>>>,
}

impl MockLlmClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_replies<I, S>(replies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mock = Self::new();
        for r in replies {
            mock.push_reply(r);
        }
        mock
    }

    pub fn push_reply(&self, reply: impl Into<String>) {
        self.lock_script().push_back(Ok(reply.into()));
    }

    pub fn push_error(&self, err: LlmError) {
        self.lock_script().push_back(Err(err));
    }

    /// complete 被调用的次数
    pub fn call_count(&self) -> usize {
        self.lock_received().len()
    }

    /// 每次调用收到的消息快照
    pub fn received(&self) -> Vec<Vec<Message>> {
        self.lock_received().clone()
    }

    fn lock_script(&self) -> std::sync::MutexGuard<'_, VecDeque<Result<String, LlmError>>> {
        self.script.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn lock_received(&self) -> std::sync::MutexGuard<'_, Vec<Vec<Message>>> {
        self.received.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl LlmClient for MockLlmClient {
    async fn complete(&self, messages: &[Message]) -> Result<String, LlmError> {
        self.lock_received().push(messages.to_vec());
        self.lock_script()
            .pop_front()
            .unwrap_or_else(|| Err(LlmError::Transport("mock script exhausted".to_string())))
    }
}
