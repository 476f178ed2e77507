//! 对话记录（Transcript）
//!
//! 只追加、不重排、不删除；每轮把完整快照发给补全后端。消息格式与后端一致：
//! `{"role": "user", "content": [{"type": "text", "text": "..."}]}`。

use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use serde::{Deserialize, Serialize};

/// 多段文本拼接时使用的分隔符
pub const TEXT_PART_SEPARATOR: &str = "\n---\n";

/// 消息角色（与 LLM API 一致）
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// 消息内容片段；目前只有文本
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum MessageContent {
    Text { text: String },
}

impl MessageContent {
    pub fn text(text: impl Into<String>) -> Self {
        MessageContent::Text { text: text.into() }
    }

    pub fn as_text(&self) -> &str {
        match self {
            MessageContent::Text { text } => text,
        }
    }
}

/// 单条消息；角色在创建时确定，content 至少一段
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Message {
    role: Role,
    content: Vec<MessageContent>,
}

impl Message {
    fn new(role: Role, text: impl Into<String>) -> Self {
        Self {
            role,
            content: vec![MessageContent::text(text)],
        }
    }

    pub fn system(text: impl Into<String>) -> Self {
        Self::new(Role::System, text)
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self::new(Role::User, text)
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self::new(Role::Assistant, text)
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn content(&self) -> &[MessageContent] {
        &self.content
    }

    /// 全部文本片段，以 `\n---\n` 拼接
    pub fn text(&self) -> String {
        self.content
            .iter()
            .map(MessageContent::as_text)
            .collect::<Vec<_>>()
            .join(TEXT_PART_SEPARATOR)
    }
}

/// 对话记录：以一条 System 消息开头，之后只追加
///
/// 追加与快照在同一把锁下完成，快照不会看到写了一半的状态。
#[derive(Debug)]
pub struct Transcript {
    messages: RwLock<Vec<Message>>,
}

impl Transcript {
    pub fn new(system_prompt: impl Into<String>) -> Self {
        Self {
            messages: RwLock::new(vec![Message::system(system_prompt)]),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, Vec<Message>> {
        self.messages.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, Vec<Message>> {
        self.messages.write().unwrap_or_else(|e| e.into_inner())
    }

    pub fn append_user(&self, text: impl Into<String>) {
        self.write().push(Message::user(text));
    }

    pub fn append_assistant(&self, text: impl Into<String>) {
        self.write().push(Message::assistant(text));
    }

    pub fn snapshot(&self) -> Vec<Message> {
        self.read().clone()
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    pub fn last(&self) -> Option<Message> {
        self.read().last().cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_new_seeds_single_system_message() {
        let t = Transcript::new("你是问答专家");
        let snap = t.snapshot();
        assert_eq!(snap.len(), 1);
        assert_eq!(snap[0].role(), Role::System);
        assert_eq!(snap[0].text(), "你是问答专家");
    }

    #[test]
    fn test_append_preserves_order() {
        let t = Transcript::new("sys");
        t.append_user("q1");
        t.append_assistant("a1");
        t.append_user("q2");
        let roles: Vec<Role> = t.snapshot().iter().map(Message::role).collect();
        assert_eq!(
            roles,
            vec![Role::System, Role::User, Role::Assistant, Role::User]
        );
        assert_eq!(t.last().unwrap().text(), "q2");
    }

    #[test]
    fn test_snapshot_is_detached() {
        let t = Transcript::new("sys");
        let before = t.snapshot();
        t.append_user("later");
        assert_eq!(before.len(), 1);
        assert_eq!(t.len(), 2);
    }

    #[test]
    fn test_message_wire_shape() {
        let v = serde_json::to_value(Message::user("你好")).unwrap();
        assert_eq!(
            v,
            json!({"role": "user", "content": [{"type": "text", "text": "你好"}]})
        );
    }

    #[test]
    fn test_text_joins_parts() {
        let msg: Message = serde_json::from_value(json!({
            "role": "assistant",
            "content": [{"type": "text", "text": "a"}, {"type": "text", "text": "b"}]
        }))
        .unwrap();
        assert_eq!(msg.text(), "a\n---\nb");
    }
}
