//! 记忆层：会话内的对话记录（只追加，进程内）

pub mod conversation;

pub use conversation::{Message, MessageContent, Role, Transcript, TEXT_PART_SEPARATOR};
