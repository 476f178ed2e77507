//! 可观测性：tracing 日志初始化
//!
//! 日志写到 stderr（stdout 留给回复），默认级别 info，可通过 RUST_LOG 覆盖。
//! `preview` 截断写进日志的长文本（原始行、工具参数）。

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();
}

/// 按字符截断到 max_chars，超出时追加 `...`
pub fn preview(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((cut, _)) => format!("{}...", &text[..cut]),
        None => text.to_string(),
    }
}
