//! mcp-agent 命令行入口
//!
//! 初始化日志（stderr），按配置启动 Agent；从 stdin 每读一行作为一条用户消息，回复写到 stdout（一行一条）。
//! Ctrl+C / SIGTERM / stdin EOF / stdout 写入失败都会触发有序关闭，清理任务总会执行。

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use mcp_agent::config::load_config;
use mcp_agent::core::{ShutdownCoordinator, ShutdownManager, ShutdownReason};
use mcp_agent::{observability, Agent};
use tokio::io::{AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    observability::init();

    let config_path = std::env::args().nth(1).map(PathBuf::from);
    let cfg = load_config(config_path).context("Failed to load config")?;
    let agent = Arc::new(Agent::start(&cfg).await.context("Failed to start agent")?);

    let shutdown = Arc::new(ShutdownManager::new());
    shutdown.install_signal_handlers();
    let mut coordinator = ShutdownCoordinator::new();
    coordinator.register(agent.clone());

    let mut stdin = BufReader::new(tokio::io::stdin());
    let mut stdout = tokio::io::stdout();
    let mut buf = Vec::new();

    loop {
        buf.clear();
        let read = tokio::select! {
            _ = shutdown.wait_for_shutdown() => break,
            read = stdin.read_until(b'\n', &mut buf) => read,
        };
        match read {
            Ok(0) => {
                shutdown.shutdown(ShutdownReason::InputClosed);
                break;
            }
            Ok(_) => {}
            Err(e) => {
                shutdown.shutdown(ShutdownReason::FatalError(format!("stdin: {e}")));
                break;
            }
        }
        let Some(line) = decode_line(&buf) else {
            tracing::warn!(bytes = buf.len(), "skipping input line that is not valid UTF-8");
            continue;
        };

        let reply = tokio::select! {
            _ = shutdown.wait_for_shutdown() => break,
            reply = agent.handle_message(&line) => reply.unwrap_or_default(),
        };
        if let Err(e) = write_reply(&mut stdout, &reply).await {
            shutdown.shutdown(ShutdownReason::FatalError(format!("stdout: {e}")));
            break;
        }
    }

    coordinator.run_cleanup().await;
    Ok(())
}

/// 去掉行尾的 `\n` / `\r\n`；非 UTF-8 返回 None
fn decode_line(buf: &[u8]) -> Option<String> {
    let line = buf.strip_suffix(b"\n").unwrap_or(buf);
    let line = line.strip_suffix(b"\r").unwrap_or(line);
    String::from_utf8(line.to_vec()).ok()
}

/// 一条回复占一行，回复内部的换行转义
async fn write_reply<W: AsyncWrite + Unpin>(out: &mut W, reply: &str) -> std::io::Result<()> {
    let line = format!("{}\n", reply.replace('\n', "\\n"));
    out.write_all(line.as_bytes()).await?;
    out.flush().await
}
