//! 子进程通道：持有 MCP Server 子进程，按行收发
//!
//! stdout 的每一行作为一条协议消息推入无界队列（惰性、不可重启），非 UTF-8 的行记日志后丢弃；
//! send_line 把 `text + "\n"` 交给写出任务，不会因管道写满而阻塞调用方。
//! 子进程退出（任何原因）或写出失败后通道进入 Closed：后续 send_line 立即失败。通道不会主动拒绝
//! RPC 层尚未完成的请求，它们只会各自超时。

use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, Mutex};

use crate::core::AgentError;

/// 收到的行（一行一条协议消息）
pub type LineReceiver = mpsc::UnboundedReceiver<String>;

/// 回收子进程退出状态的最长等待
const REAP_TIMEOUT: Duration = Duration::from_secs(2);

/// 行输出端：RPC Correlator 只依赖这一能力，便于替换为内存实现
#[async_trait]
pub trait LineSink: Send + Sync {
    /// 写入一行（不含换行符，由实现追加 `\n`）
    async fn send_line(&self, line: String) -> Result<(), AgentError>;
}

/// 子进程通道：启动、按行写入、关闭（幂等）
pub struct SubprocessChannel {
    command: String,
    pid: Option<u32>,
    writer: StdMutex<Option<mpsc::UnboundedSender<Vec<u8>>>>,
    child: Mutex<Option<Child>>,
    closed: Arc<AtomicBool>,
}

impl SubprocessChannel {
    /// 启动子进程（stdin/stdout 管道，stderr 继承），并返回 stdout 行队列
    ///
    /// 必须在 tokio 运行时内调用。
    pub fn start(command: &str, args: &[String]) -> Result<(Self, LineReceiver), AgentError> {
        let spawn_error = |reason: String| AgentError::SpawnError {
            command: command.to_string(),
            reason,
        };

        let mut child = Command::new(command)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| spawn_error(e.to_string()))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| spawn_error("stdin unavailable".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| spawn_error("stdout unavailable".to_string()))?;
        let pid = child.id();

        let closed = Arc::new(AtomicBool::new(false));
        let (tx, rx) = mpsc::unbounded_channel();

        let closed_reader = Arc::clone(&closed);
        let name = command.to_string();
        tokio::spawn(async move {
            let mut reader = BufReader::new(stdout);
            let mut buf = Vec::new();
            loop {
                buf.clear();
                match reader.read_until(b'\n', &mut buf).await {
                    Ok(0) => {
                        tracing::info!(command = %name, pid = ?pid, "subprocess stdout closed, channel closed");
                        break;
                    }
                    Ok(_) => {
                        let raw = buf.strip_suffix(b"\n").unwrap_or(&buf[..]);
                        let raw = raw.strip_suffix(b"\r").unwrap_or(raw);
                        let line = match std::str::from_utf8(raw) {
                            Ok(line) => line,
                            Err(e) => {
                                tracing::warn!(command = %name, bytes = raw.len(), error = %e, "discarding non-UTF-8 line from subprocess");
                                continue;
                            }
                        };
                        if line.trim().is_empty() {
                            continue;
                        }
                        if tx.send(line.to_string()).is_err() {
                            // 消费端已释放，没有人再关心后续输出
                            break;
                        }
                    }
                    Err(e) => {
                        tracing::warn!(command = %name, pid = ?pid, error = %e, "subprocess stdout read failed");
                        break;
                    }
                }
            }
            closed_reader.store(true, Ordering::SeqCst);
        });

        // 写出任务独占 stdin；整行写出，发送端释放后退出并关闭 stdin
        let (write_tx, mut write_rx) = mpsc::unbounded_channel::<Vec<u8>>();
        let closed_writer = Arc::clone(&closed);
        let name = command.to_string();
        let mut stdin = stdin;
        tokio::spawn(async move {
            while let Some(buf) = write_rx.recv().await {
                let written: std::io::Result<()> = async {
                    stdin.write_all(&buf).await?;
                    stdin.flush().await
                }
                .await;
                if let Err(e) = written {
                    tracing::warn!(command = %name, error = %e, "subprocess stdin write failed, channel closed");
                    closed_writer.store(true, Ordering::SeqCst);
                    break;
                }
            }
        });

        tracing::info!(command = %command, args = ?args, pid = ?pid, "subprocess started");

        Ok((
            Self {
                command: command.to_string(),
                pid,
                writer: StdMutex::new(Some(write_tx)),
                child: Mutex::new(Some(child)),
                closed,
            },
            rx,
        ))
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// 终止子进程并释放通道；重复调用无副作用
    pub async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.writer.lock().unwrap_or_else(|e| e.into_inner()).take();

        let Some(mut child) = self.child.lock().await.take() else {
            return;
        };
        if let Err(e) = child.start_kill() {
            // 已经退出的进程再 kill 会报错，不算失败
            tracing::debug!(command = %self.command, error = %e, "kill skipped");
        }
        match tokio::time::timeout(REAP_TIMEOUT, child.wait()).await {
            Ok(Ok(status)) => {
                tracing::info!(command = %self.command, pid = ?self.pid, code = ?status.code(), "subprocess exited")
            }
            Ok(Err(e)) => tracing::warn!(command = %self.command, error = %e, "subprocess wait failed"),
            Err(_) => tracing::warn!(command = %self.command, "subprocess did not exit in time"),
        }
    }
}

#[async_trait]
impl LineSink for SubprocessChannel {
    async fn send_line(&self, line: String) -> Result<(), AgentError> {
        if line.contains('\n') {
            return Err(AgentError::WriteError(
                "line must not contain a newline".to_string(),
            ));
        }
        if self.is_closed() {
            return Err(AgentError::ChannelClosed);
        }

        let mut buf = line.into_bytes();
        buf.push(b'\n');

        let mut writer = self.writer.lock().unwrap_or_else(|e| e.into_inner());
        let sender = writer.as_ref().ok_or(AgentError::ChannelClosed)?;
        if sender.send(buf).is_err() {
            // 写出任务已因写失败退出
            writer.take();
            return Err(AgentError::ChannelClosed);
        }
        Ok(())
    }
}
