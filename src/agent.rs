//! Headless Agent 运行时
//!
//! 供外部前端（HTTP 入口、命令行等）调用的无界面 Agent：
//! Agent::start 按配置启动 MCP 子进程、完成工具发现并构建 system prompt；
//! handle_message 对单条用户输入跑 Agent 主循环并返回最终回复；
//! shutdown 显式释放子进程（幂等）。

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::Mutex;

use crate::config::AppConfig;
use crate::core::{AgentError, ShutdownCleanup};
use crate::llm::{LlmClient, OpenAiClient, RetryingLlmClient};
use crate::mcp::{LineSink, RpcCorrelator, SubprocessChannel};
use crate::memory::Transcript;
use crate::react::{agent_loop, build_system_prompt, LoopContext, Planner, DEFAULT_MAX_TOOL_TURNS};
use crate::tools::{RagflowTool, ToolRegistry};

/// Agent 行为参数
#[derive(Debug, Clone)]
pub struct AgentSettings {
    pub max_tool_turns: usize,
    pub empty_input_reply: String,
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            max_tool_turns: DEFAULT_MAX_TOOL_TURNS,
            empty_input_reply: "请再详细描述一下您的问题哈～".to_string(),
        }
    }
}

impl From<&crate::config::AgentSection> for AgentSettings {
    fn from(section: &crate::config::AgentSection) -> Self {
        Self {
            max_tool_turns: section.max_tool_turns,
            empty_input_reply: section.empty_input_reply.clone(),
        }
    }
}

/// 编排客户端：工具注册表 + 补全客户端 + 对话记录，外加可选的子进程
pub struct Agent {
    registry: ToolRegistry,
    planner: Planner,
    transcript: Transcript,
    settings: AgentSettings,
    channel: Option<Arc<SubprocessChannel>>,
    /// 同一时刻只处理一条用户消息
    turn: Mutex<()>,
    shut_down: AtomicBool,
}

impl Agent {
    /// 由已就绪的组件构建；system prompt 取注册表当前内容
    pub fn new(registry: ToolRegistry, completion: RetryingLlmClient, settings: AgentSettings) -> Self {
        let (remote, local) = registry.describe_all();
        let system_prompt = build_system_prompt(&remote, &local);
        tracing::debug!(remote = remote.len(), local = local.len(), "system prompt built");
        Self {
            registry,
            planner: Planner::new(completion),
            transcript: Transcript::new(system_prompt),
            settings,
            channel: None,
            turn: Mutex::new(()),
            shut_down: AtomicBool::new(false),
        }
    }

    /// 交由 Agent 持有子进程，shutdown 时关闭
    pub fn with_channel(mut self, channel: Arc<SubprocessChannel>) -> Self {
        self.channel = Some(channel);
        self
    }

    /// 按配置启动：OpenAI 兼容补全客户端
    pub async fn start(cfg: &AppConfig) -> Result<Self, AgentError> {
        cfg.validate()?;
        let llm = OpenAiClient::new(
            &cfg.llm.url,
            &cfg.llm.model,
            &cfg.llm.api_key,
            cfg.llm.request_timeout(),
        )
        .map_err(|e| AgentError::ConfigError(e.to_string()))?;
        Self::start_with_llm(cfg, Arc::new(llm)).await
    }

    /// 按配置启动，使用给定的补全后端
    ///
    /// 子进程启动失败只有在 `mcp.required = true` 时才返回错误，否则仅使用本地工具。
    pub async fn start_with_llm(cfg: &AppConfig, llm: Arc<dyn LlmClient>) -> Result<Self, AgentError> {
        let mut registry = ToolRegistry::new(cfg.tools.tool_timeout());
        if cfg.tools.ragflow.enabled {
            let tool = RagflowTool::new(cfg.tools.ragflow.settings()).map_err(AgentError::ConfigError)?;
            registry.register(tool);
        }

        let mut channel = None;
        if cfg.mcp.enabled {
            match SubprocessChannel::start(&cfg.mcp.command, &cfg.mcp.args) {
                Ok((ch, lines)) => {
                    let ch = Arc::new(ch);
                    let sink: Arc<dyn LineSink> = ch.clone();
                    let rpc = Arc::new(RpcCorrelator::new(sink, lines, cfg.mcp.request_timeout()));
                    registry
                        .discover_remote(rpc, &cfg.mcp.protocol_version, cfg.mcp.client_info())
                        .await;
                    channel = Some(ch);
                }
                Err(e) if cfg.mcp.required => return Err(e),
                Err(e) => registry.record_diagnostic(e.to_string()),
            }
        }

        let completion = RetryingLlmClient::new(llm, cfg.llm.retry_config());
        let mut agent = Self::new(registry, completion, AgentSettings::from(&cfg.agent));
        if let Some(ch) = channel {
            agent = agent.with_channel(ch);
        }
        tracing::info!(
            app = cfg.app.name.as_deref().unwrap_or("mcp-agent"),
            diagnostics = agent.registry.diagnostics().len(),
            "agent started"
        );
        Ok(agent)
    }

    /// 处理一条用户消息
    ///
    /// 空输入写入澄清回复并返回 `Some("")`，不请求补全；补全重试耗尽时返回 None。
    pub async fn handle_message(&self, text: &str) -> Option<String> {
        let _turn = self.turn.lock().await;

        if text.is_empty() {
            self.transcript
                .append_assistant(self.settings.empty_input_reply.clone());
            return Some(String::new());
        }

        let ctx = LoopContext {
            planner: &self.planner,
            registry: &self.registry,
            transcript: &self.transcript,
            max_tool_turns: self.settings.max_tool_turns,
        };
        agent_loop(&ctx, text).await
    }

    pub fn transcript(&self) -> &Transcript {
        &self.transcript
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    pub fn system_prompt(&self) -> String {
        self.transcript
            .snapshot()
            .first()
            .map(|m| m.text())
            .unwrap_or_default()
    }

    /// 关闭子进程；重复调用无副作用
    pub async fn shutdown(&self) {
        if self.shut_down.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some(ch) = &self.channel {
            ch.close().await;
        }
        tracing::info!("agent shut down");
    }
}

#[async_trait::async_trait]
impl ShutdownCleanup for Agent {
    async fn cleanup(&self) -> anyhow::Result<()> {
        self.shutdown().await;
        Ok(())
    }

    fn name(&self) -> &'static str {
        "mcp-agent"
    }
}
