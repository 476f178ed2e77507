//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `MCP_AGENT__*` 覆盖（双下划线表示嵌套，如 `MCP_AGENT__LLM__MODEL=gpt-4o`）。
//! llm 的 url / model / api_key 未配置时，分别回退到环境变量 `LLM_URL` / `MODEL` / `API_KEY`。

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use crate::core::AgentError;
use crate::llm::RetryConfig;
use crate::mcp::protocol::{ClientInfo, DEFAULT_PROTOCOL_VERSION};
use crate::tools::RagflowSettings;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub app: AppSection,
    pub mcp: McpSection,
    pub llm: LlmSection,
    pub agent: AgentSection,
    pub tools: ToolsSection,
}

/// [app] 段
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppSection {
    pub name: Option<String>,
}

/// [mcp] 段：子进程命令、请求超时与握手身份
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct McpSection {
    /// 关闭后只使用本地工具
    pub enabled: bool,
    /// 子进程启动失败是否视为致命错误
    pub required: bool,
    pub command: String,
    pub args: Vec<String>,
    pub request_timeout_ms: u64,
    pub protocol_version: String,
    pub client_name: String,
    pub client_version: String,
}

impl Default for McpSection {
    fn default() -> Self {
        let client = ClientInfo::default();
        Self {
            enabled: true,
            required: false,
            command: "npx".to_string(),
            args: vec![
                "-y".to_string(),
                "@modelcontextprotocol/server-filesystem".to_string(),
                ".".to_string(),
            ],
            request_timeout_ms: 30_000,
            protocol_version: DEFAULT_PROTOCOL_VERSION.to_string(),
            client_name: client.name,
            client_version: client.version,
        }
    }
}

impl McpSection {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn client_info(&self) -> ClientInfo {
        ClientInfo {
            name: self.client_name.clone(),
            version: self.client_version.clone(),
        }
    }
}

/// [llm] 段：补全端点、模型与重试
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LlmSection {
    /// 完整的 chat/completions 地址
    pub url: String,
    pub model: String,
    pub api_key: String,
    pub max_retries: u32,
    pub retry_delay_ms: u64,
    pub request_timeout_secs: u64,
}

impl Default for LlmSection {
    fn default() -> Self {
        Self {
            url: String::new(),
            model: String::new(),
            api_key: String::new(),
            max_retries: 3,
            retry_delay_ms: 2_000,
            request_timeout_secs: 60,
        }
    }
}

impl LlmSection {
    pub fn retry_config(&self) -> RetryConfig {
        RetryConfig {
            max_retries: self.max_retries,
            delay: Duration::from_millis(self.retry_delay_ms),
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// [agent] 段
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AgentSection {
    /// 单条用户消息内 function_call 的最大次数
    pub max_tool_turns: usize,
    /// 空输入时写入对话的澄清回复
    pub empty_input_reply: String,
}

impl Default for AgentSection {
    fn default() -> Self {
        Self {
            max_tool_turns: 8,
            empty_input_reply: "请再详细描述一下您的问题哈～".to_string(),
        }
    }
}

/// [tools] 段：本地工具超时与检索后端
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ToolsSection {
    /// 单次本地工具调用超时（秒）
    pub tool_timeout_secs: u64,
    pub ragflow: RagflowSection,
}

impl Default for ToolsSection {
    fn default() -> Self {
        Self {
            tool_timeout_secs: 30,
            ragflow: RagflowSection::default(),
        }
    }
}

impl ToolsSection {
    pub fn tool_timeout(&self) -> Duration {
        Duration::from_secs(self.tool_timeout_secs)
    }
}

/// [tools.ragflow] 段
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RagflowSection {
    pub enabled: bool,
    pub url: String,
    pub api_key: String,
    pub dataset_ids: Vec<String>,
    pub document_ids: Vec<String>,
    pub separator: String,
    pub timeout_secs: u64,
}

impl Default for RagflowSection {
    fn default() -> Self {
        Self {
            enabled: false,
            url: String::new(),
            api_key: String::new(),
            dataset_ids: Vec::new(),
            document_ids: Vec::new(),
            separator: "\n---\n".to_string(),
            timeout_secs: 30,
        }
    }
}

impl RagflowSection {
    pub fn settings(&self) -> RagflowSettings {
        RagflowSettings {
            url: self.url.clone(),
            api_key: self.api_key.clone(),
            dataset_ids: self.dataset_ids.clone(),
            document_ids: self.document_ids.clone(),
            separator: self.separator.clone(),
            timeout: Duration::from_secs(self.timeout_secs),
        }
    }
}

impl AppConfig {
    /// 启动前的一致性检查
    pub fn validate(&self) -> Result<(), AgentError> {
        if self.llm.url.trim().is_empty() {
            return Err(AgentError::ConfigError(
                "llm.url is not set (or LLM_URL)".to_string(),
            ));
        }
        if self.tools.ragflow.enabled && self.tools.ragflow.url.trim().is_empty() {
            return Err(AgentError::ConfigError(
                "tools.ragflow.enabled requires tools.ragflow.url".to_string(),
            ));
        }
        if self.mcp.enabled && self.mcp.command.trim().is_empty() {
            return Err(AgentError::ConfigError("mcp.command is empty".to_string()));
        }
        Ok(())
    }

    fn apply_env_fallbacks(&mut self) {
        fill_from_env(&mut self.llm.url, "LLM_URL");
        fill_from_env(&mut self.llm.model, "MODEL");
        fill_from_env(&mut self.llm.api_key, "API_KEY");
    }
}

fn fill_from_env(slot: &mut String, var: &str) {
    if slot.trim().is_empty() {
        if let Ok(v) = std::env::var(var) {
            *slot = v;
        }
    }
}

/// 从 config 目录加载配置，环境变量 MCP_AGENT__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 MCP_AGENT__*（双下划线表示嵌套键）
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    let default_names = ["config/default", "../config/default", "default"];
    for name in default_names {
        let path = format!("{}.toml", name);
        if std::path::Path::new(&path).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("MCP_AGENT")
            .separator("__")
            .try_parsing(true),
    );

    let mut cfg: AppConfig = builder.build()?.try_deserialize()?;
    cfg.apply_env_fallbacks();
    Ok(cfg)
}
