//! 认知层：动作解析（Planner）、System prompt、Agent 主循环

pub mod loop_;
pub mod planner;
pub mod prompt;

pub use loop_::{agent_loop, function_result_message, LoopContext, DEFAULT_MAX_TOOL_TURNS};
pub use planner::{parse_agent_action, AgentAction, Planner};
pub use prompt::build_system_prompt;
