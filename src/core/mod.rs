//! 核心层：错误类型与生命周期（优雅关闭）

pub mod error;
pub mod shutdown;

pub use error::AgentError;
pub use shutdown::{ShutdownCleanup, ShutdownCoordinator, ShutdownManager, ShutdownReason};
