//! 领域模型模块
//!
//! 纯数据结构，不依赖 russh/tokio

pub mod command;
pub mod deploy;
pub mod hooks;

// Re-exports for convenience
pub use command::{join_chain, render_command, shell_quote, CommandOutcome, EnvironmentMap};
pub use deploy::{DeploymentIdentity, WorkflowStatus};
pub use hooks::{HookCommand, HookName, HookSet};
