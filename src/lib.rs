//! ecodeploy - 基于 git 的远程部署
//!
//! 通过一条 SSH 会话完成部署目录初始化 (setup) 与重复部署 (deploy)，
//! 并在固定的生命周期节点执行用户钩子。

pub mod config;
pub mod domain;
pub mod error;
pub mod infra;
pub mod services;

pub use domain::{CommandOutcome, DeploymentIdentity, EnvironmentMap, HookCommand, HookName, HookSet, WorkflowStatus};
pub use error::{ConfigError, ConnectionError, DeployError, SessionError};
pub use infra::{ConnectionParameters, LocalSession, RemoteSession, SshSession};
pub use services::{Deployer, DeployerOptions};
