//! 统一错误处理
//!
//! - `ConnectionError`: 传输层/认证失败，对整个调用致命
//! - `SessionError`: 单条命令执行结果（连接错误或非零退出）
//! - `DeployError`: 工作流步骤失败、钩子失败
//! - `ConfigError`: 配置文件与私钥加载

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::domain::CommandOutcome;

/// 连接错误
#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("SSH transport error: {0}")]
    Transport(#[from] russh::Error),

    #[error("Invalid private key: {0}")]
    InvalidKey(#[from] russh_keys::Error),

    #[error("Authentication rejected for user {user}")]
    Rejected { user: String },

    #[error("Host key mismatch: expected {expected}, got {actual}")]
    HostKeyMismatch { expected: String, actual: String },

    #[error("Connection to {host} timed out after {timeout:?}")]
    Timeout { host: String, timeout: Duration },

    #[error("Failed to spawn command: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("Connection is not open")]
    NotOpen,

    #[error("Connection closed while command was running")]
    Closed,
}

/// 命令执行错误
#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Connection(#[from] ConnectionError),

    /// 非零退出码或被信号终止，携带完整输出用于诊断
    #[error("Command failed with {0}")]
    CommandFailed(CommandOutcome),
}

/// 工作流错误
#[derive(Debug, Error)]
pub enum DeployError {
    #[error(transparent)]
    Connection(#[from] ConnectionError),

    #[error("{message}")]
    StepFailed {
        message: String,
        outcome: CommandOutcome,
    },

    /// 钩子是用户脚本，只关心是否失败
    #[error("Hook execution failed")]
    HookFailed,
}

impl DeployError {
    /// 失败命令的执行结果（如有）
    pub fn outcome(&self) -> Option<&CommandOutcome> {
        match self {
            DeployError::StepFailed { outcome, .. } => Some(outcome),
            _ => None,
        }
    }
}

/// 配置错误
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("File {} not found or inaccessible", .path.display())]
    NotFound {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("File {} is not a valid config file", .path.display())]
    Invalid {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Environment not found in specified config file")]
    UnknownEnvironment(String),

    #[error("Could not read private key {}", .path.display())]
    Key {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Could not determine home directory")]
    NoHomeDir,
}

/// 便捷类型别名
pub type DeployResult<T> = Result<T, DeployError>;
