//! 生态配置文件 (ecosystem.json)
//!
//! 顶层至少包含 `apps` 与 `deploy`。解析后保留原始 JSON，下发配置时完整写回，
//! 包括这里没有建模的字段。

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use serde_json::Value;

use crate::domain::{DeploymentIdentity, EnvironmentMap, HookSet};
use crate::error::ConfigError;
use crate::infra::ConnectionParameters;

use super::constants::DEFAULT_SSH_PORT;
use super::env::SaveEnv;

/// 整个配置文件
#[derive(Clone, Debug, Deserialize)]
pub struct EcosystemConfig {
    pub apps: Vec<Value>,
    pub deploy: BTreeMap<String, DeployEnvironment>,
    /// 文件原文
    #[serde(skip)]
    raw: Value,
}

/// 单个部署环境
#[derive(Clone, Debug, Deserialize)]
pub struct DeployEnvironment {
    pub user: String,
    pub host: String,
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(rename = "ref")]
    pub git_ref: String,
    pub repo: String,
    pub path: String,
    /// 私钥路径
    #[serde(default)]
    pub key: Option<PathBuf>,
    /// 连接超时（秒）
    #[serde(default)]
    pub timeout: Option<u64>,
    /// 服务器主机密钥指纹
    #[serde(default)]
    pub fingerprint: Option<String>,
    #[serde(default)]
    pub env: EnvironmentMap,
    #[serde(default)]
    pub save_env: Option<SaveEnv>,
    #[serde(flatten)]
    pub hooks: HookSet,
}

impl EcosystemConfig {
    /// 从 JSON 文件加载
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::NotFound {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(path, &text)
    }

    pub fn parse(path: &Path, text: &str) -> Result<Self, ConfigError> {
        let invalid = |source| ConfigError::Invalid {
            path: path.to_path_buf(),
            source,
        };
        let raw: Value = serde_json::from_str(text).map_err(invalid)?;
        let mut config: Self = serde_json::from_value(raw.clone()).map_err(invalid)?;
        config.raw = raw;
        Ok(config)
    }

    /// 查找部署环境
    pub fn environment(&self, name: &str) -> Result<&DeployEnvironment, ConfigError> {
        self.deploy
            .get(name)
            .ok_or_else(|| ConfigError::UnknownEnvironment(name.to_string()))
    }

    /// 完整的配置文件内容
    pub fn to_value(&self) -> Value {
        self.raw.clone()
    }
}

impl DeployEnvironment {
    pub fn identity(&self) -> DeploymentIdentity {
        DeploymentIdentity::new(&self.repo, &self.git_ref, &self.path)
    }

    /// 生成连接参数，`private_key` 为私钥内容
    pub fn connection(&self, private_key: String) -> ConnectionParameters {
        ConnectionParameters {
            host: self.host.clone(),
            port: self.port.unwrap_or(DEFAULT_SSH_PORT),
            username: self.user.clone(),
            private_key,
            passphrase: None,
            connect_timeout: self.timeout.map(Duration::from_secs),
            host_fingerprint: self.fingerprint.clone(),
        }
    }
}
