//! 配置模块
//!
//! 生态配置文件解析、环境变量快照与私钥加载

pub mod ecosystem;
pub mod env;

pub use ecosystem::{DeployEnvironment, EcosystemConfig};
pub use env::{load_private_key, merge_env, propagate_to_apps, resolve_key_path, SaveEnv};

/// 常量
pub mod constants {
    /// 默认 SSH 端口
    pub const DEFAULT_SSH_PORT: u16 = 22;

    /// 默认私钥，相对用户主目录
    pub const DEFAULT_KEY_FILE: &str = ".ssh/id_rsa";

    /// 下发配置写入 `<path>/current` 下的文件名
    pub const ECOSYSTEM_FILE: &str = "ecosystem.json";

    /// 默认日志过滤
    pub const DEFAULT_LOG_FILTER: &str = "ecodeploy=info,warn";
}
