//! 生命周期钩子

use std::fmt;

use serde::{Deserialize, Serialize};

/// 钩子注入点
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum HookName {
    PreSetup,
    PostSetup,
    PreFetch,
    PreDeploy,
    Deploy,
    PostDeploy,
}

impl HookName {
    /// 配置文件中的键名
    pub fn as_str(&self) -> &'static str {
        match self {
            HookName::PreSetup => "pre-setup",
            HookName::PostSetup => "post-setup",
            HookName::PreFetch => "pre-fetch",
            HookName::PreDeploy => "pre-deploy",
            HookName::Deploy => "deploy",
            HookName::PostDeploy => "post-deploy",
        }
    }
}

impl fmt::Display for HookName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 钩子内容：单条命令或按顺序执行的命令列表
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum HookCommand {
    Single(String),
    Sequence(Vec<String>),
}

impl HookCommand {
    /// 依次需要执行的命令
    pub fn commands(&self) -> Vec<&str> {
        match self {
            HookCommand::Single(command) => vec![command.as_str()],
            HookCommand::Sequence(commands) => commands.iter().map(String::as_str).collect(),
        }
    }
}

impl From<&str> for HookCommand {
    fn from(command: &str) -> Self {
        HookCommand::Single(command.to_string())
    }
}

impl From<Vec<&str>> for HookCommand {
    fn from(commands: Vec<&str>) -> Self {
        HookCommand::Sequence(commands.into_iter().map(str::to_string).collect())
    }
}

/// 全部钩子，缺省表示跳过
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HookSet {
    #[serde(rename = "pre-setup", default, skip_serializing_if = "Option::is_none")]
    pub pre_setup: Option<HookCommand>,
    #[serde(rename = "post-setup", default, skip_serializing_if = "Option::is_none")]
    pub post_setup: Option<HookCommand>,
    #[serde(rename = "pre-fetch", default, skip_serializing_if = "Option::is_none")]
    pub pre_fetch: Option<HookCommand>,
    #[serde(rename = "pre-deploy", default, skip_serializing_if = "Option::is_none")]
    pub pre_deploy: Option<HookCommand>,
    #[serde(rename = "deploy", default, skip_serializing_if = "Option::is_none")]
    pub deploy: Option<HookCommand>,
    #[serde(rename = "post-deploy", default, skip_serializing_if = "Option::is_none")]
    pub post_deploy: Option<HookCommand>,
}

impl HookSet {
    pub fn get(&self, name: HookName) -> Option<&HookCommand> {
        match name {
            HookName::PreSetup => self.pre_setup.as_ref(),
            HookName::PostSetup => self.post_setup.as_ref(),
            HookName::PreFetch => self.pre_fetch.as_ref(),
            HookName::PreDeploy => self.pre_deploy.as_ref(),
            HookName::Deploy => self.deploy.as_ref(),
            HookName::PostDeploy => self.post_deploy.as_ref(),
        }
    }

    /// 链式设置钩子
    pub fn with(mut self, name: HookName, command: impl Into<HookCommand>) -> Self {
        let slot = match name {
            HookName::PreSetup => &mut self.pre_setup,
            HookName::PostSetup => &mut self.post_setup,
            HookName::PreFetch => &mut self.pre_fetch,
            HookName::PreDeploy => &mut self.pre_deploy,
            HookName::Deploy => &mut self.deploy,
            HookName::PostDeploy => &mut self.post_deploy,
        };
        *slot = Some(command.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hook_set_from_json() {
        let hooks: HookSet = serde_json::from_str(
            r#"{
                "pre-setup": "echo hi",
                "deploy": ["npm ci", "pm2 reload ecosystem.json"]
            }"#,
        )
        .unwrap();

        assert_eq!(hooks.pre_setup, Some(HookCommand::Single("echo hi".to_string())));
        assert_eq!(
            hooks.get(HookName::Deploy).map(HookCommand::commands),
            Some(vec!["npm ci", "pm2 reload ecosystem.json"])
        );
        assert!(hooks.get(HookName::PostDeploy).is_none());
    }

    #[test]
    fn test_empty_hook_set() {
        let hooks: HookSet = serde_json::from_str("{}").unwrap();
        assert_eq!(hooks, HookSet::default());
    }

    #[test]
    fn test_hook_name_keys() {
        assert_eq!(HookName::PreFetch.as_str(), "pre-fetch");
        assert_eq!(HookName::PostDeploy.to_string(), "post-deploy");
    }
}
