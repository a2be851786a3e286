//! 部署相关领域模型

use serde::{Deserialize, Serialize};

/// 部署身份：仓库、目标 ref 与远程部署目录
///
/// 远程目录结构：
/// - `<path>/shared/{logs,pids}`
/// - `<path>/source` (git 工作区)
/// - `<path>/current` -> `<path>/source`
/// - `<path>/.deploys` (每次部署追加一行短 commit hash)
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentIdentity {
    /// Git 仓库地址
    pub repo: String,
    /// 默认部署的 ref (branch / tag / commit)
    #[serde(rename = "ref")]
    pub git_ref: String,
    /// 远程部署根目录
    pub path: String,
}

impl DeploymentIdentity {
    pub fn new(repo: impl Into<String>, git_ref: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            repo: repo.into(),
            git_ref: git_ref.into(),
            path: path.into(),
        }
    }

    pub fn source_dir(&self) -> String {
        format!("{}/source", self.path)
    }

    pub fn current_link(&self) -> String {
        format!("{}/current", self.path)
    }

    pub fn history_file(&self) -> String {
        format!("{}/.deploys", self.path)
    }

    /// 本次部署实际使用的 ref
    pub fn resolve_ref<'a>(&'a self, new_ref: Option<&'a str>) -> &'a str {
        new_ref.filter(|r| !r.is_empty()).unwrap_or(&self.git_ref)
    }
}

/// 工作流结果，对应进程退出码 0 / 1
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStatus {
    Success,
    Failed,
}

impl WorkflowStatus {
    pub fn code(&self) -> i32 {
        match self {
            WorkflowStatus::Success => 0,
            WorkflowStatus::Failed => 1,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, WorkflowStatus::Success)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layout_paths() {
        let id = DeploymentIdentity::new("git@host:org/app.git", "v1.2.0", "/srv/app");
        assert_eq!(id.source_dir(), "/srv/app/source");
        assert_eq!(id.current_link(), "/srv/app/current");
        assert_eq!(id.history_file(), "/srv/app/.deploys");
    }

    #[test]
    fn test_resolve_ref() {
        let id = DeploymentIdentity::new("repo", "main", "/srv/app");
        assert_eq!(id.resolve_ref(None), "main");
        assert_eq!(id.resolve_ref(Some("")), "main");
        assert_eq!(id.resolve_ref(Some("v2")), "v2");
    }

    #[test]
    fn test_status_codes() {
        assert_eq!(WorkflowStatus::Success.code(), 0);
        assert_eq!(WorkflowStatus::Failed.code(), 1);
        assert!(!WorkflowStatus::Failed.is_success());
    }
}
