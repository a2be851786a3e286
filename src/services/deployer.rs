//! 部署编排
//!
//! 把 setup / deploy 工作流翻译成有序的远程命令，在固定注入点执行钩子。
//! 所有命令通过同一个会话串行执行，上一步完成前不会开始下一步。

use serde_json::Value;
use tracing::{debug, error, info, warn};

use crate::config::constants::ECOSYSTEM_FILE;
use crate::config::{merge_env, DeployEnvironment};
use crate::domain::{
    join_chain, shell_quote, CommandOutcome, DeploymentIdentity, EnvironmentMap, HookName,
    HookSet, WorkflowStatus,
};
use crate::error::{ConnectionError, DeployError, DeployResult, SessionError};
use crate::infra::RemoteSession;

/// 编排器构造参数
#[derive(Clone, Debug)]
pub struct DeployerOptions {
    pub identity: DeploymentIdentity,
    pub hooks: HookSet,
    pub env: EnvironmentMap,
}

impl DeployerOptions {
    /// 从部署环境生成，`saved` 中的变量覆盖环境里的同名配置
    pub fn from_environment(environment: &DeployEnvironment, saved: &EnvironmentMap) -> Self {
        Self {
            identity: environment.identity(),
            hooks: environment.hooks.clone(),
            env: merge_env(&environment.env, saved),
        }
    }
}

/// 部署编排器
///
/// 持有会话的唯一所有权；环境变量在构造时确定，之后不再变化。
pub struct Deployer<S> {
    identity: DeploymentIdentity,
    hooks: HookSet,
    env: EnvironmentMap,
    session: S,
}

impl<S: RemoteSession> Deployer<S> {
    pub fn new(
        session: S,
        identity: DeploymentIdentity,
        hooks: HookSet,
        env: EnvironmentMap,
    ) -> Self {
        Self {
            identity,
            hooks,
            env,
            session,
        }
    }

    pub fn with_options(session: S, options: DeployerOptions) -> Self {
        Self::new(session, options.identity, options.hooks, options.env)
    }

    #[cfg(test)]
    pub(crate) fn session(&self) -> &S {
        &self.session
    }

    /// 打开会话
    pub async fn start(&self) -> Result<(), ConnectionError> {
        self.session.open().await
    }

    /// 关闭会话，任何路径上都应调用
    pub async fn stop(&self) {
        self.session.close().await
    }

    /// 直接执行命令并返回原始结果，错误直接向上传播
    pub async fn run(&self, command: &str) -> DeployResult<CommandOutcome> {
        self.run_command(&[command], None).await
    }

    /// 初始化部署目录
    ///
    /// `force` 为真时先删除整个部署目录，否则目录已存在即失败。
    /// 失败只记录日志并返回 `WorkflowStatus::Failed`，会话保持打开以便重试。
    pub async fn setup(&self, force: bool) -> WorkflowStatus {
        match self.try_setup(force).await {
            Ok(()) => {
                info!(path = %self.identity.path, "Setup successful");
                WorkflowStatus::Success
            }
            Err(e) => {
                let code = e.outcome().and_then(|o| o.exit_code);
                error!(path = %self.identity.path, exit_code = ?code, "{}", e);
                WorkflowStatus::Failed
            }
        }
    }

    /// 部署 `new_ref`（缺省为配置的 ref）
    ///
    /// `new_config` 存在时写入 `<path>/current/ecosystem.json`。
    pub async fn deploy(&self, new_ref: Option<&str>, new_config: Option<&Value>) -> WorkflowStatus {
        match self.try_deploy(new_ref, new_config).await {
            Ok(()) => {
                info!(path = %self.identity.path, "Deployment successful");
                WorkflowStatus::Success
            }
            Err(e) => {
                let code = e.outcome().and_then(|o| o.exit_code);
                error!(path = %self.identity.path, exit_code = ?code, "{}", e);
                WorkflowStatus::Failed
            }
        }
    }

    async fn try_setup(&self, force: bool) -> DeployResult<()> {
        let path = &self.identity.path;

        if force {
            self.run_command(&[format!("rm -rf {}", path)], Some("Could not clean directory"))
                .await?;
        } else {
            self.run_command(&[format!("[ ! -e {} ]", path)], Some("Folder already exists"))
                .await?;
        }

        self.execute_hook(HookName::PreSetup).await?;

        info!("Creating directories...");
        self.run_command(
            &[format!(
                "mkdir -p {path}/shared/logs {path}/shared/pids {path}/source",
                path = path
            )],
            Some("Directory structure creation failed"),
        )
        .await?;

        info!(repo = %self.identity.repo, "Cloning repo...");
        self.run_command(
            &[format!(
                "git clone {} {}",
                self.identity.repo,
                self.identity.source_dir()
            )],
            Some("Repo cloning failed"),
        )
        .await?;

        self.link_current().await?;

        self.execute_hook(HookName::PostSetup).await
    }

    async fn try_deploy(&self, new_ref: Option<&str>, new_config: Option<&Value>) -> DeployResult<()> {
        let git_ref = self.identity.resolve_ref(new_ref);
        let enter_source = format!("cd {}", self.identity.source_dir());
        info!(git_ref = %git_ref, "Deploying {}", git_ref);

        self.execute_hook(HookName::PreFetch).await?;

        info!("Fetching...");
        self.run_command(&[enter_source.as_str(), "git fetch --all --tags"], Some("Fetch failed"))
            .await?;

        info!("Resetting HEAD to {}...", git_ref);
        self.run_command(
            &[enter_source.clone(), format!("git reset --hard {}", git_ref)],
            Some("Resetting failed"),
        )
        .await?;

        self.link_current().await?;

        self.run_command(
            &[
                enter_source.clone(),
                format!("git rev-parse --short HEAD >> {}", self.identity.history_file()),
            ],
            Some("Log append failed"),
        )
        .await?;

        self.execute_hook(HookName::PreDeploy).await?;

        if let Some(config) = new_config {
            self.write_config(config).await?;
        }

        self.execute_hook(HookName::Deploy).await?;
        self.execute_hook(HookName::PostDeploy).await
    }

    /// `current` 始终指向 `source`
    async fn link_current(&self) -> DeployResult<()> {
        info!("Linking source...");
        self.run_command(
            &[format!(
                "ln -sfn {} {}",
                self.identity.source_dir(),
                self.identity.current_link()
            )],
            Some("Symlink creation failed"),
        )
        .await
        .map(|_| ())
    }

    /// 写入下发的配置
    ///
    /// 不附加环境变量，避免 `bash -c "..."` 包装破坏单引号内的 JSON。
    async fn write_config(&self, config: &Value) -> DeployResult<()> {
        info!("Writing new configuration");
        let outcome = self
            .run_command(
                &[
                    format!("cd {}", self.identity.source_dir()),
                    "git rev-parse --short HEAD".to_string(),
                ],
                None,
            )
            .await?;

        let commit = outcome.stdout.trim();
        if commit.is_empty() {
            warn!("Could not resolve deployed commit, configuration not written");
            return Ok(());
        }

        let target = format!("{}/{}", self.identity.current_link(), ECOSYSTEM_FILE);
        let command = format!("printf '%s\\n' {} > {}", shell_quote(&config.to_string()), target);
        self.run_with_env(&command, None, Some("Configuration write failed"))
            .await?;
        info!(commit = %commit, file = %target, "Configuration written");
        Ok(())
    }

    /// 执行钩子
    ///
    /// 每条命令单独执行，工作目录固定为 `<path>/current`，输出实时回显；
    /// 遇到第一个失败即停止，所有失败统一为 `DeployError::HookFailed`。
    async fn execute_hook(&self, name: HookName) -> DeployResult<()> {
        let Some(hook) = self.hooks.get(name) else {
            return Ok(());
        };

        info!(hook = %name, "Running \"{}\" hook", name);
        let current = self.identity.current_link();
        for command in hook.commands() {
            let pinned = format!("cd {} && {}", current, command);
            if let Err(e) = self.session.execute(&pinned, Some(&self.env), true).await {
                debug!(hook = %name, command = %command, error = %e, "Hook command failed");
                return Err(DeployError::HookFailed);
            }
        }
        Ok(())
    }

    /// 用 `&&` 串联命令，作为一次远程调用执行，并附加构造时的环境变量
    async fn run_command<C: AsRef<str>>(
        &self,
        commands: &[C],
        error_message: Option<&str>,
    ) -> DeployResult<CommandOutcome> {
        let chain = join_chain(commands);
        self.run_with_env(&chain, Some(&self.env), error_message).await
    }

    async fn run_with_env(
        &self,
        chain: &str,
        env: Option<&EnvironmentMap>,
        error_message: Option<&str>,
    ) -> DeployResult<CommandOutcome> {
        match self.session.execute(chain, env, false).await {
            Ok(outcome) => Ok(outcome),
            Err(SessionError::CommandFailed(outcome)) => {
                let message = match (error_message, outcome.exit_code) {
                    (Some(message), _) => message.to_string(),
                    (None, Some(code)) => format!("Command \"{}\" failed with code {}", chain, code),
                    (None, None) => format!("Command \"{}\" failed: {}", chain, outcome),
                };
                Err(DeployError::StepFailed { message, outcome })
            }
            Err(SessionError::Connection(e)) => Err(e.into()),
        }
    }
}
