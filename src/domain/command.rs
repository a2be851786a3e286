//! 命令执行相关领域模型

use std::collections::BTreeMap;
use std::fmt;

use serde::Serialize;

/// 注入到远程命令的环境变量（变量名 -> 值）
pub type EnvironmentMap = BTreeMap<String, String>;

/// 单条命令的执行结果
///
/// `exit_code` 为 `None` 且 `signal` 存在时，表示进程被信号终止而不是正常退出。
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct CommandOutcome {
    /// 退出码
    pub exit_code: Option<i32>,
    /// 终止信号名称 (e.g. "KILL", "TERM")
    pub signal: Option<String>,
    /// 标准输出
    pub stdout: String,
    /// 标准错误
    pub stderr: String,
}

impl CommandOutcome {
    /// 退出码恰好为 0 才算成功
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

impl fmt::Display for CommandOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.exit_code, &self.signal) {
            (Some(code), _) => write!(f, "exit code {}", code),
            (None, Some(signal)) => write!(f, "killed by signal {}", signal),
            (None, None) => write!(f, "no exit status"),
        }
    }
}

/// 把命令序列用 `&&` 串成一条命令，任意一步失败即中止整条链
pub fn join_chain<S: AsRef<str>>(commands: &[S]) -> String {
    commands
        .iter()
        .map(|c| c.as_ref())
        .collect::<Vec<_>>()
        .join(" && ")
}

/// 生成最终发送给远程 shell 的命令行
///
/// 环境变量非空时渲染为 `NAME="value" ... bash -c "<command>"`，变量只对这一次调用可见。
/// 命令内部的双引号由调用方负责转义。
pub fn render_command(command: &str, env: Option<&EnvironmentMap>) -> String {
    match env {
        Some(env) if !env.is_empty() => {
            let assignments = env
                .iter()
                .map(|(name, value)| format!("{}=\"{}\"", name, value))
                .collect::<Vec<_>>()
                .join(" ");
            format!("{} bash -c \"{}\"", assignments, command)
        }
        _ => command.to_string(),
    }
}

/// 单引号包裹，用于把任意文本安全地嵌入 shell 命令
pub fn shell_quote(text: &str) -> String {
    format!("'{}'", text.replace('\'', r"'\''"))
}
