//! 本机命令执行
//!
//! 与 SSH 会话相同的契约，只是命令在本机 `bash -c` 中运行：
//! - stdout/stderr 分离，按原始字节读取
//! - 关闭会话时终止正在运行的命令

use std::process::Stdio;
use std::sync::Mutex as StdMutex;

use async_trait::async_trait;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::domain::{render_command, CommandOutcome, EnvironmentMap};
use crate::error::{ConnectionError, SessionError};
use crate::infra::session::{OutputCollector, RemoteSession};

/// 本机会话
pub struct LocalSession {
    log_output: bool,
    /// 会话锁，保证命令串行
    lock: Mutex<()>,
    state: StdMutex<Option<CancellationToken>>,
}

enum Chunk {
    Stdout(Vec<u8>),
    Stderr(Vec<u8>),
}

impl LocalSession {
    pub fn new(log_output: bool) -> Self {
        Self {
            log_output,
            lock: Mutex::new(()),
            state: StdMutex::new(None),
        }
    }

    fn token(&self) -> Option<CancellationToken> {
        self.state.lock().ok().and_then(|s| s.clone())
    }
}

#[async_trait]
impl RemoteSession for LocalSession {
    async fn open(&self) -> Result<(), ConnectionError> {
        if let Ok(mut state) = self.state.lock() {
            if state.is_none() {
                *state = Some(CancellationToken::new());
            }
        }
        debug!("Local session opened");
        Ok(())
    }

    async fn close(&self) {
        let token = self.state.lock().ok().and_then(|mut s| s.take());
        if let Some(token) = token {
            token.cancel();
            debug!("Local session closed");
        }
    }

    async fn execute(
        &self,
        command: &str,
        env: Option<&EnvironmentMap>,
        stream_output: bool,
    ) -> Result<CommandOutcome, SessionError> {
        let _guard = self.lock.lock().await;
        let cancel = self.token().ok_or(ConnectionError::NotOpen)?;

        let rendered = render_command(command, env);
        debug!(command = %rendered, "executing");

        let mut child = Command::new("bash")
            .arg("-c")
            .arg(&rendered)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(ConnectionError::Spawn)?;

        let (tx, mut rx) = mpsc::unbounded_channel();

        let stdout = child.stdout.take();
        let stdout_tx = tx.clone();
        let stdout_task = tokio::spawn(async move {
            if let Some(stdout) = stdout {
                forward(BufReader::new(stdout), |bytes| {
                    let _ = stdout_tx.send(Chunk::Stdout(bytes));
                })
                .await;
            }
        });

        let stderr = child.stderr.take();
        let stderr_tx = tx;
        let stderr_task = tokio::spawn(async move {
            if let Some(stderr) = stderr {
                forward(BufReader::new(stderr), |bytes| {
                    let _ = stderr_tx.send(Chunk::Stderr(bytes));
                })
                .await;
            }
        });

        let mut collector = OutputCollector::new(self.log_output && stream_output);

        let status = tokio::select! {
            _ = cancel.cancelled() => {
                warn!("Session closed, killing local command");
                let _ = child.kill().await;
                stdout_task.abort();
                stderr_task.abort();
                return Err(ConnectionError::Closed.into());
            }
            status = child.wait() => status.map_err(ConnectionError::Spawn)?,
        };

        // 等待读取任务结束，保证已产生的输出不会丢失
        let _ = stdout_task.await;
        let _ = stderr_task.await;
        while let Some(chunk) = rx.recv().await {
            match chunk {
                Chunk::Stdout(bytes) => collector.stdout(&bytes),
                Chunk::Stderr(bytes) => collector.stderr(&bytes),
            }
        }

        match status.code() {
            Some(code) => collector.exit_code(code),
            None => {
                if let Some(name) = termination_signal(&status) {
                    collector.signal(name);
                }
            }
        }

        collector.into_result()
    }
}

/// 按行转发原始字节，直到 EOF
///
/// 不做 UTF-8 解码，保证管道一直被读空，子进程不会因 SIGPIPE 退出。
async fn forward<R, F>(mut reader: R, mut send: F)
where
    R: AsyncBufRead + Unpin,
    F: FnMut(Vec<u8>),
{
    loop {
        let mut buf = Vec::new();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => break,
            Ok(_) => send(buf),
            Err(e) => {
                warn!(error = %e, "Failed to read command output");
                break;
            }
        }
    }
}

#[cfg(unix)]
fn termination_signal(status: &std::process::ExitStatus) -> Option<String> {
    use std::os::unix::process::ExitStatusExt;

    let name = match status.signal()? {
        1 => "HUP",
        2 => "INT",
        3 => "QUIT",
        4 => "ILL",
        6 => "ABRT",
        8 => "FPE",
        9 => "KILL",
        11 => "SEGV",
        13 => "PIPE",
        14 => "ALRM",
        15 => "TERM",
        other => return Some(format!("SIG{}", other)),
    };
    Some(name.to_string())
}

#[cfg(not(unix))]
fn termination_signal(_status: &std::process::ExitStatus) -> Option<String> {
    None
}
