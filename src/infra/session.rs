//! 远程会话抽象
//!
//! 一个会话对应一条已认证的连接，命令严格串行执行。

use async_trait::async_trait;
use tracing::info;

use crate::domain::{CommandOutcome, EnvironmentMap};
use crate::error::{ConnectionError, SessionError};

/// 远程命令执行通道
///
/// 实现方保证同一会话上同一时刻只有一条命令在执行。
#[async_trait]
pub trait RemoteSession: Send + Sync {
    /// 建立连接，失败时返回底层原因
    async fn open(&self) -> Result<(), ConnectionError>;

    /// 关闭连接。幂等，永不报错；正在执行的命令会以 `ConnectionError::Closed` 结束
    async fn close(&self);

    /// 执行一条 shell 命令
    ///
    /// `env` 非空时只对这一次调用生效；`stream_output` 为真且会话开启了输出日志时逐行回显。
    /// 退出码为 0 返回 `Ok`，否则返回携带完整结果的 `SessionError::CommandFailed`。
    async fn execute(
        &self,
        command: &str,
        env: Option<&EnvironmentMap>,
        stream_output: bool,
    ) -> Result<CommandOutcome, SessionError>;
}

/// 单个输出流的缓冲区
struct StreamBuffer {
    name: &'static str,
    data: Vec<u8>,
    echoed: usize,
}

impl StreamBuffer {
    fn new(name: &'static str) -> Self {
        Self {
            name,
            data: Vec::new(),
            echoed: 0,
        }
    }

    fn push(&mut self, chunk: &[u8], echo: bool) {
        self.data.extend_from_slice(chunk);
        if !echo {
            return;
        }
        // 只回显完整的行，残余部分留到下一个 chunk 或 flush
        if let Some(pos) = self.data[self.echoed..].iter().rposition(|b| *b == b'\n') {
            let end = self.echoed + pos + 1;
            emit(self.name, &self.data[self.echoed..end]);
            self.echoed = end;
        }
    }

    fn flush(&mut self, echo: bool) {
        if echo && self.echoed < self.data.len() {
            emit(self.name, &self.data[self.echoed..]);
            self.echoed = self.data.len();
        }
    }

    fn into_string(self) -> String {
        String::from_utf8_lossy(&self.data).into_owned()
    }
}

fn emit(stream: &'static str, bytes: &[u8]) {
    for line in String::from_utf8_lossy(bytes).lines() {
        info!(stream = stream, "{}", line);
    }
}

/// 收集一条命令的输出与退出状态
pub struct OutputCollector {
    echo: bool,
    stdout: StreamBuffer,
    stderr: StreamBuffer,
    exit_code: Option<i32>,
    signal: Option<String>,
}

impl OutputCollector {
    pub fn new(echo: bool) -> Self {
        Self {
            echo,
            stdout: StreamBuffer::new("stdout"),
            stderr: StreamBuffer::new("stderr"),
            exit_code: None,
            signal: None,
        }
    }

    pub fn stdout(&mut self, chunk: &[u8]) {
        self.stdout.push(chunk, self.echo);
    }

    pub fn stderr(&mut self, chunk: &[u8]) {
        self.stderr.push(chunk, self.echo);
    }

    pub fn exit_code(&mut self, code: i32) {
        self.exit_code = Some(code);
    }

    pub fn signal(&mut self, name: impl Into<String>) {
        self.signal = Some(name.into());
    }

    pub fn finish(mut self) -> CommandOutcome {
        self.stdout.flush(self.echo);
        self.stderr.flush(self.echo);
        CommandOutcome {
            exit_code: self.exit_code,
            signal: self.signal,
            stdout: self.stdout.into_string(),
            stderr: self.stderr.into_string(),
        }
    }

    /// 退出码恰好为 0 才视为成功
    pub fn into_result(self) -> Result<CommandOutcome, SessionError> {
        let outcome = self.finish();
        if outcome.success() {
            Ok(outcome)
        } else {
            Err(SessionError::CommandFailed(outcome))
        }
    }
}
