//! SSH 会话实现
//!
//! 基于 russh 客户端，一个会话只维护一条已认证连接，每条命令单独开一个 exec 通道。

use std::fmt;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use async_trait::async_trait;
use russh::client::{self, Handle};
use russh::{Channel, ChannelMsg, Disconnect, Sig};
use russh_keys::key;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::constants::DEFAULT_SSH_PORT;
use crate::domain::{render_command, CommandOutcome, EnvironmentMap};
use crate::error::{ConnectionError, SessionError};
use crate::infra::session::{OutputCollector, RemoteSession};

/// 连接参数，会话打开后不再变化
#[derive(Clone)]
pub struct ConnectionParameters {
    pub host: String,
    pub port: u16,
    pub username: String,
    /// 私钥内容（不是路径）
    pub private_key: String,
    pub passphrase: Option<String>,
    /// 仅作用于建立连接
    pub connect_timeout: Option<Duration>,
    /// 期望的服务器主机密钥指纹 (SHA256)，为空则接受任意主机密钥
    pub host_fingerprint: Option<String>,
}

impl ConnectionParameters {
    pub fn new(host: impl Into<String>, username: impl Into<String>, private_key: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port: DEFAULT_SSH_PORT,
            username: username.into(),
            private_key: private_key.into(),
            passphrase: None,
            connect_timeout: None,
            host_fingerprint: None,
        }
    }
}

impl fmt::Debug for ConnectionParameters {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionParameters")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("private_key", &"<redacted>")
            .field("connect_timeout", &self.connect_timeout)
            .field("host_fingerprint", &self.host_fingerprint)
            .finish()
    }
}

/// russh 客户端回调
struct ClientHandler {
    host: String,
    expected_fingerprint: Option<String>,
    /// 指纹不匹配时记录实际指纹，供 open() 生成错误
    mismatch: Arc<StdMutex<Option<String>>>,
}

#[async_trait]
impl client::Handler for ClientHandler {
    type Error = russh::Error;

    async fn check_server_key(
        &mut self,
        server_public_key: &key::PublicKey,
    ) -> Result<bool, Self::Error> {
        let fingerprint = server_public_key.fingerprint();
        match self.expected_fingerprint.as_deref() {
            Some(expected) if normalize_fingerprint(expected) != fingerprint => {
                warn!(host = %self.host, fingerprint = %fingerprint, "Server host key rejected");
                if let Ok(mut slot) = self.mismatch.lock() {
                    *slot = Some(fingerprint);
                }
                Ok(false)
            }
            _ => {
                debug!(host = %self.host, fingerprint = %fingerprint, "Server host key accepted");
                Ok(true)
            }
        }
    }
}

/// SSH 会话
pub struct SshSession {
    params: ConnectionParameters,
    log_output: bool,
    /// 会话锁：持有期间独占连接，保证同一时刻只有一条命令
    handle: Mutex<Option<Handle<ClientHandler>>>,
    cancel: StdMutex<CancellationToken>,
}

impl SshSession {
    pub fn new(params: ConnectionParameters, log_output: bool) -> Self {
        Self {
            params,
            log_output,
            handle: Mutex::new(None),
            cancel: StdMutex::new(CancellationToken::new()),
        }
    }

    fn token(&self) -> CancellationToken {
        self.cancel
            .lock()
            .map(|t| t.clone())
            .unwrap_or_else(|poisoned| poisoned.into_inner().clone())
    }

    async fn connect(&self) -> Result<Handle<ClientHandler>, ConnectionError> {
        let key_pair = russh_keys::decode_secret_key(
            &self.params.private_key,
            self.params.passphrase.as_deref(),
        )?;

        let mismatch = Arc::new(StdMutex::new(None));
        let handler = ClientHandler {
            host: self.params.host.clone(),
            expected_fingerprint: self.params.host_fingerprint.clone(),
            mismatch: mismatch.clone(),
        };

        let config = Arc::new(client::Config::default());
        let addr = (self.params.host.as_str(), self.params.port);
        let connecting = client::connect(config, addr, handler);

        let connected = match self.params.connect_timeout {
            Some(timeout) => tokio::time::timeout(timeout, connecting)
                .await
                .map_err(|_| ConnectionError::Timeout {
                    host: self.params.host.clone(),
                    timeout,
                })?,
            None => connecting.await,
        };

        let mut handle = match connected {
            Ok(handle) => handle,
            Err(e) => {
                let actual = mismatch.lock().ok().and_then(|mut m| m.take());
                return Err(match (actual, self.params.host_fingerprint.clone()) {
                    (Some(actual), Some(expected)) => {
                        ConnectionError::HostKeyMismatch { expected, actual }
                    }
                    _ => ConnectionError::Transport(e),
                });
            }
        };

        let accepted = handle
            .authenticate_publickey(self.params.username.as_str(), Arc::new(key_pair))
            .await?;
        if !accepted {
            return Err(ConnectionError::Rejected {
                user: self.params.username.clone(),
            });
        }

        Ok(handle)
    }
}

#[async_trait]
impl RemoteSession for SshSession {
    async fn open(&self) -> Result<(), ConnectionError> {
        let mut slot = self.handle.lock().await;
        if slot.is_some() {
            return Ok(());
        }

        info!(host = %self.params.host, port = self.params.port, user = %self.params.username, "Connecting");
        let handle = self.connect().await?;
        *slot = Some(handle);

        if let Ok(mut cancel) = self.cancel.lock() {
            *cancel = CancellationToken::new();
        }
        info!(host = %self.params.host, "SSH session ready");
        Ok(())
    }

    async fn close(&self) {
        // 先取消，正在执行的命令会释放会话锁
        self.token().cancel();

        let handle = self.handle.lock().await.take();
        if let Some(handle) = handle {
            if let Err(e) = handle
                .disconnect(Disconnect::ByApplication, "", "English")
                .await
            {
                warn!(host = %self.params.host, error = %e, "Error while disconnecting");
            }
            debug!(host = %self.params.host, "SSH session closed");
        }
    }

    async fn execute(
        &self,
        command: &str,
        env: Option<&EnvironmentMap>,
        stream_output: bool,
    ) -> Result<CommandOutcome, SessionError> {
        let guard = self.handle.lock().await;
        let handle = guard.as_ref().ok_or(ConnectionError::NotOpen)?;
        let cancel = self.token();

        let rendered = render_command(command, env);
        debug!(host = %self.params.host, command = %rendered, "executing");

        // 打开通道同样可能卡住，必须能被 close() 打断
        let started = tokio::select! {
            _ = cancel.cancelled() => {
                warn!(host = %self.params.host, "Session closed before command started");
                return Err(ConnectionError::Closed.into());
            }
            started = start_command(handle, &rendered) => started,
        };
        let mut channel = started?;

        let mut collector = OutputCollector::new(self.log_output && stream_output);
        let mut finished = false;

        loop {
            let msg = tokio::select! {
                _ = cancel.cancelled() => {
                    let _ = channel.close().await;
                    return Err(ConnectionError::Closed.into());
                }
                msg = channel.wait() => msg,
            };

            match msg {
                Some(ChannelMsg::Data { ref data }) => collector.stdout(data),
                Some(ChannelMsg::ExtendedData { ref data, ext }) if ext == 1 => {
                    collector.stderr(data)
                }
                Some(ChannelMsg::ExitStatus { exit_status }) => {
                    finished = true;
                    collector.exit_code(exit_status as i32);
                }
                Some(ChannelMsg::ExitSignal { signal_name, .. }) => {
                    finished = true;
                    collector.signal(signal_label(&signal_name));
                }
                Some(_) => {}
                None => break,
            }
        }

        if !finished && handle.is_closed() {
            warn!(host = %self.params.host, "Connection dropped mid-command");
            return Err(ConnectionError::Closed.into());
        }

        collector.into_result()
    }
}

async fn start_command(
    handle: &Handle<ClientHandler>,
    command: &str,
) -> Result<Channel<client::Msg>, ConnectionError> {
    let channel = handle.channel_open_session().await?;
    channel.exec(true, command).await?;
    Ok(channel)
}

fn signal_label(signal: &Sig) -> String {
    match signal {
        Sig::Custom(name) => name.clone(),
        other => format!("{:?}", other),
    }
}

/// russh 指纹不带 `SHA256:` 前缀
fn normalize_fingerprint(fingerprint: &str) -> &str {
    fingerprint.trim().trim_start_matches("SHA256:")
}
