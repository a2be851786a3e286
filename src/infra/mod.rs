//! 基础设施模块
//!
//! 命令传输：SSH 远程会话与本机会话，实现同一个 `RemoteSession` 契约

pub mod local;
pub mod session;
pub mod ssh;

pub use local::LocalSession;
pub use session::{OutputCollector, RemoteSession};
pub use ssh::{ConnectionParameters, SshSession};
