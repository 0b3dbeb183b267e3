//! Remote Shell 库
//!
//! 远程终端会话子系统：原生伪终端 / 管道连接、有界输出缓冲、会话注册表，
//! 以及拉取和推送两种访问路径。

pub mod config;
pub mod pty;
pub mod rpc;
pub mod shell;
pub mod utils;

pub use config::{ShellConfig, TerminalConfig};
pub use pty::{PushConnection, SessionRegistry, TerminalSession};
pub use utils::error::TerminalError;
