//! RPC 通信模块
//!
//! 实现 JSON-RPC 2.0 协议的服务器端，通过 stdin/stdout 与前端通信。

pub mod methods;
pub mod server;
pub mod types;

pub use methods::RpcMethods;
pub use server::{NotificationSender, RpcServer};
pub use types::*;
