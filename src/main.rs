//! Remote Shell CLI 入口点
//!
//! 该程序作为独立进程运行，通过 stdin/stdout 与前端进行 JSON-RPC 通信。
//! 主要功能：
//! - 伪终端 / 管道会话管理
//! - 拉取式读取与推送式输出转发
//! - JSON-RPC 2.0 协议通信

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use remote_shell::config::TerminalConfig;
use remote_shell::rpc::RpcServer;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 初始化日志系统，输出到 stderr 避免干扰 JSON-RPC 通信
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = TerminalConfig::from_env();
    tracing::info!(
        "Remote Shell 启动: shell={}, backend={:?}",
        config.default_shell,
        config.backend.resolve()
    );

    // 创建并运行 RPC 服务器
    let server = RpcServer::new(config);
    server.run().await?;

    tracing::info!("Remote Shell 退出");
    Ok(())
}
