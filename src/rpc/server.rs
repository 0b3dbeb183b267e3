//! RPC 服务器实现
//!
//! 通过 stdin/stdout 实现 JSON-RPC 2.0 通信。一个 stdio 对端就是推送路径上的一个订阅者连接。

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use std::sync::Arc;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::TerminalConfig;
use crate::pty::push::OutputSink;
use crate::utils::error::TerminalError;

use super::methods::RpcMethods;
use super::types::{
    JsonRpcError, JsonRpcNotification, JsonRpcRequest, JsonRpcResponse, OutputNotification,
    SessionStatusNotification,
};

/// 通知发送器，可以克隆并在多个地方使用
#[derive(Clone)]
pub struct NotificationSender {
    tx: mpsc::UnboundedSender<JsonRpcNotification>,
}

impl NotificationSender {
    /// 创建通知发送器及其接收端
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<JsonRpcNotification>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// 发送通知
    pub fn send(
        &self,
        notification: JsonRpcNotification,
    ) -> Result<(), mpsc::error::SendError<JsonRpcNotification>> {
        self.tx.send(notification)
    }

    fn send_value(&self, method: &str, params: impl serde::Serialize) -> Result<(), TerminalError> {
        let notification = JsonRpcNotification::new(method, serde_json::to_value(params)?);
        self.send(notification).map_err(|_| {
            TerminalError::IoError(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "通知通道已关闭",
            ))
        })
    }
}

impl OutputSink for NotificationSender {
    /// 发送终端输出通知（Base64 编码）
    fn send_output(&self, session_id: &str, data: &[u8]) -> Result<(), TerminalError> {
        self.send_value(
            "terminal.output",
            OutputNotification {
                session_id: session_id.to_string(),
                data: BASE64.encode(data),
            },
        )
    }

    /// 发送会话状态变更通知
    fn send_status(&self, session_id: &str, status: &str) -> Result<(), TerminalError> {
        self.send_value(
            "session.status",
            SessionStatusNotification {
                session_id: session_id.to_string(),
                status: status.to_string(),
            },
        )
    }
}

/// RPC 服务器
pub struct RpcServer {
    methods: Arc<RpcMethods>,
    notification_rx: Mutex<Option<mpsc::UnboundedReceiver<JsonRpcNotification>>>,
}

impl RpcServer {
    /// 创建新的 RPC 服务器
    pub fn new(config: TerminalConfig) -> Self {
        let (notification_sender, rx) = NotificationSender::channel();
        let methods = RpcMethods::new(config, notification_sender);

        Self {
            methods: Arc::new(methods),
            notification_rx: Mutex::new(Some(rx)),
        }
    }

    /// 方法处理器
    pub fn methods(&self) -> Arc<RpcMethods> {
        self.methods.clone()
    }

    /// 在 stdin/stdout 上运行 RPC 服务器
    pub async fn run(&self) -> anyhow::Result<()> {
        self.serve(BufReader::new(tokio::io::stdin()), tokio::io::stdout())
            .await
    }

    /// 在任意读写流上运行 RPC 服务器，直到输入结束
    ///
    /// 输入结束时关闭该连接订阅的全部会话，然后关闭其余会话。
    pub async fn serve<R, W>(&self, mut reader: R, writer: W) -> anyhow::Result<()>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let writer = Arc::new(Mutex::new(writer));

        // 启动通知发送任务
        let notifications_done = CancellationToken::new();
        let notification_task = match self.notification_rx.lock().await.take() {
            Some(rx) => Some(spawn_notification_writer(
                rx,
                writer.clone(),
                notifications_done.clone(),
            )),
            None => {
                tracing::warn!("通知通道已被占用，本次运行不发送通知");
                None
            }
        };

        let mut line = String::new();
        let result = loop {
            line.clear();
            let bytes_read = match reader.read_line(&mut line).await {
                Ok(n) => n,
                Err(e) => break Err(e.into()),
            };

            if bytes_read == 0 {
                // EOF，退出
                tracing::info!("输入关闭，退出");
                break Ok(());
            }

            let line_trimmed = line.trim();
            if line_trimmed.is_empty() {
                continue;
            }

            // 解析并处理 JSON-RPC 请求
            let response = self.handle_request(line_trimmed).await;

            // 发送响应
            let response_json = serde_json::to_string(&response)?;
            let mut writer = writer.lock().await;
            if let Err(e) = write_line(&mut *writer, &response_json).await {
                break Err(e.into());
            }
        };

        self.methods.shutdown().await;

        // 关闭通知通道，等待已排队的通知写完
        notifications_done.cancel();
        if let Some(task) = notification_task {
            if let Err(e) = task.await {
                tracing::warn!("通知发送任务异常退出: {}", e);
            }
        }

        result
    }

    /// 处理单个请求
    async fn handle_request(&self, line: &str) -> JsonRpcResponse {
        // 解析 JSON
        let request: JsonRpcRequest = match serde_json::from_str(line) {
            Ok(req) => req,
            Err(e) => {
                return JsonRpcResponse::error(
                    serde_json::Value::Null,
                    JsonRpcError::parse_error(format!("JSON 解析错误: {}", e)),
                );
            }
        };

        // 验证 JSON-RPC 版本
        if request.jsonrpc != "2.0" {
            return JsonRpcResponse::error(
                request.id,
                JsonRpcError::invalid_request("无效的 JSON-RPC 版本"),
            );
        }

        // 调用方法
        self.methods
            .call(&request.method, request.params, request.id)
            .await
    }
}

impl Default for RpcServer {
    fn default() -> Self {
        Self::new(TerminalConfig::default())
    }
}

/// 通知发送任务
///
/// `done` 取消后关闭通道，写完已排队的通知后退出。
fn spawn_notification_writer<W>(
    mut rx: mpsc::UnboundedReceiver<JsonRpcNotification>,
    writer: Arc<Mutex<W>>,
    done: CancellationToken,
) -> JoinHandle<()>
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut closing = false;
        loop {
            let notification = tokio::select! {
                biased;
                notification = rx.recv() => match notification {
                    Some(notification) => notification,
                    None => break,
                },
                _ = done.cancelled(), if !closing => {
                    closing = true;
                    rx.close();
                    continue;
                }
            };

            let Ok(json) = serde_json::to_string(&notification) else {
                continue;
            };
            let mut writer = writer.lock().await;
            if write_line(&mut *writer, &json).await.is_err() {
                tracing::warn!("写出通知失败，停止发送通知");
                break;
            }
        }
    })
}

async fn write_line<W: AsyncWrite + Unpin>(writer: &mut W, line: &str) -> std::io::Result<()> {
    writer.write_all(line.as_bytes()).await?;
    writer.write_all(b"\n").await?;
    writer.flush().await
}
