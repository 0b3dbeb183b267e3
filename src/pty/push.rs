//! 推送式访问路径
//!
//! 订阅者连接后，为每个会话启动一个转发任务：按固定间隔取出缓冲区中的输出
//! 并推送给订阅者。推送失败视为订阅者断开，会话随之关闭。
//! 转发任务使用会话取消信号的子令牌，会话从任何路径关闭都会让转发任务停止，
//! 断开订阅只取消子令牌，不影响其他路径。

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::rpc::types::{CreateSessionRequest, TermSize};
use crate::utils::error::TerminalError;

use super::registry::SessionRegistry;
use super::session::TerminalSession;

/// 进程退出且输出已全部推送后发送的状态
pub const STATUS_EXITED: &str = "exited";

/// 推送目标
pub trait OutputSink: Send + Sync + 'static {
    /// 推送一段输出
    fn send_output(&self, session_id: &str, data: &[u8]) -> Result<(), TerminalError>;

    /// 推送会话状态变化
    fn send_status(&self, session_id: &str, status: &str) -> Result<(), TerminalError>;
}

impl<S: OutputSink + ?Sized> OutputSink for Arc<S> {
    fn send_output(&self, session_id: &str, data: &[u8]) -> Result<(), TerminalError> {
        (**self).send_output(session_id, data)
    }

    fn send_status(&self, session_id: &str, status: &str) -> Result<(), TerminalError> {
        (**self).send_status(session_id, status)
    }
}

/// 转发任务句柄
struct Forwarder {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl Forwarder {
    async fn stop(self) {
        self.cancel.cancel();
        let _ = self.task.await;
    }
}

/// 一个订阅者连接
pub struct PushConnection<S> {
    registry: Arc<SessionRegistry>,
    sink: Arc<S>,
    interval: Duration,
    forwarders: Mutex<HashMap<String, Forwarder>>,
}

impl<S: OutputSink> PushConnection<S> {
    pub fn new(registry: Arc<SessionRegistry>, sink: S) -> Self {
        let interval = registry.config().push_interval;
        Self {
            registry,
            sink: Arc::new(sink),
            interval,
            forwarders: Mutex::new(HashMap::new()),
        }
    }

    /// 设置转发间隔
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval.max(Duration::from_millis(1));
        self
    }

    /// 创建会话并立即开始转发输出
    pub async fn create_session(
        &self,
        request: CreateSessionRequest,
    ) -> Result<String, TerminalError> {
        let session_id = self.registry.create_from_request(request).await?;
        self.attach(&session_id).await?;
        Ok(session_id)
    }

    /// 订阅已存在的会话
    ///
    /// 已订阅且转发任务仍在运行时不重复启动。
    pub async fn attach(&self, session_id: &str) -> Result<(), TerminalError> {
        let session = self.registry.session(session_id).await?;

        let mut forwarders = self.forwarders.lock().await;
        prune_finished(&mut forwarders);
        if forwarders.contains_key(session_id) {
            return Ok(());
        }

        let cancel = session.cancellation_token().child_token();
        let task = tokio::spawn(forward_output(
            session,
            self.registry.clone(),
            self.sink.clone(),
            self.interval,
            cancel.clone(),
        ));
        forwarders.insert(session_id.to_string(), Forwarder { cancel, task });

        tracing::info!("订阅会话: {}", session_id);
        Ok(())
    }

    /// 发送输入
    pub async fn send_input(&self, session_id: &str, data: &[u8]) -> Result<(), TerminalError> {
        self.registry.send_input(session_id, data).await
    }

    /// 调整大小
    pub async fn resize(&self, session_id: &str, size: TermSize) -> Result<(), TerminalError> {
        self.registry.resize_session(session_id, size).await
    }

    /// 停止转发并关闭会话
    pub async fn detach(&self, session_id: &str) -> Result<(), TerminalError> {
        let forwarder = self.forwarders.lock().await.remove(session_id);
        match forwarder {
            Some(forwarder) => {
                forwarder.stop().await;
                match self.registry.close_session(session_id).await {
                    // 会话可能已由其他路径关闭
                    Err(e) if e.is_not_found() => Ok(()),
                    result => result,
                }
            }
            None => Err(TerminalError::session_not_found(session_id)),
        }
    }

    /// 订阅者断开：停止全部转发任务并关闭其订阅的会话
    pub async fn disconnect(&self) {
        let forwarders: Vec<_> = {
            let mut forwarders = self.forwarders.lock().await;
            prune_finished(&mut forwarders);
            forwarders.drain().collect()
        };
        if forwarders.is_empty() {
            return;
        }

        tracing::info!("订阅者断开，关闭 {} 个会话", forwarders.len());
        for (session_id, forwarder) in forwarders {
            forwarder.stop().await;
            if let Err(e) = self.registry.close_session(&session_id).await {
                tracing::debug!("关闭会话 {} 时出错: {}", session_id, e);
            }
        }
    }

    /// 当前订阅的会话数，不含已自行结束的转发任务
    pub async fn subscription_count(&self) -> usize {
        let mut forwarders = self.forwarders.lock().await;
        prune_finished(&mut forwarders);
        forwarders.len()
    }
}

/// 移除已结束的转发任务（推送失败或会话已从其他路径关闭）
fn prune_finished(forwarders: &mut HashMap<String, Forwarder>) {
    forwarders.retain(|session_id, forwarder| {
        let running = !forwarder.task.is_finished();
        if !running {
            tracing::debug!("移除已结束的转发任务: {}", session_id);
        }
        running
    });
}

/// 转发循环
async fn forward_output<S: OutputSink>(
    session: Arc<TerminalSession>,
    registry: Arc<SessionRegistry>,
    sink: Arc<S>,
    interval: Duration,
    cancel: CancellationToken,
) {
    let session_id = session.id().to_string();
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut exit_reported = false;

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }

        // 先判断读取器是否结束，再取输出，保证退出状态之前的输出都已推送
        let finished = session.is_output_finished();
        let output = match session.read_and_drain() {
            Ok(output) => output,
            // 会话已关闭
            Err(_) => break,
        };

        let sent = if !output.is_empty() {
            sink.send_output(&session_id, &output)
        } else if finished && !exit_reported {
            exit_reported = true;
            tracing::info!("会话 {} 的进程已退出", session_id);
            sink.send_status(&session_id, STATUS_EXITED)
        } else {
            Ok(())
        };

        if let Err(e) = sent {
            tracing::warn!("推送输出失败，关闭会话 {}: {}", session_id, e);
            if let Err(e) = registry.close_session(&session_id).await {
                tracing::debug!("关闭会话 {} 时出错: {}", session_id, e);
            }
            break;
        }
    }

    tracing::debug!("转发任务退出: {}", session_id);
}
