//! 终端会话
//!
//! 一个会话拥有一个原生连接、一个后台输出读取器和一个有界输出缓冲区。
//! 会话进入 Closing / Closed 后，所有操作都按"会话不存在"处理。

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::config::{ShellConfig, TerminalConfig};
use crate::rpc::types::{BackendKind, SessionInfo, SessionStatus, TermSize};
use crate::utils::error::TerminalError;
use crate::utils::state::SessionStateManager;

use super::buffer::OutputBuffer;
use super::connection::{open_connection, PtyConnection};
use super::output::{start_output_reader, OutputReaderHandle};
use super::terminate::TerminationReport;

/// 会话创建参数
#[derive(Debug, Clone, Copy)]
pub struct SessionOptions {
    pub backend: BackendKind,
    pub buffer_capacity: usize,
    pub terminate_grace: Duration,
}

impl From<&TerminalConfig> for SessionOptions {
    fn from(config: &TerminalConfig) -> Self {
        Self {
            backend: config.backend.resolve(),
            buffer_capacity: config.buffer_capacity,
            terminate_grace: config.terminate_grace,
        }
    }
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self::from(&TerminalConfig::default())
    }
}

/// 终端会话
pub struct TerminalSession {
    id: String,
    shell: String,
    cwd: Option<String>,
    created_at: i64,
    connection: Arc<dyn PtyConnection>,
    buffer: Arc<Mutex<OutputBuffer>>,
    state: Mutex<SessionStateManager>,
    /// 读取器运行中为 true；进程输出结束或会话关闭后为 false
    alive: Arc<AtomicBool>,
    /// 会话级取消信号，推送路径的转发任务使用它的子令牌
    cancel: CancellationToken,
    output_reader: tokio::sync::Mutex<Option<OutputReaderHandle>>,
    last_report: Mutex<Option<TerminationReport>>,
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

impl TerminalSession {
    /// 启动会话：创建原生连接并启动输出读取器
    ///
    /// 连接创建失败时会话直接进入 Closed，错误原样返回。
    /// 必须在 tokio 运行时中调用。
    pub fn start(
        id: String,
        config: &ShellConfig,
        options: SessionOptions,
    ) -> Result<Arc<Self>, TerminalError> {
        let mut state = SessionStateManager::new(&id);
        state.transition_to(SessionStatus::Starting);

        let connection: Arc<dyn PtyConnection> =
            match open_connection(options.backend, config, options.terminate_grace) {
                Ok(connection) => Arc::from(connection),
                Err(e) => {
                    state.fail_startup(&e);
                    return Err(e);
                }
            };

        let buffer = Arc::new(Mutex::new(OutputBuffer::new(options.buffer_capacity)));
        let alive = Arc::new(AtomicBool::new(true));
        let cancel = CancellationToken::new();

        let reader = start_output_reader(
            id.clone(),
            connection.clone(),
            buffer.clone(),
            alive.clone(),
            cancel.clone(),
        );
        state.transition_to(SessionStatus::Running);

        tracing::info!(
            "启动会话 {}: {} ({:?}, pid {:?})",
            id,
            config.shell,
            connection.kind(),
            connection.pid()
        );

        Ok(Arc::new(Self {
            id,
            shell: config.shell.clone(),
            cwd: config.cwd.as_ref().map(|p| p.to_string_lossy().into_owned()),
            created_at: chrono::Utc::now().timestamp(),
            connection,
            buffer,
            state: Mutex::new(state),
            alive,
            cancel,
            output_reader: tokio::sync::Mutex::new(Some(reader)),
            last_report: Mutex::new(None),
        }))
    }

    /// 获取会话 ID
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn status(&self) -> SessionStatus {
        lock(&self.state).status()
    }

    fn ensure_running(&self) -> Result<(), TerminalError> {
        if lock(&self.state).is_running() {
            Ok(())
        } else {
            Err(TerminalError::session_not_found(&self.id))
        }
    }

    /// 写入进程输入
    ///
    /// 输入排队后立即返回。进程已退出但会话未关闭时静默丢弃。
    pub fn write(&self, data: &[u8]) -> Result<(), TerminalError> {
        self.ensure_running()?;
        self.connection.write(data);
        tracing::debug!("发送输入到会话 {}: {} bytes", self.id, data.len());
        Ok(())
    }

    /// 取出缓冲区中的全部输出并清空缓冲区
    pub fn read_and_drain(&self) -> Result<Vec<u8>, TerminalError> {
        self.ensure_running()?;
        Ok(lock(&self.buffer).drain())
    }

    /// 调整终端大小。进程已退出时不报错。
    pub fn resize(&self, size: TermSize) -> Result<(), TerminalError> {
        self.ensure_running()?;
        self.connection.resize(size)?;
        tracing::debug!("调整会话 {} 大小: {}x{}", self.id, size.cols, size.rows);
        Ok(())
    }

    /// 进程是否仍在运行
    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst) && self.connection.is_alive()
    }

    /// 读取器是否已结束（进程输出已全部进入缓冲区）
    pub fn is_output_finished(&self) -> bool {
        !self.alive.load(Ordering::SeqCst)
    }

    /// 缓冲区中尚未取走的字节数
    pub fn buffered_len(&self) -> usize {
        lock(&self.buffer).len()
    }

    /// 会话级取消信号
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// 最近一次关闭时的终止报告
    pub fn termination_report(&self) -> Option<TerminationReport> {
        lock(&self.last_report).clone()
    }

    /// 关闭会话
    ///
    /// 取消读取器，按升级策略终止进程，然后释放缓冲区。
    /// 只有第一次调用生效，之后返回 `SessionNotFound`。
    pub async fn close(&self) -> Result<(), TerminalError> {
        {
            let mut state = lock(&self.state);
            if !state.is_running() {
                return Err(TerminalError::session_not_found(&self.id));
            }
            state.transition_to(SessionStatus::Closing);
        }

        self.cancel.cancel();

        let report = self.connection.dispose().await;
        if let Some(report) = &report {
            if report.forced {
                tracing::warn!("会话 {} 的进程被强制终止", self.id);
            }
        }
        *lock(&self.last_report) = report;

        let reader = self.output_reader.lock().await.take();
        if let Some(reader) = reader {
            reader.stop().await;
        }

        self.alive.store(false, Ordering::SeqCst);
        lock(&self.buffer).drain();
        lock(&self.state).transition_to(SessionStatus::Closed);

        tracing::info!("关闭会话: {}", self.id);
        Ok(())
    }

    /// 获取会话信息
    pub fn info(&self) -> SessionInfo {
        SessionInfo {
            id: self.id.clone(),
            status: self.status(),
            backend: self.connection.kind(),
            shell: self.shell.clone(),
            cwd: self.cwd.clone(),
            size: self.connection.size(),
            pid: self.connection.pid(),
            alive: self.is_alive(),
            buffered_bytes: self.buffered_len(),
            created_at: self.created_at,
        }
    }
}

impl Drop for TerminalSession {
    fn drop(&mut self) {
        // 未经 close 释放时至少停止读取器
        self.cancel.cancel();
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::time::Instant;

    fn pipe_options() -> SessionOptions {
        SessionOptions {
            backend: BackendKind::Pipe,
            buffer_capacity: crate::config::DEFAULT_BUFFER_CAPACITY,
            terminate_grace: Duration::from_millis(100),
        }
    }

    fn start_sh(id: &str) -> Arc<TerminalSession> {
        TerminalSession::start(id.to_string(), &ShellConfig::new("/bin/sh"), pipe_options())
            .unwrap()
    }

    async fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            if condition() {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        condition()
    }

    #[tokio::test]
    async fn test_start_reaches_running() {
        let session = start_sh("s1");
        assert_eq!(session.status(), SessionStatus::Running);
        assert!(session.is_alive());

        let info = session.info();
        assert_eq!(info.id, "s1");
        assert_eq!(info.backend, BackendKind::Pipe);
        assert_eq!(info.shell, "/bin/sh");
        assert!(info.pid.is_some());

        session.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_start_failure_is_reported() {
        let result = TerminalSession::start(
            "s1".to_string(),
            &ShellConfig::new("/definitely/not/a/shell"),
            pipe_options(),
        );
        assert!(matches!(result, Err(TerminalError::SpawnFailed(_))));
    }

    #[tokio::test]
    async fn test_echo_then_drain() {
        let session = start_sh("s1");
        session.write(b"echo hello\n").unwrap();

        let mut collected = Vec::new();
        wait_until(Duration::from_secs(5), || {
            collected.extend(session.read_and_drain().unwrap());
            collected.ends_with(b"hello\n")
        })
        .await;
        assert_eq!(collected, b"hello\n");

        // 读取是破坏性的
        assert!(session.read_and_drain().unwrap().is_empty());
        session.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_exit_keeps_session_open() {
        let session = start_sh("s1");
        session.write(b"echo last; exit\n").unwrap();

        assert!(wait_until(Duration::from_secs(5), || session.is_output_finished()).await);
        assert!(!session.is_alive());
        assert_eq!(session.status(), SessionStatus::Running);

        // 退出后缓冲区仍可读取，调整大小和写入不报错
        assert_eq!(session.read_and_drain().unwrap(), b"last\n");
        assert!(session.resize(TermSize { rows: 30, cols: 100 }).is_ok());
        assert!(session.write(b"ignored\n").is_ok());

        session.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_operations_after_close_are_not_found() {
        let session = start_sh("s1");
        let token = session.cancellation_token();
        session.close().await.unwrap();

        assert_eq!(session.status(), SessionStatus::Closed);
        assert!(token.is_cancelled());
        assert!(!session.is_alive());
        assert!(session.termination_report().is_some_and(|r| r.reaped));

        assert!(session.write(b"x").unwrap_err().is_not_found());
        assert!(session.read_and_drain().unwrap_err().is_not_found());
        assert!(session.resize(TermSize::default()).unwrap_err().is_not_found());
        assert!(session.close().await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_concurrent_close_runs_once() {
        let session = start_sh("s1");
        let (a, b) = tokio::join!(session.close(), session.close());
        assert_eq!(a.is_ok() as u8 + b.is_ok() as u8, 1);
    }

    #[tokio::test]
    async fn test_buffer_keeps_newest_output() {
        let options = SessionOptions {
            buffer_capacity: 64,
            ..pipe_options()
        };
        let config = ShellConfig::new("/bin/sh").with_args(["-c", "seq 1 2000"]);
        let session = TerminalSession::start("s1".to_string(), &config, options).unwrap();

        assert!(wait_until(Duration::from_secs(5), || session.is_output_finished()).await);
        let output = session.read_and_drain().unwrap();
        assert_eq!(output.len(), 64);
        assert!(output.ends_with(b"1999\n2000\n"));

        session.close().await.unwrap();
    }
}
