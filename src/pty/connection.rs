//! 原生连接抽象
//!
//! 子进程与终端之间的字节流连接。两种实现：
//! - [`LocalPty`](super::local::LocalPty)：伪终端（Unix），支持调整大小
//! - [`PipeProcess`](super::pipe::PipeProcess)：重定向管道，stdout/stderr 合并为一路输出。
//!   管道没有终端几何信息，调整大小在该实现上是空操作。

use async_trait::async_trait;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};

use crate::config::ShellConfig;
use crate::rpc::types::{BackendKind, TermSize};
use crate::utils::error::TerminalError;

use super::terminate::TerminationReport;

/// 单次读取的缓冲区大小
pub(crate) const READ_CHUNK_SIZE: usize = 4096;
/// 输出通道容量（块数）
pub(crate) const OUTPUT_CHANNEL_CAPACITY: usize = 256;

/// 一次读取的结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadChunk {
    /// 读取到输出
    Data(Vec<u8>),
    /// 进程已退出且输出已读完
    Eof,
}

/// 原生连接
#[async_trait]
pub trait PtyConnection: Send + Sync {
    /// 实现方式
    fn kind(&self) -> BackendKind;

    /// 子进程 ID
    fn pid(&self) -> Option<u32>;

    /// 当前终端尺寸
    fn size(&self) -> TermSize;

    /// 写入进程输入。只负责排队，不等待进程读取；进程已退出时静默丢弃。
    fn write(&self, data: &[u8]);

    /// 等待下一块输出，直到有数据或到达流末尾
    async fn read(&self) -> ReadChunk;

    /// 调整终端尺寸
    fn resize(&self, size: TermSize) -> Result<(), TerminalError>;

    /// 非阻塞检查进程是否存活
    fn is_alive(&self) -> bool;

    /// 终止进程并释放资源。重复调用返回 `None`。
    async fn dispose(&self) -> Option<TerminationReport>;
}

/// 按指定实现方式创建连接
///
/// 必须在 tokio 运行时中调用。
pub fn open_connection(
    kind: BackendKind,
    config: &ShellConfig,
    terminate_grace: Duration,
) -> Result<Box<dyn PtyConnection>, TerminalError> {
    match kind {
        #[cfg(unix)]
        BackendKind::Pty => Ok(Box::new(super::local::LocalPty::spawn(
            config,
            terminate_grace,
        )?)),
        #[cfg(not(unix))]
        BackendKind::Pty => Err(TerminalError::PlatformUnsupported(
            "当前平台不支持伪终端，请使用 pipe 后端".to_string(),
        )),
        BackendKind::Pipe => Ok(Box::new(super::pipe::PipeProcess::spawn(
            config,
            terminate_grace,
        )?)),
    }
}

/// 输出接收端
///
/// 生产者（读取线程或读取任务）把输出块送入通道；所有生产者结束后通道关闭，即流末尾。
pub(crate) struct OutputReceiver {
    rx: Mutex<mpsc::Receiver<Vec<u8>>>,
}

impl OutputReceiver {
    pub(crate) fn channel() -> (mpsc::Sender<Vec<u8>>, Self) {
        let (tx, rx) = mpsc::channel(OUTPUT_CHANNEL_CAPACITY);
        (tx, Self { rx: Mutex::new(rx) })
    }

    pub(crate) async fn read(&self) -> ReadChunk {
        let mut rx = self.rx.lock().await;
        match rx.recv().await {
            Some(data) => ReadChunk::Data(data),
            None => ReadChunk::Eof,
        }
    }
}

/// 输入发送端
///
/// 写入只把数据放入队列，由专门的写入线程或任务按顺序写给进程。
/// 进程不读取输入时阻塞的是写入方，而不是调用方。写入方退出后，之后的输入静默丢弃。
pub(crate) struct InputSender {
    tx: std::sync::Mutex<Option<mpsc::UnboundedSender<Vec<u8>>>>,
}

impl InputSender {
    pub(crate) fn channel() -> (Self, mpsc::UnboundedReceiver<Vec<u8>>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                tx: std::sync::Mutex::new(Some(tx)),
            },
            rx,
        )
    }

    /// 排队一块输入，返回是否被接收
    pub(crate) fn send(&self, data: &[u8]) -> bool {
        let mut tx = self.tx.lock().unwrap_or_else(|e| e.into_inner());
        let Some(sender) = tx.as_ref() else {
            return false;
        };
        if sender.send(data.to_vec()).is_err() {
            // 写入方已退出（进程关闭了输入端）
            tx.take();
            return false;
        }
        true
    }

    /// 关闭输入队列，写入方写完已排队的数据后退出
    pub(crate) fn close(&self) {
        self.tx.lock().unwrap_or_else(|e| e.into_inner()).take();
    }
}
