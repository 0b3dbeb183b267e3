//! PTY 输出读取器
//!
//! 每个会话一个后台任务：持续读取进程输出并追加到会话的有界缓冲区。
//! 进程退出（EOF）时任务结束并标记会话不再存活，但不会自动关闭会话。

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::buffer::OutputBuffer;
use super::connection::{PtyConnection, ReadChunk};

/// 输出读取器句柄
pub struct OutputReaderHandle {
    /// 停止信号
    cancel: CancellationToken,
    /// 任务句柄
    task_handle: JoinHandle<()>,
}

impl OutputReaderHandle {
    /// 停止输出读取器并等待任务结束
    pub async fn stop(self) {
        self.cancel.cancel();
        let _ = self.task_handle.await;
    }

    /// 检查任务是否已完成
    pub fn is_finished(&self) -> bool {
        self.task_handle.is_finished()
    }
}

/// 启动输出读取器
///
/// `cancel` 被取消时立即放弃等待中的读取，不需要等到下一次 I/O 事件。
/// 任务结束时把 `alive` 置为 false。
pub fn start_output_reader(
    session_id: String,
    connection: Arc<dyn PtyConnection>,
    buffer: Arc<Mutex<OutputBuffer>>,
    alive: Arc<AtomicBool>,
    cancel: CancellationToken,
) -> OutputReaderHandle {
    let token = cancel.clone();

    let task_handle = tokio::spawn(async move {
        loop {
            let chunk = tokio::select! {
                biased;
                _ = token.cancelled() => {
                    tracing::debug!("输出读取器收到停止信号: {}", session_id);
                    break;
                }
                chunk = connection.read() => chunk,
            };

            match chunk {
                ReadChunk::Data(data) => {
                    tracing::trace!("读取输出 {}: {} bytes", session_id, data.len());
                    let mut buffer = buffer.lock().unwrap_or_else(|e| e.into_inner());
                    buffer.push(&data);
                }
                ReadChunk::Eof => {
                    tracing::info!("输出 EOF，进程已退出: {}", session_id);
                    break;
                }
            }
        }

        alive.store(false, Ordering::SeqCst);
        tracing::debug!("输出读取器退出: {}", session_id);
    });

    OutputReaderHandle {
        cancel,
        task_handle,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pty::terminate::TerminationReport;
    use crate::rpc::types::{BackendKind, TermSize};
    use crate::utils::error::TerminalError;
    use async_trait::async_trait;
    use std::time::Duration;
    use tokio::sync::mpsc;

    /// 由测试直接喂数据的连接
    struct ScriptedConnection {
        output: crate::pty::connection::OutputReceiver,
    }

    impl ScriptedConnection {
        fn new() -> (mpsc::Sender<Vec<u8>>, Arc<Self>) {
            let (tx, output) = crate::pty::connection::OutputReceiver::channel();
            (tx, Arc::new(Self { output }))
        }
    }

    #[async_trait]
    impl PtyConnection for ScriptedConnection {
        fn kind(&self) -> BackendKind {
            BackendKind::Pipe
        }
        fn pid(&self) -> Option<u32> {
            None
        }
        fn size(&self) -> TermSize {
            TermSize::default()
        }
        fn write(&self, _data: &[u8]) {}
        async fn read(&self) -> ReadChunk {
            self.output.read().await
        }
        fn resize(&self, _size: TermSize) -> Result<(), TerminalError> {
            Ok(())
        }
        fn is_alive(&self) -> bool {
            true
        }
        async fn dispose(&self) -> Option<TerminationReport> {
            None
        }
    }

    fn reader_parts() -> (Arc<Mutex<OutputBuffer>>, Arc<AtomicBool>, CancellationToken) {
        (
            Arc::new(Mutex::new(OutputBuffer::new(8))),
            Arc::new(AtomicBool::new(true)),
            CancellationToken::new(),
        )
    }

    #[tokio::test]
    async fn test_reader_appends_in_order() {
        let (tx, connection) = ScriptedConnection::new();
        let (buffer, alive, cancel) = reader_parts();
        let handle = start_output_reader(
            "s1".to_string(),
            connection,
            buffer.clone(),
            alive.clone(),
            cancel,
        );

        tx.send(b"abc".to_vec()).await.unwrap();
        tx.send(b"def".to_vec()).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(buffer.lock().unwrap().drain(), b"abcdef");
        assert!(alive.load(Ordering::SeqCst));
        handle.stop().await;
        assert!(!alive.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_reader_applies_eviction() {
        let (tx, connection) = ScriptedConnection::new();
        let (buffer, alive, cancel) = reader_parts();
        let handle = start_output_reader("s1".to_string(), connection, buffer.clone(), alive, cancel);

        tx.send(b"0123456789".to_vec()).await.unwrap();
        tx.send(b"ab".to_vec()).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(buffer.lock().unwrap().drain(), b"456789ab");
        handle.stop().await;
    }

    #[tokio::test]
    async fn test_reader_marks_dead_on_eof() {
        let (tx, connection) = ScriptedConnection::new();
        let (buffer, alive, cancel) = reader_parts();
        let handle = start_output_reader("s1".to_string(), connection, buffer.clone(), alive.clone(), cancel.clone());

        tx.send(b"bye".to_vec()).await.unwrap();
        drop(tx);
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert!(handle.is_finished());
        assert!(!alive.load(Ordering::SeqCst));
        // 读取器结束不取消会话，缓冲区仍可读取
        assert!(!cancel.is_cancelled());
        assert_eq!(buffer.lock().unwrap().drain(), b"bye");
    }

    #[tokio::test]
    async fn test_cancel_interrupts_pending_read() {
        let (_tx, connection) = ScriptedConnection::new();
        let (buffer, alive, cancel) = reader_parts();
        let handle = start_output_reader("s1".to_string(), connection, buffer, alive, cancel.clone());

        // 没有任何输出，读取器正在等待
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!handle.is_finished());

        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(1), handle.stop())
            .await
            .expect("cancellation should not wait for the next I/O event");
    }
}
