//! 管道进程实现
//!
//! 没有伪终端时的回退方案：标准输入、输出、错误全部重定向，
//! stdout 与 stderr 由两个读取任务并发送入同一个输出通道。
//! 两路输出之间的交错顺序不作保证，只保证各自内部有序。

use async_trait::async_trait;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::mpsc;

use crate::config::ShellConfig;
use crate::rpc::types::{BackendKind, TermSize};
use crate::utils::error::TerminalError;

use super::connection::{InputSender, OutputReceiver, PtyConnection, ReadChunk, READ_CHUNK_SIZE};
use super::terminate::{terminate, Terminable, TerminationReport};

/// 重定向管道的子进程
pub struct PipeProcess {
    child: Mutex<Child>,
    input: InputSender,
    pid: Option<u32>,
    size: Mutex<TermSize>,
    output: OutputReceiver,
    disposed: AtomicBool,
    terminate_grace: Duration,
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| {
        tracing::warn!("管道进程锁被污染，继续使用");
        e.into_inner()
    })
}

impl PipeProcess {
    /// 启动进程并开始读取 stdout / stderr
    ///
    /// 必须在 tokio 运行时中调用。
    pub fn spawn(config: &ShellConfig, terminate_grace: Duration) -> Result<Self, TerminalError> {
        let mut cmd = Command::new(&config.shell);
        cmd.args(&config.args)
            .env("TERM", "xterm-256color")
            .env("COLORTERM", "truecolor")
            .env("COLUMNS", config.size.cols.to_string())
            .env("LINES", config.size.rows.to_string())
            .envs(&config.env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        if let Some(dir) = &config.cwd {
            cmd.current_dir(dir);
        }

        let mut child = cmd
            .spawn()
            .map_err(|e| TerminalError::spawn_failed(&config.shell, e))?;

        let pid = child.id();
        let stdin = child.stdin.take();
        let stdout = child.stdout.take();
        let stderr = child.stderr.take();

        // 两个生产者，一个消费者；两个任务都结束后通道关闭
        let (tx, output) = OutputReceiver::channel();
        if let Some(stdout) = stdout {
            tokio::spawn(pump_output(stdout, tx.clone(), "stdout"));
        }
        if let Some(stderr) = stderr {
            tokio::spawn(pump_output(stderr, tx.clone(), "stderr"));
        }
        drop(tx);

        let (input, input_rx) = InputSender::channel();
        if let Some(stdin) = stdin {
            tokio::spawn(pump_input(stdin, input_rx));
        }

        tracing::debug!("启动管道进程: {} (pid {:?})", config.shell, pid);

        Ok(Self {
            child: Mutex::new(child),
            input,
            pid,
            size: Mutex::new(config.size),
            output,
            disposed: AtomicBool::new(false),
            terminate_grace,
        })
    }
}

async fn pump_output<R>(mut stream: R, tx: mpsc::Sender<Vec<u8>>, source: &'static str)
where
    R: AsyncRead + Unpin,
{
    let mut buffer = vec![0u8; READ_CHUNK_SIZE];
    loop {
        match stream.read(&mut buffer).await {
            Ok(0) => break,
            Ok(n) => {
                if tx.send(buffer[..n].to_vec()).await.is_err() {
                    break;
                }
            }
            Err(ref e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => {
                tracing::debug!("{} 读取结束: {}", source, e);
                break;
            }
        }
    }
    tracing::trace!("{} 读取任务退出", source);
}

/// 按顺序把排队的输入写入 stdin，管道断开或队列关闭时退出
async fn pump_input(mut stdin: ChildStdin, mut rx: mpsc::UnboundedReceiver<Vec<u8>>) {
    while let Some(data) = rx.recv().await {
        let result = match stdin.write_all(&data).await {
            Ok(()) => stdin.flush().await,
            Err(e) => Err(e),
        };
        if let Err(e) = result {
            // 管道断开说明进程已退出，之后的输入全部丢弃
            tracing::debug!("写入管道失败（进程可能已退出）: {}", e);
            break;
        }
    }
    tracing::trace!("stdin 写入任务退出");
}

#[async_trait]
impl PtyConnection for PipeProcess {
    fn kind(&self) -> BackendKind {
        BackendKind::Pipe
    }

    fn pid(&self) -> Option<u32> {
        self.pid
    }

    fn size(&self) -> TermSize {
        *lock(&self.size)
    }

    fn write(&self, data: &[u8]) {
        if !self.input.send(data) {
            tracing::trace!("管道输入已关闭，丢弃 {} bytes", data.len());
        }
    }

    async fn read(&self) -> ReadChunk {
        self.output.read().await
    }

    /// 管道没有终端几何信息：只记录尺寸，不影响进程
    fn resize(&self, size: TermSize) -> Result<(), TerminalError> {
        *lock(&self.size) = size;
        Ok(())
    }

    fn is_alive(&self) -> bool {
        matches!(lock(&self.child).try_wait(), Ok(None))
    }

    async fn dispose(&self) -> Option<TerminationReport> {
        if self.disposed.swap(true, Ordering::SeqCst) {
            return None;
        }

        self.input.close();
        let report = terminate(self, self.terminate_grace).await;

        tracing::debug!("管道进程已终止 (pid {:?}): {:?}", self.pid, report.steps);
        Some(report)
    }
}

impl Terminable for PipeProcess {
    fn is_alive(&self) -> bool {
        PtyConnection::is_alive(self)
    }

    #[cfg(unix)]
    fn request_graceful_stop(&self) -> std::io::Result<()> {
        match self.pid {
            Some(pid) => super::terminate::send_signal(pid, libc::SIGTERM, false),
            None => Ok(()),
        }
    }

    /// 没有信号机制的平台上，关闭标准输入让 shell 自行退出
    #[cfg(not(unix))]
    fn request_graceful_stop(&self) -> std::io::Result<()> {
        self.input.close();
        Ok(())
    }

    fn force_stop(&self) -> std::io::Result<()> {
        lock(&self.child).start_kill()
    }

    fn try_reap(&self) -> std::io::Result<bool> {
        Ok(lock(&self.child).try_wait()?.is_some())
    }
}
