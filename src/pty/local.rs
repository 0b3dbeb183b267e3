//! 本地 PTY 实现
//!
//! 使用 portable-pty 分配伪终端并启动 shell。子进程由 portable-pty 在 fork 后
//! 调用 setsid 并设置控制终端，因此子进程是自己进程组的组长，终止信号发送给整个进程组。

use async_trait::async_trait;
use portable_pty::{native_pty_system, CommandBuilder, MasterPty, PtySize};
use std::io::{Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::mpsc;

use crate::config::ShellConfig;
use crate::rpc::types::{BackendKind, TermSize};
use crate::utils::error::TerminalError;

use super::connection::{InputSender, OutputReceiver, PtyConnection, ReadChunk, READ_CHUNK_SIZE};
use super::terminate::{send_signal, terminate, Terminable, TerminationReport};

/// 本地 PTY 实例
pub struct LocalPty {
    /// PTY master，释放后为 None
    master: Mutex<Option<Box<dyn MasterPty + Send>>>,
    /// 输入队列，由写入线程写给 PTY master
    input: InputSender,
    /// 子进程
    child: Mutex<Box<dyn portable_pty::Child + Send + Sync>>,
    pid: Option<u32>,
    size: Mutex<TermSize>,
    output: OutputReceiver,
    disposed: AtomicBool,
    terminate_grace: Duration,
}

fn pty_size(size: TermSize) -> PtySize {
    PtySize {
        rows: size.rows,
        cols: size.cols,
        pixel_width: 0,
        pixel_height: 0,
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| {
        tracing::warn!("PTY 锁被污染，继续使用");
        e.into_inner()
    })
}

impl LocalPty {
    /// 创建伪终端并启动 shell
    pub fn spawn(config: &ShellConfig, terminate_grace: Duration) -> Result<Self, TerminalError> {
        // 获取 PTY 系统
        let pty_system = native_pty_system();

        // 创建 PTY pair
        let pair = pty_system
            .openpty(pty_size(config.size))
            .map_err(|e| TerminalError::spawn_failed(&config.shell, e))?;

        // 构建命令
        let mut cmd = CommandBuilder::new(&config.shell);
        cmd.args(&config.args);

        // 设置工作目录
        if let Some(dir) = &config.cwd {
            cmd.cwd(dir);
        }

        cmd.env("TERM", "xterm-256color");
        cmd.env("COLORTERM", "truecolor");

        // 设置自定义环境变量
        for (key, value) in &config.env {
            cmd.env(key, value);
        }

        // 启动子进程
        let child = pair
            .slave
            .spawn_command(cmd)
            .map_err(|e| TerminalError::spawn_failed(&config.shell, e))?;
        // 父进程不再持有 slave 端，子进程退出后读取端才能收到 EOF
        drop(pair.slave);

        let pid = child.process_id();
        let reader = pair
            .master
            .try_clone_reader()
            .map_err(|e| TerminalError::spawn_failed(&config.shell, e))?;
        let writer = pair
            .master
            .take_writer()
            .map_err(|e| TerminalError::spawn_failed(&config.shell, e))?;

        let (tx, output) = OutputReceiver::channel();
        std::thread::Builder::new()
            .name(format!("pty-reader-{}", pid.unwrap_or_default()))
            .spawn(move || pump_output(reader, tx))
            .map_err(|e| TerminalError::spawn_failed(&config.shell, e))?;

        // 写入 master 可能因行规程缓冲区写满而阻塞，放在独立线程中
        let (input, input_rx) = InputSender::channel();
        std::thread::Builder::new()
            .name(format!("pty-writer-{}", pid.unwrap_or_default()))
            .spawn(move || pump_input(writer, input_rx))
            .map_err(|e| TerminalError::spawn_failed(&config.shell, e))?;

        tracing::debug!("启动 PTY 进程: {} (pid {:?})", config.shell, pid);

        Ok(Self {
            master: Mutex::new(Some(pair.master)),
            input,
            child: Mutex::new(child),
            pid,
            size: Mutex::new(config.size),
            output,
            disposed: AtomicBool::new(false),
            terminate_grace,
        })
    }
}

/// 阻塞读取 PTY master，直到子进程退出（EOF / EIO）
fn pump_output(mut reader: Box<dyn Read + Send>, tx: mpsc::Sender<Vec<u8>>) {
    let mut buffer = vec![0u8; READ_CHUNK_SIZE];
    loop {
        match reader.read(&mut buffer) {
            Ok(0) => break,
            Ok(n) => {
                if tx.blocking_send(buffer[..n].to_vec()).is_err() {
                    // 接收端已释放
                    break;
                }
            }
            Err(ref e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => {
                // Linux 上子进程退出后读取 master 返回 EIO
                tracing::debug!("PTY 读取结束: {}", e);
                break;
            }
        }
    }
}

/// 按顺序写入排队的输入，写入失败或队列关闭时退出
fn pump_input(mut writer: Box<dyn Write + Send>, mut rx: mpsc::UnboundedReceiver<Vec<u8>>) {
    while let Some(data) = rx.blocking_recv() {
        if let Err(e) = writer.write_all(&data).and_then(|_| writer.flush()) {
            tracing::debug!("写入 PTY 失败（进程可能已退出）: {}", e);
            break;
        }
    }
}

#[async_trait]
impl PtyConnection for LocalPty {
    fn kind(&self) -> BackendKind {
        BackendKind::Pty
    }

    fn pid(&self) -> Option<u32> {
        self.pid
    }

    fn size(&self) -> TermSize {
        *lock(&self.size)
    }

    fn write(&self, data: &[u8]) {
        if !self.input.send(data) {
            tracing::trace!("PTY 输入已关闭，丢弃 {} bytes", data.len());
        }
    }

    async fn read(&self) -> ReadChunk {
        self.output.read().await
    }

    fn resize(&self, size: TermSize) -> Result<(), TerminalError> {
        let master = lock(&self.master);
        let Some(master) = master.as_ref() else {
            return Ok(());
        };
        match master.resize(pty_size(size)) {
            Ok(()) => {
                *lock(&self.size) = size;
                Ok(())
            }
            Err(e) if !PtyConnection::is_alive(self) => {
                tracing::debug!("进程已退出，忽略调整大小失败: {}", e);
                Ok(())
            }
            Err(e) => Err(TerminalError::IoError(std::io::Error::new(
                std::io::ErrorKind::Other,
                e.to_string(),
            ))),
        }
    }

    fn is_alive(&self) -> bool {
        matches!(lock(&self.child).try_wait(), Ok(None))
    }

    async fn dispose(&self) -> Option<TerminationReport> {
        if self.disposed.swap(true, Ordering::SeqCst) {
            return None;
        }

        // 不等待写入线程：它可能仍阻塞在进程从未读取的输入上
        self.input.close();
        let report = terminate(self, self.terminate_grace).await;
        lock(&self.master).take();

        tracing::debug!("PTY 进程已终止 (pid {:?}): {:?}", self.pid, report.steps);
        Some(report)
    }
}

impl Terminable for LocalPty {
    fn is_alive(&self) -> bool {
        PtyConnection::is_alive(self)
    }

    fn request_graceful_stop(&self) -> std::io::Result<()> {
        match self.pid {
            // 挂断信号，与终端关闭时内核发送的信号一致
            Some(pid) => send_signal(pid, libc::SIGHUP, true),
            None => Ok(()),
        }
    }

    fn force_stop(&self) -> std::io::Result<()> {
        if let Some(pid) = self.pid {
            if send_signal(pid, libc::SIGKILL, true).is_ok() {
                return Ok(());
            }
        }
        lock(&self.child).kill()
    }

    fn try_reap(&self) -> std::io::Result<bool> {
        Ok(lock(&self.child).try_wait()?.is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    fn sh_config() -> ShellConfig {
        ShellConfig::new("/bin/sh")
    }

    async fn collect_until(pty: &LocalPty, needle: &str, timeout: Duration) -> String {
        let deadline = Instant::now() + timeout;
        let mut collected = Vec::new();
        while Instant::now() < deadline {
            match tokio::time::timeout(Duration::from_millis(100), pty.read()).await {
                Ok(ReadChunk::Data(data)) => {
                    collected.extend_from_slice(&data);
                    if String::from_utf8_lossy(&collected).contains(needle) {
                        break;
                    }
                }
                Ok(ReadChunk::Eof) => break,
                _ => {}
            }
        }
        String::from_utf8_lossy(&collected).into_owned()
    }

    #[tokio::test]
    async fn test_create_local_pty() {
        match LocalPty::spawn(&sh_config(), Duration::from_millis(100)) {
            Ok(pty) => {
                assert_eq!(pty.kind(), BackendKind::Pty);
                assert!(pty.pid().is_some());
                assert!(PtyConnection::is_alive(&pty));
                assert!(pty.dispose().await.is_some());
                assert!(!PtyConnection::is_alive(&pty));
            }
            Err(e) => {
                // 在某些 CI 环境中可能没有 PTY 支持
                println!("PTY creation failed (may be expected in CI): {}", e);
            }
        }
    }

    #[tokio::test]
    async fn test_terminal_environment() {
        let Ok(pty) = LocalPty::spawn(&sh_config(), Duration::from_millis(100)) else {
            println!("PTY creation failed (may be expected in CI)");
            return;
        };

        pty.write(b"echo \"T=$TERM C=$COLORTERM\"\n");
        let output = collect_until(&pty, "C=truecolor", Duration::from_secs(5)).await;
        assert!(output.contains("T=xterm-256color C=truecolor"), "output: {}", output);

        pty.dispose().await;
    }

    #[tokio::test]
    async fn test_custom_env_and_cwd() {
        let config = sh_config()
            .with_cwd(std::env::temp_dir())
            .with_env("REMOTE_SHELL_TEST_VAR", "test_value");
        let Ok(pty) = LocalPty::spawn(&config, Duration::from_millis(100)) else {
            println!("PTY creation failed (may be expected in CI)");
            return;
        };

        pty.write(b"echo \"V=$REMOTE_SHELL_TEST_VAR\"\n");
        let output = collect_until(&pty, "V=test_value", Duration::from_secs(5)).await;
        assert!(output.contains("V=test_value"), "output: {}", output);

        pty.dispose().await;
    }

    #[tokio::test]
    async fn test_resize_updates_size() {
        let Ok(pty) = LocalPty::spawn(&sh_config(), Duration::from_millis(100)) else {
            println!("PTY creation failed (may be expected in CI)");
            return;
        };

        let size = TermSize { rows: 40, cols: 120 };
        pty.resize(size).unwrap();
        assert_eq!(pty.size(), size);

        pty.write(b"stty size\n");
        let output = collect_until(&pty, "40 120", Duration::from_secs(5)).await;
        assert!(output.contains("40 120"), "output: {}", output);

        pty.dispose().await;
    }

    #[tokio::test]
    async fn test_dispose_is_idempotent() {
        let Ok(pty) = LocalPty::spawn(&sh_config(), Duration::from_millis(100)) else {
            println!("PTY creation failed (may be expected in CI)");
            return;
        };

        let report = pty.dispose().await.expect("first dispose runs termination");
        assert!(report.reaped);
        assert!(pty.dispose().await.is_none());

        // 释放后的操作不应出错
        pty.write(b"echo ignored\n");
        assert!(pty.resize(TermSize::default()).is_ok());
    }

    #[tokio::test(flavor = "current_thread")]
    async fn test_unread_input_does_not_block_runtime() {
        let config = sh_config().with_args(["-c", "sleep 30"]);
        let Ok(pty) = LocalPty::spawn(&config, Duration::from_millis(100)) else {
            println!("PTY creation failed (may be expected in CI)");
            return;
        };

        // 远超行规程缓冲区的输入，进程从不读取
        let started = Instant::now();
        pty.write("x\n".repeat(100_000).as_bytes());
        assert!(started.elapsed() < Duration::from_millis(200));

        // 单线程运行时仍能调度定时器
        tokio::time::sleep(Duration::from_millis(50)).await;

        let report = tokio::time::timeout(Duration::from_secs(5), pty.dispose())
            .await
            .expect("dispose should not wait for the blocked writer")
            .unwrap();
        assert!(report.reaped);
    }

    #[tokio::test]
    async fn test_eof_after_exit() {
        let Ok(pty) = LocalPty::spawn(&sh_config(), Duration::from_millis(100)) else {
            println!("PTY creation failed (may be expected in CI)");
            return;
        };

        pty.write(b"exit\n");
        let deadline = Instant::now() + Duration::from_secs(5);
        let mut reached_eof = false;
        while Instant::now() < deadline {
            if let Ok(ReadChunk::Eof) =
                tokio::time::timeout(Duration::from_millis(200), pty.read()).await
            {
                reached_eof = true;
                break;
            }
        }
        assert!(reached_eof);
        pty.dispose().await;
    }
}
