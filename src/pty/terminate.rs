//! 进程终止
//!
//! 逐级升级的终止流程：请求优雅退出 → 等待宽限期 → 检查存活 → 强制终止 → 回收。

use std::time::{Duration, Instant};

/// 存活轮询间隔
const POLL_INTERVAL: Duration = Duration::from_millis(10);
/// 强制终止后等待回收的上限
const REAP_TIMEOUT: Duration = Duration::from_secs(2);

/// 终止流程中的步骤
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminationStep {
    /// 发送优雅终止信号（SIGHUP / SIGTERM，或关闭输入）
    RequestGraceful,
    /// 在宽限期内等待进程退出
    AwaitGrace,
    /// 宽限期结束后检查存活
    CheckLiveness,
    /// 发送强制终止信号（SIGKILL）
    ForceKill,
    /// 回收进程，避免僵尸进程
    Reap,
}

/// 终止流程执行结果
#[derive(Debug, Clone, Default)]
pub struct TerminationReport {
    /// 实际执行过的步骤，按顺序
    pub steps: Vec<TerminationStep>,
    /// 是否升级到了强制终止
    pub forced: bool,
    /// 进程是否已被回收
    pub reaped: bool,
    pub elapsed: Duration,
}

impl TerminationReport {
    pub fn ran(&self, step: TerminationStep) -> bool {
        self.steps.contains(&step)
    }
}

/// 可被终止的子进程
pub trait Terminable: Send + Sync {
    /// 非阻塞检查进程是否存活
    fn is_alive(&self) -> bool;

    /// 请求进程优雅退出
    fn request_graceful_stop(&self) -> std::io::Result<()>;

    /// 强制终止进程
    fn force_stop(&self) -> std::io::Result<()>;

    /// 非阻塞回收；进程已退出并被回收时返回 `true`
    fn try_reap(&self) -> std::io::Result<bool>;
}

/// 按升级策略终止进程
pub async fn terminate<T: Terminable + ?Sized>(target: &T, grace: Duration) -> TerminationReport {
    let started = Instant::now();
    let mut report = TerminationReport::default();

    if target.is_alive() {
        report.steps.push(TerminationStep::RequestGraceful);
        if let Err(e) = target.request_graceful_stop() {
            tracing::debug!("发送优雅终止信号失败: {}", e);
        }

        report.steps.push(TerminationStep::AwaitGrace);
        let deadline = Instant::now() + grace;
        while Instant::now() < deadline && target.is_alive() {
            tokio::time::sleep(POLL_INTERVAL).await;
        }

        report.steps.push(TerminationStep::CheckLiveness);
        if target.is_alive() {
            report.steps.push(TerminationStep::ForceKill);
            report.forced = true;
            tracing::warn!("进程未在 {:?} 内退出，强制终止", grace);
            if let Err(e) = target.force_stop() {
                tracing::warn!("强制终止失败: {}", e);
            }
        }
    }

    report.steps.push(TerminationStep::Reap);
    let deadline = Instant::now() + REAP_TIMEOUT;
    loop {
        match target.try_reap() {
            Ok(true) => {
                report.reaped = true;
                break;
            }
            Ok(false) if Instant::now() < deadline => {
                tokio::time::sleep(POLL_INTERVAL).await;
            }
            Ok(false) => {
                tracing::warn!("等待进程回收超时");
                break;
            }
            Err(e) => {
                tracing::warn!("回收进程失败: {}", e);
                break;
            }
        }
    }

    report.elapsed = started.elapsed();
    report
}

/// 向进程（或进程组）发送信号
#[cfg(unix)]
pub(crate) fn send_signal(pid: u32, signal: libc::c_int, group: bool) -> std::io::Result<()> {
    let pid: libc::pid_t = pid
        .try_into()
        .map_err(|_| std::io::Error::new(std::io::ErrorKind::InvalidInput, "pid 超出范围"))?;
    if pid <= 0 {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            "pid 无效",
        ));
    }
    let target = if group { -pid } else { pid };
    // SAFETY: kill(2) 只接收整数参数，pid 已校验为正数。
    let rc = unsafe { libc::kill(target, signal) };
    if rc == 0 {
        return Ok(());
    }
    let err = std::io::Error::last_os_error();
    if err.raw_os_error() == Some(libc::ESRCH) {
        // 进程已不存在
        return Ok(());
    }
    Err(err)
}
