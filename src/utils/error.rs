//! 错误类型定义
//!
//! 定义远程 Shell 会话子系统的错误类型，提供描述性错误消息。
//!
//! ## 功能
//! - 定义 TerminalError 枚举，涵盖所有可能的错误类型
//! - 实现错误转换（From trait）
//! - 提供错误分类和辅助方法
//! - 支持转换为 JSON-RPC 错误格式

use thiserror::Error;

use crate::rpc::types::JsonRpcError;

/// 终端错误类型
#[derive(Debug, Error)]
pub enum TerminalError {
    /// 进程 / PTY 创建失败（可执行文件不存在、资源耗尽、权限不足）
    #[error("进程启动失败: {0}")]
    SpawnFailed(String),

    /// 会话不存在（从未创建或已关闭）
    #[error("会话不存在: {0}")]
    SessionNotFound(String),

    /// 当前平台不支持该操作
    #[error("平台不支持: {0}")]
    PlatformUnsupported(String),

    /// 无效的请求
    #[error("无效的请求: {0}")]
    InvalidRequest(String),

    /// IO 错误
    #[error("IO 错误: {0}")]
    IoError(#[from] std::io::Error),

    /// 序列化错误
    #[error("序列化错误: {0}")]
    SerializationError(#[from] serde_json::Error),
}

impl From<TerminalError> for JsonRpcError {
    fn from(err: TerminalError) -> Self {
        // 使用应用特定的错误码范围 (-32000 到 -32099)
        let code = match &err {
            TerminalError::SessionNotFound(_) => -32001,
            TerminalError::InvalidRequest(_) => -32602, // 使用标准的无效参数错误码
            TerminalError::SerializationError(_) => -32700, // 使用标准的解析错误码
            TerminalError::SpawnFailed(_) => -32010,
            TerminalError::PlatformUnsupported(_) => -32011,
            TerminalError::IoError(_) => -32603, // 使用标准的内部错误码
        };

        JsonRpcError {
            code,
            message: err.to_string(),
            data: Some(serde_json::json!({
                "error_type": err.error_type(),
                "error_code": err.code(),
                "recoverable": err.is_recoverable(),
            })),
        }
    }
}

impl TerminalError {
    /// 获取错误码
    pub fn code(&self) -> i32 {
        match self {
            TerminalError::SpawnFailed(_) => 1001,
            TerminalError::SessionNotFound(_) => 1003,
            TerminalError::InvalidRequest(_) => 1004,
            TerminalError::IoError(_) => 1005,
            TerminalError::SerializationError(_) => 1006,
            TerminalError::PlatformUnsupported(_) => 1014,
        }
    }

    /// 获取错误类型名称
    pub fn error_type(&self) -> &'static str {
        match self {
            TerminalError::SpawnFailed(_) => "spawn_failed",
            TerminalError::SessionNotFound(_) => "session_not_found",
            TerminalError::PlatformUnsupported(_) => "platform_unsupported",
            TerminalError::InvalidRequest(_) => "invalid_request",
            TerminalError::IoError(_) => "io_error",
            TerminalError::SerializationError(_) => "serialization_error",
        }
    }

    /// 检查是否为可恢复错误
    ///
    /// 会话不存在时调用方应视会话已结束，并提示创建新会话。
    pub fn is_recoverable(&self) -> bool {
        matches!(self, TerminalError::SessionNotFound(_))
    }

    /// 检查是否为会话不存在错误
    pub fn is_not_found(&self) -> bool {
        matches!(self, TerminalError::SessionNotFound(_))
    }

    /// 创建进程启动失败错误（包含可执行文件信息）
    pub fn spawn_failed(shell: &str, reason: impl std::fmt::Display) -> Self {
        TerminalError::SpawnFailed(format!("{}: {}", shell, reason))
    }

    /// 创建会话不存在错误
    pub fn session_not_found(session_id: &str) -> Self {
        TerminalError::SessionNotFound(session_id.to_string())
    }
}
