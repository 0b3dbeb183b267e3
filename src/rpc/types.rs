//! RPC 数据类型定义
//!
//! 定义 JSON-RPC 请求、响应和通知的数据结构，以及会话对外可见的元数据。

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::utils::error::TerminalError;

/// 终端尺寸
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct TermSize {
    pub rows: u16,
    pub cols: u16,
}

impl TermSize {
    /// 创建尺寸，行列必须大于 0
    pub fn new(rows: u16, cols: u16) -> Result<Self, TerminalError> {
        if rows == 0 || cols == 0 {
            return Err(TerminalError::InvalidRequest(format!(
                "终端尺寸无效: {}x{}",
                cols, rows
            )));
        }
        Ok(Self { rows, cols })
    }
}

impl Default for TermSize {
    fn default() -> Self {
        Self { rows: 24, cols: 80 }
    }
}

/// 原生连接的实现方式
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// 伪终端（Unix）
    Pty,
    /// 重定向管道，stdout/stderr 合并（回退方案）
    Pipe,
}

/// 会话状态
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    /// 已创建
    Created,
    /// 启动中（创建原生连接、启动读取器）
    Starting,
    /// 运行中
    Running,
    /// 关闭中
    Closing,
    /// 已关闭
    Closed,
}

/// 会话信息
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionInfo {
    pub id: String,
    pub status: SessionStatus,
    pub backend: BackendKind,
    pub shell: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cwd: Option<String>,
    pub size: TermSize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pid: Option<u32>,
    /// 进程是否仍在运行
    pub alive: bool,
    /// 尚未被读取的输出字节数
    pub buffered_bytes: usize,
    pub created_at: i64,
}

// ============ RPC 请求类型 ============

/// 创建会话请求
///
/// 所有字段可选，缺省值取自 [`crate::config::TerminalConfig`]。
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct CreateSessionRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub shell: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub args: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cwd: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub env: Option<HashMap<String, String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rows: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cols: Option<u16>,
}

/// 创建会话响应
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateSessionResponse {
    pub session_id: String,
}

/// 只携带会话 ID 的请求（read / close / get / exists / attach / detach）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionRequest {
    pub session_id: String,
}

/// 输入请求
///
/// `input` 为原始文本，`data` 为 Base64 编码的字节；两者至少提供一个，同时提供时以 `data` 为准。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InputRequest {
    pub session_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,
}

impl InputRequest {
    /// 解码为要写入进程的字节
    pub fn decode(&self) -> Result<Vec<u8>, TerminalError> {
        match (&self.data, &self.input) {
            (Some(data), _) => BASE64
                .decode(data)
                .map_err(|e| TerminalError::InvalidRequest(format!("Invalid base64 data: {}", e))),
            (None, Some(input)) => Ok(input.as_bytes().to_vec()),
            (None, None) => Err(TerminalError::InvalidRequest(
                "缺少 input 或 data 字段".to_string(),
            )),
        }
    }
}

/// 调整大小请求
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResizeRequest {
    pub session_id: String,
    pub rows: u16,
    pub cols: u16,
}

impl ResizeRequest {
    /// 校验并转换为终端尺寸
    pub fn term_size(&self) -> Result<TermSize, TerminalError> {
        TermSize::new(self.rows, self.cols)
    }
}

/// 读取输出响应
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadOutputResponse {
    /// UTF-8 文本（非法序列以替换字符表示）
    pub output: String,
    /// Base64 编码的原始字节
    pub data: String,
}

impl ReadOutputResponse {
    pub fn from_bytes(bytes: &[u8]) -> Self {
        Self {
            output: String::from_utf8_lossy(bytes).into_owned(),
            data: BASE64.encode(bytes),
        }
    }
}

/// 会话存在性响应
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExistsResponse {
    pub exists: bool,
}

// ============ RPC 通知类型 ============

/// 终端输出通知
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputNotification {
    pub session_id: String,
    /// Base64 编码的输出数据
    pub data: String,
}

/// 会话状态变更通知
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionStatusNotification {
    pub session_id: String,
    pub status: String,
}

// ============ JSON-RPC 2.0 协议类型 ============

/// JSON-RPC 请求
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: String,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<serde_json::Value>,
    pub id: serde_json::Value,
}

/// JSON-RPC 响应
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    pub jsonrpc: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
    pub id: serde_json::Value,
}

impl JsonRpcResponse {
    /// 创建成功响应
    pub fn success(id: serde_json::Value, result: serde_json::Value) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            result: Some(result),
            error: None,
            id,
        }
    }

    /// 创建错误响应
    pub fn error(id: serde_json::Value, error: JsonRpcError) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            result: None,
            error: Some(error),
            id,
        }
    }
}

/// JSON-RPC 错误
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcError {
    pub code: i32,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl JsonRpcError {
    /// 解析错误 (-32700)
    pub fn parse_error(message: impl Into<String>) -> Self {
        Self {
            code: -32700,
            message: message.into(),
            data: None,
        }
    }

    /// 无效请求 (-32600)
    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self {
            code: -32600,
            message: message.into(),
            data: None,
        }
    }

    /// 方法不存在 (-32601)
    pub fn method_not_found(method: impl Into<String>) -> Self {
        Self {
            code: -32601,
            message: format!("Method not found: {}", method.into()),
            data: None,
        }
    }

    /// 无效参数 (-32602)
    pub fn invalid_params(message: impl Into<String>) -> Self {
        Self {
            code: -32602,
            message: message.into(),
            data: None,
        }
    }

    /// 内部错误 (-32603)
    pub fn internal_error(message: impl Into<String>) -> Self {
        Self {
            code: -32603,
            message: message.into(),
            data: None,
        }
    }
}

/// JSON-RPC 通知
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcNotification {
    pub jsonrpc: String,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<serde_json::Value>,
}

impl JsonRpcNotification {
    /// 创建新通知
    pub fn new(method: impl Into<String>, params: serde_json::Value) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            method: method.into(),
            params: Some(params),
        }
    }
}
