//! RPC 方法注册和调用
//!
//! `session.*` 为拉取式访问路径，每个请求独立；`stream.*` 为推送式访问路径，
//! 绑定到当前 stdio 连接。

use serde::de::DeserializeOwned;
use std::sync::Arc;

use super::server::NotificationSender;
use super::types::{
    CreateSessionRequest, CreateSessionResponse, ExistsResponse, InputRequest, JsonRpcError,
    JsonRpcResponse, ReadOutputResponse, ResizeRequest, SessionRequest,
};
use crate::config::TerminalConfig;
use crate::pty::{PushConnection, SessionRegistry};
use crate::utils::error::TerminalError;

/// RPC 方法处理器
pub struct RpcMethods {
    registry: Arc<SessionRegistry>,
    push: PushConnection<NotificationSender>,
}

type MethodResult = Result<serde_json::Value, JsonRpcError>;

/// 解析必需参数
fn parse_params<T: DeserializeOwned>(params: Option<serde_json::Value>) -> Result<T, JsonRpcError> {
    let params = params.ok_or_else(|| JsonRpcError::invalid_params("缺少参数"))?;
    serde_json::from_value(params)
        .map_err(|e| JsonRpcError::invalid_params(format!("参数解析错误: {}", e)))
}

fn to_result(value: impl serde::Serialize) -> MethodResult {
    serde_json::to_value(value).map_err(|e| JsonRpcError::from(TerminalError::from(e)))
}

impl RpcMethods {
    /// 创建方法处理器，推送输出经由 `notification_sender` 发出
    pub fn new(config: TerminalConfig, notification_sender: NotificationSender) -> Self {
        let registry = Arc::new(SessionRegistry::new(config));
        let push = PushConnection::new(registry.clone(), notification_sender);
        Self { registry, push }
    }

    /// 会话注册表
    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    /// 调用指定方法
    pub async fn call(
        &self,
        method: &str,
        params: Option<serde_json::Value>,
        id: serde_json::Value,
    ) -> JsonRpcResponse {
        let result = match method {
            "session.create" => self.session_create(params).await,
            "session.input" => self.session_input(params).await,
            "session.read" => self.session_read(params).await,
            "session.resize" => self.session_resize(params).await,
            "session.close" => self.session_close(params).await,
            "session.exists" => self.session_exists(params).await,
            "session.list" => self.session_list().await,
            "session.get" => self.session_get(params).await,
            "stream.create" => self.stream_create(params).await,
            "stream.attach" => self.stream_attach(params).await,
            "stream.input" => self.stream_input(params).await,
            "stream.resize" => self.stream_resize(params).await,
            "stream.detach" => self.stream_detach(params).await,
            _ => Err(JsonRpcError::method_not_found(method)),
        };

        match result {
            Ok(value) => JsonRpcResponse::success(id, value),
            Err(error) => {
                tracing::debug!("方法 {} 调用失败: {}", method, error.message);
                JsonRpcResponse::error(id, error)
            }
        }
    }

    /// 连接断开：关闭推送路径上的会话，然后关闭其余会话
    pub async fn shutdown(&self) {
        self.push.disconnect().await;
        self.registry.close_all().await;
    }

    // ============ 拉取式访问路径 ============

    /// 创建会话，参数可省略
    async fn session_create(&self, params: Option<serde_json::Value>) -> MethodResult {
        let request: CreateSessionRequest = match params {
            Some(params) => parse_params(Some(params))?,
            None => CreateSessionRequest::default(),
        };
        let session_id = self.registry.create_from_request(request).await?;
        to_result(CreateSessionResponse { session_id })
    }

    /// 发送输入
    async fn session_input(&self, params: Option<serde_json::Value>) -> MethodResult {
        let request: InputRequest = parse_params(params)?;
        let data = request.decode()?;
        self.registry.send_input(&request.session_id, &data).await?;
        Ok(serde_json::Value::Null)
    }

    /// 读取并清空输出
    async fn session_read(&self, params: Option<serde_json::Value>) -> MethodResult {
        let request: SessionRequest = parse_params(params)?;
        let output = self.registry.read_output(&request.session_id).await?;
        to_result(ReadOutputResponse::from_bytes(&output))
    }

    /// 调整大小
    async fn session_resize(&self, params: Option<serde_json::Value>) -> MethodResult {
        let request: ResizeRequest = parse_params(params)?;
        let size = request.term_size()?;
        self.registry.resize_session(&request.session_id, size).await?;
        Ok(serde_json::Value::Null)
    }

    /// 关闭会话
    async fn session_close(&self, params: Option<serde_json::Value>) -> MethodResult {
        let request: SessionRequest = parse_params(params)?;
        self.registry.close_session(&request.session_id).await?;
        Ok(serde_json::Value::Null)
    }

    async fn session_exists(&self, params: Option<serde_json::Value>) -> MethodResult {
        let request: SessionRequest = parse_params(params)?;
        let exists = self.registry.exists(&request.session_id).await;
        to_result(ExistsResponse { exists })
    }

    /// 列出所有会话
    async fn session_list(&self) -> MethodResult {
        to_result(self.registry.list_sessions().await)
    }

    /// 获取会话信息
    async fn session_get(&self, params: Option<serde_json::Value>) -> MethodResult {
        let request: SessionRequest = parse_params(params)?;
        let info = self
            .registry
            .get_session(&request.session_id)
            .await
            .ok_or_else(|| TerminalError::session_not_found(&request.session_id))?;
        to_result(info)
    }

    // ============ 推送式访问路径 ============

    async fn stream_create(&self, params: Option<serde_json::Value>) -> MethodResult {
        let request: CreateSessionRequest = match params {
            Some(params) => parse_params(Some(params))?,
            None => CreateSessionRequest::default(),
        };
        let session_id = self.push.create_session(request).await?;
        to_result(CreateSessionResponse { session_id })
    }

    async fn stream_attach(&self, params: Option<serde_json::Value>) -> MethodResult {
        let request: SessionRequest = parse_params(params)?;
        self.push.attach(&request.session_id).await?;
        Ok(serde_json::Value::Null)
    }

    async fn stream_input(&self, params: Option<serde_json::Value>) -> MethodResult {
        let request: InputRequest = parse_params(params)?;
        let data = request.decode()?;
        self.push.send_input(&request.session_id, &data).await?;
        Ok(serde_json::Value::Null)
    }

    async fn stream_resize(&self, params: Option<serde_json::Value>) -> MethodResult {
        let request: ResizeRequest = parse_params(params)?;
        let size = request.term_size()?;
        self.push.resize(&request.session_id, size).await?;
        Ok(serde_json::Value::Null)
    }

    async fn stream_detach(&self, params: Option<serde_json::Value>) -> MethodResult {
        let request: SessionRequest = parse_params(params)?;
        self.push.detach(&request.session_id).await?;
        Ok(serde_json::Value::Null)
    }
}
