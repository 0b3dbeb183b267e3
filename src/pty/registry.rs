//! 会话注册表
//!
//! 以会话 ID 为键管理所有终端会话，并提供拉取式访问路径：
//! 创建、写入、读取并清空、调整大小、关闭。

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::config::{ShellConfig, TerminalConfig};
use crate::rpc::types::{CreateSessionRequest, SessionInfo, TermSize};
use crate::utils::error::TerminalError;

use super::session::{SessionOptions, TerminalSession};

/// 会话注册表
pub struct SessionRegistry {
    /// 会话映射表
    sessions: RwLock<HashMap<String, Arc<TerminalSession>>>,
    config: TerminalConfig,
}

impl SessionRegistry {
    /// 创建新的注册表
    pub fn new(config: TerminalConfig) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            config,
        }
    }

    pub fn config(&self) -> &TerminalConfig {
        &self.config
    }

    /// 创建新会话并返回会话 ID
    ///
    /// 只有启动成功的会话才会被登记。
    pub async fn create_session(&self, config: ShellConfig) -> Result<String, TerminalError> {
        let mut sessions = self.sessions.write().await;

        // 生成唯一会话 ID
        let mut session_id = uuid::Uuid::new_v4().to_string();
        while sessions.contains_key(&session_id) {
            session_id = uuid::Uuid::new_v4().to_string();
        }

        let session = TerminalSession::start(
            session_id.clone(),
            &config,
            SessionOptions::from(&self.config),
        )?;
        sessions.insert(session_id.clone(), session);

        tracing::info!("创建会话: {}", session_id);
        Ok(session_id)
    }

    /// 按创建请求创建会话，缺省字段使用配置默认值
    pub async fn create_from_request(
        &self,
        request: CreateSessionRequest,
    ) -> Result<String, TerminalError> {
        let config = self.config.resolve(request)?;
        self.create_session(config).await
    }

    /// 获取会话
    pub async fn get(&self, session_id: &str) -> Option<Arc<TerminalSession>> {
        self.sessions.read().await.get(session_id).cloned()
    }

    /// 获取会话，不存在时返回 `SessionNotFound`
    pub async fn session(&self, session_id: &str) -> Result<Arc<TerminalSession>, TerminalError> {
        self.get(session_id)
            .await
            .ok_or_else(|| TerminalError::session_not_found(session_id))
    }

    /// 会话是否存在
    pub async fn exists(&self, session_id: &str) -> bool {
        self.sessions.read().await.contains_key(session_id)
    }

    /// 从注册表移除会话（不关闭）
    pub(crate) async fn remove(&self, session_id: &str) -> Option<Arc<TerminalSession>> {
        self.sessions.write().await.remove(session_id)
    }

    /// 发送输入到会话
    pub async fn send_input(&self, session_id: &str, data: &[u8]) -> Result<(), TerminalError> {
        self.session(session_id).await?.write(data)
    }

    /// 读取并清空会话的输出缓冲区
    pub async fn read_output(&self, session_id: &str) -> Result<Vec<u8>, TerminalError> {
        self.session(session_id).await?.read_and_drain()
    }

    /// 调整会话大小
    pub async fn resize_session(
        &self,
        session_id: &str,
        term_size: TermSize,
    ) -> Result<(), TerminalError> {
        self.session(session_id).await?.resize(term_size)
    }

    /// 关闭会话
    ///
    /// 先从注册表移除再终止进程，重复关闭返回 `SessionNotFound`。
    pub async fn close_session(&self, session_id: &str) -> Result<(), TerminalError> {
        let session = self
            .remove(session_id)
            .await
            .ok_or_else(|| TerminalError::session_not_found(session_id))?;
        session.close().await
    }

    /// 关闭全部会话
    pub async fn close_all(&self) {
        let sessions: Vec<_> = self.sessions.write().await.drain().map(|(_, s)| s).collect();
        if sessions.is_empty() {
            return;
        }

        tracing::info!("关闭全部会话: {} 个", sessions.len());
        let results = futures::future::join_all(sessions.iter().map(|s| s.close())).await;
        for (session, result) in sessions.iter().zip(results) {
            if let Err(e) = result {
                tracing::debug!("关闭会话 {} 时出错: {}", session.id(), e);
            }
        }
    }

    /// 列出所有会话
    pub async fn list_sessions(&self) -> Vec<SessionInfo> {
        let mut infos: Vec<_> = self
            .sessions
            .read()
            .await
            .values()
            .map(|s| s.info())
            .collect();
        infos.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        infos
    }

    /// 获取会话信息
    pub async fn get_session(&self, session_id: &str) -> Option<SessionInfo> {
        self.get(session_id).await.map(|s| s.info())
    }

    /// 获取会话数量
    pub async fn session_count(&self) -> usize {
        self.sessions.read().await.len()
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new(TerminalConfig::default())
    }
}
