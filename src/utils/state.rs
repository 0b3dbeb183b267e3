//! 会话状态管理
//!
//! 提供会话生命周期的状态转换逻辑。
//!
//! 状态机：`Created → Starting → Running → Closing → Closed`。
//! 启动阶段失败时直接从 `Starting` 进入 `Closed`。

use crate::rpc::types::SessionStatus;
use crate::utils::error::TerminalError;

/// 状态转换结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StateTransitionResult {
    /// 转换成功
    Success,
    /// 转换无效（当前状态不允许转换到目标状态）
    Invalid {
        from: SessionStatus,
        to: SessionStatus,
        reason: String,
    },
}

impl StateTransitionResult {
    /// 检查转换是否成功
    pub fn is_success(&self) -> bool {
        matches!(self, StateTransitionResult::Success)
    }

    /// 检查转换是否失败
    pub fn is_invalid(&self) -> bool {
        matches!(self, StateTransitionResult::Invalid { .. })
    }
}

/// 会话状态管理器
///
/// 管理单个会话的状态转换，确保状态转换的有效性。
#[derive(Debug, Clone)]
pub struct SessionStateManager {
    /// 当前状态
    current_status: SessionStatus,
    /// 会话 ID（用于日志）
    session_id: String,
}

impl SessionStateManager {
    /// 创建新的状态管理器
    pub fn new(session_id: impl Into<String>) -> Self {
        Self {
            current_status: SessionStatus::Created,
            session_id: session_id.into(),
        }
    }

    /// 获取当前状态
    pub fn status(&self) -> SessionStatus {
        self.current_status
    }

    /// 尝试转换到目标状态
    ///
    /// 如果转换有效，更新状态并返回 Success。
    /// 如果转换无效，保持当前状态并返回 Invalid。
    pub fn transition_to(&mut self, target: SessionStatus) -> StateTransitionResult {
        if Self::is_valid_transition(self.current_status, target) {
            let from = self.current_status;
            self.current_status = target;

            tracing::debug!(
                "会话 {} 状态转换: {:?} -> {:?}",
                self.session_id,
                from,
                target
            );

            StateTransitionResult::Success
        } else {
            let reason = Self::get_invalid_transition_reason(self.current_status, target);
            tracing::warn!(
                "会话 {} 无效状态转换: {:?} -> {:?}, 原因: {}",
                self.session_id,
                self.current_status,
                target,
                reason
            );

            StateTransitionResult::Invalid {
                from: self.current_status,
                to: target,
                reason,
            }
        }
    }

    /// 启动失败，直接进入 Closed
    pub fn fail_startup(&mut self, error: &TerminalError) -> StateTransitionResult {
        let result = self.transition_to(SessionStatus::Closed);
        if result.is_success() {
            tracing::error!("会话 {} 启动失败: {}", self.session_id, error);
        }
        result
    }

    /// 检查状态转换是否有效
    ///
    /// 状态转换规则：
    /// - Created -> Starting, Closed
    /// - Starting -> Running, Closed
    /// - Running -> Closing
    /// - Closing -> Closed
    /// - Closed -> (终态，不能转换)
    pub fn is_valid_transition(from: SessionStatus, to: SessionStatus) -> bool {
        // 相同状态不需要转换
        if from == to {
            return true;
        }

        match from {
            SessionStatus::Created => {
                matches!(to, SessionStatus::Starting | SessionStatus::Closed)
            }
            SessionStatus::Starting => {
                matches!(to, SessionStatus::Running | SessionStatus::Closed)
            }
            SessionStatus::Running => matches!(to, SessionStatus::Closing),
            SessionStatus::Closing => matches!(to, SessionStatus::Closed),
            SessionStatus::Closed => false, // 终态
        }
    }

    /// 获取无效转换的原因
    fn get_invalid_transition_reason(from: SessionStatus, to: SessionStatus) -> String {
        match from {
            SessionStatus::Closed => "会话已关闭，不能再转换状态".to_string(),
            SessionStatus::Closing => "会话正在关闭，只能转换到 Closed".to_string(),
            _ => format!("不允许从 {:?} 转换到 {:?}", from, to),
        }
    }

    /// 检查会话是否接受读写操作
    pub fn is_running(&self) -> bool {
        self.current_status == SessionStatus::Running
    }
}
