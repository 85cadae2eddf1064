//! Agent 错误类型与恢复动作
//!
//! 与 RecoveryEngine 配合：每类错误都在检测它的组件边界被接住，转为 Reply / Clarify / Abort，绝不终止进程。

use thiserror::Error;

/// 决策、分发、沙箱、持久化过程中可能出现的错误
#[derive(Error, Debug, Clone, PartialEq)]
pub enum AgentError {
    /// 推理服务返回的内容无法解析为 Decision
    #[error("Malformed decision: {0}")]
    MalformedDecision(String),

    /// 参数与动作声明的 schema 不匹配（分发前校验）
    #[error("Invalid parameters for '{action}': {reason}")]
    InvalidParameters { action: String, reason: String },

    /// 破坏性动作未经确认就到达分发层
    #[error("Action '{0}' requires explicit confirmation")]
    ConfirmationRequired(String),

    #[error("Prohibited import: {0}")]
    ProhibitedImport(String),

    #[error("Prohibited builtin: {0}")]
    ProhibitedBuiltin(String),

    /// 私有属性（`_` 开头）或通向解释器内部的属性
    #[error("Prohibited attribute access: .{0}")]
    ProhibitedAttribute(String),

    #[error("Sandbox timed out after {0}s")]
    SandboxTimeout(u64),

    #[error("Sandbox runtime error: {0}")]
    SandboxRuntimeError(String),

    /// 文件处理器 / 自动化提供方报告失败
    #[error("{collaborator} failed: {message}")]
    CollaboratorFailure {
        collaborator: String,
        message: String,
    },

    /// 快照写盘失败：保留旧快照，本轮仅在内存中生效
    #[error("Persistence failure: {0}")]
    PersistenceFailure(String),

    #[error("LLM error: {0}")]
    LlmError(String),

    #[error("Turn timed out after {0}s")]
    TurnTimeout(u64),

    #[error("Turn cancelled")]
    Cancelled,

    #[error("Config error: {0}")]
    ConfigError(String),
}

impl AgentError {
    pub fn invalid_parameters(action: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidParameters {
            action: action.into(),
            reason: reason.into(),
        }
    }

    pub fn collaborator(collaborator: impl Into<String>, message: impl Into<String>) -> Self {
        Self::CollaboratorFailure {
            collaborator: collaborator.into(),
            message: message.into(),
        }
    }
}

/// 恢复引擎根据错误类型给出的建议动作
#[derive(Debug, Clone, PartialEq)]
pub enum RecoveryAction {
    /// 作为普通回复告知用户
    Reply(String),
    /// 请用户澄清或补充信息
    Clarify(String),
    /// 终止当前轮（不写入记忆）
    Abort(String),
}

impl RecoveryAction {
    pub fn message(&self) -> &str {
        match self {
            RecoveryAction::Reply(m) | RecoveryAction::Clarify(m) | RecoveryAction::Abort(m) => m,
        }
    }
}
