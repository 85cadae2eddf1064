//! 错误恢复引擎
//!
//! 根据 AgentError 类型返回 RecoveryAction，供 Assistant 把任何失败都转成一条清晰的用户回复。

use crate::core::{AgentError, RecoveryAction};

/// 语义化错误恢复：将错误映射为可执行动作（回复 / 澄清 / 终止）
#[derive(Debug, Default)]
pub struct RecoveryEngine;

impl RecoveryEngine {
    pub fn new() -> Self {
        Self
    }

    pub fn handle(&self, err: &AgentError) -> RecoveryAction {
        match err {
            AgentError::MalformedDecision(_) => RecoveryAction::Clarify(
                "I couldn't work out a concrete action from that. Could you rephrase what you'd like me to do?"
                    .to_string(),
            ),
            AgentError::InvalidParameters { action, reason } => RecoveryAction::Clarify(format!(
                "I need a bit more detail to run '{action}': {reason}."
            )),
            AgentError::ConfirmationRequired(action) => RecoveryAction::Clarify(format!(
                "'{action}' changes things that can't be undone. Please confirm before I run it."
            )),
            AgentError::ProhibitedImport(module) => RecoveryAction::Reply(format!(
                "The sandbox does not allow importing '{module}'."
            )),
            AgentError::ProhibitedBuiltin(name) => RecoveryAction::Reply(format!(
                "The sandbox does not allow '{name}'."
            )),
            AgentError::ProhibitedAttribute(name) => RecoveryAction::Reply(format!(
                "The sandbox does not allow accessing '.{name}'."
            )),
            AgentError::SandboxTimeout(secs) => RecoveryAction::Reply(format!(
                "The code was stopped after running for {secs}s."
            )),
            AgentError::SandboxRuntimeError(msg) => {
                RecoveryAction::Reply(format!("The code raised an error: {msg}"))
            }
            AgentError::CollaboratorFailure {
                collaborator,
                message,
            } => RecoveryAction::Reply(format!("{collaborator} reported a failure: {message}")),
            AgentError::PersistenceFailure(msg) => RecoveryAction::Reply(format!(
                "Done, but I couldn't save this to memory ({msg}); it is kept for this session only."
            )),
            AgentError::LlmError(_) => RecoveryAction::Reply(
                "I couldn't reach the reasoning service just now. Please try again in a moment."
                    .to_string(),
            ),
            AgentError::TurnTimeout(secs) => RecoveryAction::Abort(format!(
                "That took longer than {secs}s, so I stopped it. Nothing was changed in memory."
            )),
            AgentError::Cancelled => {
                RecoveryAction::Abort("Cancelled. Nothing was changed in memory.".to_string())
            }
            AgentError::ConfigError(msg) => {
                RecoveryAction::Abort(format!("Configuration problem: {msg}"))
            }
        }
    }
}
