//! Decision 与待确认动作（均为瞬态，不持久化）

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::memory::{Artifact, Turn, UserPattern};

pub const CHAT_ACTION: &str = "chat";

/// 需要用户确认的原因
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PendingReason {
    LowConfidence,
    Destructive,
}

/// 嵌在确认请求里的暂定动作；用户回答 "yes" 时直接恢复，不重新推断意图
#[derive(Debug, Clone, PartialEq)]
pub struct PendingAction {
    pub action: String,
    pub parameters: Map<String, Value>,
    pub confidence: f64,
    pub reason: PendingReason,
}

impl PendingAction {
    /// 给用户看的一行描述，如 `delete_file {"path":"a.txt"}`
    pub fn describe(&self) -> String {
        if self.parameters.is_empty() {
            self.action.clone()
        } else {
            format!("{} {}", self.action, Value::Object(self.parameters.clone()))
        }
    }
}

/// Decision Engine 对一条消息的结论
#[derive(Debug, Clone, PartialEq)]
pub struct Decision {
    pub action: String,
    pub parameters: Map<String, Value>,
    /// [0, 1]
    pub confidence: f64,
    pub rationale: String,
    pub reply: Option<String>,
    /// 用户已明确确认（只有恢复 PendingAction 时为 true）
    pub confirmed: bool,
    pub pending: Option<PendingAction>,
}

impl Decision {
    /// 纯对话回复
    pub fn conversational(reply: impl Into<String>) -> Self {
        Self {
            action: CHAT_ACTION.to_string(),
            parameters: Map::new(),
            confidence: 1.0,
            rationale: String::new(),
            reply: Some(reply.into()),
            confirmed: false,
            pending: None,
        }
    }

    /// 请求确认：本身是对话，暂定动作挂在 pending 上
    pub fn confirmation_request(pending: PendingAction, rationale: String) -> Self {
        let question = match pending.reason {
            PendingReason::LowConfidence => format!(
                "I think you want me to run {}, but I'm not sure ({:.0}% confident). Should I go ahead? (yes/no)",
                pending.describe(),
                pending.confidence * 100.0
            ),
            PendingReason::Destructive => format!(
                "This will run {}, which can't be undone. Are you sure? (yes/no)",
                pending.describe()
            ),
        };
        Self {
            action: CHAT_ACTION.to_string(),
            parameters: Map::new(),
            confidence: pending.confidence,
            rationale,
            reply: Some(question),
            confirmed: false,
            pending: Some(pending),
        }
    }

    /// 用户确认后恢复暂定动作
    pub fn resume(pending: PendingAction) -> Self {
        Self {
            action: pending.action,
            parameters: pending.parameters,
            confidence: pending.confidence,
            rationale: "confirmed by user".to_string(),
            reply: None,
            confirmed: true,
            pending: None,
        }
    }

    pub fn is_conversational(&self) -> bool {
        self.action == CHAT_ACTION
    }
}

/// decide 所需的全部状态（Decision Engine 本身无状态）
#[derive(Debug, Clone, Default)]
pub struct DecisionContext {
    /// 新 -> 旧
    pub recent_turns: Vec<Turn>,
    /// 新 -> 旧
    pub recent_artifacts: Vec<Artifact>,
    pub patterns: UserPattern,
    /// 上一轮留下的待确认动作
    pub pending: Option<PendingAction>,
}
