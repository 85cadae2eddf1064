//! 会话状态投影：前端只看阶段、排队数与最近一轮

use serde::Serialize;

use crate::memory::TurnId;

/// 前端看到的「投影」状态
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct SessionState {
    pub phase: AgentPhase,
    /// 进行中的一轮之后排队的消息数
    pub queued: usize,
    pub last_turn: Option<TurnId>,
}

impl Default for SessionState {
    fn default() -> Self {
        Self {
            phase: AgentPhase::Idle,
            queued: 0,
            last_turn: None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentPhase {
    Idle,
    Thinking,
    /// 上一轮留下待确认动作，等待 yes / no
    AwaitingConfirmation,
    ShuttingDown,
}
