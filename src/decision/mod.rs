//! 决策层：prompt 拼装、输出解析、置信度与破坏性动作门控

pub mod engine;
pub mod parse;
pub mod prompt;
pub mod types;

pub use engine::{is_affirmative, is_negative, DecisionEngine};
pub use parse::parse_decision;
pub use prompt::{build_messages, format_time_ago, load_system_prompt, render_context, DEFAULT_SYSTEM_PROMPT};
pub use types::{Decision, DecisionContext, PendingAction, PendingReason, CHAT_ACTION};
