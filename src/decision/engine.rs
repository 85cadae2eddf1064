//! Decision Engine：消息 + 上下文 -> {action, parameters, confidence}
//!
//! 单次、无状态的变换；所有状态经 DecisionContext 传入。
//! 低于阈值不自动执行，破坏性动作无论置信度都要确认；解析失败或推理服务不可达时退回对话回复，不会让本轮崩溃。

use std::sync::Arc;

use chrono::Utc;

use crate::config::DecisionSection;
use crate::core::{AgentError, RecoveryEngine};
use crate::decision::{
    build_messages, parse_decision, Decision, DecisionContext, PendingAction, PendingReason,
    DEFAULT_SYSTEM_PROMPT,
};
use crate::llm::LlmClient;
use crate::tools::ActionCatalog;

const AFFIRMATIVE_CORE: &[&str] = &[
    "yes", "y", "yeah", "yep", "sure", "ok", "okay", "confirm", "confirmed", "proceed", "go",
];
const NEGATIVE_CORE: &[&str] = &[
    "no", "n", "nope", "nah", "cancel", "stop", "abort", "dont", "don't", "never",
];
const FILLER: &[&str] = &["please", "do", "it", "ahead", "thanks", "mind", "that", "just"];

fn words(message: &str) -> Vec<String> {
    message
        .split_whitespace()
        .map(|w| {
            w.trim_matches(|c: char| !c.is_alphanumeric() && c != '\'')
                .to_lowercase()
        })
        .filter(|w| !w.is_empty())
        .collect()
}

/// 整句只由 核心词 + 填充词 组成，且至少一个核心词
fn only_words_from(message: &str, core: &[&str]) -> bool {
    let words = words(message);
    !words.is_empty()
        && words.iter().any(|w| core.contains(&w.as_str()))
        && words
            .iter()
            .all(|w| core.contains(&w.as_str()) || FILLER.contains(&w.as_str()))
}

pub fn is_affirmative(message: &str) -> bool {
    only_words_from(message, AFFIRMATIVE_CORE)
}

pub fn is_negative(message: &str) -> bool {
    only_words_from(message, NEGATIVE_CORE)
}

pub struct DecisionEngine {
    llm: Arc<dyn LlmClient>,
    catalog: Arc<ActionCatalog>,
    threshold: f64,
    extra_destructive: Vec<String>,
    system_prompt: String,
    recovery: RecoveryEngine,
}

impl DecisionEngine {
    pub fn new(llm: Arc<dyn LlmClient>, catalog: Arc<ActionCatalog>, cfg: &DecisionSection) -> Self {
        Self {
            llm,
            catalog,
            threshold: cfg.execution_threshold,
            extra_destructive: cfg.extra_destructive_actions.clone(),
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
            recovery: RecoveryEngine::new(),
        }
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = prompt.into();
        self
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    pub fn token_usage(&self) -> (u64, u64, u64) {
        self.llm.token_usage()
    }

    pub fn is_destructive(&self, action: &str) -> bool {
        self.catalog.get(action).map(|s| s.destructive).unwrap_or(false)
            || self.extra_destructive.iter().any(|a| a == action)
    }

    /// 永不失败：错误经 RecoveryEngine 转成对话回复
    pub async fn decide(&self, message: &str, ctx: &DecisionContext) -> Decision {
        match self.try_decide(message, ctx).await {
            Ok(decision) => decision,
            Err(e) => {
                tracing::warn!(error = %e, "decision fell back to conversation");
                Decision::conversational(self.recovery.handle(&e).message())
            }
        }
    }

    /// 与 decide 相同，但把 MalformedDecision / LlmError 交给调用方
    pub async fn try_decide(
        &self,
        message: &str,
        ctx: &DecisionContext,
    ) -> Result<Decision, AgentError> {
        if let Some(decision) = ctx
            .pending
            .as_ref()
            .and_then(|pending| self.answer_pending(message, pending))
        {
            return Ok(decision);
        }

        let messages = build_messages(&self.system_prompt, &self.catalog, message, ctx, Utc::now());
        tracing::debug!(system = %messages[0].content, "decision prompt");
        let output = self
            .llm
            .complete(&messages)
            .await
            .map_err(AgentError::LlmError)?;
        let decision = parse_decision(&output, &self.catalog)?;
        tracing::info!(
            action = %decision.action,
            confidence = decision.confidence,
            "decision"
        );
        Ok(self.gate(decision))
    }

    /// 对待确认动作的直接答复：肯定则原样恢复，否定则放弃；其他消息返回 None。
    /// 应传入用户原话，指代消解追加的路径标记会让答复不再是纯肯定 / 否定。
    pub fn answer_pending(&self, message: &str, pending: &PendingAction) -> Option<Decision> {
        if is_affirmative(message) {
            tracing::info!(action = %pending.action, "pending action confirmed");
            return Some(Decision::resume(pending.clone()));
        }
        if is_negative(message) {
            tracing::info!(action = %pending.action, "pending action declined");
            return Some(Decision::conversational("Okay, I won't do that."));
        }
        None
    }

    /// 破坏性动作总要确认；其余动作置信度低于阈值时要确认
    fn gate(&self, decision: Decision) -> Decision {
        if decision.is_conversational() {
            return decision;
        }
        let reason = if self.is_destructive(&decision.action) {
            PendingReason::Destructive
        } else if decision.confidence < self.threshold {
            PendingReason::LowConfidence
        } else {
            return decision;
        };
        let pending = PendingAction {
            action: decision.action,
            parameters: decision.parameters,
            confidence: decision.confidence,
            reason,
        };
        Decision::confirmation_request(pending, decision.rationale)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::ScriptedLlmClient;
    use serde_json::Map;

    fn engine(llm: Arc<ScriptedLlmClient>) -> DecisionEngine {
        DecisionEngine::new(llm, Arc::new(ActionCatalog::v1()), &DecisionSection::default())
    }

    #[test]
    fn test_affirmative_and_negative_detection() {
        assert!(is_affirmative("yes"));
        assert!(is_affirmative("Yes, please do it!"));
        assert!(is_affirmative("ok go ahead"));
        assert!(!is_affirmative("yes create another file called a.txt"));
        assert!(!is_affirmative("please"));
        assert!(is_negative("no"));
        assert!(is_negative("No thanks."));
        assert!(is_negative("cancel that"));
        assert!(!is_negative("no wait, open the html one"));
    }

    #[tokio::test]
    async fn test_confident_action_passes_through() {
        let llm = Arc::new(ScriptedLlmClient::new([
            r#"{"action": "create_file", "parameters": {"path": "todo.txt", "content": "buy milk"}, "confidence": 0.9, "rationale": "asked"}"#,
        ]));
        let d = engine(llm).decide("create todo.txt", &DecisionContext::default()).await;
        assert_eq!(d.action, "create_file");
        assert!(d.pending.is_none());
    }

    #[tokio::test]
    async fn test_low_confidence_becomes_confirmation_request() {
        let llm = Arc::new(ScriptedLlmClient::new([
            r#"{"action": "launch_app", "parameters": {"app_name": "calc"}, "confidence": 0.3}"#,
        ]));
        let d = engine(llm).decide("maybe calc?", &DecisionContext::default()).await;
        assert!(d.is_conversational());
        let pending = d.pending.unwrap();
        assert_eq!(pending.action, "launch_app");
        assert_eq!(pending.reason, PendingReason::LowConfidence);
        assert!(d.reply.unwrap().contains("launch_app"));
    }

    #[tokio::test]
    async fn test_destructive_action_needs_confirmation_even_when_certain() {
        let llm = Arc::new(ScriptedLlmClient::new([
            r#"{"action": "delete_file", "parameters": {"path": "a.txt"}, "confidence": 1.0}"#,
        ]));
        let d = engine(llm).decide("delete a.txt", &DecisionContext::default()).await;
        assert_eq!(d.pending.unwrap().reason, PendingReason::Destructive);
        assert!(!d.confirmed);
    }

    #[tokio::test]
    async fn test_configured_extra_destructive_and_threshold() {
        let llm = Arc::new(ScriptedLlmClient::new([
            r#"{"action": "type_text", "parameters": {"text": "hi"}, "confidence": 0.95}"#,
            r#"{"action": "help", "confidence": 0.75}"#,
        ]));
        let cfg = DecisionSection {
            execution_threshold: 0.8,
            extra_destructive_actions: vec!["type_text".into()],
            ..DecisionSection::default()
        };
        let engine = DecisionEngine::new(llm, Arc::new(ActionCatalog::v1()), &cfg);
        let typed = engine.decide("type hi", &DecisionContext::default()).await;
        assert_eq!(typed.pending.unwrap().reason, PendingReason::Destructive);
        let help = engine.decide("help?", &DecisionContext::default()).await;
        assert_eq!(help.pending.unwrap().reason, PendingReason::LowConfidence);
    }

    #[tokio::test]
    async fn test_pending_yes_resumes_without_calling_llm() {
        let llm = Arc::new(ScriptedLlmClient::default());
        let mut params = Map::new();
        params.insert("path".into(), "a.txt".into());
        let ctx = DecisionContext {
            pending: Some(PendingAction {
                action: "delete_file".into(),
                parameters: params.clone(),
                confidence: 0.9,
                reason: PendingReason::Destructive,
            }),
            ..Default::default()
        };
        let d = engine(llm.clone()).decide("yes", &ctx).await;
        assert_eq!(d.action, "delete_file");
        assert_eq!(d.parameters, params);
        assert!(d.confirmed);

        let declined = engine(llm.clone()).decide("no", &ctx).await;
        assert!(declined.is_conversational());
        assert!(declined.pending.is_none());
        assert_eq!(llm.call_count(), 0);
    }

    #[test]
    fn test_answer_pending_rejects_resolved_path_suffix() {
        let e = engine(Arc::new(ScriptedLlmClient::default()));
        let pending = PendingAction {
            action: "delete_file".into(),
            parameters: Map::new(),
            confidence: 0.9,
            reason: PendingReason::Destructive,
        };
        assert!(e.answer_pending("yes please do it", &pending).unwrap().confirmed);
        assert!(e
            .answer_pending("yes please do it [=> /tmp/todo.txt]", &pending)
            .is_none());
        assert!(e.answer_pending("open the report", &pending).is_none());
    }

    #[tokio::test]
    async fn test_pending_dropped_on_unrelated_message() {
        let llm = Arc::new(ScriptedLlmClient::new([r#"{"action": "help", "confidence": 0.9}"#]));
        let ctx = DecisionContext {
            pending: Some(PendingAction {
                action: "delete_file".into(),
                parameters: Map::new(),
                confidence: 0.9,
                reason: PendingReason::Destructive,
            }),
            ..Default::default()
        };
        let d = engine(llm.clone()).decide("what can you do", &ctx).await;
        assert_eq!(d.action, "help");
        assert!(!d.confirmed);
        assert_eq!(llm.call_count(), 1);
    }

    #[tokio::test]
    async fn test_malformed_response_falls_back_to_conversation() {
        let llm = Arc::new(ScriptedLlmClient::new([r#"{"action": "rm_rf", "confidence": 1}"#]));
        let e = engine(llm.clone());
        let d = e.decide("do something", &DecisionContext::default()).await;
        assert!(d.is_conversational());
        assert!(d.reply.unwrap().contains("rephrase"));

        llm.push(r#"{"action": "open_file", "parameters": "#);
        let err = e
            .try_decide("again", &DecisionContext::default())
            .await
            .unwrap_err();
        assert!(matches!(err, AgentError::MalformedDecision(_)));
    }

    #[tokio::test]
    async fn test_transport_error_becomes_reply() {
        let llm = Arc::new(ScriptedLlmClient::default());
        llm.push_error("connection refused");
        let d = engine(llm).decide("hello", &DecisionContext::default()).await;
        assert!(d.is_conversational());
        assert!(d.reply.unwrap().contains("reasoning service"));
    }
}
