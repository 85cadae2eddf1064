//! Headless Assistant 运行时
//!
//! 一轮 = 消解指代 -> 决策 -> 分发 -> 写回记忆 -> 回复文本。
//! 轮次经 FIFO 异步锁串行执行；整轮受 turn_timeout 与 SessionSupervisor 的取消令牌约束，
//! 取消或超时的轮次不写入 Context Store。待确认动作只保存在内存中。

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::config::{AppConfig, DecisionSection};
use crate::core::{AgentError, RecoveryEngine, SessionSupervisor};
use crate::decision::{
    load_system_prompt, Decision, DecisionContext, DecisionEngine, PendingAction, PendingReason,
    CHAT_ACTION,
};
use crate::llm::LlmClient;
use crate::memory::{ContextStore, EvictionCaps, NewTurn, TurnId};
use crate::resolver::{ReferenceResolver, Resolution, ResolvedMessage};
use crate::tools::dispatch::params_preview;
use crate::tools::{
    ActionCatalog, ActionDispatch, ActionOutcome, AutomationProvider, HeadlessAutomation,
    LauncherAutomation, LocalFileHandler, SandboxExecutor,
};

/// 一轮的对外结果
#[derive(Debug, Clone, PartialEq)]
pub struct TurnReply {
    pub text: String,
    /// 实际执行的动作（对话 / 确认请求为 "chat"）
    pub action: String,
    pub success: bool,
    /// 取消、超时或空输入时为 None（未写入记忆）
    pub turn_id: Option<TurnId>,
    pub persisted: bool,
    /// 本轮留下了待确认动作
    pub awaiting_confirmation: bool,
    pub resolutions: Vec<Resolution>,
}

impl TurnReply {
    fn unrecorded(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            action: CHAT_ACTION.to_string(),
            success: false,
            turn_id: None,
            persisted: false,
            awaiting_confirmation: false,
            resolutions: Vec::new(),
        }
    }
}

#[derive(Default)]
struct TurnState {
    pending: Option<PendingAction>,
}

/// 决策 + 分发完成、尚未写回的一轮
struct TurnDraft {
    resolved: ResolvedMessage,
    decision: Decision,
    outcome: Option<Result<ActionOutcome, AgentError>>,
}

pub struct Assistant {
    store: Arc<ContextStore>,
    resolver: ReferenceResolver,
    engine: DecisionEngine,
    dispatch: ActionDispatch,
    supervisor: Arc<SessionSupervisor>,
    recovery: RecoveryEngine,
    turn_guard: Mutex<TurnState>,
    turn_timeout: Duration,
    recent_turns: usize,
    recent_artifacts: usize,
}

impl Assistant {
    pub fn new(
        store: Arc<ContextStore>,
        engine: DecisionEngine,
        dispatch: ActionDispatch,
        cfg: &DecisionSection,
    ) -> Self {
        Self {
            store,
            resolver: ReferenceResolver::new(),
            engine,
            dispatch,
            supervisor: Arc::new(SessionSupervisor::new()),
            recovery: RecoveryEngine::new(),
            turn_guard: Mutex::new(TurnState::default()),
            turn_timeout: Duration::from_secs(cfg.turn_timeout_secs.max(1)),
            recent_turns: cfg.recent_turns,
            recent_artifacts: cfg.recent_artifacts,
        }
    }

    pub fn with_resolver(mut self, resolver: ReferenceResolver) -> Self {
        self.resolver = resolver;
        self
    }

    pub fn with_supervisor(mut self, supervisor: Arc<SessionSupervisor>) -> Self {
        self.supervisor = supervisor;
        self
    }

    pub fn with_turn_timeout(mut self, timeout: Duration) -> Self {
        self.turn_timeout = timeout;
        self
    }

    /// 按配置装配全部组件：工作目录、文件处理器、自动化提供方、沙箱、记忆、决策引擎
    pub fn from_config(cfg: &AppConfig, llm: Arc<dyn LlmClient>) -> Result<Self, AgentError> {
        let workspace = cfg.workspace();
        std::fs::create_dir_all(&workspace).map_err(|e| {
            AgentError::ConfigError(format!(
                "cannot create workspace {}: {e}",
                workspace.display()
            ))
        })?;

        let catalog = Arc::new(ActionCatalog::v1());
        let files = Arc::new(LocalFileHandler::new(&workspace));
        let automation: Arc<dyn AutomationProvider> = if cfg.automation.enabled {
            Arc::new(LauncherAutomation)
        } else {
            Arc::new(HeadlessAutomation)
        };
        let sandbox = Arc::new(SandboxExecutor::new((&cfg.sandbox).into()));
        let store = Arc::new(ContextStore::open(
            cfg.snapshot_path(),
            EvictionCaps {
                max_turns: cfg.memory.max_turns,
                max_artifacts: cfg.memory.max_artifacts,
            },
        ));

        let engine = DecisionEngine::new(llm, catalog.clone(), &cfg.decision)
            .with_system_prompt(load_system_prompt(None));
        let dispatch = ActionDispatch::new(catalog, files, automation, sandbox)
            .with_extra_destructive(cfg.decision.extra_destructive_actions.clone());

        tracing::info!(workspace = %workspace.display(), "assistant ready");
        Ok(Self::new(store, engine, dispatch, &cfg.decision))
    }

    pub fn store(&self) -> &Arc<ContextStore> {
        &self.store
    }

    pub fn supervisor(&self) -> Arc<SessionSupervisor> {
        self.supervisor.clone()
    }

    /// 中止进行中的一轮；返回是否确有进行中的轮次
    pub fn cancel_current(&self) -> bool {
        self.supervisor.cancel_current()
    }

    pub fn token_usage(&self) -> (u64, u64, u64) {
        self.engine.token_usage()
    }

    /// 处理一条用户消息。永不失败：所有错误都转成回复文本
    pub async fn process_message(&self, input: &str) -> TurnReply {
        let input = input.trim();
        if input.is_empty() {
            return TurnReply::unrecorded("Say something and I'll help.");
        }

        let mut state = self.turn_guard.lock().await;
        let token = self.supervisor.begin_turn();
        let pending = state.pending.clone();

        let result = tokio::select! {
            biased;
            _ = token.cancelled() => Err(AgentError::Cancelled),
            r = tokio::time::timeout(self.turn_timeout, self.run_turn(input, pending, token.clone())) => {
                r.map_err(|_| AgentError::TurnTimeout(self.turn_timeout.as_secs()))
            }
        };
        self.supervisor.end_turn();

        let draft = match result {
            Ok(_) if token.is_cancelled() => Err(AgentError::Cancelled),
            other => other,
        };
        match draft {
            Ok(draft) => {
                let (reply, pending) = self.finish_turn(input, draft);
                state.pending = pending;
                reply
            }
            Err(e) => {
                tracing::warn!(error = %e, "turn aborted");
                TurnReply::unrecorded(self.recovery.handle(&e).message())
            }
        }
    }

    async fn run_turn(
        &self,
        input: &str,
        pending: Option<PendingAction>,
        cancel: CancellationToken,
    ) -> TurnDraft {
        let snapshot = self.store.snapshot();
        let resolved = self.resolver.resolve(input, &snapshot);
        if !resolved.is_unchanged() {
            tracing::debug!(resolved = %resolved.text, "references resolved");
        }
        let ctx = DecisionContext {
            recent_turns: snapshot.recent_turns(self.recent_turns),
            recent_artifacts: snapshot.recent_artifacts(self.recent_artifacts),
            patterns: snapshot.patterns.clone(),
            pending,
        };
        drop(snapshot);

        // 确认 / 拒绝看用户原话
        let answered = ctx
            .pending
            .as_ref()
            .and_then(|pending| self.engine.answer_pending(input, pending));
        let decision = match answered {
            Some(decision) => decision,
            None => self.engine.decide(&resolved.text, &ctx).await,
        };
        let outcome = if decision.is_conversational() {
            None
        } else {
            Some(self.dispatch.dispatch(&decision, cancel).await)
        };
        TurnDraft {
            resolved,
            decision,
            outcome,
        }
    }

    /// 写回记忆：先执行清除历史、标记 stale，再追加 Turn 与 Artifact
    fn finish_turn(&self, input: &str, draft: TurnDraft) -> (TurnReply, Option<PendingAction>) {
        let TurnDraft {
            resolved,
            decision,
            outcome,
        } = draft;
        let mut stale: Vec<PathBuf> = resolved.stale_paths.clone();
        let mut next_pending = decision.pending.clone();
        let mut action = decision.action.clone();
        let mut artifacts = Vec::new();

        let (text, summary, success) = match outcome {
            None => {
                let reply = decision
                    .reply
                    .clone()
                    .or_else(|| Some(decision.rationale.clone()))
                    .filter(|r| !r.trim().is_empty())
                    .unwrap_or_else(|| "Okay.".to_string());
                let summary = match &decision.pending {
                    Some(p) => format!("asked to confirm {}", p.action),
                    None => reply.clone(),
                };
                (reply, summary, true)
            }
            Some(Ok(outcome)) => {
                if let Some(removed) = outcome.removed.clone() {
                    stale.push(removed);
                }
                let mut message = outcome.message;
                if let Some(scope) = outcome.clear_history {
                    let (removed, _) = self.store.clear_history(scope);
                    message = format!("Cleared {removed} earlier turn(s) from memory.");
                }
                let text = match (&outcome.error, &outcome.sandbox) {
                    (Some(e), None) => self.recovery.handle(e).message().to_string(),
                    _ => message.clone(),
                };
                artifacts.extend(outcome.artifact);
                (text, message, outcome.success)
            }
            Some(Err(AgentError::ConfirmationRequired(name))) => {
                let pending = PendingAction {
                    action: name.clone(),
                    parameters: decision.parameters.clone(),
                    confidence: decision.confidence,
                    reason: PendingReason::Destructive,
                };
                let question = Decision::confirmation_request(pending.clone(), String::new())
                    .reply
                    .unwrap_or_default();
                next_pending = Some(pending);
                action = CHAT_ACTION.to_string();
                (question, format!("asked to confirm {name}"), true)
            }
            Some(Err(e)) => {
                tracing::warn!(error = %e, action = %decision.action, "dispatch refused");
                (
                    self.recovery.handle(&e).message().to_string(),
                    e.to_string(),
                    false,
                )
            }
        };

        if !stale.is_empty() {
            self.store.mark_stale(&stale);
        }
        let turn = NewTurn::new(input, action.clone())
            .with_parameters(params_preview(&decision.parameters))
            .with_result(summary, success);
        let recorded = self.store.record_turn(turn, artifacts);

        let mut text = text;
        if !recorded.persisted {
            let note = self
                .recovery
                .handle(&AgentError::PersistenceFailure("snapshot write failed".into()));
            text = format!("{text}\n({})", note.message());
        }
        tracing::info!(
            turn_id = recorded.turn_id,
            action = %action,
            success,
            persisted = recorded.persisted,
            "turn recorded"
        );

        let reply = TurnReply {
            text,
            action,
            success,
            turn_id: Some(recorded.turn_id),
            persisted: recorded.persisted,
            awaiting_confirmation: next_pending.is_some(),
            resolutions: resolved.resolutions,
        };
        (reply, next_pending)
    }
}
