//! 动作分发
//!
//! 按已校验的请求把 Decision 路由到 文件处理器 / 自动化提供方 / 沙箱（清除历史交回调用方），调用前用参数结构体校验，
//! 把各协作方的异构结果统一为 ActionOutcome；每次分发输出结构化审计日志（JSON）。

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;

use crate::core::AgentError;
use crate::decision::Decision;
use crate::memory::{HistoryScope, NewArtifact};
use crate::tools::{
    ActionCatalog, ActionRequest, AutomationProvider, AutomationReport, FileHandler, InputOp,
    SandboxExecutor, SandboxResult, WindowOp, WindowOpName,
};

/// 统一的执行结果
#[derive(Debug, Clone, PartialEq)]
pub struct ActionOutcome {
    pub success: bool,
    pub message: String,
    /// 产出的文件草稿，由 record_turn 落地
    pub artifact: Option<NewArtifact>,
    /// 被删除的路径（对应 Artifact 应标记为 stale）
    pub removed: Option<PathBuf>,
    pub sandbox: Option<SandboxResult>,
    /// 要从记忆中删除的对话历史，由调用方在写回前执行
    pub clear_history: Option<HistoryScope>,
    /// success = false 时的原因
    pub error: Option<AgentError>,
}

impl ActionOutcome {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
            artifact: None,
            removed: None,
            sandbox: None,
            clear_history: None,
            error: None,
        }
    }

    pub fn failed(error: AgentError) -> Self {
        Self {
            success: false,
            message: error.to_string(),
            artifact: None,
            removed: None,
            sandbox: None,
            clear_history: None,
            error: Some(error),
        }
    }

    fn with_artifact(mut self, artifact: NewArtifact) -> Self {
        self.artifact = Some(artifact);
        self
    }

    fn from_report(collaborator: &str, report: AutomationReport) -> Self {
        if report.success {
            Self::ok(report.message)
        } else {
            Self::failed(AgentError::collaborator(collaborator, report.message))
        }
    }
}

const AUTOMATION: &str = "automation provider";

pub struct ActionDispatch {
    catalog: Arc<ActionCatalog>,
    files: Arc<dyn FileHandler>,
    automation: Arc<dyn AutomationProvider>,
    sandbox: Arc<SandboxExecutor>,
    extra_destructive: Vec<String>,
}

impl ActionDispatch {
    pub fn new(
        catalog: Arc<ActionCatalog>,
        files: Arc<dyn FileHandler>,
        automation: Arc<dyn AutomationProvider>,
        sandbox: Arc<SandboxExecutor>,
    ) -> Self {
        Self {
            catalog,
            files,
            automation,
            sandbox,
            extra_destructive: Vec::new(),
        }
    }

    /// 目录标记之外额外需要确认的动作
    pub fn with_extra_destructive(mut self, actions: Vec<String>) -> Self {
        self.extra_destructive = actions;
        self
    }

    pub fn catalog(&self) -> &ActionCatalog {
        &self.catalog
    }

    pub fn is_destructive(&self, action: &str) -> bool {
        self.catalog.get(action).map(|s| s.destructive).unwrap_or(false)
            || self.extra_destructive.iter().any(|a| a == action)
    }

    /// 校验失败（InvalidParameters）与未确认的破坏性动作（ConfirmationRequired）以 Err 返回，
    /// 协作方失败以 success = false 的 ActionOutcome 返回
    pub async fn dispatch(
        &self,
        decision: &Decision,
        cancel: CancellationToken,
    ) -> Result<ActionOutcome, AgentError> {
        let action = decision.action.as_str();
        if !self.catalog.contains(action) {
            return Err(AgentError::invalid_parameters(action, "unknown action"));
        }
        let request = ActionRequest::parse(action, &decision.parameters)?;
        if self.is_destructive(action) && !decision.confirmed {
            return Err(AgentError::ConfirmationRequired(action.to_string()));
        }

        let start = Instant::now();
        let outcome = self.execute(request, decision, cancel).await;

        let audit = serde_json::json!({
            "event": "action_audit",
            "action": action,
            "ok": outcome.success,
            "outcome": if outcome.success { "ok" } else { "failed" },
            "duration_ms": start.elapsed().as_millis() as u64,
            "params_preview": params_preview(&decision.parameters),
        });
        tracing::info!(audit = %audit.to_string(), "action");
        Ok(outcome)
    }

    async fn execute(
        &self,
        request: ActionRequest,
        decision: &Decision,
        cancel: CancellationToken,
    ) -> ActionOutcome {
        match request {
            ActionRequest::Chat(_) => ActionOutcome::ok(
                decision
                    .reply
                    .clone()
                    .filter(|r| !r.trim().is_empty())
                    .unwrap_or_else(|| decision.rationale.clone()),
            ),
            ActionRequest::Help(_) => ActionOutcome::ok(self.catalog.help_text()),
            ActionRequest::CreateFile(p) => {
                match self
                    .files
                    .create(&p.path, p.content.as_deref().unwrap_or_default())
                    .await
                {
                    Ok(created) => {
                        let purpose = if decision.rationale.trim().is_empty() {
                            "created on request".to_string()
                        } else {
                            decision.rationale.clone()
                        };
                        ActionOutcome::ok(format!(
                            "Created {} ({} bytes)",
                            created.path.display(),
                            created.bytes
                        ))
                        .with_artifact(NewArtifact::new(created.path, purpose))
                    }
                    Err(e) => ActionOutcome::failed(e),
                }
            }
            ActionRequest::OpenFile(p) => match self.files.open_path(&p.path).await {
                Ok(path) => ActionOutcome::ok(format!("Opened {}", path.display())),
                Err(e) => ActionOutcome::failed(e),
            },
            ActionRequest::DeleteFile(p) => match self.files.delete(&p.path).await {
                Ok(path) => {
                    let mut outcome = ActionOutcome::ok(format!("Deleted {}", path.display()));
                    outcome.removed = Some(path);
                    outcome
                }
                Err(e) => ActionOutcome::failed(e),
            },
            ActionRequest::LaunchApp(p) => {
                ActionOutcome::from_report(AUTOMATION, self.automation.launch(&p.app_name).await)
            }
            ActionRequest::CloseApp(p) => ActionOutcome::from_report(
                AUTOMATION,
                self.automation
                    .window_op(WindowOp::Close, Some(&p.app_name))
                    .await,
            ),
            ActionRequest::WindowOp(p) => {
                let op = match p.op {
                    WindowOpName::Minimize => WindowOp::Minimize,
                    WindowOpName::Maximize => WindowOp::Maximize,
                    WindowOpName::Restore => WindowOp::Restore,
                    WindowOpName::Focus => WindowOp::Focus,
                };
                ActionOutcome::from_report(
                    AUTOMATION,
                    self.automation.window_op(op, p.target.as_deref()).await,
                )
            }
            ActionRequest::TypeText(p) => ActionOutcome::from_report(
                AUTOMATION,
                self.automation.input_op(InputOp::TypeText, &p.text).await,
            ),
            ActionRequest::PressKeys(p) => ActionOutcome::from_report(
                AUTOMATION,
                self.automation.input_op(InputOp::PressKeys, &p.keys).await,
            ),
            ActionRequest::TakeScreenshot(p) => {
                let requested = p.path.unwrap_or_else(|| {
                    format!("screenshot-{}.png", chrono::Local::now().format("%Y%m%d-%H%M%S"))
                });
                let target = match self.files.resolve(&requested) {
                    Ok(target) => target,
                    Err(e) => return ActionOutcome::failed(e),
                };
                let report = self.automation.screenshot(&target).await;
                let success = report.success;
                let outcome = ActionOutcome::from_report(AUTOMATION, report);
                if success {
                    outcome.with_artifact(NewArtifact::new(target, "screenshot"))
                } else {
                    outcome
                }
            }
            ActionRequest::ClearHistory(p) => {
                let scope = match p.older_than_days {
                    Some(days) => HistoryScope::OlderThanDays(days),
                    None => HistoryScope::All,
                };
                let mut outcome = ActionOutcome::ok("Conversation history cleared.");
                outcome.clear_history = Some(scope);
                outcome
            }
            ActionRequest::RunCode(p) => {
                let result = self
                    .sandbox
                    .run_with_cancel(&p.code, p.timeout_secs.map(Duration::from_secs), cancel)
                    .await;
                ActionOutcome {
                    success: result.is_success(),
                    message: result.summary(),
                    artifact: None,
                    removed: None,
                    clear_history: None,
                    error: result.error.clone(),
                    sandbox: Some(result),
                }
            }
        }
    }
}

/// 参数 JSON 预览，超过 200 字符截断
pub(crate) fn params_preview(parameters: &serde_json::Map<String, serde_json::Value>) -> String {
    let s = serde_json::Value::Object(parameters.clone()).to_string();
    if s.chars().count() > 200 {
        format!("{}...", s.chars().take(200).collect::<String>())
    } else {
        s
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::{CreatedFile, HeadlessAutomation, SandboxConfig};
    use async_trait::async_trait;
    use serde_json::{json, Map, Value};
    use std::path::Path;
    use std::sync::Mutex;

    /// 记录调用、不碰磁盘的文件处理器
    #[derive(Default)]
    struct RecordingFiles {
        calls: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl FileHandler for RecordingFiles {
        fn resolve(&self, path: &str) -> Result<PathBuf, AgentError> {
            Ok(Path::new("/ws").join(path))
        }

        async fn create(&self, path: &str, content: &str) -> Result<CreatedFile, AgentError> {
            self.calls.lock().unwrap().push(format!("create {path}"));
            Ok(CreatedFile {
                path: self.resolve(path)?,
                bytes: content.len(),
            })
        }

        async fn open_path(&self, path: &str) -> Result<PathBuf, AgentError> {
            self.calls.lock().unwrap().push(format!("open {path}"));
            Err(AgentError::collaborator("file handler", "no display"))
        }

        async fn delete(&self, path: &str) -> Result<PathBuf, AgentError> {
            self.calls.lock().unwrap().push(format!("delete {path}"));
            self.resolve(path)
        }
    }

    fn dispatch_with(files: Arc<RecordingFiles>) -> ActionDispatch {
        ActionDispatch::new(
            Arc::new(ActionCatalog::v1()),
            files,
            Arc::new(HeadlessAutomation),
            Arc::new(SandboxExecutor::new(SandboxConfig::default())),
        )
    }

    fn decision(action: &str, params: Value) -> Decision {
        Decision {
            action: action.to_string(),
            parameters: params.as_object().cloned().unwrap_or_else(Map::new),
            confidence: 0.9,
            rationale: "shopping list".to_string(),
            reply: None,
            confirmed: false,
            pending: None,
        }
    }

    #[tokio::test]
    async fn test_create_file_produces_artifact_draft() {
        let files = Arc::new(RecordingFiles::default());
        let dispatch = dispatch_with(files.clone());
        let outcome = dispatch
            .dispatch(
                &decision("create_file", json!({"path": "todo.txt", "content": "buy milk"})),
                CancellationToken::new(),
            )
            .await
            .unwrap();
        assert!(outcome.success);
        let artifact = outcome.artifact.unwrap();
        assert_eq!(artifact.path, PathBuf::from("/ws/todo.txt"));
        assert_eq!(artifact.purpose, "shopping list");
        assert_eq!(files.calls.lock().unwrap().as_slice(), ["create todo.txt"]);
    }

    #[tokio::test]
    async fn test_invalid_parameters_never_reach_collaborator() {
        let files = Arc::new(RecordingFiles::default());
        let dispatch = dispatch_with(files.clone());
        let err = dispatch
            .dispatch(&decision("open_file", json!({})), CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, AgentError::InvalidParameters { .. }));
        assert!(files.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unconfirmed_destructive_action_is_refused() {
        let files = Arc::new(RecordingFiles::default());
        let dispatch = dispatch_with(files.clone());
        let mut delete = decision("delete_file", json!({"path": "todo.txt"}));
        let err = dispatch
            .dispatch(&delete, CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err, AgentError::ConfirmationRequired("delete_file".into()));
        assert!(files.calls.lock().unwrap().is_empty());

        delete.confirmed = true;
        let outcome = dispatch
            .dispatch(&delete, CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(outcome.removed, Some(PathBuf::from("/ws/todo.txt")));
    }

    #[tokio::test]
    async fn test_extra_destructive_actions_are_gated() {
        let dispatch = dispatch_with(Arc::new(RecordingFiles::default()))
            .with_extra_destructive(vec!["type_text".into()]);
        let err = dispatch
            .dispatch(&decision("type_text", json!({"text": "hi"})), CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, AgentError::ConfirmationRequired(_)));
    }

    #[tokio::test]
    async fn test_collaborator_failure_is_unsuccessful_outcome() {
        let dispatch = dispatch_with(Arc::new(RecordingFiles::default()));
        let outcome = dispatch
            .dispatch(&decision("open_file", json!({"path": "a.txt"})), CancellationToken::new())
            .await
            .unwrap();
        assert!(!outcome.success);
        assert!(matches!(outcome.error, Some(AgentError::CollaboratorFailure { .. })));

        let launch = dispatch
            .dispatch(&decision("launch_app", json!({"app_name": "calc"})), CancellationToken::new())
            .await
            .unwrap();
        assert!(!launch.success);
    }

    #[tokio::test]
    async fn test_clear_history_needs_confirmation_and_hands_back_scope() {
        let dispatch = dispatch_with(Arc::new(RecordingFiles::default()));
        let mut clear = decision("clear_history", json!({"older_than_days": 7}));
        assert!(matches!(
            dispatch.dispatch(&clear, CancellationToken::new()).await,
            Err(AgentError::ConfirmationRequired(_))
        ));
        clear.confirmed = true;
        let outcome = dispatch
            .dispatch(&clear, CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(outcome.clear_history, Some(HistoryScope::OlderThanDays(7)));
    }

    #[tokio::test]
    async fn test_help_lists_catalog() {
        let dispatch = dispatch_with(Arc::new(RecordingFiles::default()));
        let outcome = dispatch
            .dispatch(&decision("help", json!({})), CancellationToken::new())
            .await
            .unwrap();
        assert!(outcome.message.contains("create_file"));
    }

    #[tokio::test]
    async fn test_run_code_rejected_import_reports_sandbox_result() {
        let dispatch = dispatch_with(Arc::new(RecordingFiles::default()));
        let outcome = dispatch
            .dispatch(
                &decision("run_code", json!({"code": "import subprocess"})),
                CancellationToken::new(),
            )
            .await
            .unwrap();
        assert!(!outcome.success);
        assert_eq!(
            outcome.error,
            Some(AgentError::ProhibitedImport("subprocess".into()))
        );
        assert!(outcome.sandbox.is_some());
    }
}
