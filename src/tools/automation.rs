//! 桌面自动化提供方（不透明协作方）
//!
//! 具体的窗口 / 键鼠操作不在本 crate 内实现；Dispatch 只依赖 AutomationProvider 的 成功/失败 + 消息 约定。

use std::path::Path;

use async_trait::async_trait;

/// 协作方的统一报告
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AutomationReport {
    pub success: bool,
    pub message: String,
}

impl AutomationReport {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowOp {
    Minimize,
    Maximize,
    Restore,
    Focus,
    Close,
}

impl WindowOp {
    pub fn parse(op: &str) -> Option<Self> {
        match op.trim().to_ascii_lowercase().as_str() {
            "minimize" => Some(Self::Minimize),
            "maximize" => Some(Self::Maximize),
            "restore" => Some(Self::Restore),
            "focus" => Some(Self::Focus),
            "close" => Some(Self::Close),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Minimize => "minimize",
            Self::Maximize => "maximize",
            Self::Restore => "restore",
            Self::Focus => "focus",
            Self::Close => "close",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputOp {
    TypeText,
    PressKeys,
}

#[async_trait]
pub trait AutomationProvider: Send + Sync {
    async fn launch(&self, app_name: &str) -> AutomationReport;

    async fn window_op(&self, op: WindowOp, target: Option<&str>) -> AutomationReport;

    async fn input_op(&self, op: InputOp, payload: &str) -> AutomationReport;

    async fn screenshot(&self, target_path: &Path) -> AutomationReport;
}

/// 无桌面环境：所有操作报告不可用
#[derive(Debug, Default, Clone)]
pub struct HeadlessAutomation;

const UNAVAILABLE: &str = "desktop automation is not available in this environment";

#[async_trait]
impl AutomationProvider for HeadlessAutomation {
    async fn launch(&self, app_name: &str) -> AutomationReport {
        AutomationReport::failed(format!("cannot launch {app_name}: {UNAVAILABLE}"))
    }

    async fn window_op(&self, op: WindowOp, _target: Option<&str>) -> AutomationReport {
        AutomationReport::failed(format!("cannot {}: {UNAVAILABLE}", op.as_str()))
    }

    async fn input_op(&self, _op: InputOp, _payload: &str) -> AutomationReport {
        AutomationReport::failed(format!("cannot send input: {UNAVAILABLE}"))
    }

    async fn screenshot(&self, _target_path: &Path) -> AutomationReport {
        AutomationReport::failed(format!("cannot take a screenshot: {UNAVAILABLE}"))
    }
}

/// 只会启动程序的最小实现（automation.enabled = true 时使用）；其余操作仍不可用
#[derive(Debug, Default, Clone)]
pub struct LauncherAutomation;

#[async_trait]
impl AutomationProvider for LauncherAutomation {
    async fn launch(&self, app_name: &str) -> AutomationReport {
        let name = app_name.trim();
        if name.is_empty() {
            return AutomationReport::failed("no application name given");
        }
        let spawned = tokio::process::Command::new(name)
            .stdin(std::process::Stdio::null())
            .stdout(std::process::Stdio::null())
            .stderr(std::process::Stdio::null())
            .spawn();
        match spawned {
            Ok(child) => {
                tracing::info!(app = %name, pid = ?child.id(), "application launched");
                AutomationReport::ok(format!("Launched {name}"))
            }
            Err(e) => AutomationReport::failed(format!("failed to launch {name}: {e}")),
        }
    }

    async fn window_op(&self, op: WindowOp, target: Option<&str>) -> AutomationReport {
        HeadlessAutomation.window_op(op, target).await
    }

    async fn input_op(&self, op: InputOp, payload: &str) -> AutomationReport {
        HeadlessAutomation.input_op(op, payload).await
    }

    async fn screenshot(&self, target_path: &Path) -> AutomationReport {
        HeadlessAutomation.screenshot(target_path).await
    }
}
