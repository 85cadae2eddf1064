//! 沙箱执行器：在独立解释器进程中运行不受信任的 Python 代码
//!
//! 顺序：静态预检（import 白名单 + 禁用内建 + 私有 / 内部属性）-> 临时目录 + 全新进程（清空环境、kill_on_drop）
//! -> 墙钟超时 / 取消时强杀 -> 收集 stdout、stderr、顶层变量。任何出口都返回完整的 SandboxResult，从不报错。

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tokio_util::sync::CancellationToken;

use crate::config::SandboxSection;
use crate::core::AgentError;
use crate::tools::code_scan::CodeScan;

const RUNNER_SOURCE: &str = include_str!("sandbox_runner.py");
const MIN_TIMEOUT_SECS: u64 = 1;
const MAX_TIMEOUT_SECS: u64 = 300;
const TRUNCATION_MARKER: &str = "\n... [output truncated]";
const BINDING_MARKER: &str = "...[truncated]";

/// 动态导入、代码构造与反射式访问
const PROHIBITED_NAMES: &[&str] = &[
    "__import__",
    "__builtins__",
    "importlib",
    "exec",
    "eval",
    "compile",
    "getattr",
    "setattr",
    "delattr",
    "globals",
    "locals",
    "vars",
    "breakpoint",
];
/// 允许的模块借道暴露的解释器内部（如 `typing.sys`）与帧对象
const PROHIBITED_ATTRIBUTES: &[&str] = &[
    "sys",
    "modules",
    "builtins",
    "os",
    "subprocess",
    "importlib",
    "inspect",
    "f_globals",
    "f_locals",
    "f_builtins",
    "f_back",
    "gi_frame",
    "cr_frame",
    "ag_frame",
    "tb_frame",
];

/// 终态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SandboxStatus {
    Completed,
    TimedOut,
    Violation,
    RaisedError,
}

impl SandboxStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Completed => "completed",
            Self::TimedOut => "timed-out",
            Self::Violation => "violation",
            Self::RaisedError => "raised-error",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SandboxResult {
    pub stdout: String,
    pub stderr: String,
    /// 顶层变量名 -> repr（截断）
    pub bindings: BTreeMap<String, String>,
    pub elapsed: Duration,
    pub status: SandboxStatus,
    /// 非 completed 时的具体原因
    pub error: Option<AgentError>,
}

impl SandboxResult {
    fn rejected(err: AgentError) -> Self {
        Self {
            stdout: String::new(),
            stderr: String::new(),
            bindings: BTreeMap::new(),
            elapsed: Duration::ZERO,
            status: SandboxStatus::Violation,
            error: Some(err),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == SandboxStatus::Completed
    }

    /// 给用户 / Turn 的一段摘要
    pub fn summary(&self) -> String {
        let mut parts = vec![format!(
            "status: {} ({:.2}s)",
            self.status.as_str(),
            self.elapsed.as_secs_f64()
        )];
        if let Some(err) = &self.error {
            parts.push(err.to_string());
        }
        if !self.stdout.trim().is_empty() {
            parts.push(format!("output:\n{}", self.stdout.trim_end()));
        }
        if !self.is_success() && !self.stderr.trim().is_empty() {
            parts.push(format!("errors:\n{}", tail_lines(&self.stderr, 12)));
        }
        if !self.bindings.is_empty() {
            let vars = self
                .bindings
                .iter()
                .map(|(k, v)| format!("{k} = {v}"))
                .collect::<Vec<_>>()
                .join("\n");
            parts.push(format!("variables:\n{vars}"));
        }
        parts.join("\n")
    }
}

#[derive(Debug, Clone)]
pub struct SandboxConfig {
    pub interpreter: String,
    pub default_timeout: Duration,
    pub allowed_modules: Vec<String>,
    pub max_binding_chars: usize,
    pub max_output_bytes: usize,
}

impl From<&SandboxSection> for SandboxConfig {
    fn from(section: &SandboxSection) -> Self {
        Self {
            interpreter: section.interpreter.clone(),
            default_timeout: Duration::from_secs(section.timeout_secs),
            allowed_modules: section.allowed_modules.clone(),
            max_binding_chars: section.max_binding_chars,
            max_output_bytes: section.max_output_bytes,
        }
    }
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self::from(&SandboxSection::default())
    }
}

/// runner 写入的 result.json
#[derive(Debug, Deserialize)]
struct RunnerReport {
    status: String,
    error: Option<String>,
    #[serde(default)]
    bindings: BTreeMap<String, String>,
}

pub struct SandboxExecutor {
    config: SandboxConfig,
    interpreter: PathBuf,
}

impl SandboxExecutor {
    pub fn new(config: SandboxConfig) -> Self {
        let interpreter = resolve_interpreter(&config.interpreter);
        Self {
            config,
            interpreter,
        }
    }

    pub fn config(&self) -> &SandboxConfig {
        &self.config
    }

    /// 不执行，只做静态检查：白名单外的 import、动态导入与反射内建、`_` 开头或通向解释器内部的属性
    pub fn precheck(&self, code: &str) -> Result<(), AgentError> {
        let scan = CodeScan::of(code);
        if let Some(module) = scan.imports.iter().find(|m| !self.module_allowed(m)) {
            return Err(AgentError::ProhibitedImport(module.clone()));
        }
        if let Some(name) = scan.names.iter().find(|n| prohibited_name(n)) {
            return Err(AgentError::ProhibitedBuiltin(name.clone()));
        }
        if let Some(attr) = scan.attributes.iter().find(|a| prohibited_attribute(a)) {
            return Err(AgentError::ProhibitedAttribute(attr.clone()));
        }
        Ok(())
    }

    fn module_allowed(&self, module: &str) -> bool {
        if module.starts_with('.') {
            return false;
        }
        self.config
            .allowed_modules
            .iter()
            .any(|m| module == m || module.starts_with(&format!("{m}.")))
    }

    /// 超时夹在 1..=300 秒；None 时用配置默认值
    pub fn effective_timeout(&self, requested: Option<Duration>) -> Duration {
        let secs = requested
            .unwrap_or(self.config.default_timeout)
            .as_secs()
            .clamp(MIN_TIMEOUT_SECS, MAX_TIMEOUT_SECS);
        Duration::from_secs(secs)
    }

    pub async fn run(&self, code: &str, timeout: Option<Duration>) -> SandboxResult {
        self.run_with_cancel(code, timeout, CancellationToken::new())
            .await
    }

    /// 所属轮次被取消时立即杀掉进程
    pub async fn run_with_cancel(
        &self,
        code: &str,
        timeout: Option<Duration>,
        cancel: CancellationToken,
    ) -> SandboxResult {
        if let Err(e) = self.precheck(code) {
            tracing::info!(error = %e, "sandbox rejected code before execution");
            return SandboxResult::rejected(e);
        }
        let timeout = self.effective_timeout(timeout);
        let started = Instant::now();
        tracing::info!(timeout_secs = timeout.as_secs(), "sandbox_started");

        let result = match tempfile::Builder::new().prefix("deskpilot-sandbox-").tempdir() {
            Ok(dir) => self.execute(dir.path(), code, timeout, &cancel, started).await,
            Err(e) => failed(
                started,
                format!("failed to create sandbox directory: {e}"),
            ),
        };

        tracing::info!(
            status = result.status.as_str(),
            elapsed_ms = result.elapsed.as_millis() as u64,
            stdout_bytes = result.stdout.len(),
            stderr_bytes = result.stderr.len(),
            "sandbox_finished"
        );
        result
    }

    async fn execute(
        &self,
        dir: &Path,
        code: &str,
        timeout: Duration,
        cancel: &CancellationToken,
        started: Instant,
    ) -> SandboxResult {
        if let Err(e) = std::fs::write(dir.join("main.py"), code)
            .and_then(|_| std::fs::write(dir.join("runner.py"), RUNNER_SOURCE))
        {
            return failed(started, format!("failed to stage code: {e}"));
        }

        let mut child = match Command::new(&self.interpreter)
            .args(["-I", "-u", "-B", "runner.py"])
            .current_dir(dir)
            .env_clear()
            .env("LANG", "C.UTF-8")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
        {
            Ok(child) => child,
            Err(e) => {
                return failed(
                    started,
                    format!(
                        "failed to start interpreter '{}': {e}",
                        self.interpreter.display()
                    ),
                )
            }
        };

        let limit = self.config.max_output_bytes;
        let stdout_task = child
            .stdout
            .take()
            .map(|out| tokio::spawn(read_bounded(out, limit)));
        let stderr_task = child
            .stderr
            .take()
            .map(|err| tokio::spawn(read_bounded(err, limit)));

        enum Exit {
            Finished(std::io::Result<std::process::ExitStatus>),
            TimedOut,
            Cancelled,
        }

        let exit = tokio::select! {
            status = child.wait() => Exit::Finished(status),
            _ = tokio::time::sleep(timeout) => Exit::TimedOut,
            _ = cancel.cancelled() => Exit::Cancelled,
        };
        if !matches!(exit, Exit::Finished(_)) {
            let _ = child.kill().await;
            let _ = child.wait().await;
        }
        let elapsed = started.elapsed();

        let stdout = collect_output(stdout_task).await;
        let mut stderr = collect_output(stderr_task).await;

        let (status, error, bindings) = match exit {
            Exit::TimedOut => (
                SandboxStatus::TimedOut,
                Some(AgentError::SandboxTimeout(timeout.as_secs())),
                BTreeMap::new(),
            ),
            Exit::Cancelled => (
                SandboxStatus::RaisedError,
                Some(AgentError::Cancelled),
                BTreeMap::new(),
            ),
            Exit::Finished(Err(e)) => (
                SandboxStatus::RaisedError,
                Some(AgentError::SandboxRuntimeError(format!(
                    "failed waiting for interpreter: {e}"
                ))),
                BTreeMap::new(),
            ),
            Exit::Finished(Ok(exit_status)) => match read_report(dir) {
                Some(report) => self.interpret(report),
                None => {
                    let message = format!("interpreter exited with {exit_status} without a result");
                    if stderr.is_empty() {
                        stderr = message.clone();
                    }
                    (
                        SandboxStatus::RaisedError,
                        Some(AgentError::SandboxRuntimeError(message)),
                        BTreeMap::new(),
                    )
                }
            },
        };

        SandboxResult {
            stdout,
            stderr,
            bindings,
            elapsed,
            status,
            error,
        }
    }

    fn interpret(
        &self,
        report: RunnerReport,
    ) -> (SandboxStatus, Option<AgentError>, BTreeMap<String, String>) {
        let bindings = report
            .bindings
            .into_iter()
            .map(|(name, value)| (name, truncate_chars(&value, self.config.max_binding_chars)))
            .collect();
        let message = report.error.unwrap_or_default();
        match report.status.as_str() {
            "completed" => (SandboxStatus::Completed, None, bindings),
            "violation" => (
                SandboxStatus::Violation,
                Some(AgentError::SandboxRuntimeError(message)),
                bindings,
            ),
            _ => (
                SandboxStatus::RaisedError,
                Some(AgentError::SandboxRuntimeError(message)),
                bindings,
            ),
        }
    }
}

fn failed(started: Instant, message: String) -> SandboxResult {
    tracing::warn!(error = %message, "sandbox could not run code");
    SandboxResult {
        stdout: String::new(),
        stderr: message.clone(),
        bindings: BTreeMap::new(),
        elapsed: started.elapsed(),
        status: SandboxStatus::RaisedError,
        error: Some(AgentError::SandboxRuntimeError(message)),
    }
}

fn read_report(dir: &Path) -> Option<RunnerReport> {
    let data = std::fs::read_to_string(dir.join("result.json")).ok()?;
    serde_json::from_str(&data).ok()
}

/// 最多保留 limit 字节，其余读掉丢弃（避免子进程因管道写满而阻塞）
async fn read_bounded<R: AsyncRead + Unpin>(mut reader: R, limit: usize) -> (Vec<u8>, bool) {
    let mut kept = Vec::new();
    let mut truncated = false;
    let mut chunk = [0u8; 8192];
    loop {
        match reader.read(&mut chunk).await {
            Ok(0) | Err(_) => break,
            Ok(n) => {
                let room = limit.saturating_sub(kept.len());
                if n > room {
                    truncated = true;
                }
                kept.extend_from_slice(&chunk[..n.min(room)]);
            }
        }
    }
    (kept, truncated)
}

async fn collect_output(task: Option<tokio::task::JoinHandle<(Vec<u8>, bool)>>) -> String {
    let Some(mut task) = task else {
        return String::new();
    };
    // 进程已退出；管道若被遗留的后代进程占住，不无限等待
    let joined = tokio::time::timeout(Duration::from_secs(1), &mut task).await;
    match joined {
        Ok(Ok((bytes, truncated))) => {
            let mut text = String::from_utf8_lossy(&bytes).to_string();
            if truncated {
                text.push_str(TRUNCATION_MARKER);
            }
            text
        }
        Ok(Err(_)) => String::new(),
        Err(_) => {
            task.abort();
            String::new()
        }
    }
}

fn tail_lines(text: &str, n: usize) -> String {
    let lines: Vec<&str> = text.trim_end().lines().collect();
    lines[lines.len().saturating_sub(n)..].join("\n")
}

fn truncate_chars(value: &str, max: usize) -> String {
    if value.chars().count() <= max {
        value.to_string()
    } else {
        let mut out: String = value.chars().take(max).collect();
        out.push_str(BINDING_MARKER);
        out
    }
}

/// 清空环境后子进程无 PATH，先在当前 PATH 中解析出绝对路径
fn resolve_interpreter(name: &str) -> PathBuf {
    let candidate = Path::new(name);
    if candidate.components().count() > 1 {
        return candidate.to_path_buf();
    }
    std::env::var_os("PATH")
        .and_then(|paths| {
            std::env::split_paths(&paths)
                .map(|dir| dir.join(name))
                .find(|p| p.is_file())
        })
        .unwrap_or_else(|| candidate.to_path_buf())
}

/// 普通代码常用、本身不通向解释器内部的双下划线名字
const PLAIN_DUNDERS: &[&str] = &["__name__", "__init__", "__doc__"];

fn is_dunder(name: &str) -> bool {
    name.len() > 4 && name.starts_with("__") && name.ends_with("__")
}

fn prohibited_name(name: &str) -> bool {
    PROHIBITED_NAMES.contains(&name) || (is_dunder(name) && !PLAIN_DUNDERS.contains(&name))
}

fn prohibited_attribute(attr: &str) -> bool {
    (attr.starts_with('_') && !PLAIN_DUNDERS.contains(&attr))
        || PROHIBITED_ATTRIBUTES.contains(&attr)
}
