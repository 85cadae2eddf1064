//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `DESKPILOT__*` 覆盖（双下划线表示嵌套，如 `DESKPILOT__DECISION__EXECUTION_THRESHOLD=0.7`）。

use std::path::PathBuf;

use serde::Deserialize;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    #[serde(default)]
    pub app: AppSection,
    #[serde(default)]
    pub llm: LlmSection,
    #[serde(default)]
    pub memory: MemorySection,
    #[serde(default)]
    pub decision: DecisionSection,
    #[serde(default)]
    pub sandbox: SandboxSection,
    #[serde(default)]
    pub automation: AutomationSection,
}

/// [app] 段：应用名、工作目录、日志级别
#[derive(Debug, Clone, Deserialize)]
pub struct AppSection {
    pub name: Option<String>,
    /// 文件操作根目录，未设置时用 ./workspace
    pub workspace_root: Option<PathBuf>,
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for AppSection {
    fn default() -> Self {
        Self {
            name: None,
            workspace_root: None,
            log_level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// [llm] 段：推理服务后端选择与超时
#[derive(Debug, Clone, Deserialize)]
pub struct LlmSection {
    /// 后端：deepseek / openai / mock
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default = "default_model")]
    pub model: String,
    pub base_url: Option<String>,
    #[serde(default)]
    pub timeouts: LlmTimeoutsSection,
}

impl Default for LlmSection {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: default_model(),
            base_url: None,
            timeouts: LlmTimeoutsSection::default(),
        }
    }
}

fn default_provider() -> String {
    "deepseek".to_string()
}

fn default_model() -> String {
    "deepseek-chat".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct LlmTimeoutsSection {
    /// 单次推理请求超时（秒）
    #[serde(default = "default_request_timeout")]
    pub request: u64,
}

impl Default for LlmTimeoutsSection {
    fn default() -> Self {
        Self {
            request: default_request_timeout(),
        }
    }
}

fn default_request_timeout() -> u64 {
    60
}

/// [memory] 段：快照文件位置与淘汰上限
#[derive(Debug, Clone, Deserialize)]
pub struct MemorySection {
    /// 快照文件路径，未设置时为 <workspace>/.deskpilot/memory.json
    pub snapshot_path: Option<PathBuf>,
    /// Turn 上限，超出时淘汰最旧的
    #[serde(default = "default_max_turns")]
    pub max_turns: usize,
    /// Artifact 上限（独立于 Turn，通常更大）
    #[serde(default = "default_max_artifacts")]
    pub max_artifacts: usize,
}

impl Default for MemorySection {
    fn default() -> Self {
        Self {
            snapshot_path: None,
            max_turns: default_max_turns(),
            max_artifacts: default_max_artifacts(),
        }
    }
}

fn default_max_turns() -> usize {
    100
}

fn default_max_artifacts() -> usize {
    500
}

/// [decision] 段：执行阈值、破坏性动作、上下文窗口、单轮超时
#[derive(Debug, Clone, Deserialize)]
pub struct DecisionSection {
    /// 置信度低于此值时不自动执行，改为请求确认
    #[serde(default = "default_execution_threshold")]
    pub execution_threshold: f64,
    /// 在 catalog 自带 destructive 标记之外，额外需要确认的动作名
    #[serde(default)]
    pub extra_destructive_actions: Vec<String>,
    /// 拼入 prompt 的最近 Turn 数
    #[serde(default = "default_recent_turns")]
    pub recent_turns: usize,
    /// 拼入 prompt 的最近 Artifact 数
    #[serde(default = "default_recent_artifacts")]
    pub recent_artifacts: usize,
    /// 单轮（推理 + 执行）总超时（秒），与沙箱超时相互独立
    #[serde(default = "default_turn_timeout_secs")]
    pub turn_timeout_secs: u64,
}

impl Default for DecisionSection {
    fn default() -> Self {
        Self {
            execution_threshold: default_execution_threshold(),
            extra_destructive_actions: Vec::new(),
            recent_turns: default_recent_turns(),
            recent_artifacts: default_recent_artifacts(),
            turn_timeout_secs: default_turn_timeout_secs(),
        }
    }
}

fn default_execution_threshold() -> f64 {
    0.5
}

fn default_recent_turns() -> usize {
    10
}

fn default_recent_artifacts() -> usize {
    5
}

fn default_turn_timeout_secs() -> u64 {
    120
}

/// [sandbox] 段：解释器、超时、模块白名单、输出上限
#[derive(Debug, Clone, Deserialize)]
pub struct SandboxSection {
    #[serde(default = "default_interpreter")]
    pub interpreter: String,
    /// 默认超时（秒），运行时夹在 1..=300
    #[serde(default = "default_sandbox_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_allowed_modules")]
    pub allowed_modules: Vec<String>,
    /// 单个变量字符串化后的最大字符数
    #[serde(default = "default_max_binding_chars")]
    pub max_binding_chars: usize,
    /// stdout / stderr 各自最多保留的字节数
    #[serde(default = "default_max_output_bytes")]
    pub max_output_bytes: usize,
}

impl Default for SandboxSection {
    fn default() -> Self {
        Self {
            interpreter: default_interpreter(),
            timeout_secs: default_sandbox_timeout_secs(),
            allowed_modules: default_allowed_modules(),
            max_binding_chars: default_max_binding_chars(),
            max_output_bytes: default_max_output_bytes(),
        }
    }
}

fn default_interpreter() -> String {
    "python3".to_string()
}

fn default_sandbox_timeout_secs() -> u64 {
    30
}

fn default_allowed_modules() -> Vec<String> {
    vec![
        "math".into(),
        "cmath".into(),
        "statistics".into(),
        "random".into(),
        "decimal".into(),
        "fractions".into(),
        "datetime".into(),
        "time".into(),
        "calendar".into(),
        "json".into(),
        "re".into(),
        "string".into(),
        "textwrap".into(),
        "itertools".into(),
        "functools".into(),
        "operator".into(),
        "collections".into(),
        "heapq".into(),
        "bisect".into(),
        "copy".into(),
        "enum".into(),
        "dataclasses".into(),
        "typing".into(),
    ]
}

fn default_max_binding_chars() -> usize {
    200
}

fn default_max_output_bytes() -> usize {
    64 * 1024
}

/// [automation] 段：是否启用桌面自动化
#[derive(Debug, Clone, Deserialize, Default)]
pub struct AutomationSection {
    #[serde(default)]
    pub enabled: bool,
}

impl AppConfig {
    /// 工作目录：配置 > 当前目录下的 workspace
    pub fn workspace(&self) -> PathBuf {
        self.app.workspace_root.clone().unwrap_or_else(|| {
            std::env::current_dir()
                .unwrap_or_else(|_| PathBuf::from("."))
                .join("workspace")
        })
    }

    /// 记忆快照路径：配置 > <workspace>/.deskpilot/memory.json
    pub fn snapshot_path(&self) -> PathBuf {
        self.memory
            .snapshot_path
            .clone()
            .unwrap_or_else(|| self.workspace().join(".deskpilot").join("memory.json"))
    }
}

/// 从 config 目录加载配置，环境变量 DESKPILOT__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 DESKPILOT__*（双下划线表示嵌套键）
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    let default_names = ["config/default", "../config/default", "default"];
    for name in default_names {
        let path = format!("{}.toml", name);
        if std::path::Path::new(&path).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("DESKPILOT")
            .separator("__")
            .list_separator(",")
            .with_list_parse_key("sandbox.allowed_modules")
            .with_list_parse_key("decision.extra_destructive_actions")
            .try_parsing(true),
    );

    let c = builder.build()?;
    c.try_deserialize()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_documented_tunables() {
        let cfg = AppConfig::default();
        assert!((cfg.decision.execution_threshold - 0.5).abs() < f64::EPSILON);
        assert_eq!(cfg.sandbox.timeout_secs, 30);
        assert_eq!(cfg.memory.max_turns, 100);
        assert!(cfg.memory.max_artifacts > cfg.memory.max_turns);
        assert!(!cfg.sandbox.allowed_modules.iter().any(|m| m == "os" || m == "subprocess"));
    }

    #[test]
    fn test_snapshot_path_defaults_under_workspace() {
        let mut cfg = AppConfig::default();
        cfg.app.workspace_root = Some(PathBuf::from("/tmp/ws"));
        assert_eq!(
            cfg.snapshot_path(),
            PathBuf::from("/tmp/ws/.deskpilot/memory.json")
        );
    }

    #[test]
    fn test_partial_toml_keeps_field_defaults() {
        let raw = "[decision]\nexecution_threshold = 0.8\n";
        let cfg: AppConfig = config::Config::builder()
            .add_source(config::File::from_str(raw, config::FileFormat::Toml))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap();
        assert!((cfg.decision.execution_threshold - 0.8).abs() < f64::EPSILON);
        assert_eq!(cfg.decision.recent_turns, 10);
        assert_eq!(cfg.sandbox.interpreter, "python3");
    }
}
