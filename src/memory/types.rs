//! 记忆数据模型：Turn、Artifact、MemorySnapshot
//!
//! Turn 只追加不修改；Artifact 只会被同路径的新 Artifact 取代，唯一允许的变化是 stale 标记。

use std::collections::VecDeque;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::memory::UserPattern;

/// 快照格式版本
pub const SNAPSHOT_VERSION: u32 = 1;

pub type TurnId = u64;

/// 一次完整的 消息 -> 决策 -> 结果 交换
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Turn {
    pub id: TurnId,
    pub timestamp: DateTime<Utc>,
    pub input: String,
    /// 实际采取的动作（对话轮为 "chat"）
    pub action: String,
    /// 参数摘要（截断后的 JSON）
    #[serde(default)]
    pub parameters: String,
    pub result_summary: String,
    pub success: bool,
}

/// 尚未写入的 Turn：id 与时间戳由 ContextStore 在 record_turn 时分配
#[derive(Debug, Clone, PartialEq)]
pub struct NewTurn {
    pub input: String,
    pub action: String,
    pub parameters: String,
    pub result_summary: String,
    pub success: bool,
}

impl NewTurn {
    pub fn new(input: impl Into<String>, action: impl Into<String>) -> Self {
        Self {
            input: input.into(),
            action: action.into(),
            parameters: String::new(),
            result_summary: String::new(),
            success: true,
        }
    }

    pub fn with_parameters(mut self, parameters: impl Into<String>) -> Self {
        self.parameters = parameters.into();
        self
    }

    pub fn with_result(mut self, summary: impl Into<String>, success: bool) -> Self {
        self.result_summary = summary.into();
        self.success = success;
        self
    }
}

/// Artifact 类别（按扩展名归类）
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactKind {
    Text,
    Markdown,
    Html,
    Python,
    Json,
    Image,
    Document,
    Spreadsheet,
    Code,
    Other,
}

impl ArtifactKind {
    pub fn from_path(path: &Path) -> Self {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
            .unwrap_or_default();
        match ext.as_str() {
            "txt" | "log" => Self::Text,
            "md" | "markdown" => Self::Markdown,
            "html" | "htm" => Self::Html,
            "py" => Self::Python,
            "json" => Self::Json,
            "png" | "jpg" | "jpeg" | "gif" | "bmp" | "webp" => Self::Image,
            "pdf" | "doc" | "docx" | "odt" | "rtf" => Self::Document,
            "csv" | "xls" | "xlsx" | "ods" => Self::Spreadsheet,
            "rs" | "js" | "ts" | "css" | "c" | "cpp" | "h" | "java" | "go" | "sh" => Self::Code,
            _ => Self::Other,
        }
    }

    /// 用户口语中的类别词（"the html one"、"the python script"）
    pub fn from_word(word: &str) -> Option<Self> {
        match word.to_ascii_lowercase().as_str() {
            "text" | "txt" | "note" | "notes" => Some(Self::Text),
            "markdown" | "md" => Some(Self::Markdown),
            "html" | "htm" | "web" | "webpage" | "page" => Some(Self::Html),
            "python" | "py" | "script" => Some(Self::Python),
            "json" => Some(Self::Json),
            "image" | "picture" | "photo" | "screenshot" | "png" | "jpg" => Some(Self::Image),
            "pdf" | "document" | "doc" | "docx" => Some(Self::Document),
            "csv" | "spreadsheet" | "excel" | "xlsx" => Some(Self::Spreadsheet),
            "code" | "source" => Some(Self::Code),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Markdown => "markdown",
            Self::Html => "html",
            Self::Python => "python",
            Self::Json => "json",
            Self::Image => "image",
            Self::Document => "document",
            Self::Spreadsheet => "spreadsheet",
            Self::Code => "code",
            Self::Other => "other",
        }
    }
}

/// 系统创建或触达过的文件
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Artifact {
    pub path: PathBuf,
    pub kind: ArtifactKind,
    pub created_at: DateTime<Utc>,
    /// 产生它的 Turn；该 Turn 被淘汰后成为悬空引用
    pub origin_turn: TurnId,
    pub purpose: String,
    #[serde(default)]
    pub stale: bool,
}

impl Artifact {
    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default()
    }
}

/// 协作方产出的 Artifact 草稿：不含 origin_turn，只能经由 record_turn 落地
#[derive(Debug, Clone, PartialEq)]
pub struct NewArtifact {
    pub path: PathBuf,
    pub kind: ArtifactKind,
    pub purpose: String,
}

impl NewArtifact {
    pub fn new(path: impl Into<PathBuf>, purpose: impl Into<String>) -> Self {
        let path = path.into();
        Self {
            kind: ArtifactKind::from_path(&path),
            path,
            purpose: purpose.into(),
        }
    }
}

/// find_artifact 的查询条件
#[derive(Debug, Clone, PartialEq)]
pub enum ArtifactQuery {
    MostRecent,
    MostRecentOfKind(ArtifactKind),
    /// 文件名（不含目录）大小写不敏感相等
    NameMatches(String),
}

impl ArtifactQuery {
    pub fn matches(&self, artifact: &Artifact) -> bool {
        match self {
            ArtifactQuery::MostRecent => true,
            ArtifactQuery::MostRecentOfKind(kind) => artifact.kind == *kind,
            ArtifactQuery::NameMatches(name) => artifact.file_name().eq_ignore_ascii_case(name),
        }
    }
}

/// 持久化单元：有界的 Turn 序列 + 有界的 Artifact 集合 + 派生的 UserPattern
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemorySnapshot {
    pub version: u32,
    pub next_turn_id: TurnId,
    /// 旧 -> 新
    pub turns: VecDeque<Turn>,
    /// 按路径唯一，旧 -> 新（同路径后写覆盖并移到末尾）
    pub artifacts: Vec<Artifact>,
    #[serde(default)]
    pub patterns: UserPattern,
}

impl Default for MemorySnapshot {
    fn default() -> Self {
        Self {
            version: SNAPSHOT_VERSION,
            next_turn_id: 1,
            turns: VecDeque::new(),
            artifacts: Vec::new(),
            patterns: UserPattern::default(),
        }
    }
}

impl MemorySnapshot {
    /// 最近 n 个 Turn，新 -> 旧
    pub fn recent_turns(&self, n: usize) -> Vec<Turn> {
        self.turns.iter().rev().take(n).cloned().collect()
    }

    /// 最近 n 个未过期 Artifact，新 -> 旧
    pub fn recent_artifacts(&self, n: usize) -> Vec<Artifact> {
        self.artifacts
            .iter()
            .rev()
            .filter(|a| !a.stale)
            .take(n)
            .cloned()
            .collect()
    }

    /// 按查询找最近的一个未过期 Artifact
    pub fn find_artifact(&self, query: &ArtifactQuery) -> Option<Artifact> {
        self.artifacts
            .iter()
            .rev()
            .find(|a| !a.stale && query.matches(a))
            .cloned()
    }

    pub fn turn(&self, id: TurnId) -> Option<&Turn> {
        self.turns.iter().find(|t| t.id == id)
    }
}
