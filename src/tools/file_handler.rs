//! 文件处理器：创建 / 打开 / 删除，路径一律限制在工作目录内
//!
//! 相对路径基于工作目录解析；绝对路径必须落在工作目录下，`..` 逃逸直接拒绝。

use std::path::{Component, Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;

use crate::core::AgentError;

const COLLABORATOR: &str = "file handler";

/// create 的结果
#[derive(Debug, Clone, PartialEq)]
pub struct CreatedFile {
    pub path: PathBuf,
    pub bytes: usize,
}

#[async_trait]
pub trait FileHandler: Send + Sync {
    /// 把用户给的路径解析为工作目录内的绝对路径（不要求存在）
    fn resolve(&self, path: &str) -> Result<PathBuf, AgentError>;

    async fn create(&self, path: &str, content: &str) -> Result<CreatedFile, AgentError>;

    async fn open_path(&self, path: &str) -> Result<PathBuf, AgentError>;

    async fn delete(&self, path: &str) -> Result<PathBuf, AgentError>;
}

/// 本地文件系统实现；打开文件时调用平台默认程序
#[derive(Debug, Clone)]
pub struct LocalFileHandler {
    root: PathBuf,
    opener: Vec<String>,
}

impl LocalFileHandler {
    pub fn new(root: impl AsRef<Path>) -> Self {
        let root = root.as_ref().to_path_buf();
        let root = root.canonicalize().unwrap_or(root);
        Self {
            root,
            opener: default_opener(),
        }
    }

    /// 自定义打开命令（路径作为最后一个参数追加）
    pub fn with_opener(mut self, opener: Vec<String>) -> Self {
        self.opener = opener;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

fn default_opener() -> Vec<String> {
    if cfg!(target_os = "macos") {
        vec!["open".into()]
    } else if cfg!(target_os = "windows") {
        vec!["cmd".into(), "/C".into(), "start".into(), "".into()]
    } else {
        vec!["xdg-open".into()]
    }
}

/// 纯词法归一化：去掉 `.`，回退 `..`；越过起点时返回 None
fn normalize(path: &Path) -> Option<PathBuf> {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    return None;
                }
            }
            other => out.push(other.as_os_str()),
        }
    }
    Some(out)
}

fn failure(message: impl Into<String>) -> AgentError {
    AgentError::collaborator(COLLABORATOR, message)
}

#[async_trait]
impl FileHandler for LocalFileHandler {
    fn resolve(&self, path: &str) -> Result<PathBuf, AgentError> {
        let trimmed = path.trim();
        if trimmed.is_empty() {
            return Err(failure("empty path"));
        }
        let candidate = Path::new(trimmed);
        let full = if candidate.is_absolute() {
            candidate.to_path_buf()
        } else {
            self.root.join(candidate)
        };
        match normalize(&full) {
            Some(p) if p.starts_with(&self.root) && p != self.root => Ok(p),
            _ => Err(failure(format!("path escapes workspace: {trimmed}"))),
        }
    }

    async fn create(&self, path: &str, content: &str) -> Result<CreatedFile, AgentError> {
        let resolved = self.resolve(path)?;
        if let Some(parent) = resolved.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| failure(format!("create {}: {e}", parent.display())))?;
        }
        tokio::fs::write(&resolved, content)
            .await
            .map_err(|e| failure(format!("write {}: {e}", resolved.display())))?;
        tracing::info!(path = %resolved.display(), bytes = content.len(), "file created");
        Ok(CreatedFile {
            path: resolved,
            bytes: content.len(),
        })
    }

    async fn open_path(&self, path: &str) -> Result<PathBuf, AgentError> {
        let resolved = self.resolve(path)?;
        if !resolved.exists() {
            return Err(failure(format!("no such file: {}", resolved.display())));
        }
        let Some((program, args)) = self.opener.split_first() else {
            return Err(failure("no opener configured"));
        };
        let status = tokio::time::timeout(
            Duration::from_secs(10),
            tokio::process::Command::new(program)
                .args(args)
                .arg(&resolved)
                .stdin(std::process::Stdio::null())
                .stdout(std::process::Stdio::null())
                .stderr(std::process::Stdio::null())
                .status(),
        )
        .await
        .map_err(|_| failure(format!("'{program}' did not return")))?
        .map_err(|e| failure(format!("failed to run '{program}': {e}")))?;
        if !status.success() {
            return Err(failure(format!("'{program}' exited with {status}")));
        }
        tracing::info!(path = %resolved.display(), "file opened");
        Ok(resolved)
    }

    async fn delete(&self, path: &str) -> Result<PathBuf, AgentError> {
        let resolved = self.resolve(path)?;
        tokio::fs::remove_file(&resolved)
            .await
            .map_err(|e| failure(format!("delete {}: {e}", resolved.display())))?;
        tracing::info!(path = %resolved.display(), "file deleted");
        Ok(resolved)
    }
}
