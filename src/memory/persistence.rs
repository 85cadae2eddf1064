//! 记忆快照持久化
//!
//! 单文件 JSON。写入时先写同目录临时文件并 fsync，再 rename 覆盖，磁盘上只会是更新前或更新后的完整版本。
//! 读取时文件损坏则移到旁边（*.corrupt-<时间戳>）并返回空快照，不拒绝启动。

use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::Context;

use crate::core::AgentError;
use crate::memory::{MemorySnapshot, SNAPSHOT_VERSION};

/// 加载结果：快照本身 + 是否从损坏中恢复
#[derive(Debug)]
pub struct LoadedSnapshot {
    pub snapshot: MemorySnapshot,
    /// 损坏文件被移到的位置（若发生）
    pub quarantined: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct SnapshotPersistence {
    path: PathBuf,
}

impl SnapshotPersistence {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// 加载快照；文件不存在时返回空快照，无法解析时隔离旧文件并返回空快照
    pub fn load(&self) -> LoadedSnapshot {
        if !self.path.exists() {
            return LoadedSnapshot {
                snapshot: MemorySnapshot::default(),
                quarantined: None,
            };
        }
        match self.read() {
            Ok(snapshot) => LoadedSnapshot {
                snapshot,
                quarantined: None,
            },
            Err(e) => {
                tracing::warn!(path = %self.path.display(), error = %e, "memory snapshot unreadable, reinitializing");
                let quarantined = self.quarantine();
                LoadedSnapshot {
                    snapshot: MemorySnapshot::default(),
                    quarantined,
                }
            }
        }
    }

    fn read(&self) -> anyhow::Result<MemorySnapshot> {
        let data = fs::read_to_string(&self.path)
            .with_context(|| format!("read {}", self.path.display()))?;
        let snapshot: MemorySnapshot = serde_json::from_str(&data).context("parse snapshot")?;
        if snapshot.version > SNAPSHOT_VERSION {
            anyhow::bail!(
                "snapshot version {} is newer than supported {}",
                snapshot.version,
                SNAPSHOT_VERSION
            );
        }
        Ok(snapshot)
    }

    fn quarantine(&self) -> Option<PathBuf> {
        let stamp = chrono::Utc::now().format("%Y%m%d%H%M%S");
        let target = self
            .path
            .with_extension(format!("corrupt-{stamp}"));
        match fs::rename(&self.path, &target) {
            Ok(()) => Some(target),
            Err(e) => {
                tracing::warn!(error = %e, "failed to move corrupt snapshot aside");
                None
            }
        }
    }

    /// 原子写入：临时文件 + fsync + rename；父目录不存在时自动创建
    pub fn save(&self, snapshot: &MemorySnapshot) -> Result<(), AgentError> {
        self.write_atomic(snapshot)
            .map_err(|e| AgentError::PersistenceFailure(format!("{e:#}")))
    }

    fn write_atomic(&self, snapshot: &MemorySnapshot) -> anyhow::Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)
                    .with_context(|| format!("create {}", parent.display()))?;
            }
        }
        let data = serde_json::to_vec_pretty(snapshot).context("serialize snapshot")?;
        let tmp = self.path.with_extension("json.tmp");
        {
            let mut file =
                File::create(&tmp).with_context(|| format!("create {}", tmp.display()))?;
            file.write_all(&data).context("write snapshot")?;
            file.sync_all().context("sync snapshot")?;
        }
        if let Err(e) = fs::rename(&tmp, &self.path) {
            let _ = fs::remove_file(&tmp);
            return Err(e).with_context(|| format!("replace {}", self.path.display()));
        }
        Ok(())
    }
}
