//! Context Store：Turn / Artifact / UserPattern 的唯一拥有者
//!
//! 单写者：写锁串行化所有变更；变更先作用在副本上、落盘、再整体换入，读者只会看到完整的前态或后态。
//! 写盘失败（PersistenceFailure）只记日志，本轮仍在内存中生效。

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, RwLock};

use chrono::{Duration, Utc};

use crate::memory::{
    Artifact, ArtifactQuery, MemorySnapshot, NewArtifact, NewTurn, SnapshotPersistence, Turn,
    TurnId, UserPattern,
};

/// 淘汰上限
#[derive(Debug, Clone, Copy)]
pub struct EvictionCaps {
    pub max_turns: usize,
    pub max_artifacts: usize,
}

impl Default for EvictionCaps {
    fn default() -> Self {
        Self {
            max_turns: 100,
            max_artifacts: 500,
        }
    }
}

/// record_turn 的结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Recorded {
    pub turn_id: TurnId,
    /// false 表示本轮仅在内存中（快照写盘失败）
    pub persisted: bool,
}

/// clear_history 的范围
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HistoryScope {
    All,
    OlderThanDays(u32),
}

pub struct ContextStore {
    state: RwLock<Arc<MemorySnapshot>>,
    writer: Mutex<()>,
    persistence: Option<SnapshotPersistence>,
    caps: EvictionCaps,
}

impl ContextStore {
    /// 从磁盘加载（启动时一次）；损坏时以空快照重新开始
    pub fn open(path: impl AsRef<Path>, caps: EvictionCaps) -> Self {
        let persistence = SnapshotPersistence::new(path);
        let loaded = persistence.load();
        if let Some(moved) = &loaded.quarantined {
            tracing::warn!(moved_to = %moved.display(), "context store reinitialized with empty snapshot");
        }
        let mut snapshot = loaded.snapshot;
        enforce_caps(&mut snapshot, caps);
        tracing::info!(
            turns = snapshot.turns.len(),
            artifacts = snapshot.artifacts.len(),
            path = %persistence.path().display(),
            "context store loaded"
        );
        Self {
            state: RwLock::new(Arc::new(snapshot)),
            writer: Mutex::new(()),
            persistence: Some(persistence),
            caps,
        }
    }

    /// 纯内存（测试 / 禁用持久化）
    pub fn in_memory(caps: EvictionCaps) -> Self {
        Self {
            state: RwLock::new(Arc::new(MemorySnapshot::default())),
            writer: Mutex::new(()),
            persistence: None,
            caps,
        }
    }

    pub fn snapshot_path(&self) -> Option<&Path> {
        self.persistence.as_ref().map(|p| p.path())
    }

    /// 一致的只读视图
    pub fn snapshot(&self) -> Arc<MemorySnapshot> {
        self.state
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// 追加 Turn、写入其 Artifact、增量更新习惯、落盘：一次原子更新
    pub fn record_turn(&self, turn: NewTurn, new_artifacts: Vec<NewArtifact>) -> Recorded {
        let (turn_id, persisted) = self.mutate(|snapshot| {
            let id = snapshot.next_turn_id;
            snapshot.next_turn_id += 1;
            let now = Utc::now();
            let turn = Turn {
                id,
                timestamp: now,
                input: turn.input,
                action: turn.action,
                parameters: turn.parameters,
                result_summary: turn.result_summary,
                success: turn.success,
            };
            let artifacts: Vec<Artifact> = new_artifacts
                .into_iter()
                .map(|draft| Artifact {
                    path: draft.path,
                    kind: draft.kind,
                    created_at: now,
                    origin_turn: id,
                    purpose: draft.purpose,
                    stale: false,
                })
                .collect();

            snapshot.patterns.apply(&turn, &artifacts);
            snapshot.turns.push_back(turn);
            for artifact in artifacts {
                snapshot.artifacts.retain(|a| a.path != artifact.path);
                snapshot.artifacts.push(artifact);
            }
            id
        });
        Recorded { turn_id, persisted }
    }

    /// 删除对话历史（全部或早于 N 天的 Turn），返回 (删除条数, 是否已落盘)。
    /// Artifact 与习惯统计保留，Turn 编号继续递增。
    pub fn clear_history(&self, scope: HistoryScope) -> (usize, bool) {
        let cutoff = match scope {
            HistoryScope::All => None,
            HistoryScope::OlderThanDays(days) => Some(Utc::now() - Duration::days(i64::from(days))),
        };
        let (removed, persisted) = self.mutate(|snapshot| {
            let before = snapshot.turns.len();
            match cutoff {
                None => snapshot.turns.clear(),
                Some(cutoff) => snapshot.turns.retain(|t| t.timestamp >= cutoff),
            }
            before - snapshot.turns.len()
        });
        tracing::info!(removed, ?scope, "history cleared");
        (removed, persisted)
    }

    /// 将路径已不存在的 Artifact 标记为 stale（惰性检查的结果）；无变化时返回 None，否则返回是否已落盘
    pub fn mark_stale(&self, paths: &[PathBuf]) -> Option<bool> {
        if paths.is_empty() {
            return None;
        }
        let current = self.snapshot();
        let changed = current
            .artifacts
            .iter()
            .any(|a| !a.stale && paths.contains(&a.path));
        if !changed {
            return None;
        }
        let ((), persisted) = self.mutate(|snapshot| {
            for artifact in snapshot.artifacts.iter_mut() {
                if paths.contains(&artifact.path) {
                    artifact.stale = true;
                }
            }
        });
        Some(persisted)
    }

    /// 最近 n 个 Turn，新 -> 旧
    pub fn recent_turns(&self, n: usize) -> Vec<Turn> {
        self.snapshot().recent_turns(n)
    }

    pub fn recent_artifacts(&self, n: usize) -> Vec<Artifact> {
        self.snapshot().recent_artifacts(n)
    }

    pub fn find_artifact(&self, query: &ArtifactQuery) -> Option<Artifact> {
        self.snapshot().find_artifact(query)
    }

    pub fn pattern_snapshot(&self) -> UserPattern {
        self.snapshot().patterns.clone()
    }

    /// 在副本上执行变更 -> 淘汰 -> 落盘 -> 换入；返回 (f 的结果, 是否已落盘)
    fn mutate<T, F>(&self, f: F) -> (T, bool)
    where
        F: FnOnce(&mut MemorySnapshot) -> T,
    {
        let _writer = self.writer.lock().unwrap_or_else(|e| e.into_inner());
        let mut next = (*self.snapshot()).clone();
        let out = f(&mut next);
        enforce_caps(&mut next, self.caps);

        let persisted = match &self.persistence {
            Some(persistence) => match persistence.save(&next) {
                Ok(()) => true,
                Err(e) => {
                    tracing::warn!(error = %e, "snapshot write failed, keeping previous snapshot on disk");
                    false
                }
            },
            None => false,
        };

        *self.state.write().unwrap_or_else(|e| e.into_inner()) = Arc::new(next);
        (out, persisted)
    }
}

/// Turn 与 Artifact 各自独立淘汰最旧的；被淘汰 Turn 的 Artifact 保留（origin_turn 悬空）
fn enforce_caps(snapshot: &mut MemorySnapshot, caps: EvictionCaps) {
    while snapshot.turns.len() > caps.max_turns {
        snapshot.turns.pop_front();
    }
    if snapshot.artifacts.len() > caps.max_artifacts {
        let excess = snapshot.artifacts.len() - caps.max_artifacts;
        snapshot.artifacts.drain(..excess);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::ArtifactKind;
    use tempfile::TempDir;

    fn caps(max_turns: usize, max_artifacts: usize) -> EvictionCaps {
        EvictionCaps {
            max_turns,
            max_artifacts,
        }
    }

    #[test]
    fn test_record_turn_links_artifacts_to_turn() {
        let store = ContextStore::in_memory(EvictionCaps::default());
        let recorded = store.record_turn(
            NewTurn::new("create todo.txt", "create_file").with_result("created", true),
            vec![NewArtifact::new("/ws/todo.txt", "shopping list")],
        );
        let snapshot = store.snapshot();
        let artifact = &snapshot.artifacts[0];
        assert_eq!(artifact.origin_turn, recorded.turn_id);
        assert!(snapshot.turn(artifact.origin_turn).is_some());
        assert_eq!(artifact.kind, ArtifactKind::Text);
        assert!(!recorded.persisted);
    }

    #[test]
    fn test_recent_turns_most_recent_first_and_bounded() {
        let store = ContextStore::in_memory(EvictionCaps::default());
        for i in 0..5 {
            store.record_turn(NewTurn::new(format!("msg {i}"), "chat"), vec![]);
        }
        let recent = store.recent_turns(3);
        assert_eq!(recent.len(), 3);
        assert_eq!(recent[0].input, "msg 4");
        assert_eq!(recent[2].input, "msg 2");
        assert_eq!(store.recent_turns(50).len(), 5);
    }

    #[test]
    fn test_artifact_upsert_is_last_write_wins() {
        let store = ContextStore::in_memory(EvictionCaps::default());
        store.record_turn(
            NewTurn::new("a", "create_file"),
            vec![NewArtifact::new("/ws/a.txt", "first")],
        );
        store.record_turn(
            NewTurn::new("b", "create_file"),
            vec![NewArtifact::new("/ws/b.txt", "other")],
        );
        let second = store.record_turn(
            NewTurn::new("a again", "create_file"),
            vec![NewArtifact::new("/ws/a.txt", "second")],
        );
        let snapshot = store.snapshot();
        assert_eq!(snapshot.artifacts.len(), 2);
        let latest = store.find_artifact(&ArtifactQuery::MostRecent).unwrap();
        assert_eq!(latest.purpose, "second");
        assert_eq!(latest.origin_turn, second.turn_id);
    }

    #[test]
    fn test_eviction_keeps_artifacts_with_dangling_origin() {
        let store = ContextStore::in_memory(caps(2, 10));
        store.record_turn(
            NewTurn::new("make page", "create_file"),
            vec![NewArtifact::new("/ws/index.html", "landing page")],
        );
        store.record_turn(NewTurn::new("hi", "chat"), vec![]);
        store.record_turn(NewTurn::new("hello", "chat"), vec![]);

        let snapshot = store.snapshot();
        assert_eq!(snapshot.turns.len(), 2);
        let artifact = store
            .find_artifact(&ArtifactQuery::MostRecentOfKind(ArtifactKind::Html))
            .unwrap();
        assert!(snapshot.turn(artifact.origin_turn).is_none());
    }

    #[test]
    fn test_artifacts_evicted_by_their_own_cap() {
        let store = ContextStore::in_memory(caps(100, 2));
        for name in ["a.txt", "b.txt", "c.txt"] {
            store.record_turn(
                NewTurn::new(name, "create_file"),
                vec![NewArtifact::new(format!("/ws/{name}"), "")],
            );
        }
        let names: Vec<String> = store
            .snapshot()
            .artifacts
            .iter()
            .map(|a| a.file_name())
            .collect();
        assert_eq!(names, vec!["b.txt", "c.txt"]);
    }

    #[test]
    fn test_round_trip_through_restart() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("memory.json");
        {
            let store = ContextStore::open(&path, EvictionCaps::default());
            let recorded = store.record_turn(
                NewTurn::new("create notes.md", "create_file").with_result("ok", true),
                vec![NewArtifact::new(dir.path().join("notes.md"), "notes")],
            );
            assert!(recorded.persisted);
            store.record_turn(NewTurn::new("thanks", "chat"), vec![]);
        }
        let reopened = ContextStore::open(&path, EvictionCaps::default());
        let snapshot = reopened.snapshot();
        assert_eq!(snapshot.turns.len(), 2);
        assert_eq!(snapshot.artifacts.len(), 1);
        assert_eq!(snapshot.next_turn_id, 3);
        assert_eq!(reopened.pattern_snapshot().action_counts.get("chat"), Some(&1));
    }

    #[test]
    fn test_reload_applies_smaller_caps() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("memory.json");
        {
            let store = ContextStore::open(&path, EvictionCaps::default());
            for i in 0..4 {
                store.record_turn(NewTurn::new(format!("m{i}"), "chat"), vec![]);
            }
        }
        let reopened = ContextStore::open(&path, caps(2, 10));
        assert_eq!(reopened.recent_turns(10).len(), 2);
    }

    #[test]
    fn test_mark_stale_hides_artifact_from_queries() {
        let store = ContextStore::in_memory(EvictionCaps::default());
        store.record_turn(
            NewTurn::new("x", "create_file"),
            vec![NewArtifact::new("/ws/gone.txt", "")],
        );
        assert!(store.mark_stale(&[PathBuf::from("/ws/gone.txt")]).is_some());
        assert!(store.find_artifact(&ArtifactQuery::MostRecent).is_none());
        // 再次标记无变化，不触发写入
        assert!(store.mark_stale(&[PathBuf::from("/ws/gone.txt")]).is_none());
    }

    #[test]
    fn test_clear_history_keeps_artifacts_and_numbering() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("memory.json");
        let store = ContextStore::open(&path, EvictionCaps::default());
        store.record_turn(
            NewTurn::new("create a.txt", "create_file"),
            vec![NewArtifact::new(dir.path().join("a.txt"), "")],
        );
        store.record_turn(NewTurn::new("thanks", "chat"), vec![]);

        // 刚写入的 Turn 不早于 1 天
        assert_eq!(store.clear_history(HistoryScope::OlderThanDays(1)), (0, true));
        assert_eq!(store.recent_turns(10).len(), 2);

        assert_eq!(store.clear_history(HistoryScope::All), (2, true));
        assert!(store.recent_turns(10).is_empty());
        assert!(store.find_artifact(&ArtifactQuery::MostRecent).is_some());

        let next = store.record_turn(NewTurn::new("hi", "chat"), vec![]);
        assert_eq!(next.turn_id, 3);
        let reopened = ContextStore::open(&path, EvictionCaps::default());
        assert_eq!(reopened.recent_turns(10).len(), 1);
    }

    #[test]
    fn test_persistence_failure_keeps_turn_in_memory() {
        let dir = TempDir::new().unwrap();
        let blocker = dir.path().join("blocker");
        std::fs::write(&blocker, "x").unwrap();
        let store = ContextStore::open(blocker.join("memory.json"), EvictionCaps::default());
        let recorded = store.record_turn(NewTurn::new("hi", "chat"), vec![]);
        assert!(!recorded.persisted);
        assert_eq!(store.recent_turns(1)[0].id, recorded.turn_id);
    }
}
