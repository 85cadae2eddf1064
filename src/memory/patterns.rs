//! 用户习惯：常用保存位置、常用文件类别、动作频次
//!
//! 纯派生数据：每次 record_turn 后增量更新，可随时丢弃并从 Turn / Artifact 历史重建。

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::memory::{Artifact, ArtifactKind, Turn};

/// 派生聚合（BTreeMap 保证 prompt 输出顺序稳定）
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UserPattern {
    /// 父目录 -> 保存次数
    pub preferred_locations: BTreeMap<String, u32>,
    pub preferred_kinds: BTreeMap<ArtifactKind, u32>,
    /// 动作名 -> 次数
    pub action_counts: BTreeMap<String, u32>,
    pub successes: u32,
    pub failures: u32,
}

impl UserPattern {
    /// 增量：一个新 Turn 及其产出的 Artifact
    pub fn apply(&mut self, turn: &Turn, artifacts: &[Artifact]) {
        *self.action_counts.entry(turn.action.clone()).or_insert(0) += 1;
        if turn.success {
            self.successes += 1;
        } else {
            self.failures += 1;
        }
        for artifact in artifacts {
            self.apply_artifact(artifact);
        }
    }

    fn apply_artifact(&mut self, artifact: &Artifact) {
        let location = location_of(&artifact.path);
        *self.preferred_locations.entry(location).or_insert(0) += 1;
        *self.preferred_kinds.entry(artifact.kind).or_insert(0) += 1;
    }

    /// 从历史全量重建
    pub fn rebuild<'a>(
        turns: impl IntoIterator<Item = &'a Turn>,
        artifacts: impl IntoIterator<Item = &'a Artifact>,
    ) -> Self {
        let mut pattern = Self::default();
        for turn in turns {
            pattern.apply(turn, &[]);
        }
        for artifact in artifacts {
            pattern.apply_artifact(artifact);
        }
        pattern
    }

    pub fn top_location(&self) -> Option<&str> {
        top_entry(&self.preferred_locations).map(|k| k.as_str())
    }

    pub fn top_kind(&self) -> Option<ArtifactKind> {
        top_entry(&self.preferred_kinds).copied()
    }

    /// 最常用的 n 个动作（不含 chat），次数降序、同次数按名称
    pub fn top_actions(&self, n: usize) -> Vec<(&str, u32)> {
        let mut actions: Vec<(&str, u32)> = self
            .action_counts
            .iter()
            .filter(|(name, _)| name.as_str() != "chat")
            .map(|(name, count)| (name.as_str(), *count))
            .collect();
        actions.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(b.0)));
        actions.truncate(n);
        actions
    }

    /// 给推理服务的一段习惯摘要与建议
    pub fn summary(&self) -> String {
        let mut lines = Vec::new();
        if let Some(kind) = self.top_kind() {
            lines.push(format!("- The user often creates {} files.", kind.as_str()));
        }
        if let Some(location) = self.top_location() {
            lines.push(format!("- The user usually saves files in {location}."));
        }
        let actions = self.top_actions(3);
        if !actions.is_empty() {
            let list = actions
                .iter()
                .map(|(name, count)| format!("{name} ({count})"))
                .collect::<Vec<_>>()
                .join(", ");
            lines.push(format!("- Frequent actions: {list}."));
        }
        if lines.is_empty() {
            "(no usage history yet)".to_string()
        } else {
            lines.join("\n")
        }
    }
}

fn location_of(path: &Path) -> String {
    path.parent()
        .map(|p| p.display().to_string())
        .filter(|p| !p.is_empty())
        .unwrap_or_else(|| ".".to_string())
}

/// 次数最大者；并列时取键最小者，保证确定性
fn top_entry<K: Ord>(map: &BTreeMap<K, u32>) -> Option<&K> {
    let mut best: Option<(&K, u32)> = None;
    for (key, count) in map {
        match best {
            Some((_, c)) if c >= *count => {}
            _ => best = Some((key, *count)),
        }
    }
    best.map(|(k, _)| k)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::path::PathBuf;

    fn turn(id: u64, action: &str, success: bool) -> Turn {
        Turn {
            id,
            timestamp: Utc::now(),
            input: String::new(),
            action: action.to_string(),
            parameters: String::new(),
            result_summary: String::new(),
            success,
        }
    }

    fn artifact(path: &str, origin: u64) -> Artifact {
        let path = PathBuf::from(path);
        Artifact {
            kind: ArtifactKind::from_path(&path),
            path,
            created_at: Utc::now(),
            origin_turn: origin,
            purpose: String::new(),
            stale: false,
        }
    }

    #[test]
    fn test_incremental_matches_rebuild() {
        let turns = vec![
            turn(1, "create_file", true),
            turn(2, "chat", true),
            turn(3, "create_file", false),
        ];
        let artifacts = vec![artifact("/ws/a.html", 1), artifact("/ws/b.html", 1)];

        let mut incremental = UserPattern::default();
        incremental.apply(&turns[0], &artifacts);
        incremental.apply(&turns[1], &[]);
        incremental.apply(&turns[2], &[]);

        let rebuilt = UserPattern::rebuild(&turns, &artifacts);
        assert_eq!(incremental, rebuilt);
        assert_eq!(rebuilt.successes, 2);
        assert_eq!(rebuilt.failures, 1);
        assert_eq!(rebuilt.top_kind(), Some(ArtifactKind::Html));
        assert_eq!(rebuilt.top_location(), Some("/ws"));
    }

    #[test]
    fn test_top_actions_excludes_chat_and_is_deterministic() {
        let mut pattern = UserPattern::default();
        for (i, action) in ["chat", "chat", "open_file", "create_file"].iter().enumerate() {
            pattern.apply(&turn(i as u64, action, true), &[]);
        }
        assert_eq!(
            pattern.top_actions(5),
            vec![("create_file", 1), ("open_file", 1)]
        );
    }

    #[test]
    fn test_summary_without_history() {
        assert_eq!(UserPattern::default().summary(), "(no usage history yet)");
    }
}
