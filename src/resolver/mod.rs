//! 指代消解：把 "open that file"、"the html one"、"todo.txt" 这类说法对应到记忆中的 Artifact
//!
//! 规则按优先级：精确文件名 > "the <kind> one" > 裸代词 it / that / this。
//! 只有唯一候选时才替换（保留原短语，后接 ` [=> 绝对路径]`）；有歧义时原样保留，交给 Decision Engine 追问。
//! 候选路径在消解时才检查是否仍存在（惰性），不存在的报告给调用方标记 stale。

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};

use regex::Regex;

use crate::memory::{Artifact, ArtifactKind, ArtifactQuery, MemorySnapshot};

/// 命中的规则
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolutionRule {
    FileName,
    Kind(ArtifactKind),
    Pronoun,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Resolution {
    /// 消息中的原短语
    pub phrase: String,
    pub path: PathBuf,
    pub rule: ResolutionRule,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct ResolvedMessage {
    /// 增强后的消息
    pub text: String,
    pub resolutions: Vec<Resolution>,
    /// 有歧义而未替换的短语
    pub ambiguous: Vec<String>,
    /// 消解过程中发现已不存在的 Artifact 路径
    pub stale_paths: Vec<PathBuf>,
}

impl ResolvedMessage {
    pub fn is_unchanged(&self) -> bool {
        self.resolutions.is_empty()
    }
}

type ExistsProbe = Arc<dyn Fn(&Path) -> bool + Send + Sync>;

#[derive(Clone)]
pub struct ReferenceResolver {
    exists: ExistsProbe,
}

impl Default for ReferenceResolver {
    fn default() -> Self {
        Self::new()
    }
}

fn filename_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"[\w\-./\\]*[\w\-]\.[A-Za-z][A-Za-z0-9]{0,7}\b").expect("static filename regex")
    })
}

fn kind_phrase_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)\bthe\s+([a-z]+)\s+(?:one|file|script|page|document|image|picture|sheet)\b")
            .expect("static kind regex")
    })
}

fn pronoun_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)\b(?:that file|this file|the file|it|that|this)\b")
            .expect("static pronoun regex")
    })
}

/// 单次消解的状态：存在性检查结果缓存 + 替换位置
struct Pass<'a> {
    probe: &'a ExistsProbe,
    checked: HashMap<PathBuf, bool>,
    stale: Vec<PathBuf>,
    /// (插入位置, 注释)
    inserts: Vec<(usize, String)>,
    /// 已被占用的区间，低优先级规则不再处理
    claimed: Vec<(usize, usize)>,
}

impl<'a> Pass<'a> {
    fn alive(&mut self, artifact: &Artifact) -> bool {
        if let Some(alive) = self.checked.get(&artifact.path) {
            return *alive;
        }
        let alive = (self.probe)(&artifact.path);
        if !alive {
            self.stale.push(artifact.path.clone());
        }
        self.checked.insert(artifact.path.clone(), alive);
        alive
    }

    fn overlaps(&self, start: usize, end: usize) -> bool {
        self.claimed.iter().any(|(s, e)| start < *e && *s < end)
    }

    fn claim(&mut self, start: usize, end: usize, path: &Path) {
        self.claimed.push((start, end));
        self.inserts
            .push((end, format!(" [=> {}]", path.display())));
    }
}

impl ReferenceResolver {
    /// 用文件系统检查路径是否存在
    pub fn new() -> Self {
        Self {
            exists: Arc::new(|p: &Path| p.exists()),
        }
    }

    /// 自定义存在性检查（测试 / 远端文件系统）
    pub fn with_probe(probe: impl Fn(&Path) -> bool + Send + Sync + 'static) -> Self {
        Self {
            exists: Arc::new(probe),
        }
    }

    pub fn resolve(&self, raw: &str, snapshot: &MemorySnapshot) -> ResolvedMessage {
        let live: Vec<&Artifact> = snapshot.artifacts.iter().filter(|a| !a.stale).collect();
        if live.is_empty() {
            return ResolvedMessage {
                text: raw.to_string(),
                ..Default::default()
            };
        }

        let mut pass = Pass {
            probe: &self.exists,
            checked: HashMap::new(),
            stale: Vec::new(),
            inserts: Vec::new(),
            claimed: Vec::new(),
        };
        let mut resolutions = Vec::new();
        let mut ambiguous = Vec::new();
        let mut unmatched_filename = false;

        // 1. 精确文件名
        for m in filename_re().find_iter(raw) {
            let token = m.as_str().trim_end_matches('.');
            let name = Path::new(token)
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_default();
            let query = ArtifactQuery::NameMatches(name.clone());
            let candidates: Vec<&Artifact> = live
                .iter()
                .copied()
                .filter(|a| query.matches(a))
                .filter(|a| pass.alive(a))
                .collect();
            match candidates.as_slice() {
                [only] => {
                    let end = m.start() + token.len();
                    pass.claim(m.start(), end, &only.path);
                    resolutions.push(Resolution {
                        phrase: token.to_string(),
                        path: only.path.clone(),
                        rule: ResolutionRule::FileName,
                    });
                }
                [] => {
                    if ArtifactKind::from_path(Path::new(&name)) != ArtifactKind::Other {
                        unmatched_filename = true;
                    }
                }
                _ => {
                    pass.claimed.push((m.start(), m.end()));
                    ambiguous.push(token.to_string());
                }
            }
        }

        // 2. "the <kind> one"
        for caps in kind_phrase_re().captures_iter(raw) {
            let (Some(whole), Some(word)) = (caps.get(0), caps.get(1)) else {
                continue;
            };
            let Some(kind) = ArtifactKind::from_word(word.as_str()) else {
                continue;
            };
            if pass.overlaps(whole.start(), whole.end()) {
                continue;
            }
            let query = ArtifactQuery::MostRecentOfKind(kind);
            let candidates: Vec<&Artifact> = live
                .iter()
                .copied()
                .filter(|a| query.matches(a))
                .filter(|a| pass.alive(a))
                .collect();
            match unique_most_recent(&candidates) {
                Some(artifact) => {
                    pass.claim(whole.start(), whole.end(), &artifact.path);
                    resolutions.push(Resolution {
                        phrase: whole.as_str().to_string(),
                        path: artifact.path.clone(),
                        rule: ResolutionRule::Kind(kind),
                    });
                }
                None => {
                    pass.claimed.push((whole.start(), whole.end()));
                    if !candidates.is_empty() {
                        ambiguous.push(whole.as_str().to_string());
                    }
                }
            }
        }

        // 3. 裸代词：仅在前两条规则都没有命中、且没有点名未知文件时
        if resolutions.is_empty() && ambiguous.is_empty() && !unmatched_filename {
            if let Some(m) = pronoun_re().find(raw) {
                let candidates: Vec<&Artifact> =
                    live.iter().copied().filter(|a| pass.alive(a)).collect();
                match unique_most_recent(&candidates) {
                    Some(artifact) => {
                        pass.claim(m.start(), m.end(), &artifact.path);
                        resolutions.push(Resolution {
                            phrase: m.as_str().to_string(),
                            path: artifact.path.clone(),
                            rule: ResolutionRule::Pronoun,
                        });
                    }
                    None => {
                        if !candidates.is_empty() {
                            ambiguous.push(m.as_str().to_string());
                        }
                    }
                }
            }
        }

        let mut text = raw.to_string();
        let mut inserts = std::mem::take(&mut pass.inserts);
        inserts.sort_by(|a, b| b.0.cmp(&a.0));
        for (at, note) in inserts {
            text.insert_str(at, &note);
        }

        if !resolutions.is_empty() || !ambiguous.is_empty() {
            tracing::debug!(
                resolved = resolutions.len(),
                ambiguous = ambiguous.len(),
                stale = pass.stale.len(),
                "references resolved"
            );
        }

        ResolvedMessage {
            text,
            resolutions,
            ambiguous,
            stale_paths: pass.stale,
        }
    }
}

/// 候选按新旧排序（输入为 旧 -> 新）；最新者与次新者创建时间相同视为歧义
fn unique_most_recent<'a>(candidates: &[&'a Artifact]) -> Option<&'a Artifact> {
    let (newest, rest) = candidates.split_last()?;
    match rest.last() {
        Some(previous) if previous.created_at == newest.created_at => None,
        _ => Some(newest),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};

    fn artifact(path: &str, age_secs: i64, origin: u64) -> Artifact {
        let path = PathBuf::from(path);
        Artifact {
            kind: ArtifactKind::from_path(&path),
            path,
            created_at: Utc::now() - Duration::seconds(age_secs),
            origin_turn: origin,
            purpose: String::new(),
            stale: false,
        }
    }

    fn snapshot(artifacts: Vec<Artifact>) -> MemorySnapshot {
        MemorySnapshot {
            artifacts,
            ..Default::default()
        }
    }

    fn resolver() -> ReferenceResolver {
        ReferenceResolver::with_probe(|_| true)
    }

    #[test]
    fn test_no_artifacts_passes_through() {
        let out = resolver().resolve("open that file", &MemorySnapshot::default());
        assert_eq!(out.text, "open that file");
        assert!(out.is_unchanged());
    }

    #[test]
    fn test_bare_reference_resolves_to_most_recent() {
        let snap = snapshot(vec![
            artifact("/ws/old.md", 60, 1),
            artifact("/ws/todo.txt", 10, 2),
        ]);
        let out = resolver().resolve("open that file", &snap);
        assert_eq!(out.text, "open that file [=> /ws/todo.txt]");
        assert_eq!(out.resolutions[0].rule, ResolutionRule::Pronoun);
    }

    #[test]
    fn test_filename_mention_wins_over_recency() {
        let snap = snapshot(vec![
            artifact("/ws/Notes.md", 60, 1),
            artifact("/ws/todo.txt", 10, 2),
        ]);
        let out = resolver().resolve("please open notes.md now", &snap);
        assert_eq!(out.text, "please open notes.md [=> /ws/Notes.md] now");
        assert_eq!(out.resolutions.len(), 1);
        assert_eq!(out.resolutions[0].rule, ResolutionRule::FileName);
    }

    #[test]
    fn test_kind_phrase_picks_most_recent_of_kind() {
        let snap = snapshot(vec![
            artifact("/ws/a.html", 90, 1),
            artifact("/ws/b.html", 60, 2),
            artifact("/ws/c.txt", 10, 3),
        ]);
        let out = resolver().resolve("open the html one", &snap);
        assert_eq!(out.text, "open the html one [=> /ws/b.html]");
        assert_eq!(
            out.resolutions[0].rule,
            ResolutionRule::Kind(ArtifactKind::Html)
        );
    }

    #[test]
    fn test_same_timestamp_is_ambiguous() {
        let mut a = artifact("/ws/a.txt", 10, 1);
        let mut b = artifact("/ws/b.txt", 10, 1);
        let now = Utc::now();
        a.created_at = now;
        b.created_at = now;
        let out = resolver().resolve("open it", &snapshot(vec![a, b]));
        assert_eq!(out.text, "open it");
        assert_eq!(out.ambiguous, vec!["it".to_string()]);
    }

    #[test]
    fn test_same_name_in_two_directories_is_ambiguous() {
        let snap = snapshot(vec![
            artifact("/ws/x/report.md", 60, 1),
            artifact("/ws/y/report.md", 10, 2),
        ]);
        let out = resolver().resolve("open report.md", &snap);
        assert_eq!(out.text, "open report.md");
        assert_eq!(out.ambiguous, vec!["report.md".to_string()]);
    }

    #[test]
    fn test_unknown_filename_suppresses_pronoun_rule() {
        let snap = snapshot(vec![artifact("/ws/todo.txt", 10, 1)]);
        let out = resolver().resolve("create budget.csv and open it", &snap);
        assert_eq!(out.text, "create budget.csv and open it");
    }

    #[test]
    fn test_missing_paths_are_skipped_and_reported() {
        let snap = snapshot(vec![
            artifact("/ws/kept.txt", 60, 1),
            artifact("/ws/gone.txt", 10, 2),
        ]);
        let out = ReferenceResolver::with_probe(|p| !p.ends_with("gone.txt"))
            .resolve("open it", &snap);
        assert_eq!(out.text, "open it [=> /ws/kept.txt]");
        assert_eq!(out.stale_paths, vec![PathBuf::from("/ws/gone.txt")]);
    }

    #[test]
    fn test_resolution_is_deterministic() {
        let snap = snapshot(vec![
            artifact("/ws/a.py", 30, 1),
            artifact("/ws/b.html", 20, 2),
        ]);
        let r = resolver();
        let first = r.resolve("run the python script and then open the html page", &snap);
        let second = r.resolve("run the python script and then open the html page", &snap);
        assert_eq!(first, second);
        assert_eq!(first.resolutions.len(), 2);
    }

    #[test]
    fn test_tolerates_dangling_origin_turn() {
        // 快照中没有任何 Turn，Artifact 的 origin_turn 悬空
        let snap = snapshot(vec![artifact("/ws/page.html", 5, 999)]);
        let out = resolver().resolve("show me the webpage file", &snap);
        assert!(out.text.ends_with("[=> /ws/page.html]"));
    }
}
