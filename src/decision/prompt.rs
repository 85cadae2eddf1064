//! Decision prompt 拼装
//!
//! system：角色说明 + 输出格式 + 动作目录 + 上下文（最近 Turn、最近文件、用户习惯）；user：消解后的消息。
//! 角色说明可用 config/prompts/decision.txt 覆盖。

use std::path::Path;

use chrono::{DateTime, Utc};

use crate::decision::DecisionContext;
use crate::llm::Message;
use crate::tools::ActionCatalog;

pub const DEFAULT_SYSTEM_PROMPT: &str = "You are DeskPilot, a desktop assistant. For every user message decide whether to just reply, \
run one of the listed actions, or run Python code in the sandbox. \
Prefer `chat` when the user is only talking. When the message contains `[=> /path]` the user is referring to that file; use the path. \
If the request is unclear, pick the most likely action and lower your confidence.";

const RESPONSE_FORMAT: &str = r#"Respond with a single JSON object and nothing else:
{"action": "<action name>", "parameters": {...}, "confidence": <0.0-1.0>, "rationale": "<one short sentence>", "reply": "<text for the user, required for chat>"}"#;

const MAX_FIELD_CHARS: usize = 160;

/// 读取 `<dir>/prompts/decision.txt`；不存在或为空时用内置提示词
pub fn load_system_prompt(config_dir: Option<&Path>) -> String {
    let candidates = match config_dir {
        Some(dir) => vec![dir.join("prompts").join("decision.txt")],
        None => vec![
            Path::new("config/prompts/decision.txt").to_path_buf(),
            Path::new("../config/prompts/decision.txt").to_path_buf(),
        ],
    };
    candidates
        .iter()
        .find_map(|p| std::fs::read_to_string(p).ok())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| DEFAULT_SYSTEM_PROMPT.to_string())
}

/// 人性化的时间差："just now"、"5 minutes ago"、"2 hours ago"、"3 days ago"
pub fn format_time_ago(then: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let secs = (now - then).num_seconds().max(0);
    let (value, unit) = match secs {
        0..=59 => return "just now".to_string(),
        60..=3599 => (secs / 60, "minute"),
        3600..=86_399 => (secs / 3600, "hour"),
        _ => (secs / 86_400, "day"),
    };
    if value == 1 {
        format!("1 {unit} ago")
    } else {
        format!("{value} {unit}s ago")
    }
}

fn clip(text: &str) -> String {
    let single_line = text.replace('\n', " ");
    if single_line.chars().count() > MAX_FIELD_CHARS {
        format!(
            "{}...",
            single_line.chars().take(MAX_FIELD_CHARS).collect::<String>()
        )
    } else {
        single_line
    }
}

/// 上下文段落：最近 Turn（旧 -> 新）、最近文件、用户习惯
pub fn render_context(ctx: &DecisionContext, now: DateTime<Utc>) -> String {
    let mut out = String::new();

    out.push_str("## Recent conversation\n");
    if ctx.recent_turns.is_empty() {
        out.push_str("(none)\n");
    }
    for turn in ctx.recent_turns.iter().rev() {
        let status = if turn.success { "ok" } else { "failed" };
        out.push_str(&format!(
            "- user: {} -> {} ({status}): {}\n",
            clip(&turn.input),
            turn.action,
            clip(&turn.result_summary)
        ));
    }

    out.push_str("\n## Recent files\n");
    if ctx.recent_artifacts.is_empty() {
        out.push_str("(none)\n");
    }
    for artifact in &ctx.recent_artifacts {
        let purpose = if artifact.purpose.is_empty() {
            String::new()
        } else {
            format!(": {}", clip(&artifact.purpose))
        };
        out.push_str(&format!(
            "- {} ({}, {}){purpose}\n",
            artifact.path.display(),
            artifact.kind.as_str(),
            format_time_ago(artifact.created_at, now)
        ));
    }

    out.push_str("\n## User habits\n");
    out.push_str(&ctx.patterns.summary());
    out.push('\n');
    out
}

pub fn build_messages(
    system_prompt: &str,
    catalog: &ActionCatalog,
    message: &str,
    ctx: &DecisionContext,
    now: DateTime<Utc>,
) -> Vec<Message> {
    let system = format!(
        "{system_prompt}\n\n{RESPONSE_FORMAT}\n\n## Actions (catalog v{})\n{}\n\n{}",
        catalog.version(),
        catalog.render_for_prompt(),
        render_context(ctx, now)
    );
    vec![Message::system(system), Message::user(message)]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{Artifact, ArtifactKind, Turn};
    use chrono::Duration;
    use std::path::PathBuf;

    #[test]
    fn test_format_time_ago() {
        let now = Utc::now();
        assert_eq!(format_time_ago(now, now), "just now");
        assert_eq!(format_time_ago(now - Duration::minutes(1), now), "1 minute ago");
        assert_eq!(format_time_ago(now - Duration::minutes(5), now), "5 minutes ago");
        assert_eq!(format_time_ago(now - Duration::hours(3), now), "3 hours ago");
        assert_eq!(format_time_ago(now - Duration::days(2), now), "2 days ago");
        assert_eq!(format_time_ago(now + Duration::minutes(5), now), "just now");
    }

    #[test]
    fn test_prompt_embeds_catalog_turns_files_and_habits() {
        let now = Utc::now();
        let ctx = DecisionContext {
            recent_turns: vec![Turn {
                id: 1,
                timestamp: now,
                input: "make a todo list".into(),
                action: "create_file".into(),
                parameters: String::new(),
                result_summary: "Created /ws/todo.txt".into(),
                success: true,
            }],
            recent_artifacts: vec![Artifact {
                path: PathBuf::from("/ws/todo.txt"),
                kind: ArtifactKind::Text,
                created_at: now - Duration::minutes(5),
                origin_turn: 1,
                purpose: "shopping list".into(),
                stale: false,
            }],
            ..Default::default()
        };
        let messages = build_messages("SYSTEM", &ActionCatalog::v1(), "open it", &ctx, now);
        assert_eq!(messages.len(), 2);
        let system = &messages[0].content;
        assert!(system.starts_with("SYSTEM"));
        assert!(system.contains("create_file(path, content?)"));
        assert!(system.contains("delete_file(path): Delete a file from the workspace [destructive]"));
        assert!(system.contains("- user: make a todo list -> create_file (ok)"));
        assert!(system.contains("/ws/todo.txt (text, 5 minutes ago): shopping list"));
        assert!(system.contains("(no usage history yet)"));
        assert_eq!(messages[1].content, "open it");
    }

    #[test]
    fn test_prompt_override_from_directory() {
        let dir = tempfile::TempDir::new().unwrap();
        assert_eq!(load_system_prompt(Some(dir.path())), DEFAULT_SYSTEM_PROMPT);
        std::fs::create_dir_all(dir.path().join("prompts")).unwrap();
        std::fs::write(dir.path().join("prompts/decision.txt"), "  custom prompt \n").unwrap();
        assert_eq!(load_system_prompt(Some(dir.path())), "custom prompt");
    }
}
