//! 推理服务输出解析
//!
//! 从文本中提取 JSON（```json 块或首个 `{` 到末个 `}`），解析为 Decision；不构成决策的自由文本视为直接回复。

use serde::Deserialize;
use serde_json::{Map, Value};

use crate::core::AgentError;
use crate::decision::{Decision, CHAT_ACTION};
use crate::tools::ActionCatalog;

#[derive(Debug, Deserialize)]
struct RawDecision {
    #[serde(default)]
    action: String,
    #[serde(default)]
    parameters: Value,
    #[serde(default)]
    confidence: Value,
    #[serde(default)]
    rationale: String,
    #[serde(default)]
    reply: Option<String>,
}

/// 输出中的 JSON 候选片段
struct JsonSpan<'a> {
    text: &'a str,
    /// 来自 ```json 代码块
    fenced: bool,
}

impl JsonSpan<'_> {
    /// 显式声明为决策：代码块，或片段里出现了 "action" 键
    fn is_structured(&self) -> bool {
        self.fenced || self.text.contains("\"action\"")
    }
}

/// 提取 JSON 片段；没有任何 `{` 时返回 None
fn extract_json(trimmed: &str) -> Option<JsonSpan<'_>> {
    if let Some(start) = trimmed.find("```json") {
        let rest = &trimmed[start + 7..];
        let text = rest.find("```").map(|end| rest[..end].trim()).unwrap_or(rest.trim());
        return Some(JsonSpan { text, fenced: true });
    }
    let start = trimmed.find('{')?;
    let text = match trimmed.rfind('}') {
        Some(end) if end > start => &trimmed[start..=end],
        _ => &trimmed[start..],
    };
    Some(JsonSpan {
        text,
        fenced: false,
    })
}

fn parse_confidence(value: &Value, action: &str) -> Result<f64, AgentError> {
    let raw = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        Value::Null if action == CHAT_ACTION => Some(1.0),
        _ => None,
    };
    match raw {
        Some(c) if c.is_finite() => Ok(c.clamp(0.0, 1.0)),
        Some(c) => Err(AgentError::MalformedDecision(format!(
            "confidence is not a finite number: {c}"
        ))),
        None => Err(AgentError::MalformedDecision(format!(
            "missing or invalid confidence: {value}"
        ))),
    }
}

/// 解析模型输出
///
/// 花括号片段只有在能解析且带 `action` 键时才当作决策，否则整段视为直接回复。
/// 显式的决策结构不合法（坏 JSON、目录外的动作名、非有限置信度）时返回 MalformedDecision。
pub fn parse_decision(output: &str, catalog: &ActionCatalog) -> Result<Decision, AgentError> {
    let trimmed = output.trim();
    if trimmed.is_empty() {
        return Err(AgentError::MalformedDecision("empty response".to_string()));
    }
    let Some(span) = extract_json(trimmed) else {
        return Ok(Decision::conversational(trimmed));
    };

    let value: Value = match serde_json::from_str(span.text) {
        Ok(value) => value,
        Err(e) if span.is_structured() => {
            return Err(AgentError::MalformedDecision(format!("{e}: {}", span.text)))
        }
        Err(_) => return Ok(Decision::conversational(trimmed)),
    };
    if !span.fenced && value.get("action").is_none() {
        return Ok(Decision::conversational(trimmed));
    }
    let raw: RawDecision = serde_json::from_value(value)
        .map_err(|e| AgentError::MalformedDecision(format!("{e}: {}", span.text)))?;

    let action = raw.action.trim().to_string();
    if action.is_empty() {
        return Err(AgentError::MalformedDecision("missing action".to_string()));
    }
    if !catalog.contains(&action) {
        return Err(AgentError::MalformedDecision(format!(
            "unknown action '{action}'"
        )));
    }
    let parameters = match raw.parameters {
        Value::Object(map) => map,
        Value::Null => Map::new(),
        other => {
            return Err(AgentError::MalformedDecision(format!(
                "parameters must be an object, got {other}"
            )))
        }
    };
    let confidence = parse_confidence(&raw.confidence, &action)?;

    Ok(Decision {
        action,
        parameters,
        confidence,
        rationale: raw.rationale,
        reply: raw.reply.filter(|r| !r.trim().is_empty()),
        confirmed: false,
        pending: None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(output: &str) -> Result<Decision, AgentError> {
        parse_decision(output, &ActionCatalog::v1())
    }

    #[test]
    fn test_parse_fenced_json() {
        let out = "Sure!\n```json\n{\"action\": \"create_file\", \"parameters\": {\"path\": \"todo.txt\", \"content\": \"buy milk\"}, \"confidence\": 0.92, \"rationale\": \"user asked\"}\n```";
        let d = parse(out).unwrap();
        assert_eq!(d.action, "create_file");
        assert_eq!(d.parameters["path"], "todo.txt");
        assert!((d.confidence - 0.92).abs() < 1e-9);
        assert!(!d.confirmed);
    }

    #[test]
    fn test_parse_bare_json_inside_text() {
        let d = parse(r#"Here you go: {"action": "help", "confidence": 0.8} thanks"#).unwrap();
        assert_eq!(d.action, "help");
        assert!(d.parameters.is_empty());
    }

    #[test]
    fn test_free_text_is_plain_reply() {
        let d = parse("Hello! How can I help?").unwrap();
        assert!(d.is_conversational());
        assert_eq!(d.reply.as_deref(), Some("Hello! How can I help?"));
    }

    #[test]
    fn test_braces_in_prose_are_plain_reply() {
        let text = "In Python a dict literal looks like {'a': 1}.";
        let d = parse(text).unwrap();
        assert!(d.is_conversational());
        assert_eq!(d.reply.as_deref(), Some(text));

        let d = parse(r#"Use {"name": "x"} as the body."#).unwrap();
        assert!(d.is_conversational());
        assert_eq!(d.reply.as_deref(), Some(r#"Use {"name": "x"} as the body."#));
    }

    #[test]
    fn test_unknown_action_is_malformed() {
        let err = parse(r#"{"action": "format_disk", "confidence": 0.9}"#).unwrap_err();
        assert!(matches!(err, AgentError::MalformedDecision(_)));
    }

    #[test]
    fn test_non_finite_or_missing_confidence_is_malformed() {
        assert!(parse(r#"{"action": "open_file", "parameters": {"path": "a"}, "confidence": "NaN"}"#).is_err());
        assert!(parse(r#"{"action": "open_file", "parameters": {"path": "a"}}"#).is_err());
        assert!(parse(r#"{"action": "open_file", "parameters": {"path": "a"}, "confidence": "high"}"#).is_err());
    }

    #[test]
    fn test_confidence_is_clamped() {
        let d = parse(r#"{"action": "help", "confidence": 1.7}"#).unwrap();
        assert_eq!(d.confidence, 1.0);
        let d = parse(r#"{"action": "help", "confidence": -3}"#).unwrap();
        assert_eq!(d.confidence, 0.0);
    }

    #[test]
    fn test_broken_json_is_malformed() {
        assert!(matches!(
            parse(r#"{"action": "chat", "#),
            Err(AgentError::MalformedDecision(_))
        ));
        assert!(parse(r#"{"action": "open_file", "parameters": [1], "confidence": 1}"#).is_err());
    }

    #[test]
    fn test_chat_without_confidence_defaults_to_certain() {
        let d = parse(r#"{"action": "chat", "reply": "hi there"}"#).unwrap();
        assert_eq!(d.confidence, 1.0);
        assert_eq!(d.reply.as_deref(), Some("hi there"));
    }
}
