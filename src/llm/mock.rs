//! 离线客户端：Mock（无需 API）与 Scripted（测试用，按顺序返回预设回复）

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::llm::{LlmClient, Message, Role};

/// Mock 客户端：无 API Key 时使用；只会聊天，并提示如何配置真实后端
#[derive(Debug, Default)]
pub struct MockLlmClient;

#[async_trait]
impl LlmClient for MockLlmClient {
    async fn complete(&self, messages: &[Message]) -> Result<String, String> {
        let last_user = messages
            .iter()
            .rev()
            .find(|m| m.role == Role::User)
            .map(|m| m.content.as_str())
            .unwrap_or("(no input)");
        let reply = format!(
            "(offline mode) You said: {}. Set DEEPSEEK_API_KEY or OPENAI_API_KEY to enable actions.",
            last_user
        );
        let response = serde_json::json!({
            "action": "chat",
            "parameters": {},
            "confidence": 1.0,
            "rationale": "no reasoning service configured",
            "reply": reply,
        });
        Ok(response.to_string())
    }
}

/// 测试用客户端：依次弹出预设回复，并记录每次请求
#[derive(Debug, Default)]
pub struct ScriptedLlmClient {
    responses: Mutex<VecDeque<Result<String, String>>>,
    requests: Mutex<Vec<Vec<Message>>>,
}

impl ScriptedLlmClient {
    pub fn new<I, S>(responses: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            responses: Mutex::new(responses.into_iter().map(|r| Ok(r.into())).collect()),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// 追加一条传输层失败
    pub fn push_error(&self, error: impl Into<String>) {
        self.responses
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push_back(Err(error.into()));
    }

    pub fn push(&self, response: impl Into<String>) {
        self.responses
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push_back(Ok(response.into()));
    }

    pub fn requests(&self) -> Vec<Vec<Message>> {
        self.requests
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn call_count(&self) -> usize {
        self.requests.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

#[async_trait]
impl LlmClient for ScriptedLlmClient {
    async fn complete(&self, messages: &[Message]) -> Result<String, String> {
        self.requests
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(messages.to_vec());
        self.responses
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pop_front()
            .unwrap_or_else(|| Err("no scripted response left".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_replies_with_chat_json() {
        let out = MockLlmClient
            .complete(&[Message::user("hello")])
            .await
            .unwrap();
        let value: serde_json::Value = serde_json::from_str(&out).unwrap();
        assert_eq!(value["action"], "chat");
        assert!(value["reply"].as_str().unwrap().contains("hello"));
    }

    #[tokio::test]
    async fn test_scripted_pops_in_order_and_records() {
        let client = ScriptedLlmClient::new(["one"]);
        client.push_error("boom");
        assert_eq!(client.complete(&[Message::user("a")]).await.unwrap(), "one");
        assert_eq!(client.complete(&[]).await.unwrap_err(), "boom");
        assert!(client.complete(&[]).await.is_err());
        assert_eq!(client.call_count(), 3);
        assert_eq!(client.requests()[0][0].content, "a");
    }
}
