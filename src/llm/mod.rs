//! LLM 层：推理服务客户端抽象与实现（OpenAI 兼容 / DeepSeek / Mock / Scripted）

pub mod message;
pub mod mock;
pub mod openai;
pub mod traits;

use std::sync::Arc;
use std::time::Duration;

use crate::config::AppConfig;

pub use message::{Message, Role};
pub use mock::{MockLlmClient, ScriptedLlmClient};
pub use openai::{OpenAiClient, TokenUsage, DEEPSEEK_BASE_URL, DEEPSEEK_CHAT};
pub use traits::LlmClient;

/// 根据配置与环境变量选择后端：有 DeepSeek Key（或配置为 deepseek 且仅有 OpenAI Key）走 DeepSeek，
/// 有 OpenAI Key 走 OpenAI 兼容端点，provider = "mock" 或都没有时回退 Mock
pub fn create_llm_from_config(cfg: &AppConfig) -> Arc<dyn LlmClient> {
    let provider = cfg.llm.provider.to_lowercase();
    let timeout = Duration::from_secs(cfg.llm.timeouts.request);
    if provider == "mock" {
        tracing::info!("Using Mock LLM (configured)");
        return Arc::new(MockLlmClient);
    }
    let use_deepseek = std::env::var("DEEPSEEK_API_KEY").is_ok()
        || (provider == "deepseek" && std::env::var("OPENAI_API_KEY").is_ok());
    let use_openai = std::env::var("OPENAI_API_KEY").is_ok() && provider != "deepseek";

    if use_deepseek {
        tracing::info!("Using DeepSeek LLM ({})", cfg.llm.model);
        Arc::new(OpenAiClient::deepseek(Some(&cfg.llm.model)).with_request_timeout(timeout))
    } else if use_openai {
        let base = cfg.llm.base_url.as_deref();
        tracing::info!("Using OpenAI-compatible LLM ({})", cfg.llm.model);
        Arc::new(
            OpenAiClient::new(
                base,
                &cfg.llm.model,
                std::env::var("OPENAI_API_KEY").ok().as_deref(),
            )
            .with_request_timeout(timeout),
        )
    } else {
        tracing::warn!("No API key set or provider unknown, using Mock LLM");
        Arc::new(MockLlmClient)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_provider_ignores_api_keys() {
        let mut cfg = AppConfig::default();
        cfg.llm.provider = "Mock".to_string();
        let llm = create_llm_from_config(&cfg);
        let out = llm.complete(&[Message::user("hi")]).await.unwrap();
        assert!(out.contains("\"chat\""));
        assert_eq!(llm.token_usage(), (0, 0, 0));
    }
}
