use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::{ProviderConfig, ProviderKind};

const BODY_PREVIEW_CHARS: usize = 200;

/// Why a language-model call produced no usable answer.
///
/// Every variant is recovered locally by the synthesizer's extractive
/// fallback; none of them fails the overall answer operation.
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("{provider} is not configured; set {env_var}")]
    NotConfigured { provider: String, env_var: String },

    #[error("{provider} request timed out")]
    Timeout { provider: String },

    #[error("{provider} returned HTTP {status}: {body}")]
    Http {
        provider: String,
        status: u16,
        body: String,
    },

    #[error("{provider} network error: {message}")]
    Network { provider: String, message: String },

    #[error("{provider} returned a malformed response: {message}")]
    Malformed { provider: String, message: String },
}

/// A successful generation: the raw text plus reporting metadata.
#[derive(Debug, Clone)]
pub struct Generation {
    pub text: String,
    pub model: String,
    pub tokens: u32,
}

/// One language-model vendor. Implementations must carry explicit connect
/// and request timeouts and must never retry on their own; a failed or slow
/// call degrades at the synthesizer instead of hanging the caller.
#[async_trait]
pub trait Provider: Send + Sync {
    fn name(&self) -> &str;
    async fn generate(&self, prompt: &str) -> Result<Generation, ProviderError>;
}

#[derive(Serialize)]
struct ChatMessage {
    role: &'static str,
    content: String,
}

#[derive(Serialize)]
struct ChatRequest {
    model: String,
    max_tokens: u32,
    temperature: f32,
    messages: Vec<ChatMessage>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Deserialize)]
struct ChatChoiceMessage {
    content: Option<String>,
}

#[derive(Deserialize)]
struct ChatUsage {
    total_tokens: Option<u32>,
}

#[derive(Deserialize)]
struct ChatResponse {
    model: Option<String>,
    choices: Vec<ChatChoice>,
    usage: Option<ChatUsage>,
}

/// OpenAI-compatible chat-completions client; Groq, OpenAI, and OpenRouter
/// all speak this shape, so each vendor is a thin constructor over it.
pub struct ChatCompletionsProvider {
    name: &'static str,
    endpoint: &'static str,
    model: String,
    api_key_var: &'static str,
    max_tokens: u32,
    client: Client,
}

impl ChatCompletionsProvider {
    fn build(
        name: &'static str,
        endpoint: &'static str,
        default_model: &str,
        api_key_var: &'static str,
        config: &ProviderConfig,
    ) -> Self {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .expect("Failed to create HTTP client");

        Self {
            name,
            endpoint,
            model: config
                .model
                .clone()
                .unwrap_or_else(|| default_model.to_string()),
            api_key_var,
            max_tokens: config.max_tokens,
            client,
        }
    }

    pub fn groq(config: &ProviderConfig) -> Self {
        Self::build(
            "groq",
            "https://api.groq.com/openai/v1/chat/completions",
            "llama-3.1-8b-instant",
            "GROQ_API_KEY",
            config,
        )
    }

    pub fn openai(config: &ProviderConfig) -> Self {
        Self::build(
            "openai",
            "https://api.openai.com/v1/chat/completions",
            "gpt-4o-mini",
            "OPENAI_API_KEY",
            config,
        )
    }

    pub fn openrouter(config: &ProviderConfig) -> Self {
        Self::build(
            "openrouter",
            "https://openrouter.ai/api/v1/chat/completions",
            "openrouter/auto",
            "OPENROUTER_API_KEY",
            config,
        )
    }

    /// Resolves the configured vendor, or `None` when no vendor is selected
    /// and no API key is present — the synthesizer then answers extractively.
    pub fn from_config(config: &ProviderConfig) -> Option<Box<dyn Provider>> {
        let provider: Box<dyn Provider> = match config.resolve()? {
            ProviderKind::Groq => Box::new(Self::groq(config)),
            ProviderKind::Openai => Box::new(Self::openai(config)),
            ProviderKind::Openrouter => Box::new(Self::openrouter(config)),
        };
        Some(provider)
    }
}

#[async_trait]
impl Provider for ChatCompletionsProvider {
    fn name(&self) -> &str {
        self.name
    }

    async fn generate(&self, prompt: &str) -> Result<Generation, ProviderError> {
        let api_key = std::env::var(self.api_key_var)
            .ok()
            .map(|k| k.trim().to_string())
            .filter(|k| !k.is_empty())
            .ok_or_else(|| ProviderError::NotConfigured {
                provider: self.name.to_string(),
                env_var: self.api_key_var.to_string(),
            })?;

        let request = ChatRequest {
            model: self.model.clone(),
            max_tokens: self.max_tokens,
            temperature: 0.2,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: "You are a careful retrieval-grounded answerer. Only use the \
                              provided excerpts. Always include the numbered source markers \
                              like [S1], [S2] that the prompt provides. If the question is \
                              unsupported by the excerpts, say so explicitly."
                        .to_string(),
                },
                ChatMessage {
                    role: "user",
                    content: prompt.to_string(),
                },
            ],
        };

        let response = self
            .client
            .post(self.endpoint)
            .bearer_auth(api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ProviderError::Timeout {
                        provider: self.name.to_string(),
                    }
                } else {
                    ProviderError::Network {
                        provider: self.name.to_string(),
                        message: e.to_string(),
                    }
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::Http {
                provider: self.name.to_string(),
                status: status.as_u16(),
                body: body.chars().take(BODY_PREVIEW_CHARS).collect(),
            });
        }

        let data: ChatResponse =
            response
                .json()
                .await
                .map_err(|e| ProviderError::Malformed {
                    provider: self.name.to_string(),
                    message: e.to_string(),
                })?;

        let text = data
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .filter(|text| !text.trim().is_empty())
            .ok_or_else(|| ProviderError::Malformed {
                provider: self.name.to_string(),
                message: "response contained no completion text".to_string(),
            })?;

        Ok(Generation {
            text,
            model: data.model.unwrap_or_else(|| self.model.clone()),
            tokens: data
                .usage
                .and_then(|usage| usage.total_tokens)
                .unwrap_or(0),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vendor_defaults() {
        let config = ProviderConfig::default();
        let groq = ChatCompletionsProvider::groq(&config);
        assert_eq!(groq.name(), "groq");
        assert_eq!(groq.model, "llama-3.1-8b-instant");

        let openai = ChatCompletionsProvider::openai(&config);
        assert_eq!(openai.api_key_var, "OPENAI_API_KEY");
    }

    #[test]
    fn test_model_override() {
        let config = ProviderConfig {
            model: Some("llama-3.3-70b-versatile".to_string()),
            ..Default::default()
        };
        let groq = ChatCompletionsProvider::groq(&config);
        assert_eq!(groq.model, "llama-3.3-70b-versatile");
    }

    #[tokio::test]
    async fn test_generate_without_key_is_not_configured() {
        let config = ProviderConfig::default();
        let provider = ChatCompletionsProvider::build(
            "test-vendor",
            "https://invalid.example/v1/chat/completions",
            "test-model",
            "DOCQA_TEST_UNSET_KEY",
            &config,
        );
        let err = provider.generate("prompt").await.unwrap_err();
        assert!(matches!(err, ProviderError::NotConfigured { .. }));
    }
}
