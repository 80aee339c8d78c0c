use std::fs;
use std::path::Path;

use clap::ValueEnum;
use serde::Deserialize;

use crate::error::Result;

/// Top-level configuration, loaded from an optional `docqa.toml` in the
/// corpus directory with environment-variable overrides on top.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub chunking: ChunkingConfig,
    pub retrieval: RetrievalConfig,
    pub embedding: EmbeddingConfig,
    pub provider: ProviderConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ChunkingConfig {
    pub max_chars: usize,
    pub overlap: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            max_chars: 600,
            overlap: 100,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum RetrievalMode {
    Keyword,
    Vector,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetrievalConfig {
    pub mode: RetrievalMode,
    pub topk: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            mode: RetrievalMode::Keyword,
            topk: 4,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    pub endpoint: String,
    pub model: String,
    pub dimensions: usize,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://localhost:11434".to_string(),
            model: "nomic-embed-text".to_string(),
            dimensions: 768,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    Groq,
    Openai,
    Openrouter,
}

impl ProviderKind {
    /// Environment variable holding this vendor's API key.
    pub fn env_var(self) -> &'static str {
        match self {
            ProviderKind::Groq => "GROQ_API_KEY",
            ProviderKind::Openai => "OPENAI_API_KEY",
            ProviderKind::Openrouter => "OPENROUTER_API_KEY",
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    /// Explicit vendor selection; when unset the first vendor with an API key
    /// in the environment is used.
    pub provider: Option<ProviderKind>,
    /// Vendor model override; each vendor has a sensible default.
    pub model: Option<String>,
    pub max_tokens: u32,
    pub connect_timeout_secs: u64,
    pub request_timeout_secs: u64,
    /// End-to-end synthesis budget enforced at the synthesizer boundary.
    pub budget_secs: u64,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            provider: None,
            model: None,
            max_tokens: 512,
            connect_timeout_secs: 5,
            request_timeout_secs: 15,
            budget_secs: 25,
        }
    }
}

impl ProviderConfig {
    /// Resolves the vendor to use: explicit setting first, otherwise the
    /// first vendor whose API key is present in the environment.
    pub fn resolve(&self) -> Option<ProviderKind> {
        if let Some(kind) = self.provider {
            return Some(kind);
        }
        [
            ProviderKind::Groq,
            ProviderKind::Openai,
            ProviderKind::Openrouter,
        ]
        .into_iter()
        .find(|kind| {
            std::env::var(kind.env_var())
                .map(|v| !v.trim().is_empty())
                .unwrap_or(false)
        })
    }
}

impl Config {
    /// Loads `docqa.toml` from `dir` if present, then applies environment
    /// overrides (`DOCQA_RETRIEVAL_MODE`, `DOCQA_EMBED_ENDPOINT`,
    /// `DOCQA_EMBED_MODEL`).
    pub fn load(dir: &Path) -> Result<Self> {
        let path = dir.join("docqa.toml");
        let mut config = if path.is_file() {
            toml::from_str(&fs::read_to_string(&path)?)?
        } else {
            Config::default()
        };

        if let Ok(mode) = std::env::var("DOCQA_RETRIEVAL_MODE") {
            match mode.to_lowercase().as_str() {
                "keyword" => config.retrieval.mode = RetrievalMode::Keyword,
                "vector" => config.retrieval.mode = RetrievalMode::Vector,
                other => tracing::warn!("ignoring unknown DOCQA_RETRIEVAL_MODE {other:?}"),
            }
        }
        if let Ok(endpoint) = std::env::var("DOCQA_EMBED_ENDPOINT") {
            config.embedding.endpoint = endpoint;
        }
        if let Ok(model) = std::env::var("DOCQA_EMBED_MODEL") {
            config.embedding.model = model;
        }

        Ok(config)
    }
}
