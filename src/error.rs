use std::path::PathBuf;

use thiserror::Error;

/// Errors produced by the indexing, retrieval, and synthesis pipeline.
///
/// Corpus and artifact errors are fatal to the operation that raised them and
/// carry enough context to drive a rebuild. Provider failures are handled
/// separately (see `answer::ProviderError`) and never surface here.
#[derive(Debug, Error)]
pub enum RagError {
    #[error("no eligible documents (*.md, *.txt) in {dir}")]
    EmptyCorpus { dir: PathBuf },

    #[error("keyword index not built at {path}; run `docqa index` first")]
    IndexNotBuilt { path: PathBuf },

    #[error("embedding artifacts missing under {dir}; run `docqa embed` first")]
    EmbeddingsMissing { dir: PathBuf },

    #[error("malformed artifact: {reason}")]
    MalformedArtifact { reason: String },

    #[error("query is empty")]
    EmptyQuery,

    #[error("embedding request failed: {0}")]
    Embedding(String),

    #[error("invalid config: {0}")]
    Config(#[from] toml::de::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Pattern(#[from] regex::Error),
}

pub type Result<T> = std::result::Result<T, RagError>;
