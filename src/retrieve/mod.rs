mod keyword;
mod vector;

pub use keyword::KeywordRetriever;
pub use vector::{VectorCache, VectorIndex, VectorRetriever};

use std::sync::Arc;

use serde::Serialize;

use crate::config::RetrievalMode;
use crate::embedder::Embedder;
use crate::error::{RagError, Result};
use crate::index::ArtifactPaths;

/// Characters kept in a hit preview, after whitespace collapsing.
const PREVIEW_CHARS: usize = 160;

/// One ranked retrieval result.
///
/// Score semantics depend on the mode that produced the hit: keyword scores
/// are whole-word term-frequency counts, vector scores are cosine
/// similarities in `[-1, 1]`. The two are never comparable.
#[derive(Debug, Clone, Serialize)]
pub struct Hit {
    pub doc_id: String,
    pub chunk_id: usize,
    pub id: String,
    pub score: f32,
    pub preview: String,
    pub text: String,
}

/// Retrieval behavior, resolved once from configuration.
///
/// Keyword mode guarantees stable tie order (insertion order of the index);
/// vector mode does not, and callers must not rely on intra-tie order there.
pub enum Retriever {
    Keyword(KeywordRetriever),
    Vector(VectorRetriever),
}

impl Retriever {
    pub fn keyword(paths: &ArtifactPaths) -> Self {
        Retriever::Keyword(KeywordRetriever::new(paths))
    }

    pub fn vector(paths: &ArtifactPaths, embedder: Arc<dyn Embedder>) -> Self {
        Retriever::Vector(VectorRetriever::new(paths, embedder))
    }

    pub fn from_mode(
        mode: RetrievalMode,
        paths: &ArtifactPaths,
        embedder: Arc<dyn Embedder>,
    ) -> Self {
        match mode {
            RetrievalMode::Keyword => Self::keyword(paths),
            RetrievalMode::Vector => Self::vector(paths, embedder),
        }
    }

    pub fn mode(&self) -> RetrievalMode {
        match self {
            Retriever::Keyword(_) => RetrievalMode::Keyword,
            Retriever::Vector(_) => RetrievalMode::Vector,
        }
    }

    /// Returns the top-`topk` hits for `query`.
    ///
    /// An empty or whitespace-only query is rejected before any artifact is
    /// touched. Missing artifacts surface as `IndexNotBuilt` (keyword) or
    /// `EmbeddingsMissing` (vector), never as an empty result set.
    pub async fn search(&self, query: &str, topk: usize) -> Result<Vec<Hit>> {
        if query.trim().is_empty() {
            return Err(RagError::EmptyQuery);
        }
        match self {
            Retriever::Keyword(retriever) => retriever.search(query, topk),
            Retriever::Vector(retriever) => retriever.search(query, topk).await,
        }
    }
}

/// Collapses runs of whitespace to single spaces.
pub(crate) fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Short non-owning preview of a chunk: whitespace-collapsed, first ~160
/// characters.
pub(crate) fn make_preview(text: &str) -> String {
    collapse_whitespace(text).chars().take(PREVIEW_CHARS).collect()
}
