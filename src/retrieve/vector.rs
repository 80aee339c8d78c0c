use std::cmp::Ordering;
use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::OnceCell;

use super::{make_preview, Hit};
use crate::embedder::Embedder;
use crate::error::{RagError, Result};
use crate::index::{l2_normalize, read_records, ArtifactPaths, EmbeddingMeta, IdMapEntry};

/// The embedding matrix, id-map, and chunk texts loaded as one unit.
///
/// Every consistency rule is enforced at load time: byte length must match
/// `rows × dim × 4`, the id-map must align row-for-row, every id must
/// resolve to a keyword record, and the artifact's model identifier must
/// match the query-time embedder. A violation is `MalformedArtifact` —
/// best-effort recovery would risk silently wrong similarity scores.
pub struct VectorIndex {
    pub model_name: String,
    pub rows: usize,
    pub dim: usize,
    matrix: Vec<f32>,
    id_map: Vec<IdMapEntry>,
    texts: Vec<String>,
}

impl VectorIndex {
    pub fn load(paths: &ArtifactPaths, expected_model: &str) -> Result<Self> {
        let meta_path = paths.metadata();
        let matrix_path = paths.embeddings();
        if !meta_path.is_file() || !matrix_path.is_file() {
            return Err(RagError::EmbeddingsMissing {
                dir: paths.root.clone(),
            });
        }

        let meta: EmbeddingMeta = serde_json::from_slice(&fs::read(&meta_path)?)?;
        if meta.model_name != expected_model {
            return Err(RagError::MalformedArtifact {
                reason: format!(
                    "embedding model mismatch: artifacts were built with {:?} but the \
                     query-time model is {:?}; rebuild with `docqa embed`",
                    meta.model_name, expected_model
                ),
            });
        }
        if meta.id_map.len() != meta.rows {
            return Err(RagError::MalformedArtifact {
                reason: format!(
                    "id-map has {} entries but metadata declares {} rows",
                    meta.id_map.len(),
                    meta.rows
                ),
            });
        }

        let bytes = fs::read(&matrix_path)?;
        let expected_bytes = meta.rows * meta.dim * 4;
        if bytes.len() != expected_bytes {
            return Err(RagError::MalformedArtifact {
                reason: format!(
                    "embedding matrix at {} is {} bytes, expected {expected_bytes} \
                     ({} rows x {} dims)",
                    matrix_path.display(),
                    bytes.len(),
                    meta.rows,
                    meta.dim
                ),
            });
        }
        let matrix: Vec<f32> = bytes
            .chunks_exact(4)
            .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
            .collect();

        let records = read_records(&paths.index())?;
        let by_id: HashMap<&str, &str> = records
            .iter()
            .map(|r| (r.id.as_str(), r.text.as_str()))
            .collect();
        let texts = meta
            .id_map
            .iter()
            .map(|entry| {
                by_id
                    .get(entry.id.as_str())
                    .map(|text| (*text).to_string())
                    .ok_or_else(|| RagError::MalformedArtifact {
                        reason: format!(
                            "id-map entry {:?} has no matching keyword-index record; \
                             rebuild both artifacts",
                            entry.id
                        ),
                    })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            model_name: meta.model_name,
            rows: meta.rows,
            dim: meta.dim,
            matrix,
            id_map: meta.id_map,
            texts,
        })
    }

    pub fn row(&self, i: usize) -> &[f32] {
        &self.matrix[i * self.dim..(i + 1) * self.dim]
    }
}

/// Cloneable load-failure sentinel kept in the cache slot so repeated
/// queries fail fast without re-probing the disk.
#[derive(Debug, Clone)]
enum CacheFailure {
    Missing { dir: PathBuf },
    IndexNotBuilt { path: PathBuf },
    Malformed { reason: String },
}

impl CacheFailure {
    fn capture(err: &RagError) -> Self {
        match err {
            RagError::EmbeddingsMissing { dir } => CacheFailure::Missing { dir: dir.clone() },
            RagError::IndexNotBuilt { path } => CacheFailure::IndexNotBuilt { path: path.clone() },
            RagError::MalformedArtifact { reason } => CacheFailure::Malformed {
                reason: reason.clone(),
            },
            other => CacheFailure::Malformed {
                reason: format!("failed to load embedding artifacts: {other}"),
            },
        }
    }

    fn into_error(self) -> RagError {
        match self {
            CacheFailure::Missing { dir } => RagError::EmbeddingsMissing { dir },
            CacheFailure::IndexNotBuilt { path } => RagError::IndexNotBuilt { path },
            CacheFailure::Malformed { reason } => RagError::MalformedArtifact { reason },
        }
    }
}

/// Single-slot memoized vector index with an explicit not-built / built /
/// build-failed tri-state.
///
/// The first caller performs the load; concurrent callers block on the
/// in-flight build and share its outcome. Both success and failure are
/// cached for the lifetime of the slot, so nothing is ever loaded twice.
pub struct VectorCache {
    slot: OnceCell<std::result::Result<Arc<VectorIndex>, CacheFailure>>,
}

impl VectorCache {
    pub const fn new() -> Self {
        Self {
            slot: OnceCell::const_new(),
        }
    }

    pub async fn get_or_build(
        &self,
        paths: &ArtifactPaths,
        expected_model: &str,
    ) -> Result<Arc<VectorIndex>> {
        let outcome = self
            .slot
            .get_or_init(|| async {
                match VectorIndex::load(paths, expected_model) {
                    Ok(index) => {
                        tracing::info!(
                            rows = index.rows,
                            dim = index.dim,
                            model = %index.model_name,
                            "vector index loaded"
                        );
                        Ok(Arc::new(index))
                    }
                    Err(err) => {
                        tracing::warn!(error = %err, "vector index load failed; caching failure");
                        Err(CacheFailure::capture(&err))
                    }
                }
            })
            .await;

        match outcome {
            Ok(index) => Ok(Arc::clone(index)),
            Err(failure) => Err(failure.clone().into_error()),
        }
    }
}

impl Default for VectorCache {
    fn default() -> Self {
        Self::new()
    }
}

/// Process-wide slot shared by every `VectorRetriever` that does not bring
/// its own cache.
static SHARED_CACHE: VectorCache = VectorCache::new();

/// Cosine-similarity search over the embedding matrix.
pub struct VectorRetriever {
    paths: ArtifactPaths,
    embedder: Arc<dyn Embedder>,
    cache: Option<Arc<VectorCache>>,
}

impl VectorRetriever {
    pub fn new(paths: &ArtifactPaths, embedder: Arc<dyn Embedder>) -> Self {
        Self {
            paths: paths.clone(),
            embedder,
            cache: None,
        }
    }

    /// Uses a dedicated cache slot instead of the process-wide one.
    pub fn with_cache(
        paths: &ArtifactPaths,
        embedder: Arc<dyn Embedder>,
        cache: Arc<VectorCache>,
    ) -> Self {
        Self {
            paths: paths.clone(),
            embedder,
            cache: Some(cache),
        }
    }

    fn cache(&self) -> &VectorCache {
        self.cache.as_deref().unwrap_or(&SHARED_CACHE)
    }

    /// Encodes the query into the artifact's vector space and returns the
    /// exact top-`topk` rows by cosine similarity.
    ///
    /// Both sides are unit-normalized, so the dot product is the cosine.
    /// Selection is a partial select of the k best followed by a local sort
    /// of that slice; intra-tie order is unspecified.
    pub async fn search(&self, query: &str, topk: usize) -> Result<Vec<Hit>> {
        let index = self
            .cache()
            .get_or_build(&self.paths, self.embedder.model())
            .await?;

        let k = topk.min(index.rows);
        if k == 0 {
            return Ok(Vec::new());
        }

        let query_vector = self
            .embedder
            .embed(query)
            .await
            .map_err(|e| RagError::Embedding(e.to_string()))?;
        if query_vector.len() != index.dim {
            return Err(RagError::MalformedArtifact {
                reason: format!(
                    "query embedding has {} dims but the matrix has {}",
                    query_vector.len(),
                    index.dim
                ),
            });
        }
        let query_vector = l2_normalize(query_vector);

        let scores: Vec<f32> = (0..index.rows)
            .map(|i| dot(index.row(i), &query_vector))
            .collect();

        Ok(top_k_indices(&scores, k)
            .into_iter()
            .map(|i| {
                let entry = &index.id_map[i];
                let text = &index.texts[i];
                Hit {
                    doc_id: entry.doc_id.clone(),
                    chunk_id: entry.chunk_id,
                    id: entry.id.clone(),
                    score: scores[i],
                    preview: make_preview(text),
                    text: text.clone(),
                }
            })
            .collect())
    }
}

fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

/// Exact top-k by score descending without a full sort: partial-select the
/// k best, then sort only that slice.
fn top_k_indices(scores: &[f32], k: usize) -> Vec<usize> {
    let k = k.min(scores.len());
    if k == 0 {
        return Vec::new();
    }
    let mut indices: Vec<usize> = (0..scores.len()).collect();
    let by_score_desc = |a: &usize, b: &usize| {
        scores[*b]
            .partial_cmp(&scores[*a])
            .unwrap_or(Ordering::Equal)
    };
    if k < indices.len() {
        indices.select_nth_unstable_by(k - 1, by_score_desc);
        indices.truncate(k);
    }
    indices.sort_unstable_by(by_score_desc);
    indices
}
