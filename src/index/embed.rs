use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{read_records, write_atomic, ArtifactPaths};
use crate::embedder::Embedder;
use crate::error::{RagError, Result};

const BATCH_SIZE: usize = 32;

/// Division guard for zero vectors.
const NORM_EPSILON: f32 = 1e-12;

/// One id-map entry, aligned to the embedding-matrix row of the same index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IdMapEntry {
    pub id: String,
    pub doc_id: String,
    pub chunk_id: usize,
}

/// Self-describing metadata for the embedding artifacts. Read at query time
/// to pick a compatible embedding model; a model mismatch is a hard error.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingMeta {
    pub model_name: String,
    pub rows: usize,
    pub dim: usize,
    pub built_at: DateTime<Utc>,
    pub source_index: String,
    pub embeddings_file: String,
    pub id_map: Vec<IdMapEntry>,
}

#[derive(Debug)]
pub struct EmbedReport {
    pub rows: usize,
    pub dim: usize,
    /// Chunks excluded for having whitespace-only text.
    pub skipped: usize,
}

/// Builds the embedding artifacts from an existing keyword index: encodes
/// every chunk with non-empty text, L2-normalizes each row, and persists the
/// matrix, id-map, and model identifier as an aligned triple.
///
/// There is no partial re-embedding; any change to chunk text means a full
/// rebuild of both artifacts.
pub async fn build_embeddings(
    paths: &ArtifactPaths,
    embedder: &dyn Embedder,
) -> Result<EmbedReport> {
    let records = read_records(&paths.index())?;

    let mut texts = Vec::new();
    let mut id_map = Vec::new();
    let mut skipped = 0usize;
    for record in &records {
        // Same exclusion rule as the keyword path: whitespace-only text
        // never reaches the matrix or the id-map.
        if record.text.trim().is_empty() {
            skipped += 1;
            continue;
        }
        texts.push(record.text.clone());
        id_map.push(IdMapEntry {
            id: record.id.clone(),
            doc_id: record.doc_id.clone(),
            chunk_id: record.chunk_id,
        });
    }

    let dim = embedder.dimensions();
    let mut rows: Vec<Vec<f32>> = Vec::with_capacity(texts.len());
    for batch in texts.chunks(BATCH_SIZE) {
        let vectors = embedder
            .embed_batch(batch)
            .await
            .map_err(|e| RagError::Embedding(e.to_string()))?;
        if vectors.len() != batch.len() {
            return Err(RagError::Embedding(format!(
                "embedder returned {} vectors for a batch of {}",
                vectors.len(),
                batch.len()
            )));
        }
        for vector in vectors {
            if vector.len() != dim {
                return Err(RagError::Embedding(format!(
                    "embedder returned a {}-dim vector, expected {dim}",
                    vector.len()
                )));
            }
            rows.push(l2_normalize(vector));
        }
        tracing::debug!(embedded = rows.len(), total = texts.len(), "embedding batch done");
    }

    let mut bytes = Vec::with_capacity(rows.len() * dim * 4);
    for row in &rows {
        for value in row {
            bytes.extend_from_slice(&value.to_le_bytes());
        }
    }
    write_atomic(&paths.embeddings(), &bytes)?;

    let meta = EmbeddingMeta {
        model_name: embedder.model().to_string(),
        rows: rows.len(),
        dim,
        built_at: Utc::now(),
        source_index: paths.index().display().to_string(),
        embeddings_file: paths.embeddings().display().to_string(),
        id_map,
    };
    write_atomic(&paths.metadata(), &serde_json::to_vec_pretty(&meta)?)?;

    tracing::info!(
        rows = meta.rows,
        dim = meta.dim,
        model = %meta.model_name,
        skipped,
        "embedding artifacts built"
    );
    Ok(EmbedReport {
        rows: meta.rows,
        dim,
        skipped,
    })
}

/// Scales `v` to unit length; `v / (||v|| + ε)` so a zero vector maps to a
/// zero vector instead of dividing by zero.
pub fn l2_normalize(mut v: Vec<f32>) -> Vec<f32> {
    let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt() + NORM_EPSILON;
    for x in &mut v {
        *x /= norm;
    }
    v
}
