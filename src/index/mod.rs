pub mod embed;

pub use embed::{build_embeddings, l2_normalize, EmbedReport, EmbeddingMeta, IdMapEntry};

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::chunker::split_with_overlap;
use crate::config::ChunkingConfig;
use crate::corpus::Document;
use crate::error::{RagError, Result};

static WORD_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\w+").expect("valid regex"));

/// One keyword-index record, stored as a single JSON line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkRecord {
    /// Globally unique: `"{doc_id}::chunk-{chunk_id}"`.
    pub id: String,
    pub doc_id: String,
    /// 1-based position within the document.
    pub chunk_id: usize,
    pub text: String,
    pub char_count: usize,
    pub approx_token_count: usize,
}

/// Locations of the persisted artifacts under one root directory.
#[derive(Debug, Clone)]
pub struct ArtifactPaths {
    pub root: PathBuf,
}

impl ArtifactPaths {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Default layout: artifacts live in `.docqa/` under the corpus dir.
    pub fn for_corpus(corpus_dir: &Path, output_dir: &str) -> Self {
        Self::new(corpus_dir.join(output_dir))
    }

    pub fn index(&self) -> PathBuf {
        self.root.join("index.jsonl")
    }

    pub fn embeddings(&self) -> PathBuf {
        self.root.join("embeddings.f32")
    }

    pub fn metadata(&self) -> PathBuf {
        self.root.join("meta.json")
    }
}

#[derive(Debug)]
pub struct IndexReport {
    pub documents: usize,
    pub chunks: usize,
    pub path: PathBuf,
}

/// Builds the keyword index: chunks every document and writes one JSON
/// record per chunk, in document order then chunk order.
///
/// A rebuild replaces the index wholesale; there is no incremental path.
pub struct Indexer {
    chunking: ChunkingConfig,
}

impl Indexer {
    pub fn new(chunking: &ChunkingConfig) -> Self {
        Self {
            chunking: chunking.clone(),
        }
    }

    pub fn build(&self, documents: &[Document], paths: &ArtifactPaths) -> Result<IndexReport> {
        if documents.is_empty() {
            return Err(RagError::EmptyCorpus {
                dir: paths.root.clone(),
            });
        }

        let mut records = Vec::new();
        for doc in documents {
            let chunks =
                split_with_overlap(&doc.text, self.chunking.max_chars, self.chunking.overlap);
            let mut chunk_id = 0usize;
            for text in chunks {
                // Whitespace-only chunks are excluded here and from the
                // embedding build alike, keeping both artifacts aligned.
                if text.trim().is_empty() {
                    continue;
                }
                chunk_id += 1;
                records.push(ChunkRecord {
                    id: format!("{}::chunk-{}", doc.doc_id, chunk_id),
                    doc_id: doc.doc_id.clone(),
                    chunk_id,
                    char_count: text.chars().count(),
                    approx_token_count: rough_token_count(&text),
                    text,
                });
            }
        }

        let path = paths.index();
        let mut body = Vec::new();
        for record in &records {
            serde_json::to_writer(&mut body, record)?;
            body.push(b'\n');
        }
        write_atomic(&path, &body)?;

        tracing::info!(
            documents = documents.len(),
            chunks = records.len(),
            path = %path.display(),
            "keyword index built"
        );
        Ok(IndexReport {
            documents: documents.len(),
            chunks: records.len(),
            path,
        })
    }
}

/// Whitespace/word-boundary token counting. A rough proxy for model tokens,
/// not a real tokenizer.
pub fn rough_token_count(text: &str) -> usize {
    WORD_RE.find_iter(text).count()
}

/// Reads all records from a keyword index file.
///
/// A missing file is `IndexNotBuilt`, which is distinct from an index with
/// zero matches for a query.
pub fn read_records(path: &Path) -> Result<Vec<ChunkRecord>> {
    if !path.is_file() {
        return Err(RagError::IndexNotBuilt {
            path: path.to_path_buf(),
        });
    }
    let mut records = Vec::new();
    for line in fs::read_to_string(path)?.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        records.push(serde_json::from_str(line)?);
    }
    Ok(records)
}

/// Writes `bytes` to a temp file next to `path`, then renames it into place,
/// so concurrent readers never observe a partially-written artifact.
pub(crate) fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let temp = path.with_extension("tmp");
    let mut file = fs::File::create(&temp)?;
    file.write_all(bytes)?;
    file.sync_all()?;
    fs::rename(&temp, path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(doc_id: &str, text: &str) -> Document {
        Document {
            doc_id: doc_id.to_string(),
            text: text.to_string(),
        }
    }

    #[test]
    fn test_build_writes_records_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let paths = ArtifactPaths::new(dir.path().join("idx"));
        let indexer = Indexer::new(&ChunkingConfig::default());

        let docs = vec![
            doc("alpha", "First policy text."),
            doc("beta", "Second policy text."),
        ];
        let report = indexer.build(&docs, &paths).unwrap();
        assert_eq!(report.documents, 2);
        assert_eq!(report.chunks, 2);

        let records = read_records(&paths.index()).unwrap();
        assert_eq!(records[0].id, "alpha::chunk-1");
        assert_eq!(records[0].chunk_id, 1);
        assert_eq!(records[1].id, "beta::chunk-1");
    }

    #[test]
    fn test_build_multi_chunk_ids_are_sequential() {
        let dir = tempfile::tempdir().unwrap();
        let paths = ArtifactPaths::new(dir.path().join("idx"));
        let indexer = Indexer::new(&ChunkingConfig {
            max_chars: 120,
            overlap: 20,
        });

        let body = (0..30)
            .map(|n| format!("sentence number {n}."))
            .collect::<Vec<_>>()
            .join(" ");
        let report = indexer.build(&[doc("handbook", &body)], &paths).unwrap();
        assert!(report.chunks > 1);

        let records = read_records(&paths.index()).unwrap();
        for (i, record) in records.iter().enumerate() {
            assert_eq!(record.chunk_id, i + 1);
            assert_eq!(record.id, format!("handbook::chunk-{}", i + 1));
            assert_eq!(record.char_count, record.text.chars().count());
        }
    }

    #[test]
    fn test_build_empty_corpus() {
        let dir = tempfile::tempdir().unwrap();
        let paths = ArtifactPaths::new(dir.path().join("idx"));
        let indexer = Indexer::new(&ChunkingConfig::default());
        let err = indexer.build(&[], &paths).unwrap_err();
        assert!(matches!(err, RagError::EmptyCorpus { .. }));
        assert!(!paths.index().exists());
    }

    #[test]
    fn test_rebuild_replaces_index() {
        let dir = tempfile::tempdir().unwrap();
        let paths = ArtifactPaths::new(dir.path().join("idx"));
        let indexer = Indexer::new(&ChunkingConfig::default());

        indexer.build(&[doc("a", "old text")], &paths).unwrap();
        indexer.build(&[doc("b", "new text")], &paths).unwrap();

        let records = read_records(&paths.index()).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].doc_id, "b");
    }

    #[test]
    fn test_rough_token_count() {
        assert_eq!(rough_token_count("PTO accrual: 1.5 days per month."), 7);
        assert_eq!(rough_token_count(""), 0);
        assert_eq!(rough_token_count("   \n\t "), 0);
    }

    #[test]
    fn test_read_records_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = read_records(&dir.path().join("nope.jsonl")).unwrap_err();
        assert!(matches!(err, RagError::IndexNotBuilt { .. }));
    }
}
