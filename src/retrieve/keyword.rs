use std::path::PathBuf;

use regex::Regex;

use super::{make_preview, Hit};
use crate::error::Result;
use crate::index::{read_records, ArtifactPaths, ChunkRecord};

/// Exact keyword search over the JSONL index.
///
/// The index file is read fresh on every call; there is no shared state and
/// no write path here.
pub struct KeywordRetriever {
    index_path: PathBuf,
}

impl KeywordRetriever {
    pub fn new(paths: &ArtifactPaths) -> Self {
        Self {
            index_path: paths.index(),
        }
    }

    /// Scores every chunk by summed case-insensitive whole-word matches of
    /// the query terms. Zero-score chunks are dropped; ties keep index
    /// insertion order (the sort is stable).
    pub fn search(&self, query: &str, topk: usize) -> Result<Vec<Hit>> {
        let records = read_records(&self.index_path)?;

        let matchers = query
            .split_whitespace()
            .map(|term| Regex::new(&format!(r"(?i)\b{}\b", regex::escape(term))))
            .collect::<std::result::Result<Vec<_>, _>>()?;

        let mut scored: Vec<(usize, &ChunkRecord)> = records
            .iter()
            .filter(|record| !record.text.trim().is_empty())
            .filter_map(|record| {
                let score: usize = matchers
                    .iter()
                    .map(|re| re.find_iter(&record.text).count())
                    .sum();
                (score > 0).then_some((score, record))
            })
            .collect();

        scored.sort_by(|a, b| b.0.cmp(&a.0));
        scored.truncate(topk);

        Ok(scored
            .into_iter()
            .map(|(score, record)| Hit {
                doc_id: record.doc_id.clone(),
                chunk_id: record.chunk_id,
                id: record.id.clone(),
                score: score as f32,
                preview: make_preview(&record.text),
                text: record.text.clone(),
            })
            .collect())
    }
}
