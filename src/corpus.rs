use std::fs;
use std::path::Path;

use once_cell::sync::Lazy;
use regex::Regex;
use walkdir::WalkDir;

use crate::error::{RagError, Result};

static SLUG_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^a-z0-9]+").expect("valid regex"));

/// A source document handed to the indexer: raw text plus its stable id.
#[derive(Debug, Clone)]
pub struct Document {
    pub doc_id: String,
    pub text: String,
}

/// Derives a stable `doc_id` from a filename: the stem is lowercased and
/// runs of non-alphanumeric characters collapse to a single `_`.
pub fn slugify(filename: &str) -> String {
    let stem = Path::new(filename)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or(filename);
    SLUG_RE
        .replace_all(&stem.to_lowercase(), "_")
        .trim_matches('_')
        .to_string()
}

/// Loads all eligible documents (`*.md`, `*.txt`) directly inside `dir`,
/// sorted by filename. Fails with `EmptyCorpus` when nothing is eligible;
/// existing artifacts are left untouched in that case.
pub fn load_corpus(dir: &Path) -> Result<Vec<Document>> {
    let mut documents = Vec::new();
    let walker = WalkDir::new(dir)
        .min_depth(1)
        .max_depth(1)
        .sort_by_file_name();

    for entry in walker {
        let entry = entry.map_err(|e| {
            RagError::Io(e.into_io_error().unwrap_or_else(|| {
                std::io::Error::new(std::io::ErrorKind::Other, "unreadable corpus entry")
            }))
        })?;
        if !entry.file_type().is_file() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().to_string();
        let ext = Path::new(&name)
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_lowercase());
        if !matches!(ext.as_deref(), Some("md") | Some("txt")) {
            continue;
        }
        let text = fs::read_to_string(entry.path())?;
        documents.push(Document {
            doc_id: slugify(&name),
            text,
        });
    }

    if documents.is_empty() {
        return Err(RagError::EmptyCorpus {
            dir: dir.to_path_buf(),
        });
    }

    tracing::info!(count = documents.len(), dir = %dir.display(), "loaded corpus");
    Ok(documents)
}
