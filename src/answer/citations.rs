use once_cell::sync::Lazy;
use regex::Regex;

use crate::retrieve::Hit;

static LABEL_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\[S(\d+)\]").expect("valid regex"));
static PAIR_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"([A-Za-z0-9_-]+)#(\d+)").expect("valid regex"));

/// A citation token pulled out of free-form model text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Citation {
    /// `[S3]`-style marker referencing a numbered prompt source.
    Label(usize),
    /// `doc_id#chunk_id`-style reference.
    Pair { doc_id: String, chunk_id: usize },
}

/// Scans answer text for `[S<n>]` markers and `ident#n` pairs.
///
/// The result is untrusted input: the model can cite anything, so every
/// extracted citation must be validated against the sources that were
/// actually in the prompt.
pub fn extract_citations(text: &str) -> Vec<Citation> {
    let mut citations = Vec::new();
    for captures in LABEL_RE.captures_iter(text) {
        if let Ok(n) = captures[1].parse::<usize>() {
            citations.push(Citation::Label(n));
        }
    }
    for captures in PAIR_RE.captures_iter(text) {
        if let Ok(chunk_id) = captures[2].parse::<usize>() {
            citations.push(Citation::Pair {
                doc_id: captures[1].to_string(),
                chunk_id,
            });
        }
    }
    citations
}

/// Checks every citation against the retrieved hits of this call.
///
/// Returns one message per violation; an empty result means every citation
/// is grounded. Violations are surfaced to the caller, never dropped.
pub fn grounding_violations(citations: &[Citation], hits: &[Hit]) -> Vec<String> {
    let mut violations = Vec::new();
    for citation in citations {
        match citation {
            Citation::Label(n) => {
                if *n < 1 || *n > hits.len() {
                    violations.push(format!(
                        "answer cites [S{n}] but only {} sources were provided",
                        hits.len()
                    ));
                }
            }
            Citation::Pair { doc_id, chunk_id } => {
                let known = hits
                    .iter()
                    .any(|hit| hit.doc_id == *doc_id && hit.chunk_id == *chunk_id);
                if !known {
                    violations.push(format!(
                        "answer cites {doc_id}#{chunk_id}, which is not among the retrieved sources"
                    ));
                }
            }
        }
    }
    violations
}
