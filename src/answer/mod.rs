mod citations;
mod provider;

pub use citations::{extract_citations, grounding_violations, Citation};
pub use provider::{ChatCompletionsProvider, Generation, Provider, ProviderError};

use std::sync::Arc;
use std::time::{Duration, Instant};

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;

use crate::error::Result;
use crate::retrieve::{collapse_whitespace, Hit, Retriever};

static LABEL_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\[S\d+\]").expect("valid regex"));

/// Trailing disclosure on every answer that was assembled from excerpts
/// rather than generated.
pub const EXTRACTIVE_NOTE: &str = "(extractive, not generated)";

const NO_EXCERPTS_ANSWER: &str = "No relevant excerpts found. (extractive, not generated)";

/// Hard cap on generated answers, in characters.
const MAX_ANSWER_CHARS: usize = 1200;
/// A sentence boundary is only honored for truncation past this point.
const SENTENCE_FLOOR: usize = 900;
/// Characters of each source shown in the prompt.
const PROMPT_SNIPPET_CHARS: usize = 180;
/// How many retrieved chunks feed the extractive fallback.
const FALLBACK_CHUNKS: usize = 3;
/// Sentence cap for the extractive fallback.
const FALLBACK_SENTENCES: usize = 5;

#[derive(Debug, Clone, Serialize)]
pub struct SourceRef {
    pub doc_id: String,
    pub chunk_id: usize,
    pub score: f32,
}

#[derive(Debug, Clone, Serialize)]
pub struct SourceLabel {
    pub doc_id: String,
    pub chunk_id: usize,
}

/// The JSON-shaped result of one question.
///
/// `source_labels` keys are exactly `S1..Sk` in retrieval rank order with
/// `k == sources.len()`; downstream consumers and citation validation both
/// rely on that. `warnings` carries grounding violations and degradation
/// notices alongside a still-usable answer.
#[derive(Debug, Serialize)]
pub struct AnswerPayload {
    pub question: String,
    pub answer: String,
    pub sources: Vec<SourceRef>,
    pub source_labels: serde_json::Map<String, serde_json::Value>,
    pub retrieval_ms: u64,
    pub llm_ms: u64,
    pub model: String,
    pub tokens: u32,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

struct Synthesis {
    answer: String,
    model: String,
    tokens: u32,
    llm_ms: u64,
    generated: bool,
}

/// Builds grounded answers from retrieved chunks.
///
/// The provider is optional; without one every answer is extractive. All
/// provider failures degrade to the extractive path — they never fail the
/// answer operation.
pub struct Synthesizer {
    retriever: Retriever,
    provider: Option<Arc<dyn Provider>>,
    budget: Duration,
}

impl Synthesizer {
    pub fn new(retriever: Retriever, provider: Option<Arc<dyn Provider>>) -> Self {
        Self {
            retriever,
            provider,
            budget: Duration::from_secs(25),
        }
    }

    /// Overrides the end-to-end synthesis budget.
    pub fn with_budget(mut self, budget: Duration) -> Self {
        self.budget = budget;
        self
    }

    pub async fn answer(&self, question: &str, topk: usize) -> Result<AnswerPayload> {
        let question = question.trim();
        let started = Instant::now();

        let retrieval_started = Instant::now();
        let hits = self.retriever.search(question, topk).await?;
        let retrieval_ms = retrieval_started.elapsed().as_millis() as u64;
        tracing::debug!(hits = hits.len(), retrieval_ms, mode = ?self.retriever.mode(), "retrieved");

        let prompt = build_prompt(question, &hits);

        let mut warnings = Vec::new();
        let remaining = self.budget.saturating_sub(started.elapsed());
        let synthesis = self
            .synthesize(&prompt, &hits, remaining, &mut warnings)
            .await;

        if synthesis.generated {
            let cited = extract_citations(&synthesis.answer);
            let violations = grounding_violations(&cited, &hits);
            for violation in &violations {
                tracing::warn!(%violation, "grounding violation");
            }
            warnings.extend(violations);
        }

        let sources = hits
            .iter()
            .map(|hit| SourceRef {
                doc_id: hit.doc_id.clone(),
                chunk_id: hit.chunk_id,
                score: hit.score,
            })
            .collect();
        let mut source_labels = serde_json::Map::new();
        for (i, hit) in hits.iter().enumerate() {
            source_labels.insert(
                format!("S{}", i + 1),
                serde_json::to_value(SourceLabel {
                    doc_id: hit.doc_id.clone(),
                    chunk_id: hit.chunk_id,
                })?,
            );
        }

        Ok(AnswerPayload {
            question: question.to_string(),
            answer: synthesis.answer,
            sources,
            source_labels,
            retrieval_ms,
            llm_ms: synthesis.llm_ms,
            model: synthesis.model,
            tokens: synthesis.tokens,
            warnings,
        })
    }

    async fn synthesize(
        &self,
        prompt: &str,
        hits: &[Hit],
        remaining: Duration,
        warnings: &mut Vec<String>,
    ) -> Synthesis {
        if let Some(provider) = &self.provider {
            let call_started = Instant::now();
            match tokio::time::timeout(remaining, provider.generate(prompt)).await {
                Ok(Ok(generation)) => {
                    let llm_ms = call_started.elapsed().as_millis() as u64;
                    let mut answer = generation.text.trim().to_string();
                    // An uncited factual claim is worse than a minimal
                    // citation: force [S1] when sources exist.
                    if !hits.is_empty() && !LABEL_RE.is_match(&answer) {
                        answer = format!("{} [S1]", answer.trim_end());
                    }
                    answer = truncate_at_sentence(&answer, MAX_ANSWER_CHARS, SENTENCE_FLOOR);
                    return Synthesis {
                        answer,
                        model: generation.model,
                        tokens: generation.tokens,
                        llm_ms,
                        generated: true,
                    };
                }
                Ok(Err(err)) => {
                    tracing::warn!(error = %err, provider = provider.name(), "provider call failed");
                    warnings.push(format!("provider failed: {err}"));
                }
                Err(_) => {
                    tracing::warn!(
                        provider = provider.name(),
                        budget_secs = self.budget.as_secs(),
                        "synthesis budget exceeded"
                    );
                    warnings.push(format!(
                        "synthesis exceeded the {}s budget",
                        self.budget.as_secs()
                    ));
                }
            }
        }
        extractive_answer(hits)
    }
}

/// One numbered line per source, with explicit citation instructions.
fn build_prompt(question: &str, hits: &[Hit]) -> String {
    let mut lines = vec![
        "You are answering strictly from the provided document excerpts.".to_string(),
        "Always cite using [S1], [S2], ... matching the numbered sources below. Do not invent citations.".to_string(),
        "If the answer is not supported by the sources, say it is not supported.".to_string(),
        format!("Question: {question}"),
        "Sources:".to_string(),
    ];
    for (i, hit) in hits.iter().enumerate() {
        let collapsed = collapse_whitespace(&hit.text);
        let snippet: String = collapsed.chars().take(PROMPT_SNIPPET_CHARS).collect();
        let ellipsis = if collapsed.chars().count() > PROMPT_SNIPPET_CHARS {
            "…"
        } else {
            ""
        };
        lines.push(format!(
            "S{} (doc_id:{}, chunk_id:{}): {snippet}{ellipsis}",
            i + 1,
            hit.doc_id,
            hit.chunk_id
        ));
    }
    lines.push("Answer concisely (3-5 sentences), always citing like [S1], [S2].".to_string());
    lines.join("\n")
}

/// Assembles an answer directly from the top retrieved chunks.
fn extractive_answer(hits: &[Hit]) -> Synthesis {
    let snippets: Vec<String> = hits
        .iter()
        .take(FALLBACK_CHUNKS)
        .map(|hit| collapse_whitespace(&hit.text))
        .filter(|text| !text.is_empty())
        .collect();

    let answer = if snippets.is_empty() {
        NO_EXCERPTS_ANSWER.to_string()
    } else {
        let joined = snippets.join(" ");
        let summary = split_sentences(&joined)
            .into_iter()
            .take(FALLBACK_SENTENCES)
            .collect::<Vec<_>>()
            .join(" ");
        format!("{summary}\n\n{EXTRACTIVE_NOTE}")
    };

    Synthesis {
        answer,
        model: "disabled".to_string(),
        tokens: 0,
        llm_ms: 0,
        generated: false,
    }
}

/// Caps `text` at `max_chars`, backing up to the last sentence boundary
/// when one exists past `floor` so the cut never lands mid-sentence there.
fn truncate_at_sentence(text: &str, max_chars: usize, floor: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let prefix: String = text.chars().take(max_chars).collect();
    let last_period = prefix
        .char_indices()
        .enumerate()
        .filter(|(_, (_, c))| *c == '.')
        .map(|(char_pos, (byte_idx, _))| (char_pos, byte_idx))
        .last();
    if let Some((char_pos, byte_idx)) = last_period {
        if char_pos > floor {
            return prefix[..=byte_idx].to_string();
        }
    }
    prefix
}

/// Splits on `.`/`!`/`?` followed by whitespace. Deliberately simple — it
/// only feeds the extractive fallback trim.
fn split_sentences(text: &str) -> Vec<String> {
    let mut sentences = Vec::new();
    let mut start = 0usize;
    let mut chars = text.char_indices().peekable();
    while let Some((_, c)) = chars.next() {
        if matches!(c, '.' | '!' | '?') {
            if let Some(&(next_i, next_c)) = chars.peek() {
                if next_c.is_whitespace() {
                    let sentence = text[start..next_i].trim();
                    if !sentence.is_empty() {
                        sentences.push(sentence.to_string());
                    }
                    start = next_i;
                }
            }
        }
    }
    let tail = text[start..].trim();
    if !tail.is_empty() {
        sentences.push(tail.to_string());
    }
    sentences
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ChunkingConfig;
    use crate::corpus::Document;
    use crate::error::RagError;
    use crate::index::{ArtifactPaths, Indexer};
    use async_trait::async_trait;

    struct FixedProvider {
        text: String,
    }

    #[async_trait]
    impl Provider for FixedProvider {
        fn name(&self) -> &str {
            "fixed"
        }

        async fn generate(&self, _prompt: &str) -> std::result::Result<Generation, ProviderError> {
            Ok(Generation {
                text: self.text.clone(),
                model: "fixed-model".to_string(),
                tokens: 42,
            })
        }
    }

    struct FailingProvider;

    #[async_trait]
    impl Provider for FailingProvider {
        fn name(&self) -> &str {
            "failing"
        }

        async fn generate(&self, _prompt: &str) -> std::result::Result<Generation, ProviderError> {
            Err(ProviderError::Timeout {
                provider: "failing".to_string(),
            })
        }
    }

    struct SlowProvider;

    #[async_trait]
    impl Provider for SlowProvider {
        fn name(&self) -> &str {
            "slow"
        }

        async fn generate(&self, _prompt: &str) -> std::result::Result<Generation, ProviderError> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            unreachable!("the synthesis budget cancels this call")
        }
    }

    fn build_corpus(docs: &[(&str, &str)]) -> (tempfile::TempDir, ArtifactPaths) {
        let dir = tempfile::tempdir().unwrap();
        let paths = ArtifactPaths::new(dir.path().join("idx"));
        let documents: Vec<Document> = docs
            .iter()
            .map(|(doc_id, text)| Document {
                doc_id: doc_id.to_string(),
                text: text.to_string(),
            })
            .collect();
        Indexer::new(&ChunkingConfig::default())
            .build(&documents, &paths)
            .unwrap();
        (dir, paths)
    }

    fn pto_corpus() -> (tempfile::TempDir, ArtifactPaths) {
        build_corpus(&[(
            "pto_policy",
            "PTO accrual: employees accrue 1.5 days per month. Unused days roll over.",
        )])
    }

    #[tokio::test]
    async fn test_answer_payload_shape() {
        let (_dir, paths) = pto_corpus();
        let synthesizer = Synthesizer::new(
            Retriever::keyword(&paths),
            Some(Arc::new(FixedProvider {
                text: "Employees accrue 1.5 days per month [S1].".to_string(),
            })),
        );
        let payload = synthesizer.answer("PTO accrual", 3).await.unwrap();
        assert_eq!(payload.question, "PTO accrual");
        assert_eq!(payload.sources.len(), 1);
        assert_eq!(payload.sources[0].doc_id, "pto_policy");
        assert_eq!(payload.model, "fixed-model");
        assert_eq!(payload.tokens, 42);
        assert!(payload.warnings.is_empty());
    }

    #[tokio::test]
    async fn test_label_invariant() {
        let (_dir, paths) = build_corpus(&[
            ("a", "shared keyword text one"),
            ("b", "shared keyword text two"),
            ("c", "shared keyword text three"),
        ]);
        let synthesizer = Synthesizer::new(Retriever::keyword(&paths), None);
        let payload = synthesizer.answer("shared keyword", 10).await.unwrap();
        let keys: Vec<&String> = payload.source_labels.keys().collect();
        let expected: Vec<String> = (1..=payload.sources.len()).map(|i| format!("S{i}")).collect();
        assert_eq!(keys, expected.iter().collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn test_missing_citation_forces_s1() {
        let (_dir, paths) = pto_corpus();
        let synthesizer = Synthesizer::new(
            Retriever::keyword(&paths),
            Some(Arc::new(FixedProvider {
                text: "Employees accrue 1.5 days per month.".to_string(),
            })),
        );
        let payload = synthesizer.answer("PTO accrual", 3).await.unwrap();
        assert!(payload.answer.ends_with("[S1]"));
    }

    #[tokio::test]
    async fn test_provider_failure_falls_back_to_extractive() {
        let (_dir, paths) = pto_corpus();
        let synthesizer =
            Synthesizer::new(Retriever::keyword(&paths), Some(Arc::new(FailingProvider)));
        let payload = synthesizer.answer("PTO accrual", 3).await.unwrap();
        assert!(payload.answer.ends_with(EXTRACTIVE_NOTE));
        assert_eq!(payload.llm_ms, 0);
        assert_eq!(payload.model, "disabled");
        assert_eq!(payload.tokens, 0);
        assert!(!payload.warnings.is_empty());
    }

    #[tokio::test]
    async fn test_no_provider_is_extractive() {
        let (_dir, paths) = pto_corpus();
        let synthesizer = Synthesizer::new(Retriever::keyword(&paths), None);
        let payload = synthesizer.answer("PTO accrual", 3).await.unwrap();
        assert!(payload.answer.contains("PTO accrual"));
        assert!(payload.answer.ends_with(EXTRACTIVE_NOTE));
        assert_eq!(payload.model, "disabled");
    }

    #[tokio::test]
    async fn test_no_hits_fixed_message() {
        let (_dir, paths) = pto_corpus();
        let synthesizer = Synthesizer::new(Retriever::keyword(&paths), None);
        let payload = synthesizer.answer("quaternion rotation", 3).await.unwrap();
        assert_eq!(payload.answer, NO_EXCERPTS_ANSWER);
        assert!(payload.sources.is_empty());
        assert!(payload.source_labels.is_empty());
    }

    #[tokio::test]
    async fn test_budget_exceeded_degrades() {
        let (_dir, paths) = pto_corpus();
        let synthesizer = Synthesizer::new(Retriever::keyword(&paths), Some(Arc::new(SlowProvider)))
            .with_budget(Duration::from_millis(50));
        let payload = synthesizer.answer("PTO accrual", 3).await.unwrap();
        assert!(payload.answer.ends_with(EXTRACTIVE_NOTE));
        assert_eq!(payload.model, "disabled");
        assert!(payload.warnings.iter().any(|w| w.contains("budget")));
    }

    #[tokio::test]
    async fn test_grounding_violation_is_surfaced_not_dropped() {
        let (_dir, paths) = pto_corpus();
        let synthesizer = Synthesizer::new(
            Retriever::keyword(&paths),
            Some(Arc::new(FixedProvider {
                text: "Days accrue monthly [S1], see also [S7].".to_string(),
            })),
        );
        let payload = synthesizer.answer("PTO accrual", 3).await.unwrap();
        // The answer is still returned, with the violation flagged.
        assert!(payload.answer.contains("[S7]"));
        assert!(payload.warnings.iter().any(|w| w.contains("[S7]")));
    }

    #[tokio::test]
    async fn test_empty_question_rejected() {
        let (_dir, paths) = pto_corpus();
        let synthesizer = Synthesizer::new(Retriever::keyword(&paths), None);
        let err = synthesizer.answer("  ", 3).await.unwrap_err();
        assert!(matches!(err, RagError::EmptyQuery));
    }

    #[test]
    fn test_build_prompt_numbering() {
        let hits = vec![
            Hit {
                doc_id: "pto_policy".to_string(),
                chunk_id: 1,
                id: "pto_policy::chunk-1".to_string(),
                score: 2.0,
                preview: String::new(),
                text: "PTO accrual:\n1.5 days per month.".to_string(),
            },
            Hit {
                doc_id: "leave".to_string(),
                chunk_id: 4,
                id: "leave::chunk-4".to_string(),
                score: 1.0,
                preview: String::new(),
                text: "Parental leave lasts 16 weeks.".to_string(),
            },
        ];
        let prompt = build_prompt("How does PTO accrue?", &hits);
        assert!(prompt.contains("Question: How does PTO accrue?"));
        assert!(prompt.contains("S1 (doc_id:pto_policy, chunk_id:1): PTO accrual: 1.5 days per month."));
        assert!(prompt.contains("S2 (doc_id:leave, chunk_id:4):"));
    }

    #[test]
    fn test_prompt_snippet_truncated() {
        let hits = vec![Hit {
            doc_id: "long".to_string(),
            chunk_id: 1,
            id: "long::chunk-1".to_string(),
            score: 1.0,
            preview: String::new(),
            text: "word ".repeat(100),
        }];
        let prompt = build_prompt("q", &hits);
        let source_line = prompt
            .lines()
            .find(|l| l.starts_with("S1 "))
            .unwrap();
        assert!(source_line.ends_with('…'));
    }

    #[test]
    fn test_truncate_at_sentence_boundary() {
        let mut text = "a".repeat(950);
        text.push_str(". tail sentence that runs well past the cap ");
        text.push_str(&"b".repeat(400));
        let truncated = truncate_at_sentence(&text, 1200, 900);
        assert_eq!(truncated.chars().count(), 951);
        assert!(truncated.ends_with('.'));
    }

    #[test]
    fn test_truncate_hard_when_no_late_boundary() {
        let text = "c".repeat(2000);
        let truncated = truncate_at_sentence(&text, 1200, 900);
        assert_eq!(truncated.chars().count(), 1200);
    }

    #[test]
    fn test_truncate_short_text_untouched() {
        let text = "short answer. done.";
        assert_eq!(truncate_at_sentence(text, 1200, 900), text);
    }

    #[test]
    fn test_split_sentences() {
        let sentences = split_sentences("First rule. Second rule! Third? Fourth trails");
        assert_eq!(
            sentences,
            vec!["First rule.", "Second rule!", "Third?", "Fourth trails"]
        );
    }

    #[test]
    fn test_extractive_uses_first_three_chunks_and_five_sentences() {
        let hits: Vec<Hit> = (0..5)
            .map(|n| Hit {
                doc_id: format!("d{n}"),
                chunk_id: 1,
                id: format!("d{n}::chunk-1"),
                score: 1.0,
                preview: String::new(),
                text: format!("Sentence one of {n}. Sentence two of {n}."),
            })
            .collect();
        let synthesis = extractive_answer(&hits);
        assert!(synthesis.answer.contains("of 0"));
        assert!(synthesis.answer.contains("of 2"));
        // Chunks beyond the third never appear.
        assert!(!synthesis.answer.contains("of 3"));
        // Five-sentence cap: chunk 2's second sentence is cut.
        let body = synthesis.answer.replace(EXTRACTIVE_NOTE, "");
        assert_eq!(split_sentences(body.trim()).len(), 5);
        assert_eq!(synthesis.llm_ms, 0);
        assert_eq!(synthesis.model, "disabled");
    }
}
