use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use console::{style, Emoji};

use crate::answer::{ChatCompletionsProvider, Provider, Synthesizer};
use crate::config::{Config, ProviderKind, RetrievalMode};
use crate::embedder::create_embedder;
use crate::index::ArtifactPaths;
use crate::retrieve::Retriever;

static ANSWER: Emoji<'_, '_> = Emoji("💬 ", "");
static SOURCE: Emoji<'_, '_> = Emoji("📎 ", "");
static WARN: Emoji<'_, '_> = Emoji("⚠️  ", "");

pub async fn run_ask(
    question: &str,
    dir: &Path,
    output_dir: &str,
    topk: usize,
    mode: Option<RetrievalMode>,
    provider_kind: Option<ProviderKind>,
    json: bool,
) -> Result<()> {
    let mut config = Config::load(dir)?;
    if provider_kind.is_some() {
        config.provider.provider = provider_kind;
    }
    let paths = ArtifactPaths::for_corpus(dir, output_dir);
    let mode = mode.unwrap_or(config.retrieval.mode);
    let embedder = Arc::from(create_embedder(&config.embedding));
    let retriever = Retriever::from_mode(mode, &paths, embedder);

    let provider: Option<Arc<dyn Provider>> =
        ChatCompletionsProvider::from_config(&config.provider).map(Arc::from);
    let synthesizer = Synthesizer::new(retriever, provider)
        .with_budget(Duration::from_secs(config.provider.budget_secs));

    let payload = synthesizer.answer(question, topk).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&payload)?);
        return Ok(());
    }

    println!("\n{}{}\n", ANSWER, payload.answer);

    if !payload.sources.is_empty() {
        println!("{}Sources:", SOURCE);
        for (label, source) in payload.source_labels.iter().zip(payload.sources.iter()) {
            println!(
                "  {} {}#{} {}",
                style(label.0).cyan(),
                source.doc_id,
                source.chunk_id,
                style(format!("(score {:.3})", source.score)).dim()
            );
        }
        println!();
    }

    for warning in &payload.warnings {
        println!("{}{}", WARN, style(warning).yellow());
    }

    println!(
        "{}",
        style(format!(
            "retrieval {}ms | llm {}ms | model {} | tokens {}",
            payload.retrieval_ms, payload.llm_ms, payload.model, payload.tokens
        ))
        .dim()
    );

    Ok(())
}
