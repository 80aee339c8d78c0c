use std::path::Path;
use std::sync::Arc;

use anyhow::Result;
use console::{style, Emoji};

use crate::config::{Config, RetrievalMode};
use crate::embedder::create_embedder;
use crate::index::ArtifactPaths;
use crate::retrieve::Retriever;

static SEARCH: Emoji<'_, '_> = Emoji("🔍 ", "");
static FILE: Emoji<'_, '_> = Emoji("📄 ", "");

pub async fn run_search(
    query: &str,
    dir: &Path,
    output_dir: &str,
    topk: usize,
    mode: Option<RetrievalMode>,
    json: bool,
) -> Result<()> {
    let config = Config::load(dir)?;
    let paths = ArtifactPaths::for_corpus(dir, output_dir);
    let mode = mode.unwrap_or(config.retrieval.mode);
    let embedder = Arc::from(create_embedder(&config.embedding));
    let retriever = Retriever::from_mode(mode, &paths, embedder);

    let hits = retriever.search(query, topk).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&hits)?);
        return Ok(());
    }

    if hits.is_empty() {
        println!("No results for: {}", style(query).italic());
        return Ok(());
    }

    println!(
        "\n{}Top {} result(s) for: {}\n",
        SEARCH,
        style(hits.len()).cyan(),
        style(query).yellow().bold()
    );

    for (i, hit) in hits.iter().enumerate() {
        println!(
            "{} {}. {} {}",
            FILE,
            style(i + 1).dim(),
            style(&hit.id).green(),
            style(format!("(score {:.3})", hit.score)).dim()
        );
        println!("   {}", style(&hit.preview).dim());
        println!();
    }

    Ok(())
}
