use std::path::Path;

use anyhow::Result;
use console::{style, Emoji};
use indicatif::{ProgressBar, ProgressStyle};

use crate::config::Config;
use crate::corpus::load_corpus;
use crate::embedder::create_embedder;
use crate::index::{build_embeddings, read_records, ArtifactPaths, EmbeddingMeta, Indexer};

static INDEXING: Emoji<'_, '_> = Emoji("📊 ", "");
static SUCCESS: Emoji<'_, '_> = Emoji("✅ ", "");
static INFO: Emoji<'_, '_> = Emoji("ℹ️  ", "");

pub async fn run_index(dir: &Path, output_dir: &str) -> Result<()> {
    let config = Config::load(dir)?;
    let paths = ArtifactPaths::for_corpus(dir, output_dir);

    println!("{}Indexing {}...", INDEXING, dir.display());
    let documents = load_corpus(dir)?;
    let report = Indexer::new(&config.chunking).build(&documents, &paths)?;

    println!("\n{}Index built!\n", SUCCESS);
    println!("  Documents: {}", style(report.documents).green());
    println!("  Chunks:    {}", style(report.chunks).cyan());
    println!("  Index:     {}", style(report.path.display()).dim());
    Ok(())
}

pub async fn run_embed(dir: &Path, output_dir: &str) -> Result<()> {
    let config = Config::load(dir)?;
    let paths = ArtifactPaths::for_corpus(dir, output_dir);
    let embedder = create_embedder(&config.embedding);

    embedder.health_check().await?;

    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::default_spinner()
            .template("{spinner:.green} {msg}")
            .unwrap(),
    );
    pb.set_message(format!(
        "{}Embedding chunks with {}...",
        INDEXING, config.embedding.model
    ));
    pb.enable_steady_tick(std::time::Duration::from_millis(100));

    let report = build_embeddings(&paths, embedder.as_ref()).await;

    pb.finish_and_clear();
    let report = report?;

    println!("\n{}Embeddings built!\n", SUCCESS);
    println!("  Rows:    {}", style(report.rows).green());
    println!("  Dims:    {}", style(report.dim).cyan());
    if report.skipped > 0 {
        println!(
            "  Skipped: {} (empty chunk text)",
            style(report.skipped).yellow()
        );
    }
    println!("  Matrix:  {}", style(paths.embeddings().display()).dim());
    Ok(())
}

pub async fn run_status(dir: &Path, output_dir: &str) -> Result<()> {
    let paths = ArtifactPaths::for_corpus(dir, output_dir);

    println!("\n{}Artifact status: {}\n", INFO, paths.root.display());

    if paths.index().is_file() {
        let records = read_records(&paths.index())?;
        let size = std::fs::metadata(paths.index())?.len();
        println!(
            "  Keyword index:  {} chunks, {} KB",
            style(records.len()).green(),
            size / 1024
        );
    } else {
        println!("  Keyword index:  {}", style("not built").yellow());
    }

    if paths.metadata().is_file() && paths.embeddings().is_file() {
        let meta: EmbeddingMeta = serde_json::from_slice(&std::fs::read(paths.metadata())?)?;
        println!(
            "  Embeddings:     {} rows x {} dims ({})",
            style(meta.rows).green(),
            style(meta.dim).cyan(),
            meta.model_name
        );
    } else {
        println!("  Embeddings:     {}", style("not built").yellow());
    }

    Ok(())
}
