use anyhow::Result;
use clap::Parser;

use docqa::cli::{run_ask, run_embed, run_index, run_search, run_status, Args, Command};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = Args::parse();

    match args.command {
        Command::Index { dir, output_dir } => run_index(&dir, &output_dir).await?,
        Command::Embed { dir, output_dir } => run_embed(&dir, &output_dir).await?,
        Command::Search {
            query,
            dir,
            output_dir,
            topk,
            mode,
            json,
        } => run_search(&query, &dir, &output_dir, topk, mode, json).await?,
        Command::Ask {
            question,
            dir,
            output_dir,
            topk,
            mode,
            provider,
            json,
        } => run_ask(&question, &dir, &output_dir, topk, mode, provider, json).await?,
        Command::Status { dir, output_dir } => run_status(&dir, &output_dir).await?,
    }

    Ok(())
}
