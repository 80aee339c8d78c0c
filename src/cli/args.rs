use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::config::{ProviderKind, RetrievalMode};

#[derive(Parser)]
#[command(name = "docqa")]
#[command(about = "Index a document corpus and answer questions with grounded, cited excerpts")]
#[command(version)]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Chunk the corpus and build the keyword index
    Index {
        /// Corpus directory containing *.md / *.txt documents
        dir: PathBuf,
        /// Artifact directory, relative to the corpus directory
        #[arg(long, default_value = ".docqa")]
        output_dir: String,
    },
    /// Build embedding artifacts from the keyword index (requires Ollama)
    Embed {
        /// Corpus directory the index was built from
        dir: PathBuf,
        #[arg(long, default_value = ".docqa")]
        output_dir: String,
    },
    /// Search the indexed corpus
    Search {
        /// Search query
        query: String,
        /// Corpus directory
        #[arg(long, default_value = ".")]
        dir: PathBuf,
        #[arg(long, default_value = ".docqa")]
        output_dir: String,
        /// Number of results
        #[arg(long, default_value_t = 4)]
        topk: usize,
        /// Retrieval mode; defaults to the configured mode
        #[arg(long, value_enum)]
        mode: Option<RetrievalMode>,
        /// Emit raw JSON instead of formatted output
        #[arg(long)]
        json: bool,
    },
    /// Ask a question and get a cited answer
    Ask {
        /// Natural-language question
        question: String,
        /// Corpus directory
        #[arg(long, default_value = ".")]
        dir: PathBuf,
        #[arg(long, default_value = ".docqa")]
        output_dir: String,
        #[arg(long, default_value_t = 4)]
        topk: usize,
        #[arg(long, value_enum)]
        mode: Option<RetrievalMode>,
        /// Language-model vendor; defaults to the first one with an API key
        #[arg(long, value_enum)]
        provider: Option<ProviderKind>,
        /// Emit the raw answer payload as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show which artifacts exist and how large they are
    Status {
        /// Corpus directory
        #[arg(long, default_value = ".")]
        dir: PathBuf,
        #[arg(long, default_value = ".docqa")]
        output_dir: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_index() {
        let args = Args::try_parse_from(["docqa", "index", "corpus"]).unwrap();
        match args.command {
            Command::Index { dir, output_dir } => {
                assert_eq!(dir, PathBuf::from("corpus"));
                assert_eq!(output_dir, ".docqa");
            }
            _ => panic!("expected index command"),
        }
    }

    #[test]
    fn test_parse_search_with_mode() {
        let args =
            Args::try_parse_from(["docqa", "search", "pto accrual", "--mode", "vector", "--topk", "2"])
                .unwrap();
        match args.command {
            Command::Search { query, mode, topk, .. } => {
                assert_eq!(query, "pto accrual");
                assert_eq!(mode, Some(RetrievalMode::Vector));
                assert_eq!(topk, 2);
            }
            _ => panic!("expected search command"),
        }
    }

    #[test]
    fn test_parse_ask_with_provider() {
        let args =
            Args::try_parse_from(["docqa", "ask", "How does PTO accrue?", "--provider", "groq"])
                .unwrap();
        match args.command {
            Command::Ask { provider, .. } => {
                assert_eq!(provider, Some(ProviderKind::Groq));
            }
            _ => panic!("expected ask command"),
        }
    }

    #[test]
    fn test_invalid_subcommand() {
        assert!(Args::try_parse_from(["docqa", "bogus"]).is_err());
    }
}
