use std::path::PathBuf;

use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;

use crate::{
    embedding::DEFAULT_DIMENSION,
    index::IndexKind,
    search::SearchMode,
    window::Granularity,
};

#[derive(Debug, Parser)]
#[command(
    name = "docspan",
    about = "Hybrid vector and keyword search with keyword-focused excerpts"
)]
pub struct Cli {
    /// Override the XDG data directory
    #[arg(long, global = true)]
    pub data_dir: Option<PathBuf>,

    /// Increase log verbosity (can be repeated: -v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Only log warnings and errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Embed passages from a JSONL file and append them to a corpus
    Ingest(IngestArgs),
    /// Search a corpus
    Search(SearchArgs),
    /// Find passages similar to an indexed one
    Similar(SimilarArgs),
    /// Print one indexed passage
    Get(GetArgs),
    /// Show corpus size, index shape and search counters
    Stats(StatsArgs),
    /// Compute keyword highlight boxes for a page layout
    Highlight(HighlightArgs),
    /// Manage stored search defaults
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
    /// Start MCP server for AI agent integration
    Mcp(McpArgs),
    /// Generate shell completions
    #[command(hide = true)]
    Completions(CompletionsArgs),
}

// -- Config subcommands --

#[derive(Debug, Subcommand)]
pub enum ConfigAction {
    /// Show the effective search defaults and stored settings
    Show {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Persist a setting in config.db
    Set {
        /// default_corpus, vector_weight, granularity or radius
        key: String,
        value: String,
    },
    /// Clear a stored setting (revert to default)
    Clear {
        key: String,
    },
}

// -- Ingest --

#[derive(Debug, Parser)]
pub struct IngestArgs {
    /// JSONL file with one {"text": ..., "metadata": {...}} object per line
    pub path: PathBuf,

    /// Target corpus (default: the configured default corpus)
    #[arg(short = 'c', long)]
    pub corpus: Option<String>,

    /// Similarity metric for a new corpus
    #[arg(long, value_enum, default_value_t = IndexKind::Cosine)]
    pub index: IndexKind,

    /// Embedding dimension for a new corpus
    #[arg(long, default_value_t = DEFAULT_DIMENSION)]
    pub dimension: usize,
}

// -- Search --

#[derive(Debug, Parser)]
pub struct SearchArgs {
    /// The search query
    pub query: String,

    /// Number of results to return
    #[arg(short = 'n', long, default_value = "10")]
    pub count: usize,

    /// Retrieval mode
    #[arg(short, long, value_enum, default_value_t = SearchMode::Hybrid)]
    pub mode: SearchMode,

    /// Keyword to match and excerpt around (repeatable; default: query words)
    #[arg(short = 'k', long = "keyword")]
    pub keywords: Vec<String>,

    /// Weight of vector similarity in hybrid mode (0 to 1)
    #[arg(long)]
    pub vector_weight: Option<f32>,

    /// Excerpt granularity
    #[arg(short, long, value_enum)]
    pub granularity: Option<Granularity>,

    /// Context radius in sentences or characters
    #[arg(short, long)]
    pub radius: Option<usize>,

    /// Metadata filter: key=value, a bare category, or "all"
    #[arg(short, long)]
    pub filter: Option<String>,

    /// Minimum vector similarity
    #[arg(long, default_value = "0.0")]
    pub min_similarity: f32,

    /// Require every keyword to match instead of any
    #[arg(long)]
    pub match_all: bool,

    /// Corpus to search (default: the configured default corpus)
    #[arg(short = 'c', long)]
    pub corpus: Option<String>,

    /// Output results as JSON
    #[arg(long)]
    pub json: bool,
}

// -- Similar --

#[derive(Debug, Parser)]
pub struct SimilarArgs {
    /// vector_id of the reference passage
    pub vector_id: u64,

    /// Number of results to return
    #[arg(short = 'n', long, default_value = "5")]
    pub count: usize,

    #[arg(short = 'c', long)]
    pub corpus: Option<String>,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

// -- Get --

#[derive(Debug, Parser)]
pub struct GetArgs {
    pub vector_id: u64,

    #[arg(short = 'c', long)]
    pub corpus: Option<String>,

    /// Output as JSON with metadata
    #[arg(long)]
    pub json: bool,
}

// -- Stats --

#[derive(Debug, Parser)]
pub struct StatsArgs {
    #[arg(short = 'c', long)]
    pub corpus: Option<String>,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

// -- Highlight --

#[derive(Debug, Parser)]
pub struct HighlightArgs {
    /// JSON page layout: {"width", "height", "words": [{"text", "bbox"}]}
    pub page: PathBuf,

    /// Keywords or phrases to highlight
    #[arg(required = true)]
    pub keywords: Vec<String>,

    /// Corner distance under which boxes merge, in points
    #[arg(long, default_value = "5.0")]
    pub tolerance: f32,

    /// Render resolution
    #[arg(long, default_value = "150.0")]
    pub dpi: f32,

    /// Also report a crop region padded by this many pixels
    #[arg(long)]
    pub crop: Option<f32>,
}

// -- MCP --

#[derive(Debug, Parser)]
pub struct McpArgs {
    /// Corpus to serve (default: the configured default corpus)
    #[arg(short = 'c', long)]
    pub corpus: Option<String>,
}

// -- Completions --

#[derive(Debug, Parser)]
pub struct CompletionsArgs {
    /// Shell to generate completions for
    #[arg(value_enum)]
    pub shell: Shell,
}

impl CompletionsArgs {
    /// Generate shell completions and print to stdout.
    pub fn generate(&self) {
        let mut cmd = Cli::command();
        clap_complete::generate(
            self.shell,
            &mut cmd,
            "docspan",
            &mut std::io::stdout(),
        );
    }
}
