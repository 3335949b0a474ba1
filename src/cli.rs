use std::path::PathBuf;

use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;

#[derive(Debug, Parser)]
#[command(
    name = "knowledge",
    about = "A file-backed knowledge catalog with ranked search"
)]
pub struct Cli {
    /// Storage root (default: $KNOWLEDGE_MCP_PATH, then ./.knowledge)
    #[arg(long, global = true)]
    pub data_path: Option<PathBuf>,

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
    /// Rank atoms against a query
    Search(SearchArgs),
    /// Create a new atom or update an existing one
    Upsert(UpsertArgs),
    /// Show one atom
    Get(GetArgs),
    /// List catalog entries without ranking
    List(ListArgs),
    /// Mark an atom deprecated (it stays searchable)
    Delete(IdArgs),
    /// Permanently delete an atom and its catalog entry
    Purge(IdArgs),
    /// List every stored atom ID
    ListIds(JsonArgs),
    /// Print every atom as one JSON bundle
    Export,
    /// Regenerate the catalog from the atom files
    Rebuild(JsonArgs),
    /// Convert legacy JSON atoms to YAML, then rebuild the catalog
    Migrate(JsonArgs),
    /// Group the catalog by type, tag or language
    Summary(SummaryArgs),
    /// Print the ID the next new atom would get
    NextId,
    /// Start MCP server for AI agent integration
    Mcp,
    /// Generate shell completions
    #[command(hide = true)]
    Completions(CompletionsArgs),
}

// -- Filters shared by search and list --

#[derive(Debug, Parser)]
pub struct FilterArgs {
    /// Only these atom types (repeatable)
    #[arg(short = 't', long = "type")]
    pub types: Vec<String>,

    /// Only atoms carrying one of these tags (repeatable)
    #[arg(long = "tag")]
    pub tags: Vec<String>,

    /// Only atoms with this status
    #[arg(short, long)]
    pub status: Option<String>,

    /// Only atoms for this language
    #[arg(short, long)]
    pub language: Option<String>,
}

// -- Search --

#[derive(Debug, Parser)]
pub struct SearchArgs {
    /// The search query (empty browses by trust)
    #[arg(default_value = "")]
    pub query: String,

    #[command(flatten)]
    pub filters: FilterArgs,

    /// Number of results to return
    #[arg(short = 'n', long, default_value = "10")]
    pub count: usize,

    /// Also match against summaries and details
    #[arg(long)]
    pub content: bool,

    /// Output results as JSON
    #[arg(long)]
    pub json: bool,
}

// -- List --

#[derive(Debug, Parser)]
pub struct ListArgs {
    #[command(flatten)]
    pub filters: FilterArgs,

    /// Maximum number of entries
    #[arg(short = 'n', long, default_value = "50")]
    pub count: usize,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

// -- Upsert --

#[derive(Debug, Parser)]
pub struct UpsertArgs {
    /// Existing atom ID to update, or an unused ID to create
    #[arg(long)]
    pub id: Option<String>,

    #[arg(long)]
    pub title: String,

    /// fact, decision, procedure, pattern, gotcha, glossary or snippet
    #[arg(short = 't', long = "type")]
    pub kind: String,

    /// active, draft or deprecated
    #[arg(long, default_value = "active")]
    pub status: String,

    /// high, medium or low
    #[arg(long, default_value = "medium")]
    pub confidence: String,

    #[arg(long)]
    pub summary: String,

    #[arg(long)]
    pub details: Option<String>,

    /// Known pitfall (repeatable)
    #[arg(long = "pitfall")]
    pub pitfalls: Vec<String>,

    #[arg(short, long)]
    pub language: Option<String>,

    /// Tag (repeatable)
    #[arg(long = "tag")]
    pub tags: Vec<String>,

    /// Source as KIND=REF, e.g. repo_path=src/lib.rs (repeatable)
    #[arg(long = "source")]
    pub sources: Vec<String>,

    /// Link as REL=ID, e.g. see_also=K-000002 (repeatable)
    #[arg(long = "link")]
    pub links: Vec<String>,

    /// Output the stored atom as JSON
    #[arg(long)]
    pub json: bool,
}

// -- Get --

#[derive(Debug, Parser)]
pub struct GetArgs {
    /// Atom ID, e.g. K-000001
    pub id: String,

    /// Output as JSON instead of YAML
    #[arg(long)]
    pub json: bool,
}

#[derive(Debug, Parser)]
pub struct IdArgs {
    /// Atom ID, e.g. K-000001
    pub id: String,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Debug, Parser)]
pub struct JsonArgs {
    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

// -- Summary --

#[derive(Debug, Parser)]
pub struct SummaryArgs {
    /// Grouping key: type, tag or language
    #[arg(short, long, default_value = "type")]
    pub group_by: String,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,
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
            "knowledge",
            &mut std::io::stdout(),
        );
    }
}

/// Split a `KEY=VALUE` argument.
pub fn split_pair<'a>(flag: &str, value: &'a str) -> Result<(&'a str, &'a str), String> {
    value
        .split_once('=')
        .ok_or_else(|| format!("--{flag} expects KEY=VALUE, got {value:?}"))
}
