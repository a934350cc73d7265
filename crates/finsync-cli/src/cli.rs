use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use finsync_core::defaults::DEFAULT_STRATEGY;
use finsync_core::models::ResolvedBy;
use finsync_core::BulkStrategy;

#[derive(Parser)]
#[command(name = "finsync")]
#[command(about = "Resolve offline-sync conflicts in financial records")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Optional path to local database file
    #[arg(long, global = true, value_name = "PATH")]
    pub db_path: Option<PathBuf>,

    /// Optional path to engine configuration (JSON)
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Resolve conflicts from a JSON file with one strategy
    Resolve {
        /// File holding one conflict or an array of conflicts
        file: PathBuf,
        /// Strategy id
        #[arg(short, long, default_value = DEFAULT_STRATEGY)]
        strategy: String,
        /// Who the resolution is attributed to
        #[arg(long, default_value = "system")]
        by: ResolvedBy,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Apply a human decision to a stored conflict
    Decide {
        /// Conflict ID or unique ID prefix
        id: String,
        /// Which record to keep
        #[arg(long, value_enum)]
        choose: Choice,
        /// Explicit merged record (requires --choose merge)
        #[arg(long, value_name = "FILE")]
        data: Option<PathBuf>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Resolve many conflicts with one bulk strategy
    Bulk {
        /// Conflicts file; stored unresolved conflicts when omitted
        file: Option<PathBuf>,
        /// client-wins, server-wins, smart-merge or user-pattern
        #[arg(short, long)]
        strategy: BulkStrategy,
        /// Only conflicts of this type (`entity:category` or entity)
        #[arg(long = "type", value_name = "TYPE")]
        conflict_type: Option<String>,
        /// Resolve at most this many conflicts
        #[arg(long, value_name = "N")]
        max: Option<usize>,
        /// Only conflicts similar to the first one
        #[arg(long)]
        similar: bool,
        /// Ask before resolving
        #[arg(long)]
        confirm: bool,
        /// Answer yes to the confirmation prompt
        #[arg(short, long)]
        yes: bool,
        /// Resolve in parallel with this many workers
        #[arg(long, value_name = "N")]
        concurrency: Option<usize>,
        /// Per-conflict timeout for parallel resolution
        #[arg(long, value_name = "MS", default_value = "5000")]
        timeout_ms: u64,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Auto-resolve low-risk conflicts, leave the rest for review
    Auto {
        /// Conflicts file; stored unresolved conflicts when omitted
        file: Option<PathBuf>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Run the scenario harness
    Scenarios {
        /// Only this strategy
        #[arg(short, long)]
        strategy: Option<String>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Inspect or replace resolution strategies
    Strategies {
        #[command(subcommand)]
        command: StrategyCommands,
    },
    /// Inspect stored conflicts
    Conflicts {
        #[command(subcommand)]
        command: ConflictCommands,
    },
    /// Generate shell completion scripts
    Completions {
        /// Target shell
        #[arg(value_enum)]
        shell: CompletionShell,
        /// Optional output path (stdout when omitted)
        #[arg(short, long, value_name = "PATH")]
        output: Option<PathBuf>,
    },
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
pub enum Choice {
    Client,
    Server,
    Merge,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
pub enum CompletionShell {
    Bash,
    Zsh,
    Fish,
}

#[derive(Subcommand)]
pub enum StrategyCommands {
    /// List registered strategies with coverage and timings
    List {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Replace stored strategies from a JSON file of definitions
    Load {
        /// File holding one definition or an array of definitions
        file: PathBuf,
    },
}

#[derive(Subcommand)]
pub enum ConflictCommands {
    /// List stored conflicts, oldest first
    List {
        /// Only conflicts without an applied resolution
        #[arg(long)]
        unresolved: bool,
        /// Number of conflicts to show
        #[arg(short, long, default_value = "20")]
        limit: usize,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Delete resolved conflicts past retention
    Purge {
        /// Retention in days (configured value when omitted)
        #[arg(long)]
        days: Option<u32>,
    },
    /// Summary counts over stored conflicts
    Stats {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Mark a resolution record as persisted remotely
    Durable {
        /// Conflict ID or unique ID prefix
        id: String,
        /// Position in the conflict's resolution history
        index: usize,
    },
}
