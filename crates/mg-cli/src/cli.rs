//! CLI argument definitions using clap derive API

use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// Migrid - ordered schema migrations for a sharded database fleet
#[derive(Parser, Debug)]
#[command(name = "mg")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Global options
    #[command(flatten)]
    pub global: GlobalArgs,

    /// Subcommand to execute (defaults to `apply`)
    #[command(subcommand)]
    pub command: Option<Commands>,
}

/// Global arguments available to all commands
#[derive(Args, Debug, Clone)]
pub struct GlobalArgs {
    /// Migration directory
    #[arg(short = 'm', long, global = true, default_value = "mig")]
    pub migdir: PathBuf,

    /// Comma- or semicolon-separated host specs (host[:port])
    #[arg(long, global = true, env = "PGHOST", default_value = "127.0.0.1")]
    pub hosts: String,

    /// Default port for hosts without an explicit one
    #[arg(long, global = true, env = "PGPORT", default_value_t = 5432)]
    pub port: u16,

    /// Database user
    #[arg(long, global = true, env = "PGUSER", default_value = "postgres")]
    pub user: String,

    /// Database password
    #[arg(long, global = true, env = "PGPASSWORD", hide_env_values = true, default_value = "")]
    pub pass: String,

    /// Database name on every host
    #[arg(long, global = true, env = "PGDATABASE", default_value = "postgres")]
    pub db: String,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

/// Available subcommands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Apply all pending migrations across the fleet (the default)
    Apply(ApplyArgs),

    /// Undo the latest applied version on every schema it is current on
    Undo(UndoArgs),

    /// Scaffold a new up/dn migration pair
    Make(MakeArgs),

    /// List on-disk versions, or the code digest
    List(ListArgs),

    /// Write the append-only chain anchor file
    Chain(ChainArgs),
}

/// Output formats for run reports (for CI integration)
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputFormat {
    /// Human-readable text output (default)
    #[default]
    Text,
    /// Machine-readable JSON output
    Json,
}

/// Arguments for the apply command
#[derive(Args, Debug)]
pub struct ApplyArgs {
    /// Create missing databases (retrying while the server starts up)
    #[arg(long)]
    pub createdb: bool,

    /// Max workers per host
    #[arg(long, default_value_t = 10)]
    pub parallelism: usize,

    /// Print the plan without executing anything
    #[arg(long)]
    pub dry: bool,

    /// Run before/after hooks even when no migrations are pending
    #[arg(long)]
    pub force: bool,

    /// Output format
    #[arg(short, long, value_enum, default_value = "text")]
    pub output: OutputFormat,
}

impl Default for ApplyArgs {
    fn default() -> Self {
        Self {
            createdb: false,
            parallelism: 10,
            dry: false,
            force: false,
            output: OutputFormat::Text,
        }
    }
}

/// Arguments for the undo command
#[derive(Args, Debug)]
pub struct UndoArgs {
    /// Version to undo; file names are canonicalized to
    /// `<timestamp>.<title>.<prefix>`
    pub version: String,

    /// Max workers per host
    #[arg(long, default_value_t = 10)]
    pub parallelism: usize,

    /// Print the plan without executing anything
    #[arg(long)]
    pub dry: bool,

    /// Output format
    #[arg(short, long, value_enum, default_value = "text")]
    pub output: OutputFormat,
}

/// Arguments for the make command
#[derive(Args, Debug)]
pub struct MakeArgs {
    /// New migration as `<name>@<prefix>`, e.g. `add-users@sh`
    pub spec: String,
}

/// Arguments for the list command
#[derive(Args, Debug)]
pub struct ListArgs {
    /// Print the code digest instead of the version list
    #[arg(long)]
    pub digest: bool,
}

/// Arguments for the chain command
#[derive(Args, Debug)]
pub struct ChainArgs {
    /// Output file (defaults to `<migdir>/versions.chain`)
    #[arg(long)]
    pub out: Option<PathBuf>,
}
