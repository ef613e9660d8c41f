use clap::{Args, Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(author, version, about)]
pub struct Cli {
    /// Log debug output from ficpack (overridden by `RUST_LOG`).
    #[arg(long, short, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Fetch every chapter of a fic record and package it as an EPUB.
    Build(BuildArgs),
    /// Re-import a fic record, applying the chapter list rules, and write it
    /// back out.
    Normalize(NormalizeArgs),
}

#[derive(Debug, Args)]
pub struct BuildArgs {
    /// Input fic record (JSON).
    #[arg(long)]
    pub fic: String,

    /// Output file path for the EPUB.
    #[arg(long)]
    pub out: String,

    /// Maximum concurrent chapter retrievals (default: `FICPACK_CONCURRENCY`
    /// or 4).
    #[arg(long)]
    pub concurrency: Option<usize>,

    /// BCP-47 language tag written to the EPUB.
    #[arg(long, default_value = "und")]
    pub lang: String,

    /// Overwrite the output file if it exists.
    #[arg(long)]
    pub force: bool,

    /// Additional XenForo forum host (repeatable).
    #[arg(long = "forum-host", value_name = "HOST")]
    pub forum_hosts: Vec<String>,

    /// Per-request timeout (default: `FICPACK_TIMEOUT_SECS` or 30).
    #[arg(long)]
    pub timeout_secs: Option<u64>,

    /// User-Agent header for page requests.
    #[arg(long)]
    pub user_agent: Option<String>,
}

#[derive(Debug, Args)]
pub struct NormalizeArgs {
    /// Input fic record (JSON).
    #[arg(long)]
    pub fic: String,

    /// Output file path (default: stdout).
    #[arg(long)]
    pub out: Option<String>,

    /// Additional XenForo forum host (repeatable).
    #[arg(long = "forum-host", value_name = "HOST")]
    pub forum_hosts: Vec<String>,
}
