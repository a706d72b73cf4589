pub mod find;
pub mod refresh;
pub mod revisions;
pub mod status;

use std::path::PathBuf;
use std::rc::Rc;

use clap::{Parser, Subcommand};
use indicatif::ProgressBar;

use revlog::db::DatabaseManager;
use revlog::engine::factory::RevisionLogFactory;
use revlog::engine::RevisionLog;
use revlog::error::RevLogError;
use revlog::source::svn::SvnLogSource;

#[derive(Parser)]
#[command(
    name = "revlog",
    about = "Incremental SVN revision-log index with structured queries",
    version
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Store directory (defaults to the per-user data directory)
    #[arg(long = "db-dir", global = true)]
    pub db_dir: Option<PathBuf>,

    /// Path to the svn executable
    #[arg(long = "svn-bin", global = true, default_value = "svn")]
    pub svn_bin: String,
}

#[derive(Subcommand)]
pub enum Command {
    /// Fetch new revisions and update every plugin index
    Refresh(RefreshArgs),
    /// Search indexed revisions through a plugin
    Find(FindArgs),
    /// Show plugin data for specific revisions
    Revisions(RevisionsArgs),
    /// Show per-plugin watermarks
    Status(StatusArgs),
}

#[derive(Parser)]
pub struct RefreshArgs {
    /// Repository URL
    pub url: String,

    /// Re-derive one already-indexed revision (merge/bug data)
    #[arg(long = "reparse")]
    pub reparse: Option<u32>,

    /// Print parsing statistics
    #[arg(short, long)]
    pub verbose: bool,
}

#[derive(Parser)]
pub struct FindArgs {
    /// Repository URL
    pub url: String,

    /// Plugin to search through (summary, paths, projects, refs, bugs, merges)
    pub plugin: String,

    /// Search criteria, plugin-specific (e.g. "author:alice", "/path/",
    /// "action:D", "JRA-42", "all_refs")
    pub criteria: Vec<String>,

    /// Output results as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Parser)]
pub struct RevisionsArgs {
    /// Repository URL
    pub url: String,

    /// Plugin to read data from
    pub plugin: String,

    /// Revision numbers
    #[arg(required = true)]
    pub revisions: Vec<u32>,
}

#[derive(Parser)]
pub struct StatusArgs {
    /// Repository URL
    pub url: String,
}

/// Builds the factory and opens the (eagerly refreshed) engine.
pub fn open_revision_log(
    cli: &Cli,
    url: &str,
    progress: Option<&ProgressBar>,
) -> Result<RevisionLog, RevLogError> {
    let db_manager = match &cli.db_dir {
        Some(dir) => DatabaseManager::new(dir),
        None => DatabaseManager::default_location()?,
    };

    let source = Rc::new(SvnLogSource::with_binary(&cli.svn_bin));
    let factory = RevisionLogFactory::new(source, db_manager);

    factory.revision_log(url, progress)
}

/// Prints a targeted diagnostic for the error kind and exits.
pub fn exit_with_error(err: &RevLogError) -> ! {
    match err {
        RevLogError::Io(e) => eprintln!("error: I/O failure: {}", e),
        RevLogError::Db(e) => eprintln!("error: store failure: {}", e),
        RevLogError::Source(msg) => eprintln!("error: {}", msg),
        RevLogError::UnknownPlugin(_) | RevLogError::BadCriterion { .. } => {
            eprintln!("error: {}", err);
            eprintln!("hint: available plugins are summary, paths, projects, refs, bugs, merges");
        }
        _ => eprintln!("error: {}", err),
    }

    std::process::exit(1);
}
