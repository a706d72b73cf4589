use std::fmt;

/// Structured error type for revlog operations.
///
/// Replaces `Box<dyn Error>` across the public API so callers can
/// distinguish error kinds (e.g. a failing `svn` invocation vs. an unknown
/// plugin vs. a revision that was never indexed) and produce targeted,
/// actionable messages.
#[derive(Debug)]
pub enum RevLogError {
    /// File system I/O failure.
    Io(std::io::Error),
    /// SQLite operation failure (open, execute, fetch, commit).
    Db(rusqlite::Error),
    /// Log source failure: `svn` invocation failed or produced output
    /// that could not be parsed.
    Source(String),
    /// Setup/programmer error: duplicate plugin registration, refresh
    /// without plugins, malformed migration.
    Config(String),
    /// A query referenced a plugin name that was never registered.
    UnknownPlugin(String),
    /// A query referenced project paths unknown to the store.
    ProjectNotFound(Vec<String>),
    /// A plugin whose contract requires every requested revision to be
    /// indexed was asked about revisions it never saw.
    RevisionsNotFound { plugin: String, revisions: Vec<u32> },
    /// A `find` criterion was malformed or used an unsupported field.
    BadCriterion { plugin: String, message: String },
    /// Ingestion failed; names the plugin and the revision window so the
    /// failure is actionable without digging through state.
    Ingest { plugin: String, from: u32, to: u32, source: Box<RevLogError> },
}

fn quoted_list<T: fmt::Display>(items: &[T]) -> String {
    items
        .iter()
        .map(|item| format!("\"{}\"", item))
        .collect::<Vec<_>>()
        .join(", ")
}

impl fmt::Display for RevLogError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RevLogError::Io(e) => write!(f, "{}", e),
            RevLogError::Db(e) => write!(f, "database error: {}", e),
            RevLogError::Source(msg) => write!(f, "log source error: {}", msg),
            RevLogError::Config(msg) => write!(f, "{}", msg),
            RevLogError::UnknownPlugin(name) => {
                write!(f, "the \"{}\" revision log plugin is unknown", name)
            }
            RevLogError::ProjectNotFound(paths) => {
                write!(f, "the {} project(-s) not found", quoted_list(paths))
            }
            RevLogError::RevisionsNotFound { plugin, revisions } => write!(
                f,
                "revision(-s) {} not found by \"{}\" plugin",
                quoted_list(revisions),
                plugin
            ),
            RevLogError::BadCriterion { plugin, message } => {
                write!(f, "{} (\"{}\" plugin)", message, plugin)
            }
            RevLogError::Ingest { plugin, from, to, source } => write!(
                f,
                "the \"{}\" plugin failed processing revisions {}..{}: {}",
                plugin, from, to, source
            ),
        }
    }
}

impl std::error::Error for RevLogError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            RevLogError::Io(e) => Some(e),
            RevLogError::Db(e) => Some(e),
            RevLogError::Ingest { source, .. } => Some(source.as_ref()),
            _ => None,
        }
    }
}

impl From<std::io::Error> for RevLogError {
    fn from(e: std::io::Error) -> Self {
        RevLogError::Io(e)
    }
}

impl From<rusqlite::Error> for RevLogError {
    fn from(e: rusqlite::Error) -> Self {
        RevLogError::Db(e)
    }
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, RevLogError>;
