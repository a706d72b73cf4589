//! Indexer plugins: one per derived concept.
//!
//! Repository collectors consume fetched log windows; database collectors
//! derive their tables from rows other plugins already persisted. Every
//! plugin keeps its own watermark in `PluginData` and answers `find` /
//! `revisions_data` queries over its derived tables.

pub mod bugs;
pub mod merges;
pub mod paths;
pub mod projects;
pub mod refs;
pub mod summary;

use std::collections::BTreeMap;

use indicatif::ProgressBar;
use rusqlite::{Connection, OptionalExtension};

use crate::error::{Result, RevLogError};
use crate::source::{LogEntry, LogQueryFlags};

pub use bugs::BugsPlugin;
pub use merges::MergesPlugin;
pub use paths::PathsPlugin;
pub use projects::ProjectsPlugin;
pub use refs::RefsPlugin;
pub use summary::SummaryPlugin;

/// Revision payloads are plugin-specific; a JSON value keeps the facade
/// uniform and directly printable.
pub type RevisionsData = BTreeMap<u32, serde_json::Value>;

/// What a `find` call produced: revision numbers for most criteria, ref
/// names for the refs plugin's `all_refs` sentinel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FindResult {
    Revisions(Vec<u32>),
    Names(Vec<String>),
}

impl FindResult {
    /// Revision list, treating a name result as empty.
    pub fn into_revisions(self) -> Vec<u32> {
        match self {
            FindResult::Revisions(revisions) => revisions,
            FindResult::Names(_) => Vec::new(),
        }
    }
}

/// Parsing statistic counters, zeroed per plugin at construction.
#[derive(Debug, Default)]
pub struct Statistics {
    counters: BTreeMap<&'static str, u64>,
}

impl Statistics {
    pub fn new(types: &[&'static str]) -> Statistics {
        Statistics { counters: types.iter().map(|name| (*name, 0)).collect() }
    }

    pub fn record(&mut self, statistic: &'static str, to_add: u64) {
        *self.counters.entry(statistic).or_insert(0) += to_add;
    }

    pub fn counters(&self) -> &BTreeMap<&'static str, u64> {
        &self.counters
    }
}

/// Contract shared by every plugin.
pub trait Plugin {
    fn name(&self) -> &'static str;

    /// Called once the store schema is current, before any processing.
    fn when_database_ready(&mut self) -> Result<()> {
        Ok(())
    }

    /// Revisions matching the criteria, sorted and unique.
    fn find(&self, criteria: &[String], project_path: &str) -> Result<FindResult>;

    /// Plugin-specific payload per requested revision.
    fn revisions_data(&self, revisions: &[u32]) -> Result<RevisionsData>;

    /// Watermark: last revision fully processed (0 when never run).
    fn last_revision(&self) -> Result<u32>;

    fn statistics(&self) -> &Statistics;

    /// Overwrite mode: re-derive already-processed revisions after removing
    /// their prior contribution. Ignored by plugins that don't support it.
    fn set_overwrite_mode(&mut self, _enabled: bool) {}

    fn is_overwrite_mode(&self) -> bool {
        false
    }
}

/// Plugin fed with commit batches fetched from the log source.
pub trait RepositoryCollector: Plugin {
    /// Extra log payload this plugin needs.
    fn query_flags(&self) -> LogQueryFlags {
        LogQueryFlags::default()
    }

    /// Consumes one fetched window; row writes and the watermark advance
    /// share a single transaction.
    fn parse(&mut self, entries: &[LogEntry]) -> Result<()>;
}

/// Plugin deriving its tables from already-persisted rows.
pub trait DatabaseCollector: Plugin {
    /// Processes the refreshed revision range; row writes and the watermark
    /// advance share a single transaction.
    fn process(&mut self, from_revision: u32, to_revision: u32, progress: Option<&ProgressBar>) -> Result<()>;
}

/// Closed registry variant: every plugin is one of the two collector kinds.
pub enum AnyPlugin {
    Repository(Box<dyn RepositoryCollector>),
    Database(Box<dyn DatabaseCollector>),
}

impl AnyPlugin {
    pub fn plugin(&self) -> &dyn Plugin {
        match self {
            AnyPlugin::Repository(plugin) => plugin.as_ref(),
            AnyPlugin::Database(plugin) => plugin.as_ref(),
        }
    }

    pub fn plugin_mut(&mut self) -> &mut dyn Plugin {
        match self {
            AnyPlugin::Repository(plugin) => plugin.as_mut(),
            AnyPlugin::Database(plugin) => plugin.as_mut(),
        }
    }
}

/// Reads a plugin's watermark from `PluginData`.
pub(crate) fn plugin_last_revision(db: &Connection, name: &str) -> Result<u32> {
    let last_revision = db
        .query_row(
            "SELECT LastRevision FROM PluginData WHERE Name = ?1",
            rusqlite::params![name],
            |row| row.get::<_, u32>(0),
        )
        .optional()?;

    Ok(last_revision.unwrap_or(0))
}

/// Advances a plugin's watermark.
pub(crate) fn set_plugin_last_revision(db: &Connection, name: &str, last_revision: u32) -> Result<()> {
    db.execute(
        "REPLACE INTO PluginData (Name, LastRevision) VALUES (?1, ?2)",
        rusqlite::params![name, last_revision],
    )?;

    Ok(())
}

/// Shared window-processing skeleton of repository collectors: one
/// transaction per window covering both row writes and the watermark
/// advance, skipping revisions at or below the watermark unless the plugin
/// runs in overwrite mode. `handle` receives each entry plus whether it was
/// already processed before (and thus needs its prior rows removed first).
pub(crate) fn collect_window<F>(
    db: &Connection,
    name: &str,
    overwrite_mode: bool,
    entries: &[LogEntry],
    mut handle: F,
) -> Result<()>
where
    F: FnMut(&LogEntry, bool) -> Result<()>,
{
    let tx = db.unchecked_transaction()?;
    let last_revision = plugin_last_revision(db, name)?;
    let mut last_processed = None;

    for entry in entries {
        let already_processed = entry.revision <= last_revision;

        if already_processed && !overwrite_mode {
            continue;
        }

        handle(entry, already_processed)?;
        last_processed = Some(entry.revision);
    }

    if let Some(revision) = last_processed {
        if revision > last_revision {
            set_plugin_last_revision(db, name, revision)?;
        }
    }

    tx.commit()?;

    Ok(())
}

/// Resolves a project path to its row id, failing on an unknown project.
pub(crate) fn project_id(db: &Connection, project_path: &str) -> Result<i64> {
    let id = db
        .query_row(
            "SELECT Id FROM Projects WHERE Path = ?1",
            rusqlite::params![project_path],
            |row| row.get::<_, i64>(0),
        )
        .optional()?;

    id.ok_or_else(|| RevLogError::ProjectNotFound(vec![project_path.to_string()]))
}

/// Fails when any requested revision is absent from the results; used by
/// plugins whose contract declares failure on miss.
pub(crate) fn assert_no_missing_revisions(plugin: &str, revisions: &[u32], results: &RevisionsData) -> Result<()> {
    let missing: Vec<u32> = revisions
        .iter()
        .copied()
        .filter(|revision| !results.contains_key(revision))
        .collect();

    if missing.is_empty() {
        Ok(())
    } else {
        Err(RevLogError::RevisionsNotFound { plugin: plugin.to_string(), revisions: missing })
    }
}

/// Fills empty payloads for requested revisions the plugin has no rows for;
/// used by plugins whose contract is "empty result on miss".
pub(crate) fn add_missing_results(revisions: &[u32], results: &mut RevisionsData) {
    for revision in revisions {
        results
            .entry(*revision)
            .or_insert_with(|| serde_json::Value::Array(Vec::new()));
    }
}

/// Sorted unique revision list, the shape every `find` returns.
pub(crate) fn sorted_unique(mut revisions: Vec<u32>) -> Vec<u32> {
    revisions.sort_unstable();
    revisions.dedup();
    revisions
}

/// Inline integer list for `IN (...)` clauses. An empty list renders as
/// `NULL`, which matches no row.
pub(crate) fn in_list<T: ToString>(values: &[T]) -> String {
    if values.is_empty() {
        return "NULL".to_string();
    }

    values
        .iter()
        .map(|value| value.to_string())
        .collect::<Vec<_>>()
        .join(",")
}

/// A project row joined with its own path's lifecycle columns.
#[derive(Debug, Clone)]
pub(crate) struct ProjectInfo {
    pub id: i64,
    pub path: String,
    pub is_deleted: bool,
    pub bug_regexp: Option<String>,
    pub revision_deleted: Option<u32>,
    pub revision_last_seen: u32,
}

/// Loads projects (optionally filtered) together with the lifecycle data of
/// each project's own root path.
pub(crate) fn load_projects(db: &Connection, where_clause: Option<&str>) -> Result<Vec<ProjectInfo>> {
    let mut sql = "SELECT Id, Path, IsDeleted, BugRegExp FROM Projects".to_string();

    if let Some(clause) = where_clause {
        sql.push_str(" WHERE ");
        sql.push_str(clause);
    }

    let mut statement = db.prepare(&sql)?;
    let projects = statement
        .query_map([], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, i64>(2)? != 0,
                row.get::<_, Option<String>>(3)?,
            ))
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    let mut result = Vec::with_capacity(projects.len());

    for (id, path, is_deleted, bug_regexp) in projects {
        // The project's own path has no row when only deeper paths were
        // ever committed.
        let (revision_deleted, revision_last_seen) = db
            .query_row(
                "SELECT RevisionDeleted, RevisionLastSeen FROM Paths WHERE PathHash = ?1",
                rusqlite::params![crate::engine::filler::path_checksum(&path)],
                |row| Ok((row.get::<_, Option<u32>>(0)?, row.get::<_, u32>(1)?)),
            )
            .optional()?
            .unwrap_or((None, 0));

        result.push(ProjectInfo { id, path, is_deleted, bug_regexp, revision_deleted, revision_last_seen });
    }

    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::migrations::{MigrationContext, MigrationRunner};

    fn memory_db() -> Connection {
        let db = Connection::open_in_memory().expect("in-memory database");
        MigrationRunner::new()
            .run(&MigrationContext::new(&db))
            .expect("schema migrations");
        db
    }

    #[test]
    fn watermark_defaults_to_zero() {
        let db = memory_db();
        assert_eq!(plugin_last_revision(&db, "summary").unwrap(), 0);
    }

    #[test]
    fn watermark_round_trip() {
        let db = memory_db();
        set_plugin_last_revision(&db, "summary", 120).unwrap();
        set_plugin_last_revision(&db, "summary", 200).unwrap();
        assert_eq!(plugin_last_revision(&db, "summary").unwrap(), 200);
    }

    #[test]
    fn collect_window_skips_processed_revisions() {
        let db = memory_db();
        set_plugin_last_revision(&db, "probe", 10).unwrap();

        let entries = vec![
            LogEntry { revision: 9, ..LogEntry::default() },
            LogEntry { revision: 10, ..LogEntry::default() },
            LogEntry { revision: 11, ..LogEntry::default() },
        ];

        let mut handled = Vec::new();
        collect_window(&db, "probe", false, &entries, |entry, redo| {
            handled.push((entry.revision, redo));
            Ok(())
        })
        .unwrap();

        assert_eq!(handled, vec![(11, false)]);
        assert_eq!(plugin_last_revision(&db, "probe").unwrap(), 11);
    }

    #[test]
    fn collect_window_overwrite_reprocesses() {
        let db = memory_db();
        set_plugin_last_revision(&db, "probe", 10).unwrap();

        let entries = vec![LogEntry { revision: 10, ..LogEntry::default() }];

        let mut handled = Vec::new();
        collect_window(&db, "probe", true, &entries, |entry, redo| {
            handled.push((entry.revision, redo));
            Ok(())
        })
        .unwrap();

        assert_eq!(handled, vec![(10, true)]);
        // Watermark never regresses.
        assert_eq!(plugin_last_revision(&db, "probe").unwrap(), 10);
    }

    #[test]
    fn collect_window_empty_batch_keeps_watermark() {
        let db = memory_db();
        set_plugin_last_revision(&db, "probe", 10).unwrap();

        collect_window(&db, "probe", false, &[], |_, _| Ok(())).unwrap();
        assert_eq!(plugin_last_revision(&db, "probe").unwrap(), 10);
    }

    #[test]
    fn missing_project_fails() {
        let db = memory_db();
        let err = project_id(&db, "/missing/").unwrap_err();
        assert!(matches!(err, RevLogError::ProjectNotFound(_)));
    }

    #[test]
    fn missing_revisions_are_reported() {
        let mut results = RevisionsData::new();
        results.insert(1, serde_json::Value::Null);

        let err = assert_no_missing_revisions("probe", &[1, 2, 3], &results).unwrap_err();
        match err {
            RevLogError::RevisionsNotFound { revisions, .. } => assert_eq!(revisions, vec![2, 3]),
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn add_missing_results_fills_empty_arrays() {
        let mut results = RevisionsData::new();
        results.insert(1, serde_json::json!(["a"]));

        add_missing_results(&[1, 2], &mut results);
        assert_eq!(results[&2], serde_json::json!([]));
        assert_eq!(results[&1], serde_json::json!(["a"]));
    }

    #[test]
    fn sorted_unique_sorts_numerically() {
        assert_eq!(sorted_unique(vec![30, 10, 20, 10]), vec![10, 20, 30]);
    }
}
