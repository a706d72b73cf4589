use std::cell::RefCell;
use std::collections::HashMap;
use std::path::Path;
use std::rc::Rc;

use revlog::db::DatabaseManager;
use revlog::engine::factory::RevisionLogFactory;
use revlog::engine::RevisionLog;
use revlog::error::{Result, RevLogError};
use revlog::source::{Action, CopyFrom, LogEntry, LogQueryFlags, LogSource, NodeKind, PathChange};

/// In-memory log source; commits are registered up front and can be
/// extended between refreshes.
#[derive(Default)]
pub struct MockLogSource {
    entries: RefCell<Vec<LogEntry>>,
    properties: RefCell<HashMap<String, String>>,
}

impl MockLogSource {
    pub fn new() -> Rc<MockLogSource> {
        Rc::new(MockLogSource::default())
    }

    pub fn add_commit(&self, entry: LogEntry) {
        self.entries.borrow_mut().push(entry);
    }

    /// Replaces the commit with the same revision (used by reparse tests).
    pub fn replace_commit(&self, entry: LogEntry) {
        let mut entries = self.entries.borrow_mut();
        entries.retain(|existing| existing.revision != entry.revision);
        entries.push(entry);
    }

    pub fn set_property(&self, url: &str, value: &str) {
        self.properties.borrow_mut().insert(url.to_string(), value.to_string());
    }
}

impl LogSource for MockLogSource {
    fn first_revision(&self, _project_url: &str) -> Result<u32> {
        self.entries
            .borrow()
            .iter()
            .map(|entry| entry.revision)
            .min()
            .ok_or_else(|| RevLogError::Source("repository has no revisions".to_string()))
    }

    fn last_revision(&self, _project_url: &str) -> Result<u32> {
        self.entries
            .borrow()
            .iter()
            .map(|entry| entry.revision)
            .max()
            .ok_or_else(|| RevLogError::Source("repository has no revisions".to_string()))
    }

    fn query_log(
        &self,
        _project_url: &str,
        from_revision: u32,
        to_revision: u32,
        flags: LogQueryFlags,
    ) -> Result<Vec<LogEntry>> {
        let mut entries: Vec<LogEntry> = self
            .entries
            .borrow()
            .iter()
            .filter(|entry| entry.revision >= from_revision && entry.revision <= to_revision)
            .cloned()
            .collect();

        entries.sort_by_key(|entry| entry.revision);

        // Payload the caller didn't ask for is not delivered, same as the
        // real client.
        for entry in &mut entries {
            if !flags.verbose {
                entry.paths = None;
            }

            if !flags.merge_history {
                entry.merged_revisions.clear();
            }
        }

        Ok(entries)
    }

    fn property(&self, _name: &str, path_or_url: &str, _revision: Option<u32>) -> Result<String> {
        Ok(self
            .properties
            .borrow()
            .get(path_or_url)
            .cloned()
            .unwrap_or_default())
    }
}

/// Builds one commit for the mock source.
pub struct CommitBuilder {
    entry: LogEntry,
}

impl CommitBuilder {
    pub fn new(revision: u32) -> CommitBuilder {
        CommitBuilder {
            entry: LogEntry {
                revision,
                author: "alice".to_string(),
                date: 1_700_000_000 + i64::from(revision),
                message: format!("commit {}", revision),
                paths: Some(Vec::new()),
                merged_revisions: Vec::new(),
            },
        }
    }

    pub fn author(mut self, author: &str) -> CommitBuilder {
        self.entry.author = author.to_string();
        self
    }

    pub fn message(mut self, message: &str) -> CommitBuilder {
        self.entry.message = message.to_string();
        self
    }

    pub fn path(mut self, action: Action, kind: NodeKind, path: &str) -> CommitBuilder {
        self.entry
            .paths
            .get_or_insert_with(Vec::new)
            .push(PathChange { path: path.to_string(), action, kind, copy_from: None });
        self
    }

    pub fn copied_path(
        mut self,
        action: Action,
        kind: NodeKind,
        path: &str,
        copy_path: &str,
        copy_revision: u32,
    ) -> CommitBuilder {
        self.entry.paths.get_or_insert_with(Vec::new).push(PathChange {
            path: path.to_string(),
            action,
            kind,
            copy_from: Some(CopyFrom { path: copy_path.to_string(), revision: copy_revision }),
        });
        self
    }

    pub fn merges(mut self, revisions: &[u32]) -> CommitBuilder {
        self.entry.merged_revisions = revisions.to_vec();
        self
    }

    /// A commit without a paths node at all (empty revision).
    pub fn no_paths(mut self) -> CommitBuilder {
        self.entry.paths = None;
        self
    }

    pub fn build(self) -> LogEntry {
        self.entry
    }
}

/// Opens an engine over the mock source; the factory refreshes eagerly.
pub fn open_engine(source: Rc<MockLogSource>, store_dir: &Path, url: &str) -> RevisionLog {
    let factory = RevisionLogFactory::new(source, DatabaseManager::new(store_dir));

    factory
        .revision_log(url, None)
        .expect("engine construction and initial refresh should succeed")
}

/// Single-value integer query against the engine's store.
pub fn query_i64(revision_log: &RevisionLog, sql: &str) -> i64 {
    revision_log
        .db()
        .query_row(sql, [], |row| row.get(0))
        .expect("query should succeed")
}
