//! Thin transactional write API over the store tables.
//!
//! One method per table, each a single parameterized statement; the only
//! logic living here is the path checksum and the upward
//! `RevisionLastSeen` propagation shared by `add_path`/`touch_path`.

use std::cell::RefCell;
use std::rc::Rc;

use rusqlite::types::Value;
use rusqlite::{Connection, OptionalExtension};

use crate::db::cache::{field_u32, DatabaseCache, RowFields};
use crate::error::Result;
use crate::source::Action;

/// Unsigned CRC32 of a normalized path; the fast lookup key of `Paths`.
pub fn path_checksum(path: &str) -> u32 {
    crc32fast::hash(path.as_bytes())
}

pub struct RepositoryFiller {
    db: Rc<Connection>,
    cache: Rc<RefCell<DatabaseCache>>,
}

impl RepositoryFiller {
    pub fn new(db: Rc<Connection>, cache: Rc<RefCell<DatabaseCache>>) -> RepositoryFiller {
        cache.borrow_mut().cache_table("Paths");

        RepositoryFiller { db, cache }
    }

    pub fn add_project(&self, path: &str, is_deleted: bool, bug_regexp: Option<&str>) -> Result<i64> {
        self.db.execute(
            "INSERT INTO Projects (Path, IsDeleted, BugRegExp) VALUES (?1, ?2, ?3)",
            rusqlite::params![path, is_deleted as i64, bug_regexp],
        )?;

        let project_id = self.db.last_insert_rowid();

        // There is no revision 0 in a repository, but the repository-wide
        // project needs its path bound to something.
        if path == "/" {
            self.add_path("/", "", "/", 0)?;
        }

        Ok(project_id)
    }

    pub fn set_project_status(&self, project_id: i64, is_deleted: bool) -> Result<()> {
        self.db.execute(
            "UPDATE Projects SET IsDeleted = ?1 WHERE Id = ?2",
            rusqlite::params![is_deleted as i64, project_id],
        )?;

        Ok(())
    }

    pub fn set_project_bug_regexp(&self, project_id: i64, bug_regexp: Option<&str>) -> Result<()> {
        self.db.execute(
            "UPDATE Projects SET BugRegExp = ?1 WHERE Id = ?2",
            rusqlite::params![bug_regexp, project_id],
        )?;

        Ok(())
    }

    pub fn add_commit(&self, revision: u32, author: &str, date: i64, message: &str) -> Result<()> {
        self.db.execute(
            "INSERT INTO Commits (Revision, Author, Date, Message) VALUES (?1, ?2, ?3, ?4)",
            rusqlite::params![revision, author, date, message],
        )?;

        Ok(())
    }

    pub fn add_commit_to_project(&self, revision: u32, project_id: i64) -> Result<()> {
        self.db.execute(
            "INSERT INTO CommitProjects (ProjectId, Revision) VALUES (?1, ?2)",
            rusqlite::params![project_id, revision],
        )?;

        Ok(())
    }

    pub fn add_path(&self, path: &str, ref_name: &str, project_path: &str, revision: u32) -> Result<i64> {
        let path_hash = path_checksum(path);

        self.db.execute(
            "INSERT INTO Paths (
                Path, PathNestingLevel, PathHash, RefName, ProjectPath, RevisionAdded, RevisionLastSeen
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)",
            rusqlite::params![
                path,
                path.matches('/').count().saturating_sub(1) as i64,
                path_hash,
                ref_name,
                project_path,
                revision
            ],
        )?;

        let path_id = self.db.last_insert_rowid();

        self.propagate_revision_last_seen(path, revision)?;

        // Prime the propagation cache so descendants touched later in the
        // batch see this path without a round-trip.
        self.cache.borrow_mut().set(
            "Paths",
            &last_seen_key(path_hash),
            row_fields(&[("RevisionLastSeen", Value::Integer(revision as i64))]),
        );

        Ok(path_id)
    }

    pub fn add_path_to_commit(
        &self,
        revision: u32,
        action: &str,
        kind: &str,
        path_id: i64,
        copy_revision: Option<u32>,
        copy_path_id: Option<i64>,
    ) -> Result<()> {
        self.db.execute(
            "INSERT INTO CommitPaths (Revision, Action, Kind, PathId, CopyRevision, CopyPathId)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            rusqlite::params![revision, action, kind, path_id, copy_revision, copy_path_id],
        )?;

        Ok(())
    }

    /// Applies `fields` to the path row and propagates `RevisionLastSeen`
    /// upward. Returns every `(path hash, changed fields)` pair so callers
    /// can patch their row caches.
    ///
    /// Panics when `fields` is empty; callers decide what changes via
    /// [`RepositoryFiller::path_touch_fields`] and must not ask for a no-op
    /// update.
    pub fn touch_path(&self, path: &str, revision: u32, fields: RowFields) -> Result<Vec<(u32, RowFields)>> {
        assert!(!fields.is_empty(), "touch_path requires a non-empty field set");

        let path_hash = path_checksum(path);
        let mut touched = self.propagate_revision_last_seen(path, revision)?;

        let mut columns: Vec<&'static str> = fields.keys().copied().collect();
        columns.sort_unstable();

        let assignments = columns
            .iter()
            .enumerate()
            .map(|(index, column)| format!("{} = ?{}", column, index + 1))
            .collect::<Vec<_>>()
            .join(", ");

        let mut params: Vec<Value> = columns.iter().map(|column| fields[column].clone()).collect();
        params.push(Value::Integer(path_hash as i64));

        self.db.execute(
            &format!("UPDATE Paths SET {} WHERE PathHash = ?{}", assignments, columns.len() + 1),
            rusqlite::params_from_iter(params),
        )?;

        touched.push((path_hash, fields));

        Ok(touched)
    }

    /// Which path fields an observed action changes, given the current row.
    pub fn path_touch_fields(&self, action: Action, revision: u32, path_data: &RowFields) -> RowFields {
        let mut fields = RowFields::new();

        if action == Action::Deleted {
            fields.insert("RevisionDeleted", Value::Integer(revision as i64));
        } else {
            if field_u32(path_data, "RevisionDeleted").unwrap_or(0) > 0 {
                fields.insert("RevisionDeleted", Value::Null);
            }

            if action == Action::Added && field_u32(path_data, "RevisionAdded").unwrap_or(0) > revision {
                fields.insert("RevisionAdded", Value::Integer(revision as i64));
            }

            if field_u32(path_data, "RevisionLastSeen").unwrap_or(0) < revision {
                fields.insert("RevisionLastSeen", Value::Integer(revision as i64));
            }
        }

        fields
    }

    pub fn move_paths_into_project(&self, path_ids: &[i64], project_path: &str) -> Result<()> {
        if path_ids.is_empty() {
            return Ok(());
        }

        let id_list = path_ids
            .iter()
            .map(|id| id.to_string())
            .collect::<Vec<_>>()
            .join(",");

        self.db.execute(
            &format!("UPDATE Paths SET ProjectPath = ?1 WHERE Id IN ({})", id_list),
            rusqlite::params![project_path],
        )?;

        Ok(())
    }

    pub fn add_bugs_to_commit(&self, bugs: &[String], revision: u32) -> Result<()> {
        for bug in bugs {
            self.db.execute(
                "INSERT INTO CommitBugs (Revision, Bug) VALUES (?1, ?2)",
                rusqlite::params![revision, bug],
            )?;
        }

        Ok(())
    }

    pub fn remove_bugs_from_commit(&self, revision: u32) -> Result<usize> {
        let removed = self
            .db
            .execute("DELETE FROM CommitBugs WHERE Revision = ?1", rusqlite::params![revision])?;

        Ok(removed)
    }

    pub fn add_merge_commit(&self, revision: u32, merged_revisions: &[u32]) -> Result<()> {
        for merged_revision in merged_revisions {
            self.db.execute(
                "INSERT INTO Merges (MergeRevision, MergedRevision) VALUES (?1, ?2)",
                rusqlite::params![revision, merged_revision],
            )?;
        }

        Ok(())
    }

    pub fn remove_merge_commit(&self, revision: u32) -> Result<usize> {
        let removed = self
            .db
            .execute("DELETE FROM Merges WHERE MergeRevision = ?1", rusqlite::params![revision])?;

        Ok(removed)
    }

    pub fn add_ref_to_project(&self, ref_name: &str, project_id: i64) -> Result<i64> {
        self.db.execute(
            "INSERT INTO ProjectRefs (ProjectId, Name) VALUES (?1, ?2)",
            rusqlite::params![project_id, ref_name],
        )?;

        Ok(self.db.last_insert_rowid())
    }

    pub fn add_commit_to_ref(&self, revision: u32, ref_id: i64) -> Result<()> {
        self.db.execute(
            "INSERT INTO CommitRefs (Revision, RefId) VALUES (?1, ?2)",
            rusqlite::params![revision, ref_id],
        )?;

        Ok(())
    }

    /// Walks from `path` to the store root raising each ancestor's
    /// `RevisionLastSeen`, stopping at the first unknown ancestor (possible
    /// in repositories converted from other systems). Returns the updated
    /// `(path hash, fields)` pairs.
    fn propagate_revision_last_seen(&self, path: &str, revision: u32) -> Result<Vec<(u32, RowFields)>> {
        let mut updated = Vec::new();
        let mut current = parent_dir_slash(path);

        while current != "//" {
            let path_hash = path_checksum(&current);
            let cache_key = last_seen_key(path_hash);

            let row = self.cache.borrow_mut().get_or_fetch("Paths", &cache_key, || {
                let last_seen = self
                    .db
                    .query_row(
                        "SELECT RevisionLastSeen FROM Paths WHERE PathHash = ?1",
                        rusqlite::params![path_hash],
                        |row| row.get::<_, i64>(0),
                    )
                    .optional()?;

                Ok(last_seen
                    .map(|value| row_fields(&[("RevisionLastSeen", Value::Integer(value))])))
            })?;

            let last_seen = match row {
                Some(fields) => field_u32(&fields, "RevisionLastSeen").unwrap_or(0),
                None => break,
            };

            if last_seen < revision {
                self.db.execute(
                    "UPDATE Paths SET RevisionLastSeen = ?1 WHERE PathHash = ?2",
                    rusqlite::params![revision, path_hash],
                )?;

                let fields = row_fields(&[("RevisionLastSeen", Value::Integer(revision as i64))]);
                self.cache.borrow_mut().set("Paths", &cache_key, fields.clone());
                updated.push((path_hash, fields));
            }

            current = parent_dir_slash(&current);
        }

        Ok(updated)
    }
}

fn last_seen_key(path_hash: u32) -> String {
    format!("{}:last_seen", path_hash)
}

fn row_fields(fields: &[(&'static str, Value)]) -> RowFields {
    fields.iter().cloned().collect()
}

/// Parent directory with trailing slash; `//` once the root is passed.
fn parent_dir_slash(path: &str) -> String {
    let trimmed = path.trim_end_matches('/');

    match trimmed.rfind('/') {
        Some(0) | None => "//".to_string(),
        Some(index) => format!("{}/", &trimmed[..index]),
    }
}
