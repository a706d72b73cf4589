//! Path history plugin: per-path lifecycle rows, project/ref inference,
//! copy tracking and the commit/project/ref association tables.

use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet};
use std::rc::Rc;

use rusqlite::types::Value;
use rusqlite::{Connection, OptionalExtension};

use crate::db::cache::{field_i64, field_str, DatabaseCache, RowFields};
use crate::engine::collision::PathCollisionDetector;
use crate::engine::filler::{path_checksum, RepositoryFiller};
use crate::error::{Result, RevLogError};
use crate::plugins::{
    assert_no_missing_revisions, collect_window, in_list, plugin_last_revision, project_id,
    sorted_unique, FindResult, Plugin, RepositoryCollector, RevisionsData, Statistics,
};
use crate::source::{Action, LogEntry, LogQueryFlags, LogSource, NodeKind, PathChange};

const STATISTIC_PATH_ADDED: &str = "path_added";
const STATISTIC_PATH_FOUND: &str = "path_found";
const STATISTIC_PROJECT_ADDED: &str = "project_added";
const STATISTIC_PROJECT_FOUND: &str = "project_found";
const STATISTIC_PROJECT_COLLISION_FOUND: &str = "project_collision_found";
const STATISTIC_REF_ADDED: &str = "ref_added";
const STATISTIC_REF_FOUND: &str = "ref_found";
const STATISTIC_COMMIT_ADDED_TO_PROJECT: &str = "commit_added_to_project";
const STATISTIC_COMMIT_ADDED_TO_REF: &str = "commit_added_to_ref";
const STATISTIC_EMPTY_COMMIT: &str = "empty_commit";

pub struct PathsPlugin {
    db: Rc<Connection>,
    filler: Rc<RepositoryFiller>,
    cache: Rc<RefCell<DatabaseCache>>,
    source: Rc<dyn LogSource>,
    collision_detector: Rc<RefCell<PathCollisionDetector>>,
    /// Projects first seen in the commit being parsed (id -> path).
    new_projects: BTreeMap<i64, String>,
    /// Known projects touched by the commit being parsed (id -> path).
    existing_projects: BTreeMap<i64, String>,
    /// Refs touched by the commit being parsed.
    used_refs: BTreeSet<i64>,
    statistics: Statistics,
}

impl PathsPlugin {
    pub const NAME: &'static str = "paths";

    pub fn new(
        db: Rc<Connection>,
        filler: Rc<RepositoryFiller>,
        cache: Rc<RefCell<DatabaseCache>>,
        source: Rc<dyn LogSource>,
        collision_detector: Rc<RefCell<PathCollisionDetector>>,
    ) -> PathsPlugin {
        {
            let mut cache = cache.borrow_mut();
            cache.cache_table("Projects");
            cache.cache_table("ProjectRefs");
            cache.cache_table("Paths");
        }

        PathsPlugin {
            db,
            filler,
            cache,
            source,
            collision_detector,
            new_projects: BTreeMap::new(),
            existing_projects: BTreeMap::new(),
            used_refs: BTreeSet::new(),
            statistics: Statistics::new(&[
                STATISTIC_PATH_ADDED,
                STATISTIC_PATH_FOUND,
                STATISTIC_PROJECT_ADDED,
                STATISTIC_PROJECT_FOUND,
                STATISTIC_PROJECT_COLLISION_FOUND,
                STATISTIC_REF_ADDED,
                STATISTIC_REF_FOUND,
                STATISTIC_COMMIT_ADDED_TO_PROJECT,
                STATISTIC_COMMIT_ADDED_TO_REF,
                STATISTIC_EMPTY_COMMIT,
            ]),
        }
    }

    fn do_parse(&mut self, entry: &LogEntry) -> Result<()> {
        self.new_projects.clear();
        self.existing_projects.clear();
        self.used_refs.clear();

        let paths = match &entry.paths {
            Some(paths) => paths,
            None => {
                self.statistics.record(STATISTIC_EMPTY_COMMIT, 1);
                return Ok(());
            }
        };

        // Parents must be classified before their children within the same
        // commit; sorted order guarantees that.
        let mut sorted_paths: Vec<&PathChange> = paths.iter().collect();
        sorted_paths.sort_by(|a, b| a.path.cmp(&b.path));

        for change in sorted_paths {
            let path = adapt_path_to_kind(&change.path, change.kind);

            let (copy_revision, copy_path_id) = match &change.copy_from {
                Some(copy) => {
                    let copy_path = adapt_path_to_kind(&copy.path, change.kind);
                    let copy_path_id = self.process_path(&copy_path, copy.revision, None, false)?;
                    (Some(copy.revision), Some(copy_path_id))
                }
                None => (None, None),
            };

            let path_id = self.process_path(&path, entry.revision, Some(change.action), true)?;

            self.filler.add_path_to_commit(
                entry.revision,
                change.action.as_str(),
                change.kind.as_str(),
                path_id,
                copy_revision,
                copy_path_id,
            )?;
        }

        let existing: Vec<i64> = self.existing_projects.keys().copied().collect();
        for project in existing {
            self.add_commit_to_project(entry.revision, project)?;
        }

        let new_projects: Vec<(i64, String)> =
            self.new_projects.iter().map(|(id, path)| (*id, path.clone())).collect();
        for (project, project_path) in new_projects {
            let associated = self.add_missing_commits_to_project(project, &project_path)?;

            if !associated.contains(&entry.revision) {
                self.add_commit_to_project(entry.revision, project)?;
            }
        }

        let used_refs: Vec<i64> = self.used_refs.iter().copied().collect();
        for ref_id in used_refs {
            self.filler.add_commit_to_ref(entry.revision, ref_id)?;
            self.statistics.record(STATISTIC_COMMIT_ADDED_TO_REF, 1);
        }

        Ok(())
    }

    /// Resolves (inserting when unseen) one path, updating its lifecycle
    /// fields and registering the project/ref it belongs to. `is_usage` is
    /// false for copy sources, whose possibly-missing project is tolerated.
    fn process_path(&mut self, path: &str, revision: u32, action: Option<Action>, is_usage: bool) -> Result<i64> {
        let path_hash = path_checksum(path);
        let hash_key = path_hash.to_string();

        let db = self.db.clone();
        let cached = self.cache.borrow_mut().get_or_fetch("Paths", &hash_key, || {
            fetch_path_row(&db, path_hash)
        })?;

        if let Some(path_data) = cached {
            if let Some(action) = action {
                let fields = self.filler.path_touch_fields(action, revision, &path_data);

                if !fields.is_empty() {
                    let touched = self.filler.touch_path(path, revision, fields)?;
                    let mut cache = self.cache.borrow_mut();

                    for (touched_hash, touched_fields) in touched {
                        let key = touched_hash.to_string();

                        if matches!(cache.peek("Paths", &key), Some(Some(_))) {
                            cache.set("Paths", &key, touched_fields);
                        }
                    }
                }
            }

            let project_path = field_str(&path_data, "ProjectPath").unwrap_or("").to_string();
            let ref_name = field_str(&path_data, "RefName").unwrap_or("").to_string();

            if !project_path.is_empty() && !ref_name.is_empty() {
                // A missing project only happens for copy sources.
                if let Some(project) = self.process_project(&project_path, is_usage)? {
                    self.process_ref(project, &ref_name, is_usage)?;
                }
            }

            self.statistics.record(STATISTIC_PATH_FOUND, 1);

            return Ok(field_i64(&path_data, "Id").unwrap_or(0));
        }

        let mut ref_name = self.source.ref_by_path(path);
        let mut project_path = match &ref_name {
            Some(ref_name) => match path.find(ref_name.as_str()) {
                Some(position) => path[..position].to_string(),
                None => String::new(),
            },
            None => String::new(),
        };

        if !project_path.is_empty() && self.collision_detector.borrow().is_collision(&project_path) {
            project_path.clear();
            ref_name = None;
            self.statistics.record(STATISTIC_PROJECT_COLLISION_FOUND, 1);
        }

        let ref_name = ref_name.unwrap_or_default();
        let path_id = self.filler.add_path(path, &ref_name, &project_path, revision)?;

        self.cache.borrow_mut().set("Paths", &hash_key, path_row(path_id, &project_path, &ref_name, revision));

        if !project_path.is_empty() && !ref_name.is_empty() {
            if let Some(project) = self.process_project(&project_path, is_usage)? {
                self.process_ref(project, &ref_name, is_usage)?;
            }
        }

        self.statistics.record(STATISTIC_PATH_ADDED, 1);

        Ok(path_id)
    }

    fn process_project(&mut self, project_path: &str, is_usage: bool) -> Result<Option<i64>> {
        let db = self.db.clone();
        let cached = self.cache.borrow_mut().get_or_fetch("Projects", project_path, || {
            let id = db
                .query_row(
                    "SELECT Id FROM Projects WHERE Path = ?1",
                    rusqlite::params![project_path],
                    |row| row.get::<_, i64>(0),
                )
                .optional()?;

            Ok(id.map(|id| {
                let mut fields = RowFields::new();
                fields.insert("Id", Value::Integer(id));
                fields
            }))
        })?;

        if let Some(project_data) = cached {
            let project = field_i64(&project_data, "Id").unwrap_or(0);

            // Never both new and existing (one commit adding several
            // branches of the same project).
            if is_usage && !self.new_projects.contains_key(&project) {
                self.existing_projects.insert(project, project_path.to_string());
                self.statistics.record(STATISTIC_PROJECT_FOUND, 1);
            }

            return Ok(Some(project));
        }

        if !is_usage {
            return Ok(None);
        }

        let project = self.filler.add_project(project_path, false, None)?;

        let mut fields = RowFields::new();
        fields.insert("Id", Value::Integer(project));
        self.cache.borrow_mut().set("Projects", project_path, fields);
        self.collision_detector.borrow_mut().add_paths([project_path]);

        self.new_projects.insert(project, project_path.to_string());
        self.statistics.record(STATISTIC_PROJECT_ADDED, 1);

        Ok(Some(project))
    }

    fn process_ref(&mut self, project: i64, ref_name: &str, is_usage: bool) -> Result<i64> {
        let cache_key = format!("{}:{}", project, ref_name);

        let db = self.db.clone();
        let cached = self.cache.borrow_mut().get_or_fetch("ProjectRefs", &cache_key, || {
            let id = db
                .query_row(
                    "SELECT Id FROM ProjectRefs WHERE ProjectId = ?1 AND Name = ?2",
                    rusqlite::params![project, ref_name],
                    |row| row.get::<_, i64>(0),
                )
                .optional()?;

            Ok(id.map(|id| {
                let mut fields = RowFields::new();
                fields.insert("Id", Value::Integer(id));
                fields
            }))
        })?;

        if let Some(ref_data) = cached {
            let ref_id = field_i64(&ref_data, "Id").unwrap_or(0);

            if is_usage {
                self.used_refs.insert(ref_id);
            }

            self.statistics.record(STATISTIC_REF_FOUND, 1);

            return Ok(ref_id);
        }

        let ref_id = self.filler.add_ref_to_project(ref_name, project)?;

        let mut fields = RowFields::new();
        fields.insert("Id", Value::Integer(ref_id));
        self.cache.borrow_mut().set("ProjectRefs", &cache_key, fields);

        if is_usage {
            self.used_refs.insert(ref_id);
        }

        self.statistics.record(STATISTIC_REF_ADDED, 1);

        Ok(ref_id)
    }

    /// A late-discovered project adopts every project-less path under it,
    /// and the commits that touched those paths gain their association
    /// retroactively. Returns the adopted revisions.
    fn add_missing_commits_to_project(&mut self, project: i64, project_path: &str) -> Result<Vec<u32>> {
        let db = Rc::clone(&self.db);
        let mut statement = db
            .prepare("SELECT Id FROM Paths WHERE ProjectPath = '' AND Path LIKE ?1")?;
        let orphaned_paths = statement
            .query_map(rusqlite::params![format!("{}%", project_path)], |row| row.get::<_, i64>(0))?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        if orphaned_paths.is_empty() {
            return Ok(Vec::new());
        }

        self.filler.move_paths_into_project(&orphaned_paths, project_path)?;

        let mut statement = db.prepare(&format!(
            "SELECT Revision FROM CommitPaths WHERE PathId IN ({})",
            in_list(&orphaned_paths)
        ))?;
        let revisions = statement
            .query_map([], |row| row.get::<_, u32>(0))?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        let revisions = sorted_unique(revisions);

        for revision in &revisions {
            self.add_commit_to_project(*revision, project)?;
        }

        Ok(revisions)
    }

    fn add_commit_to_project(&mut self, revision: u32, project: i64) -> Result<()> {
        self.filler.add_commit_to_project(revision, project)?;
        self.statistics.record(STATISTIC_COMMIT_ADDED_TO_PROJECT, 1);

        Ok(())
    }

    fn find_all_revisions(&self, project: i64) -> Result<Vec<u32>> {
        let mut statement = self
            .db
            .prepare("SELECT Revision FROM CommitProjects WHERE ProjectId = ?1")?;
        let revisions = statement
            .query_map(rusqlite::params![project], |row| row.get::<_, u32>(0))?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(revisions)
    }

    fn find_by_column(&self, project: i64, column: &str, value: &str) -> Result<Vec<u32>> {
        let mut statement = self.db.prepare(&format!(
            "SELECT DISTINCT cpr.Revision
            FROM CommitPaths cpa
            JOIN CommitProjects cpr ON cpr.Revision = cpa.Revision
            WHERE cpr.ProjectId = ?1 AND cpa.{} LIKE ?2",
            column
        ))?;
        let revisions = statement
            .query_map(rusqlite::params![project, value], |row| row.get::<_, u32>(0))?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(revisions)
    }

    /// Sub-tree search. Follows copy history backward with an explicit
    /// worklist: each frame searches one path bounded by the revision that
    /// copied it away.
    fn find_by_sub_match(&self, project: i64, path: &str) -> Result<Vec<u32>> {
        let mut revisions = Vec::new();
        let mut worklist = vec![(path.to_string(), None::<u32>)];

        while let Some((current_path, max_revision)) = worklist.pop() {
            let path_id = match self.path_id(&current_path)? {
                Some(path_id) => path_id,
                None => continue,
            };

            let copy_data = self.path_copy_data(path_id, max_revision)?;
            let min_revision = copy_data.as_ref().map(|copy| copy.revision);

            if self.source.is_ref_root(&current_path) {
                // Ref roots go through the commit/ref association directly.
                let ref_name = self.source.ref_by_path(&current_path).unwrap_or_default();
                let ref_id = self.ref_id(project, &ref_name)?.unwrap_or(-1);

                let sql = format!(
                    "SELECT DISTINCT Revision FROM CommitRefs WHERE RefId = ?1{}{}",
                    bound_clause("Revision >=", min_revision),
                    bound_clause("Revision <", max_revision)
                );

                let mut statement = self.db.prepare(&sql)?;
                let matched = statement
                    .query_map(rusqlite::params![ref_id], |row| row.get::<_, u32>(0))?
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                revisions.extend(matched);
            } else {
                let sql = format!(
                    "SELECT DISTINCT cpr.Revision
                    FROM CommitProjects cpr
                    JOIN CommitPaths cpa ON cpa.Revision = cpr.Revision
                    JOIN Paths p ON p.Id = cpa.PathId
                    WHERE cpr.ProjectId = ?1 AND p.Path LIKE ?2{}{}",
                    bound_clause("cpr.Revision >=", min_revision),
                    bound_clause("cpr.Revision <", max_revision)
                );

                let mut statement = self.db.prepare(&sql)?;
                let matched = statement
                    .query_map(rusqlite::params![project, format!("{}%", current_path)], |row| {
                        row.get::<_, u32>(0)
                    })?
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                revisions.extend(matched);
            }

            if let Some(copy) = copy_data {
                worklist.push((self.path_from_id(copy.copy_path_id)?, Some(copy.revision)));
            }
        }

        Ok(revisions)
    }

    /// Single-path search; same copy-following shape as
    /// [`PathsPlugin::find_by_sub_match`].
    fn find_by_exact_match(&self, project: i64, path: &str) -> Result<Vec<u32>> {
        let mut revisions = Vec::new();
        let mut worklist = vec![(path.to_string(), None::<u32>)];

        while let Some((current_path, max_revision)) = worklist.pop() {
            let path_id = match self.path_id(&current_path)? {
                Some(path_id) => path_id,
                None => continue,
            };

            let copy_data = self.path_copy_data(path_id, max_revision)?;
            let min_revision = copy_data.as_ref().map(|copy| copy.revision);

            let sql = format!(
                "SELECT DISTINCT cpr.Revision
                FROM CommitProjects cpr
                JOIN CommitPaths cpa ON cpa.Revision = cpr.Revision
                JOIN Paths p ON p.Id = cpa.PathId
                WHERE cpr.ProjectId = ?1 AND p.PathHash = ?2{}{}",
                bound_clause("cpr.Revision >=", min_revision),
                bound_clause("cpr.Revision <", max_revision)
            );

            let mut statement = self.db.prepare(&sql)?;
            let matched = statement
                .query_map(rusqlite::params![project, path_checksum(&current_path)], |row| {
                    row.get::<_, u32>(0)
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            revisions.extend(matched);

            if let Some(copy) = copy_data {
                worklist.push((self.path_from_id(copy.copy_path_id)?, Some(copy.revision)));
            }
        }

        Ok(revisions)
    }

    /// Latest copy that created `path_id` at or before `max_revision`.
    fn path_copy_data(&self, path_id: i64, max_revision: Option<u32>) -> Result<Option<PathCopyData>> {
        let sql = format!(
            "SELECT Revision, CopyPathId
            FROM CommitPaths
            WHERE PathId = ?1 AND CopyPathId IS NOT NULL{}
            ORDER BY Revision DESC
            LIMIT 1",
            bound_clause("Revision <=", max_revision)
        );

        let copy_data = self
            .db
            .query_row(&sql, rusqlite::params![path_id], |row| {
                Ok(PathCopyData { revision: row.get(0)?, copy_path_id: row.get(1)? })
            })
            .optional()?;

        Ok(copy_data)
    }

    fn path_id(&self, path: &str) -> Result<Option<i64>> {
        let path_id = self
            .db
            .query_row(
                "SELECT Id FROM Paths WHERE PathHash = ?1",
                rusqlite::params![path_checksum(path)],
                |row| row.get::<_, i64>(0),
            )
            .optional()?;

        Ok(path_id)
    }

    fn path_from_id(&self, path_id: i64) -> Result<String> {
        let path = self.db.query_row(
            "SELECT Path FROM Paths WHERE Id = ?1",
            rusqlite::params![path_id],
            |row| row.get::<_, String>(0),
        )?;

        Ok(path)
    }

    fn ref_id(&self, project: i64, ref_name: &str) -> Result<Option<i64>> {
        let ref_id = self
            .db
            .query_row(
                "SELECT Id FROM ProjectRefs WHERE ProjectId = ?1 AND Name = ?2",
                rusqlite::params![project, ref_name],
                |row| row.get::<_, i64>(0),
            )
            .optional()?;

        Ok(ref_id)
    }
}

impl Plugin for PathsPlugin {
    fn name(&self) -> &'static str {
        PathsPlugin::NAME
    }

    fn when_database_ready(&mut self) -> Result<()> {
        let mut statement = self.db.prepare("SELECT Path FROM Projects")?;
        let project_paths = statement
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        self.collision_detector.borrow_mut().add_paths(project_paths);

        Ok(())
    }

    fn find(&self, criteria: &[String], project_path: &str) -> Result<FindResult> {
        if criteria.is_empty() {
            return Ok(FindResult::Revisions(Vec::new()));
        }

        let project = project_id(&self.db, project_path)?;
        let mut revisions = Vec::new();

        if criteria[0].is_empty() {
            revisions = self.find_all_revisions(project)?;
        } else {
            for criterion in criteria {
                let (field, value) = match criterion.split_once(':') {
                    Some((field, value)) => (field, value),
                    // A bare path: trailing slash means sub-tree search.
                    None if criterion.ends_with('/') => ("sub-match", criterion.as_str()),
                    None => ("exact", criterion.as_str()),
                };

                let matched = match field {
                    "action" => self.find_by_column(project, "Action", value)?,
                    "kind" => self.find_by_column(project, "Kind", value)?,
                    "exact" => self.find_by_exact_match(project, value)?,
                    "sub-match" => self.find_by_sub_match(project, value)?,
                    _ => {
                        return Err(RevLogError::BadCriterion {
                            plugin: self.name().to_string(),
                            message: format!("searching by \"{}\" is not supported", field),
                        })
                    }
                };

                revisions.extend(matched);
            }
        }

        Ok(FindResult::Revisions(sorted_unique(revisions)))
    }

    fn revisions_data(&self, revisions: &[u32]) -> Result<RevisionsData> {
        let mut statement = self.db.prepare(&format!(
            "SELECT cp.Revision, p1.Path, cp.Kind, cp.Action, p2.Path AS CopyPath, cp.CopyRevision
            FROM CommitPaths cp
            JOIN Paths p1 ON p1.Id = cp.PathId
            LEFT JOIN Paths p2 ON p2.Id = cp.CopyPathId
            WHERE cp.Revision IN ({})",
            in_list(revisions)
        ))?;

        let rows = statement
            .query_map([], |row| {
                Ok((
                    row.get::<_, u32>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, Option<String>>(4)?,
                    row.get::<_, Option<u32>>(5)?,
                ))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        let mut results = RevisionsData::new();

        for (revision, path, kind, action, copy_path, copy_revision) in rows {
            let paths = results
                .entry(revision)
                .or_insert_with(|| serde_json::Value::Array(Vec::new()));

            if let serde_json::Value::Array(items) = paths {
                items.push(serde_json::json!({
                    "path": path,
                    "kind": kind,
                    "action": action,
                    "copyfrom-path": copy_path,
                    "copyfrom-rev": copy_revision,
                }));
            }
        }

        assert_no_missing_revisions(self.name(), revisions, &results)?;

        Ok(results)
    }

    fn last_revision(&self) -> Result<u32> {
        plugin_last_revision(&self.db, self.name())
    }

    fn statistics(&self) -> &Statistics {
        &self.statistics
    }
}

impl RepositoryCollector for PathsPlugin {
    fn query_flags(&self) -> LogQueryFlags {
        LogQueryFlags { verbose: true, merge_history: false }
    }

    fn parse(&mut self, entries: &[LogEntry]) -> Result<()> {
        let db = self.db.clone();
        let name = self.name();

        collect_window(&db, name, false, entries, |entry, _| self.do_parse(entry))
    }
}

#[derive(Debug)]
struct PathCopyData {
    /// Revision the copy happened in.
    revision: u32,
    copy_path_id: i64,
}

/// Directory paths are stored with a trailing slash.
fn adapt_path_to_kind(path: &str, kind: NodeKind) -> String {
    match kind {
        NodeKind::Dir => format!("{}/", path),
        NodeKind::File => path.to_string(),
    }
}

fn path_row(path_id: i64, project_path: &str, ref_name: &str, revision: u32) -> RowFields {
    let mut fields = RowFields::new();
    fields.insert("Id", Value::Integer(path_id));
    fields.insert("ProjectPath", Value::Text(project_path.to_string()));
    fields.insert("RefName", Value::Text(ref_name.to_string()));
    fields.insert("RevisionAdded", Value::Integer(revision as i64));
    fields.insert("RevisionDeleted", Value::Null);
    fields.insert("RevisionLastSeen", Value::Integer(revision as i64));
    fields
}

fn bound_clause(comparison: &str, revision: Option<u32>) -> String {
    match revision {
        Some(revision) => format!(" AND {} {}", comparison, revision),
        None => String::new(),
    }
}

fn fetch_path_row(db: &Connection, path_hash: u32) -> Result<Option<RowFields>> {
    let row = db
        .query_row(
            "SELECT Id, ProjectPath, RefName, RevisionAdded, RevisionDeleted, RevisionLastSeen
            FROM Paths
            WHERE PathHash = ?1",
            rusqlite::params![path_hash],
            |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, i64>(3)?,
                    row.get::<_, Option<i64>>(4)?,
                    row.get::<_, i64>(5)?,
                ))
            },
        )
        .optional()?;

    Ok(row.map(|(id, project_path, ref_name, added, deleted, last_seen)| {
        let mut fields = RowFields::new();
        fields.insert("Id", Value::Integer(id));
        fields.insert("ProjectPath", Value::Text(project_path));
        fields.insert("RefName", Value::Text(ref_name));
        fields.insert("RevisionAdded", Value::Integer(added));
        fields.insert("RevisionDeleted", deleted.map(Value::Integer).unwrap_or(Value::Null));
        fields.insert("RevisionLastSeen", Value::Integer(last_seen));
        fields
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dir_paths_get_trailing_slash() {
        assert_eq!(adapt_path_to_kind("/a/b", NodeKind::Dir), "/a/b/");
        assert_eq!(adapt_path_to_kind("/a/b.txt", NodeKind::File), "/a/b.txt");
    }

    #[test]
    fn bound_clause_rendering() {
        assert_eq!(bound_clause("Revision <", Some(10)), " AND Revision < 10");
        assert_eq!(bound_clause("Revision <", None), "");
    }
}
