//! Merge fact plugin: which revision merged which.

use std::rc::Rc;

use rusqlite::Connection;

use crate::engine::filler::RepositoryFiller;
use crate::error::{Result, RevLogError};
use crate::plugins::{
    add_missing_results, collect_window, in_list, plugin_last_revision, project_id, sorted_unique,
    FindResult, Plugin, RepositoryCollector, RevisionsData, Statistics,
};
use crate::source::{LogEntry, LogQueryFlags};

const STATISTIC_MERGE_ADDED: &str = "merge_added";
const STATISTIC_MERGE_DELETED: &str = "merge_deleted";

/// Sentinel criteria: all merge revisions / all merged revisions of the
/// project.
pub const ALL_MERGES: &str = "all_merges";
pub const ALL_MERGED: &str = "all_merged";

pub struct MergesPlugin {
    db: Rc<Connection>,
    filler: Rc<RepositoryFiller>,
    overwrite_mode: bool,
    statistics: Statistics,
}

impl MergesPlugin {
    pub const NAME: &'static str = "merges";

    pub fn new(db: Rc<Connection>, filler: Rc<RepositoryFiller>) -> MergesPlugin {
        MergesPlugin {
            db,
            filler,
            overwrite_mode: false,
            statistics: Statistics::new(&[STATISTIC_MERGE_ADDED, STATISTIC_MERGE_DELETED]),
        }
    }

    fn find_all(&self, project: i64, column: &str) -> Result<Vec<u32>> {
        let mut statement = self.db.prepare(&format!(
            "SELECT DISTINCT m.{column}
            FROM Merges m
            JOIN CommitProjects cp ON cp.Revision = m.{column}
            WHERE cp.ProjectId = ?1",
            column = column
        ))?;
        let revisions = statement
            .query_map(rusqlite::params![project], |row| row.get::<_, u32>(0))?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(sorted_unique(revisions))
    }
}

impl Plugin for MergesPlugin {
    fn name(&self) -> &'static str {
        MergesPlugin::NAME
    }

    fn find(&self, criteria: &[String], project_path: &str) -> Result<FindResult> {
        if criteria.is_empty() {
            return Ok(FindResult::Revisions(Vec::new()));
        }

        let project = project_id(&self.db, project_path)?;

        if criteria[0] == ALL_MERGES {
            return Ok(FindResult::Revisions(self.find_all(project, "MergeRevision")?));
        }

        if criteria[0] == ALL_MERGED {
            return Ok(FindResult::Revisions(self.find_all(project, "MergedRevision")?));
        }

        let mut merge_revisions = Vec::with_capacity(criteria.len());

        for criterion in criteria {
            let revision = criterion.parse::<u32>().map_err(|_| RevLogError::BadCriterion {
                plugin: self.name().to_string(),
                message: format!(
                    "each criterion must be a merge revision number or the \"{}\"/\"{}\" sentinel",
                    ALL_MERGES, ALL_MERGED
                ),
            })?;

            merge_revisions.push(revision);
        }

        let mut statement = self.db.prepare(&format!(
            "SELECT m.MergeRevision, m.MergedRevision
            FROM Merges m
            JOIN CommitProjects cp ON cp.Revision = m.MergeRevision
            WHERE cp.ProjectId = ?1 AND m.MergeRevision IN ({})",
            in_list(&merge_revisions)
        ))?;
        let rows = statement
            .query_map(rusqlite::params![project], |row| {
                Ok((row.get::<_, u32>(0)?, row.get::<_, u32>(1)?))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        let unknown: Vec<u32> = merge_revisions
            .iter()
            .copied()
            .filter(|revision| !rows.iter().any(|(merge, _)| merge == revision))
            .collect();

        if !unknown.is_empty() {
            return Err(RevLogError::RevisionsNotFound {
                plugin: self.name().to_string(),
                revisions: unknown,
            });
        }

        let merged = rows.into_iter().map(|(_, merged)| merged).collect();

        Ok(FindResult::Revisions(sorted_unique(merged)))
    }

    /// Payload per *merged* revision: the merge revisions that picked it up.
    fn revisions_data(&self, revisions: &[u32]) -> Result<RevisionsData> {
        let mut statement = self.db.prepare(&format!(
            "SELECT MergeRevision, MergedRevision
            FROM Merges
            WHERE MergedRevision IN ({})",
            in_list(revisions)
        ))?;
        let rows = statement
            .query_map([], |row| Ok((row.get::<_, u32>(0)?, row.get::<_, u32>(1)?)))?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        let mut results = RevisionsData::new();

        for (merge_revision, merged_revision) in rows {
            let entry = results
                .entry(merged_revision)
                .or_insert_with(|| serde_json::Value::Array(Vec::new()));

            if let serde_json::Value::Array(items) = entry {
                items.push(serde_json::Value::Number(merge_revision.into()));
            }
        }

        add_missing_results(revisions, &mut results);

        Ok(results)
    }

    fn last_revision(&self) -> Result<u32> {
        plugin_last_revision(&self.db, self.name())
    }

    fn statistics(&self) -> &Statistics {
        &self.statistics
    }

    fn set_overwrite_mode(&mut self, enabled: bool) {
        self.overwrite_mode = enabled;
    }

    fn is_overwrite_mode(&self) -> bool {
        self.overwrite_mode
    }
}

impl RepositoryCollector for MergesPlugin {
    fn query_flags(&self) -> LogQueryFlags {
        LogQueryFlags { verbose: false, merge_history: true }
    }

    fn parse(&mut self, entries: &[LogEntry]) -> Result<()> {
        let db = self.db.clone();
        let filler = self.filler.clone();
        let overwrite_mode = self.overwrite_mode;

        collect_window(&db, self.name(), overwrite_mode, entries, |entry, already_processed| {
            if already_processed {
                let removed = filler.remove_merge_commit(entry.revision)?;
                self.statistics.record(STATISTIC_MERGE_DELETED, removed as u64);
            }

            filler.add_merge_commit(entry.revision, &entry.merged_revisions)?;
            self.statistics
                .record(STATISTIC_MERGE_ADDED, entry.merged_revisions.len() as u64);

            Ok(())
        })
    }
}
