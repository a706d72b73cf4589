//! Commit summary plugin: author, date and message per revision.

use std::rc::Rc;

use rusqlite::Connection;

use crate::engine::filler::RepositoryFiller;
use crate::error::{Result, RevLogError};
use crate::plugins::{
    assert_no_missing_revisions, collect_window, in_list, plugin_last_revision, project_id,
    sorted_unique, FindResult, Plugin, RepositoryCollector, RevisionsData, Statistics,
};
use crate::source::LogEntry;

const STATISTIC_COMMIT_ADDED: &str = "commit_added";

pub struct SummaryPlugin {
    db: Rc<Connection>,
    filler: Rc<RepositoryFiller>,
    statistics: Statistics,
}

impl SummaryPlugin {
    pub const NAME: &'static str = "summary";

    pub fn new(db: Rc<Connection>, filler: Rc<RepositoryFiller>) -> SummaryPlugin {
        SummaryPlugin { db, filler, statistics: Statistics::new(&[STATISTIC_COMMIT_ADDED]) }
    }
}

impl Plugin for SummaryPlugin {
    fn name(&self) -> &'static str {
        SummaryPlugin::NAME
    }

    fn find(&self, criteria: &[String], project_path: &str) -> Result<FindResult> {
        if criteria.is_empty() {
            return Ok(FindResult::Revisions(Vec::new()));
        }

        let project = project_id(&self.db, project_path)?;
        let mut revisions = Vec::new();

        for criterion in criteria {
            let (field, value) = criterion.split_once(':').ok_or_else(|| RevLogError::BadCriterion {
                plugin: self.name().to_string(),
                message: "each criterion must be in \"field:value\" format".to_string(),
            })?;

            if field != "author" {
                return Err(RevLogError::BadCriterion {
                    plugin: self.name().to_string(),
                    message: format!("searching by \"{}\" is not supported", field),
                });
            }

            let mut statement = self.db.prepare(
                "SELECT c.Revision
                FROM Commits c
                JOIN CommitProjects cp ON cp.Revision = c.Revision
                WHERE cp.ProjectId = ?1 AND c.Author = ?2",
            )?;
            let matched = statement
                .query_map(rusqlite::params![project, value], |row| row.get::<_, u32>(0))?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            revisions.extend(matched);
        }

        Ok(FindResult::Revisions(sorted_unique(revisions)))
    }

    fn revisions_data(&self, revisions: &[u32]) -> Result<RevisionsData> {
        let mut statement = self.db.prepare(&format!(
            "SELECT Revision, Author, Date, Message
            FROM Commits
            WHERE Revision IN ({})",
            in_list(revisions)
        ))?;

        let rows = statement
            .query_map([], |row| {
                Ok((
                    row.get::<_, u32>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, i64>(2)?,
                    row.get::<_, String>(3)?,
                ))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        let mut results = RevisionsData::new();

        for (revision, author, date, message) in rows {
            results.insert(
                revision,
                serde_json::json!({ "author": author, "date": date, "msg": message }),
            );
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

impl RepositoryCollector for SummaryPlugin {
    fn parse(&mut self, entries: &[LogEntry]) -> Result<()> {
        let db = self.db.clone();
        let filler = self.filler.clone();

        collect_window(&db, self.name(), false, entries, |entry, _| {
            filler.add_commit(entry.revision, &entry.author, entry.date, &entry.message)?;
            self.statistics.record(STATISTIC_COMMIT_ADDED, 1);
            Ok(())
        })
    }
}
