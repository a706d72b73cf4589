//! Ref membership plugin: queries over the commit/ref association the
//! paths plugin maintains.

use std::rc::Rc;

use indicatif::ProgressBar;
use rusqlite::Connection;

use crate::error::Result;
use crate::plugins::{
    add_missing_results, in_list, plugin_last_revision, project_id, set_plugin_last_revision,
    sorted_unique, DatabaseCollector, FindResult, Plugin, RevisionsData, Statistics,
};

/// Sentinel criterion: list every ref name of the project instead of
/// searching revisions.
pub const ALL_REFS: &str = "all_refs";

pub struct RefsPlugin {
    db: Rc<Connection>,
    statistics: Statistics,
}

impl RefsPlugin {
    pub const NAME: &'static str = "refs";

    pub fn new(db: Rc<Connection>) -> RefsPlugin {
        RefsPlugin { db, statistics: Statistics::new(&[]) }
    }
}

impl Plugin for RefsPlugin {
    fn name(&self) -> &'static str {
        RefsPlugin::NAME
    }

    fn find(&self, criteria: &[String], project_path: &str) -> Result<FindResult> {
        if criteria.is_empty() {
            return Ok(FindResult::Revisions(Vec::new()));
        }

        let project = project_id(&self.db, project_path)?;

        if criteria[0] == ALL_REFS {
            let mut statement = self
                .db
                .prepare("SELECT DISTINCT Name FROM ProjectRefs WHERE ProjectId = ?1")?;
            let names = statement
                .query_map(rusqlite::params![project], |row| row.get::<_, String>(0))?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            return Ok(FindResult::Names(names));
        }

        let placeholders = (2..=criteria.len() + 1)
            .map(|index| format!("?{}", index))
            .collect::<Vec<_>>()
            .join(",");

        let mut statement = self.db.prepare(&format!(
            "SELECT DISTINCT cr.Revision
            FROM ProjectRefs pr
            JOIN CommitRefs cr ON cr.RefId = pr.Id
            WHERE pr.ProjectId = ?1 AND pr.Name IN ({})",
            placeholders
        ))?;

        let params = std::iter::once(rusqlite::types::Value::Integer(project))
            .chain(criteria.iter().map(|name| rusqlite::types::Value::Text(name.clone())));
        let revisions = statement
            .query_map(rusqlite::params_from_iter(params), |row| row.get::<_, u32>(0))?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(FindResult::Revisions(sorted_unique(revisions)))
    }

    fn revisions_data(&self, revisions: &[u32]) -> Result<RevisionsData> {
        let mut statement = self.db.prepare(&format!(
            "SELECT cr.Revision, pr.Name
            FROM CommitRefs cr
            JOIN ProjectRefs pr ON pr.Id = cr.RefId
            WHERE cr.Revision IN ({})",
            in_list(revisions)
        ))?;

        let rows = statement
            .query_map([], |row| Ok((row.get::<_, u32>(0)?, row.get::<_, String>(1)?)))?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        let mut results = RevisionsData::new();

        for (revision, ref_name) in rows {
            let entry = results
                .entry(revision)
                .or_insert_with(|| serde_json::Value::Array(Vec::new()));

            if let serde_json::Value::Array(items) = entry {
                items.push(serde_json::Value::String(ref_name));
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
}

impl DatabaseCollector for RefsPlugin {
    fn process(&mut self, _from_revision: u32, to_revision: u32, progress: Option<&ProgressBar>) -> Result<()> {
        let last_revision = plugin_last_revision(&self.db, self.name())?;

        if to_revision <= last_revision {
            return Ok(());
        }

        // The paths plugin maintains the associations; only the watermark
        // moves here.
        let tx = self.db.unchecked_transaction()?;
        set_plugin_last_revision(&self.db, self.name(), to_revision)?;
        tx.commit()?;

        if let Some(progress) = progress {
            progress.inc(1);
        }

        Ok(())
    }
}
