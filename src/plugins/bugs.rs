//! Bug association plugin: extracts bug IDs from commit messages using each
//! project's `bugtraq:logregex` property.

use std::collections::BTreeMap;
use std::rc::Rc;

use indicatif::ProgressBar;
use rusqlite::Connection;

use crate::engine::filler::RepositoryFiller;
use crate::error::Result;
use crate::message_parser::LogMessageParser;
use crate::plugins::{
    add_missing_results, in_list, load_projects, plugin_last_revision, project_id,
    set_plugin_last_revision, sorted_unique, DatabaseCollector, FindResult, Plugin, ProjectInfo,
    RevisionsData, Statistics,
};
use crate::source::LogSource;

const STATISTIC_BUG_ADDED_TO_COMMIT: &str = "bug_added_to_commit";
const STATISTIC_BUG_REMOVED_FROM_COMMIT: &str = "bug_removed_from_commit";

/// Message scanning happens in bounded revision chunks to keep the working
/// set small on large histories.
const DETECT_CHUNK_SIZE: u32 = 1000;

pub struct BugsPlugin {
    db: Rc<Connection>,
    filler: Rc<RepositoryFiller>,
    /// Repository root URL; paths from the store are appended to it for
    /// property lookups.
    root_url: String,
    source: Rc<dyn LogSource>,
    overwrite_mode: bool,
    statistics: Statistics,
}

impl BugsPlugin {
    pub const NAME: &'static str = "bugs";

    pub fn new(
        db: Rc<Connection>,
        filler: Rc<RepositoryFiller>,
        root_url: String,
        source: Rc<dyn LogSource>,
    ) -> BugsPlugin {
        BugsPlugin {
            db,
            filler,
            root_url,
            source,
            overwrite_mode: false,
            statistics: Statistics::new(&[STATISTIC_BUG_ADDED_TO_COMMIT, STATISTIC_BUG_REMOVED_FROM_COMMIT]),
        }
    }

    /// Re-detects a project's bug expression and applies it to future
    /// processing. Already-derived associations are left as they are.
    pub fn refresh_bug_regexp(&mut self, project_path: &str) -> Result<()> {
        let project = project_id(&self.db, project_path)?;

        self.db.execute(
            "UPDATE Projects SET BugRegExp = NULL WHERE Id = ?1",
            rusqlite::params![project],
        )?;

        self.populate_missing_bug_regexp()
    }

    /// Fills `BugRegExp` for projects that never had it detected, reading
    /// the property from the most recently changed ref root.
    fn populate_missing_bug_regexp(&mut self) -> Result<()> {
        let projects = load_projects(&self.db, Some("BugRegExp IS NULL"))?;

        for project in projects {
            let bug_regexp = self.detect_project_bug_regexp(&project)?;
            self.filler.set_project_bug_regexp(project.id, Some(&bug_regexp))?;
        }

        Ok(())
    }

    fn detect_project_bug_regexp(&self, project: &ProjectInfo) -> Result<String> {
        for ref_path in self.last_changed_ref_paths(&project.path)? {
            let url = format!("{}{}", self.root_url, ref_path);
            // A deleted project's property is only reachable at the last
            // revision it existed in.
            let revision = project.is_deleted.then_some(project.revision_last_seen);

            let logregex = self.source.property("bugtraq:logregex", &url, revision)?;

            if !logregex.is_empty() {
                return Ok(logregex);
            }
        }

        Ok(String::new())
    }

    /// Ref-root paths of a project, most recently changed first.
    fn last_changed_ref_paths(&self, project_path: &str) -> Result<Vec<String>> {
        let own_nesting_level = project_path.matches('/').count().saturating_sub(1) as i64;

        let mut statement = self.db.prepare(
            "SELECT Path, RevisionLastSeen
            FROM Paths
            WHERE Path LIKE ?1
                AND PathNestingLevel BETWEEN ?2 AND ?3
                AND RevisionDeleted IS NULL",
        )?;
        let candidates = statement
            .query_map(
                rusqlite::params![format!("{}%", project_path), own_nesting_level + 1, own_nesting_level + 2],
                |row| Ok((row.get::<_, String>(0)?, row.get::<_, u32>(1)?)),
            )?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        let mut ref_paths: Vec<(String, u32)> = candidates
            .into_iter()
            .filter(|(path, _)| path.ends_with('/') && self.source.is_ref_root(path))
            .collect();

        ref_paths.sort_by(|a, b| b.1.cmp(&a.1));

        Ok(ref_paths.into_iter().map(|(path, _)| path).collect())
    }

    fn remove(&mut self, from_revision: u32, to_revision: u32) -> Result<()> {
        for revision in from_revision..=to_revision {
            let removed = self.filler.remove_bugs_from_commit(revision)?;
            self.statistics
                .record(STATISTIC_BUG_REMOVED_FROM_COMMIT, removed as u64);
        }

        Ok(())
    }

    fn detect_bugs(&mut self, from_revision: u32, to_revision: u32, progress: Option<&ProgressBar>) -> Result<()> {
        let bug_regexp_mapping = self.project_bug_regexps()?;

        if bug_regexp_mapping.is_empty() {
            return Ok(());
        }

        let mut range_start = from_revision;

        while range_start <= to_revision {
            let range_end = range_start
                .saturating_add(DETECT_CHUNK_SIZE - 1)
                .min(to_revision);

            self.do_detect_bugs(range_start, range_end, &bug_regexp_mapping)?;

            if let Some(progress) = progress {
                progress.inc(1);
            }

            range_start = range_end + 1;
        }

        Ok(())
    }

    /// `BugRegExp` per project id, for projects where one was detected.
    fn project_bug_regexps(&self) -> Result<BTreeMap<i64, String>> {
        let projects = load_projects(&self.db, Some("BugRegExp != ''"))?;

        Ok(projects
            .into_iter()
            .filter_map(|project| project.bug_regexp.map(|regexp| (project.id, regexp)))
            .collect())
    }

    fn do_detect_bugs(
        &mut self,
        from_revision: u32,
        to_revision: u32,
        bug_regexp_mapping: &BTreeMap<i64, String>,
    ) -> Result<()> {
        let commits_by_project = self.commits_grouped_by_project(from_revision, to_revision)?;

        for (project, commits) in commits_by_project {
            let bug_regexp = match bug_regexp_mapping.get(&project) {
                Some(bug_regexp) => bug_regexp,
                None => continue,
            };

            let parser = LogMessageParser::new(bug_regexp);

            for (revision, message) in commits {
                let bugs = parser.parse(&message);

                if !bugs.is_empty() {
                    self.filler.add_bugs_to_commit(&bugs, revision)?;
                    self.statistics
                        .record(STATISTIC_BUG_ADDED_TO_COMMIT, bugs.len() as u64);
                }
            }
        }

        Ok(())
    }

    /// Commit messages grouped by owning project; a commit that belongs to
    /// several projects is attributed to the first one only, so its message
    /// is never scanned twice.
    fn commits_grouped_by_project(
        &self,
        from_revision: u32,
        to_revision: u32,
    ) -> Result<BTreeMap<i64, Vec<(u32, String)>>> {
        let mut statement = self.db.prepare(
            "SELECT cp.Revision, c.Message, cp.ProjectId
            FROM CommitProjects cp
            JOIN Commits c ON c.Revision = cp.Revision
            WHERE cp.Revision BETWEEN ?1 AND ?2
            ORDER BY cp.Revision",
        )?;
        let rows = statement
            .query_map(rusqlite::params![from_revision, to_revision], |row| {
                Ok((row.get::<_, u32>(0)?, row.get::<_, String>(1)?, row.get::<_, i64>(2)?))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        let mut grouped: BTreeMap<i64, Vec<(u32, String)>> = BTreeMap::new();
        let mut processed_revisions = Vec::new();

        for (revision, message, project) in rows {
            if processed_revisions.contains(&revision) {
                continue;
            }

            processed_revisions.push(revision);
            grouped.entry(project).or_default().push((revision, message));
        }

        Ok(grouped)
    }
}

impl Plugin for BugsPlugin {
    fn name(&self) -> &'static str {
        BugsPlugin::NAME
    }

    fn find(&self, criteria: &[String], project_path: &str) -> Result<FindResult> {
        if criteria.is_empty() {
            return Ok(FindResult::Revisions(Vec::new()));
        }

        let project = project_id(&self.db, project_path)?;

        let placeholders = (2..=criteria.len() + 1)
            .map(|index| format!("?{}", index))
            .collect::<Vec<_>>()
            .join(",");

        let mut statement = self.db.prepare(&format!(
            "SELECT DISTINCT cb.Revision
            FROM CommitBugs cb
            JOIN CommitProjects cp ON cp.Revision = cb.Revision
            WHERE cp.ProjectId = ?1 AND cb.Bug IN ({})",
            placeholders
        ))?;

        let params = std::iter::once(rusqlite::types::Value::Integer(project))
            .chain(criteria.iter().map(|bug| rusqlite::types::Value::Text(bug.clone())));
        let revisions = statement
            .query_map(rusqlite::params_from_iter(params), |row| row.get::<_, u32>(0))?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(FindResult::Revisions(sorted_unique(revisions)))
    }

    fn revisions_data(&self, revisions: &[u32]) -> Result<RevisionsData> {
        let mut statement = self.db.prepare(&format!(
            "SELECT Revision, Bug FROM CommitBugs WHERE Revision IN ({})",
            in_list(revisions)
        ))?;
        let rows = statement
            .query_map([], |row| Ok((row.get::<_, u32>(0)?, row.get::<_, String>(1)?)))?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        let mut results = RevisionsData::new();

        for (revision, bug) in rows {
            let entry = results
                .entry(revision)
                .or_insert_with(|| serde_json::Value::Array(Vec::new()));

            if let serde_json::Value::Array(items) = entry {
                items.push(serde_json::Value::String(bug));
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

impl DatabaseCollector for BugsPlugin {
    fn process(&mut self, from_revision: u32, to_revision: u32, progress: Option<&ProgressBar>) -> Result<()> {
        let last_revision = plugin_last_revision(&self.db, self.name())?;

        if to_revision <= last_revision && !self.overwrite_mode {
            return Ok(());
        }

        let db = Rc::clone(&self.db);
        let tx = db.unchecked_transaction()?;

        self.populate_missing_bug_regexp()?;

        if self.overwrite_mode {
            self.remove(from_revision, to_revision)?;
            self.detect_bugs(from_revision, to_revision, progress)?;
        } else if to_revision > last_revision {
            self.detect_bugs(last_revision + 1, to_revision, progress)?;
        }

        if to_revision > last_revision {
            set_plugin_last_revision(&self.db, self.name(), to_revision)?;
        }

        tx.commit()?;

        Ok(())
    }
}
