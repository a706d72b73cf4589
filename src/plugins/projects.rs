//! Project lifecycle plugin: tracks `IsDeleted` transitions of project
//! roots and owns the repository-wide project fallback.

use std::rc::Rc;

use indicatif::ProgressBar;
use rusqlite::Connection;

use crate::engine::filler::RepositoryFiller;
use crate::error::{Result, RevLogError};
use crate::plugins::{
    add_missing_results, in_list, load_projects, plugin_last_revision, set_plugin_last_revision,
    sorted_unique, DatabaseCollector, FindResult, Plugin, RevisionsData, Statistics,
};

const STATISTIC_PROJECT_DELETED: &str = "project_deleted";
const STATISTIC_PROJECT_RESTORED: &str = "project_restored";

/// Repositories with at least this many revisions and no ref-structured
/// project get a single repository-wide project instead.
const REPOSITORY_WIDE_THRESHOLD: u32 = 20;

pub struct ProjectsPlugin {
    db: Rc<Connection>,
    filler: Rc<RepositoryFiller>,
    statistics: Statistics,
}

impl ProjectsPlugin {
    pub const NAME: &'static str = "projects";

    pub fn new(db: Rc<Connection>, filler: Rc<RepositoryFiller>) -> ProjectsPlugin {
        ProjectsPlugin {
            db,
            filler,
            statistics: Statistics::new(&[STATISTIC_PROJECT_DELETED, STATISTIC_PROJECT_RESTORED]),
        }
    }

    /// Adopts every path and commit into a single `/` project for
    /// repositories without trunk/branches/tags structure.
    fn create_repository_wide_project(&self) -> Result<()> {
        loop {
            let mut statement = self
                .db
                .prepare("SELECT Id FROM Paths WHERE ProjectPath = '' LIMIT 100")?;
            let orphaned_paths = statement
                .query_map([], |row| row.get::<_, i64>(0))?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            if orphaned_paths.is_empty() {
                break;
            }

            self.filler.move_paths_into_project(&orphaned_paths, "/")?;
        }

        let project = self.filler.add_project("/", false, None)?;

        let mut statement = self.db.prepare("SELECT Revision FROM Commits")?;
        let revisions = statement
            .query_map([], |row| row.get::<_, u32>(0))?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        for revision in revisions {
            self.filler.add_commit_to_project(revision, project)?;
        }

        Ok(())
    }
}

impl Plugin for ProjectsPlugin {
    fn name(&self) -> &'static str {
        ProjectsPlugin::NAME
    }

    fn find(&self, criteria: &[String], _project_path: &str) -> Result<FindResult> {
        if criteria.is_empty() {
            return Ok(FindResult::Revisions(Vec::new()));
        }

        let placeholders = (1..=criteria.len())
            .map(|index| format!("?{}", index))
            .collect::<Vec<_>>()
            .join(",");

        let mut statement = self.db.prepare(&format!(
            "SELECT Path, Id FROM Projects WHERE Path IN ({})",
            placeholders
        ))?;
        let projects = statement
            .query_map(rusqlite::params_from_iter(criteria), |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        let missing: Vec<String> = criteria
            .iter()
            .filter(|path| !projects.iter().any(|(found, _)| found == *path))
            .cloned()
            .collect();

        if !missing.is_empty() {
            return Err(RevLogError::ProjectNotFound(missing));
        }

        let project_ids: Vec<i64> = projects.iter().map(|(_, id)| *id).collect();

        let mut statement = self.db.prepare(&format!(
            "SELECT DISTINCT Revision FROM CommitProjects WHERE ProjectId IN ({})",
            in_list(&project_ids)
        ))?;
        let revisions = statement
            .query_map([], |row| row.get::<_, u32>(0))?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(FindResult::Revisions(sorted_unique(revisions)))
    }

    fn revisions_data(&self, revisions: &[u32]) -> Result<RevisionsData> {
        let mut statement = self.db.prepare("SELECT Id, Path FROM Projects")?;
        let all_projects = statement
            .query_map([], |row| Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?)))?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        let mut statement = self.db.prepare(&format!(
            "SELECT Revision, ProjectId FROM CommitProjects WHERE Revision IN ({})",
            in_list(revisions)
        ))?;
        let rows = statement
            .query_map([], |row| Ok((row.get::<_, u32>(0)?, row.get::<_, i64>(1)?)))?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        let mut results = RevisionsData::new();

        for (revision, project_id) in rows {
            let project_path = all_projects
                .iter()
                .find(|(id, _)| *id == project_id)
                .map(|(_, path)| path.clone())
                .unwrap_or_default();

            let entry = results
                .entry(revision)
                .or_insert_with(|| serde_json::Value::Array(Vec::new()));

            if let serde_json::Value::Array(items) = entry {
                items.push(serde_json::Value::String(project_path));
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

impl DatabaseCollector for ProjectsPlugin {
    fn process(&mut self, _from_revision: u32, to_revision: u32, progress: Option<&ProgressBar>) -> Result<()> {
        let last_revision = plugin_last_revision(&self.db, self.name())?;

        if to_revision <= last_revision {
            return Ok(());
        }

        let tx = self.db.unchecked_transaction()?;

        let projects = load_projects(&self.db, None)?;
        set_plugin_last_revision(&self.db, self.name(), to_revision)?;

        if projects.is_empty() && to_revision >= REPOSITORY_WIDE_THRESHOLD {
            self.create_repository_wide_project()?;
        }

        for project in projects {
            if project.is_deleted && project.revision_deleted.is_none() {
                self.filler.set_project_status(project.id, false)?;
                self.statistics.record(STATISTIC_PROJECT_RESTORED, 1);
            } else if !project.is_deleted && project.revision_deleted.is_some() {
                self.filler.set_project_status(project.id, true)?;
                self.statistics.record(STATISTIC_PROJECT_DELETED, 1);
            }
        }

        tx.commit()?;

        if let Some(progress) = progress {
            progress.inc(1);
        }

        Ok(())
    }
}
