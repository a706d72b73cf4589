//! Wires a store, migrations and the full plugin set into a ready engine.

use std::cell::RefCell;
use std::rc::Rc;

use indicatif::ProgressBar;

use crate::db::cache::DatabaseCache;
use crate::db::migrations::{MigrationContext, MigrationRunner};
use crate::db::DatabaseManager;
use crate::engine::collision::PathCollisionDetector;
use crate::engine::filler::RepositoryFiller;
use crate::engine::RevisionLog;
use crate::error::Result;
use crate::plugins::{
    AnyPlugin, BugsPlugin, MergesPlugin, PathsPlugin, ProjectsPlugin, RefsPlugin, SummaryPlugin,
};
use crate::source::LogSource;

pub struct RevisionLogFactory {
    source: Rc<dyn LogSource>,
    db_manager: DatabaseManager,
}

impl RevisionLogFactory {
    pub fn new(source: Rc<dyn LogSource>, db_manager: DatabaseManager) -> RevisionLogFactory {
        RevisionLogFactory { source, db_manager }
    }

    /// Opens (or creates) the repository's store, migrates it, registers
    /// every known plugin and refreshes before returning, so callers never
    /// observe a stale engine.
    pub fn revision_log(&self, repository_url: &str, progress: Option<&ProgressBar>) -> Result<RevisionLog> {
        let db = Rc::new(self.db_manager.open(repository_url)?);
        let cache = Rc::new(RefCell::new(DatabaseCache::new()));
        let filler = Rc::new(RepositoryFiller::new(db.clone(), cache.clone()));
        let collision_detector = Rc::new(RefCell::new(PathCollisionDetector::new()));

        let mut revision_log = RevisionLog::new(repository_url, self.source.clone(), db.clone(), cache.clone());

        // Repository root URL: the project URL minus the in-repository
        // project path; store paths are appended to it for property reads.
        let root_url = {
            let project_url = revision_log.project_url().to_string();
            let project_path = revision_log.project_path().trim_end_matches('/').to_string();

            project_url
                .strip_suffix(&project_path)
                .unwrap_or(&project_url)
                .to_string()
        };

        revision_log.register_plugin(AnyPlugin::Repository(Box::new(SummaryPlugin::new(
            db.clone(),
            filler.clone(),
        ))))?;
        revision_log.register_plugin(AnyPlugin::Repository(Box::new(PathsPlugin::new(
            db.clone(),
            filler.clone(),
            cache.clone(),
            self.source.clone(),
            collision_detector,
        ))))?;
        revision_log.register_plugin(AnyPlugin::Repository(Box::new(MergesPlugin::new(
            db.clone(),
            filler.clone(),
        ))))?;
        revision_log.register_plugin(AnyPlugin::Database(Box::new(ProjectsPlugin::new(
            db.clone(),
            filler.clone(),
        ))))?;
        revision_log.register_plugin(AnyPlugin::Database(Box::new(RefsPlugin::new(db.clone()))))?;
        revision_log.register_plugin(AnyPlugin::Database(Box::new(BugsPlugin::new(
            db.clone(),
            filler,
            root_url,
            self.source.clone(),
        ))))?;

        MigrationRunner::new().run(&MigrationContext::with_revision_log(&db, &revision_log))?;

        revision_log.refresh(progress)?;

        Ok(revision_log)
    }
}
