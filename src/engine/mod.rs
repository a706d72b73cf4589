//! Revision log engine: owns the plugin registry, drives the windowed
//! refresh cycle and exposes the unified query facade.

pub mod collision;
pub mod factory;
pub mod filler;

use std::cell::RefCell;
use std::rc::Rc;

use indicatif::ProgressBar;
use rusqlite::Connection;

use crate::db::cache::DatabaseCache;
use crate::error::{Result, RevLogError};
use crate::plugins::{AnyPlugin, FindResult, RevisionsData, Statistics};
use crate::source::{self, LogQueryFlags, LogSource};

/// Revisions fetched from the log source per query. Tuned to what log
/// sources answer comfortably in one round-trip, not derived from data.
pub const WINDOW_SIZE: u32 = 1000;

pub struct RevisionLog {
    repository_url: String,
    project_url: String,
    project_path: String,
    ref_name: String,
    source: Rc<dyn LogSource>,
    db: Rc<Connection>,
    cache: Rc<RefCell<DatabaseCache>>,
    plugins: Vec<AnyPlugin>,
}

impl RevisionLog {
    pub fn new(
        repository_url: &str,
        source: Rc<dyn LogSource>,
        db: Rc<Connection>,
        cache: Rc<RefCell<DatabaseCache>>,
    ) -> RevisionLog {
        let project_url = source::project_url(repository_url);
        let project_path = url_path(&project_url);
        let ref_name = source::ref_by_path(repository_url).unwrap_or_default();

        RevisionLog {
            repository_url: repository_url.to_string(),
            project_url,
            project_path,
            ref_name,
            source,
            db,
            cache,
            plugins: Vec::new(),
        }
    }

    pub fn repository_url(&self) -> &str {
        &self.repository_url
    }

    pub fn project_url(&self) -> &str {
        &self.project_url
    }

    /// Project path inside the repository, with a trailing slash
    /// (e.g. `/projects/name/`).
    pub fn project_path(&self) -> &str {
        &self.project_path
    }

    /// Ref the repository URL points into (e.g. `trunk`), empty when the
    /// URL addresses the project root.
    pub fn ref_name(&self) -> &str {
        &self.ref_name
    }

    pub fn db(&self) -> &Connection {
        &self.db
    }

    pub fn register_plugin(&mut self, plugin: AnyPlugin) -> Result<()> {
        let name = plugin.plugin().name();

        if self.plugin_registered(name) {
            return Err(RevLogError::Config(format!(
                "the \"{}\" revision log plugin is already registered",
                name
            )));
        }

        self.plugins.push(plugin);

        Ok(())
    }

    pub fn plugin_registered(&self, name: &str) -> bool {
        self.plugins.iter().any(|plugin| plugin.plugin().name() == name)
    }

    fn plugin(&self, name: &str) -> Result<&AnyPlugin> {
        self.plugins
            .iter()
            .find(|plugin| plugin.plugin().name() == name)
            .ok_or_else(|| RevLogError::UnknownPlugin(name.to_string()))
    }

    /// Dispatches a search to the named plugin against this project.
    pub fn find(&self, plugin_name: &str, criteria: &[String]) -> Result<FindResult> {
        self.plugin(plugin_name)?
            .plugin()
            .find(criteria, &self.project_path)
    }

    pub fn get_revisions_data(&self, plugin_name: &str, revisions: &[u32]) -> Result<RevisionsData> {
        self.plugin(plugin_name)?.plugin().revisions_data(revisions)
    }

    pub fn get_revision_data(&self, plugin_name: &str, revision: u32) -> Result<serde_json::Value> {
        let mut results = self.get_revisions_data(plugin_name, &[revision])?;

        results
            .remove(&revision)
            .ok_or_else(|| RevLogError::RevisionsNotFound {
                plugin: plugin_name.to_string(),
                revisions: vec![revision],
            })
    }

    /// Per-plugin watermarks, in registration order.
    pub fn watermarks(&self) -> Result<Vec<(&'static str, u32)>> {
        self.plugins
            .iter()
            .map(|plugin| Ok((plugin.plugin().name(), plugin.plugin().last_revision()?)))
            .collect()
    }

    /// Per-plugin parsing statistics, for verbose reporting.
    pub fn statistics(&self) -> Vec<(&'static str, &Statistics)> {
        self.plugins
            .iter()
            .map(|plugin| (plugin.plugin().name(), plugin.plugin().statistics()))
            .collect()
    }

    /// Brings every plugin up to the log source's latest revision.
    ///
    /// Work proceeds in bounded windows; each plugin covers a window's row
    /// writes plus its watermark advance with one transaction, so an
    /// interrupted refresh is safely repeated.
    pub fn refresh(&mut self, progress: Option<&ProgressBar>) -> Result<()> {
        self.prepare_plugins()?;

        let (from_revision, to_revision) = self.pending_range()?;

        if to_revision < from_revision {
            return Ok(());
        }

        let flags = self.repository_query_flags();

        let mut range_start = from_revision;

        while range_start <= to_revision {
            let range_end = range_start
                .saturating_add(WINDOW_SIZE - 1)
                .min(to_revision);

            self.ingest_window(range_start, range_end, flags)?;

            if let Some(progress) = progress {
                progress.inc(1);
            }

            range_start = range_end + 1;
        }

        self.process_database_collectors(from_revision, to_revision, progress)?;

        // Batch boundary: the row cache must not outlive the refresh.
        self.cache.borrow_mut().clear();

        Ok(())
    }

    /// Re-derives one already-indexed revision: plugins supporting
    /// overwrite mode drop their prior rows for it and process it again;
    /// the rest ignore the call. Watermarks are unaffected.
    pub fn reparse(&mut self, revision: u32, progress: Option<&ProgressBar>) -> Result<()> {
        self.prepare_plugins()?;

        // Re-deriving beyond the watermarks would skip the revisions in
        // between; only indexed history can be reprocessed.
        let mut min_watermark = u32::MAX;
        for plugin in &self.plugins {
            min_watermark = min_watermark.min(plugin.plugin().last_revision()?);
        }

        if revision > min_watermark {
            return Err(RevLogError::Config(format!(
                "revision {} is not indexed yet; refresh first",
                revision
            )));
        }

        self.set_overwrite_mode(true);

        let result: Result<()> = (|| {
            let flags = self.repository_query_flags();
            self.ingest_window(revision, revision, flags)?;
            self.process_database_collectors(revision, revision, progress)?;
            self.cache.borrow_mut().clear();
            Ok(())
        })();

        self.set_overwrite_mode(false);

        result
    }

    fn prepare_plugins(&mut self) -> Result<()> {
        if self.plugins.is_empty() {
            return Err(RevLogError::Config(
                "please register at least one revision log plugin".to_string(),
            ));
        }

        for plugin in &mut self.plugins {
            plugin.plugin_mut().when_database_ready()?;
        }

        Ok(())
    }

    fn set_overwrite_mode(&mut self, enabled: bool) {
        for plugin in &mut self.plugins {
            plugin.plugin_mut().set_overwrite_mode(enabled);
        }
    }

    /// First unprocessed and last available revision. The lower bound is
    /// the minimum plugin watermark plus one, or the log source's first
    /// project revision when no plugin ever ran.
    fn pending_range(&self) -> Result<(u32, u32)> {
        let mut min_watermark = u32::MAX;

        for plugin in &self.plugins {
            min_watermark = min_watermark.min(plugin.plugin().last_revision()?);
        }

        let from_revision = if min_watermark == 0 {
            self.source.first_revision(&self.project_url)?
        } else {
            min_watermark + 1
        };

        let to_revision = self.source.last_revision(&self.project_url)?;

        Ok((from_revision, to_revision))
    }

    fn repository_query_flags(&self) -> LogQueryFlags {
        let mut flags = LogQueryFlags::default();

        for plugin in &self.plugins {
            if let AnyPlugin::Repository(collector) = plugin {
                flags = flags.union(collector.query_flags());
            }
        }

        flags
    }

    fn ingest_window(&mut self, from_revision: u32, to_revision: u32, flags: LogQueryFlags) -> Result<()> {
        if !self.plugins.iter().any(|plugin| matches!(plugin, AnyPlugin::Repository(_))) {
            return Ok(());
        }

        let entries = self
            .source
            .query_log(&self.project_url, from_revision, to_revision, flags)?;

        for plugin in &mut self.plugins {
            if let AnyPlugin::Repository(collector) = plugin {
                let name = collector.name().to_string();

                collector.parse(&entries).map_err(|error| RevLogError::Ingest {
                    plugin: name,
                    from: from_revision,
                    to: to_revision,
                    source: Box::new(error),
                })?;
            }
        }

        Ok(())
    }

    fn process_database_collectors(
        &mut self,
        from_revision: u32,
        to_revision: u32,
        progress: Option<&ProgressBar>,
    ) -> Result<()> {
        for plugin in &mut self.plugins {
            if let AnyPlugin::Database(collector) = plugin {
                let name = collector.name().to_string();

                collector
                    .process(from_revision, to_revision, progress)
                    .map_err(|error| RevLogError::Ingest {
                        plugin: name,
                        from: from_revision,
                        to: to_revision,
                        source: Box::new(error),
                    })?;
            }
        }

        Ok(())
    }
}

/// Path component of a repository URL, normalized to a trailing slash:
/// `svn://host/projects/name` -> `/projects/name/`.
fn url_path(url: &str) -> String {
    let after_scheme = match url.find("://") {
        Some(position) => &url[position + 3..],
        None => url,
    };

    let path = match after_scheme.find('/') {
        Some(position) => &after_scheme[position..],
        None => "",
    };

    let trimmed = path.trim_end_matches('/');

    if trimmed.is_empty() {
        "/".to_string()
    } else {
        format!("{}/", trimmed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn url_path_extraction() {
        assert_eq!(url_path("svn://localhost/projects/name"), "/projects/name/");
        assert_eq!(url_path("svn://localhost"), "/");
        assert_eq!(url_path("https://svn.example.com:8080/repo/trunk"), "/repo/trunk/");
    }
}
