pub mod cache;
pub mod migrations;

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use regex::Regex;
use rusqlite::Connection;

use crate::error::{Result, RevLogError};

/// Resolves and opens the per-repository SQLite store.
///
/// Store files live under a working directory, bucketed by repository host
/// (`<working_dir>/<user@host:port>/log_<crc32(url)>.sqlite`), so pointing
/// at the same physical repository from different working copies reuses the
/// same store.
pub struct DatabaseManager {
    working_directory: PathBuf,
}

fn url_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(\w*)://([^/@\s']+@)?([^/@:\s']+)(:\d+)?").expect("url regex")
    })
}

impl DatabaseManager {
    pub fn new(working_directory: &Path) -> DatabaseManager {
        DatabaseManager { working_directory: working_directory.to_path_buf() }
    }

    /// Uses the default per-user store root (`<data dir>/revlog`).
    pub fn default_location() -> Result<DatabaseManager> {
        let base = dirs::data_dir()
            .ok_or_else(|| RevLogError::Config("cannot determine the user data directory".to_string()))?;

        Ok(DatabaseManager::new(&base.join("revlog")))
    }

    /// Deterministic store file location for a repository URL.
    pub fn database_path(&self, repository_url: &str) -> PathBuf {
        let bucket = match url_regex().captures(repository_url) {
            Some(caps) => format!(
                "{}{}{}",
                caps.get(2).map_or("", |m| m.as_str()),
                &caps[3],
                caps.get(4).map_or("", |m| m.as_str())
            ),
            // Not a scheme://host/path url (e.g. file:/// repositories).
            None => "misc".to_string(),
        };

        self.working_directory
            .join(bucket)
            .join(format!("log_{}.sqlite", crc32fast::hash(repository_url.as_bytes())))
    }

    /// Opens (creating directories and the file as needed) the store for a
    /// repository. Schema setup is the migration runner's job.
    pub fn open(&self, repository_url: &str) -> Result<Connection> {
        let path = self.database_path(repository_url);

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let connection = Connection::open(&path)?;
        connection.pragma_update(None, "journal_mode", "WAL")?;

        Ok(connection)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn path_is_deterministic() {
        let manager = DatabaseManager::new(Path::new("/tmp/revlog"));
        let first = manager.database_path("svn://localhost/projects/alpha");
        let second = manager.database_path("svn://localhost/projects/alpha");
        assert_eq!(first, second);
    }

    #[test]
    fn bucket_includes_user_and_port() {
        let manager = DatabaseManager::new(Path::new("/tmp/revlog"));
        let path = manager.database_path("svn://user@host.example.com:3690/repo");
        assert!(path.starts_with("/tmp/revlog/user@host.example.com:3690"));
    }

    #[test]
    fn different_urls_get_different_files() {
        let manager = DatabaseManager::new(Path::new("/tmp/revlog"));
        assert_ne!(
            manager.database_path("svn://localhost/projects/alpha"),
            manager.database_path("svn://localhost/projects/beta")
        );
    }

    #[test]
    fn unparsable_url_falls_back_to_misc_bucket() {
        let manager = DatabaseManager::new(Path::new("/tmp/revlog"));
        let path = manager.database_path("file:///var/svn/repo");
        assert!(path.starts_with("/tmp/revlog/misc"));
    }

    #[test]
    fn open_creates_store_file() {
        let dir = tempfile::tempdir().unwrap();
        let manager = DatabaseManager::new(dir.path());

        let connection = manager.open("svn://localhost/projects/alpha").unwrap();
        connection.execute("CREATE TABLE Probe (Id INTEGER)", []).unwrap();

        assert!(manager.database_path("svn://localhost/projects/alpha").exists());
    }
}
