pub mod parser;
pub mod svn;

use std::sync::OnceLock;

use regex::Regex;

use crate::error::Result;

/// What happened to a path in a commit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Added,
    Modified,
    Deleted,
    Replaced,
}

impl Action {
    /// Single-letter code as reported by `svn log` and stored in `CommitPaths`.
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Added => "A",
            Action::Modified => "M",
            Action::Deleted => "D",
            Action::Replaced => "R",
        }
    }

    pub fn from_code(code: &str) -> Option<Action> {
        match code {
            "A" => Some(Action::Added),
            "M" => Some(Action::Modified),
            "D" => Some(Action::Deleted),
            "R" => Some(Action::Replaced),
            _ => None,
        }
    }
}

/// Node kind of a changed path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    File,
    Dir,
}

impl NodeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeKind::File => "file",
            NodeKind::Dir => "dir",
        }
    }
}

/// Copy-from provenance of a changed path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CopyFrom {
    pub path: String,
    pub revision: u32,
}

/// One `<path>` node of a log entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathChange {
    pub path: String,
    pub action: Action,
    pub kind: NodeKind,
    pub copy_from: Option<CopyFrom>,
}

/// One commit as reported by the log source.
///
/// `paths` is `None` when the log was fetched without per-path detail and
/// `Some(vec![])` for a genuinely empty commit; the distinction matters to
/// the paths plugin's empty-commit statistic.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct LogEntry {
    pub revision: u32,
    pub author: String,
    /// Unix timestamp of the commit date.
    pub date: i64,
    pub message: String,
    pub paths: Option<Vec<PathChange>>,
    /// Revisions incorporated by this commit, from merge-history sub-entries.
    pub merged_revisions: Vec<u32>,
}

/// Extra payload requested from a log query.
///
/// Plugins declare which payload they need; the engine unions the flags of
/// all registered plugins into a single query per window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LogQueryFlags {
    /// Include per-path detail (`--verbose`).
    pub verbose: bool,
    /// Include merge-history sub-entries (`--use-merge-history`).
    pub merge_history: bool,
}

impl LogQueryFlags {
    pub fn union(self, other: LogQueryFlags) -> LogQueryFlags {
        LogQueryFlags {
            verbose: self.verbose || other.verbose,
            merge_history: self.merge_history || other.merge_history,
        }
    }
}

/// External collaborator that serves revision-log data for a repository.
///
/// The engine never talks to the version-control system directly; everything
/// it needs is behind this trait, so tests drive it with an in-memory
/// implementation.
pub trait LogSource {
    /// First revision of the project (revision the project URL appeared in).
    fn first_revision(&self, project_url: &str) -> Result<u32>;

    /// Latest revision of the project.
    fn last_revision(&self, project_url: &str) -> Result<u32>;

    /// Commits in the inclusive `from..=to` range, oldest first.
    fn query_log(
        &self,
        project_url: &str,
        from_revision: u32,
        to_revision: u32,
        flags: LogQueryFlags,
    ) -> Result<Vec<LogEntry>>;

    /// Versioned property lookup (e.g. `bugtraq:logregex`). Returns an empty
    /// string when the property is not set.
    fn property(&self, name: &str, path_or_url: &str, revision: Option<u32>) -> Result<String>;

    /// Ref name (`trunk`, `branches/<x>`, `tags/<x>`, `releases/<x>`)
    /// embedded in `path`, if any.
    fn ref_by_path(&self, path: &str) -> Option<String> {
        ref_by_path(path)
    }

    /// Whether `path` is exactly the root directory of a ref.
    fn is_ref_root(&self, path: &str) -> bool {
        is_ref_root(path)
    }
}

fn ref_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^.*?/(trunk|branches/[^/]+|tags/[^/]+|releases/[^/]+)").expect("ref regex")
    })
}

/// Detects the ref name embedded in a repository path.
pub fn ref_by_path(path: &str) -> Option<String> {
    ref_regex()
        .captures(path)
        .map(|caps| caps[1].to_string())
}

/// Whether `path` is the root directory of the ref it belongs to
/// (e.g. `/project/trunk/` but not `/project/trunk/file.txt`).
pub fn is_ref_root(path: &str) -> bool {
    match ref_by_path(path) {
        Some(ref_name) => path.ends_with(&format!("/{}/", ref_name)),
        None => false,
    }
}

/// Returns the project URL: the container of `trunk`/`branches`/`tags`/
/// `releases` folders, or the repository URL itself when no ref folder is
/// part of it.
pub fn project_url(repository_url: &str) -> String {
    static RE: OnceLock<Regex> = OnceLock::new();
    let re = RE.get_or_init(|| {
        Regex::new(r"^(.*?)/(?:trunk|branches|tags|releases)(?:/.*)?$").expect("project url regex")
    });

    match re.captures(repository_url) {
        Some(caps) => caps[1].to_string(),
        None => repository_url.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ref_by_path_trunk() {
        assert_eq!(ref_by_path("/project/trunk/file.txt"), Some("trunk".to_string()));
    }

    #[test]
    fn ref_by_path_branch() {
        assert_eq!(
            ref_by_path("/project/branches/5.2.x/docs/"),
            Some("branches/5.2.x".to_string())
        );
    }

    #[test]
    fn ref_by_path_tag_and_release() {
        assert_eq!(ref_by_path("/p/tags/1.0.0/"), Some("tags/1.0.0".to_string()));
        assert_eq!(ref_by_path("/p/releases/beta/x"), Some("releases/beta".to_string()));
    }

    #[test]
    fn ref_by_path_none() {
        assert_eq!(ref_by_path("/project/docs/readme.txt"), None);
    }

    #[test]
    fn is_ref_root_detection() {
        assert!(is_ref_root("/project/trunk/"));
        assert!(is_ref_root("/project/branches/stable/"));
        assert!(!is_ref_root("/project/trunk/sub/"));
        assert!(!is_ref_root("/project/trunk"));
        assert!(!is_ref_root("/project/docs/"));
    }

    #[test]
    fn project_url_strips_ref_suffix() {
        assert_eq!(
            project_url("svn://localhost/projects/name/trunk"),
            "svn://localhost/projects/name"
        );
        assert_eq!(
            project_url("svn://localhost/projects/name/branches/5.x/file.txt"),
            "svn://localhost/projects/name"
        );
        assert_eq!(project_url("svn://localhost/projects/name"), "svn://localhost/projects/name");
    }

    #[test]
    fn flags_union() {
        let verbose = LogQueryFlags { verbose: true, merge_history: false };
        let merges = LogQueryFlags { verbose: false, merge_history: true };
        assert_eq!(
            verbose.union(merges),
            LogQueryFlags { verbose: true, merge_history: true }
        );
    }

    #[test]
    fn action_codes_round_trip() {
        for action in [Action::Added, Action::Modified, Action::Deleted, Action::Replaced] {
            assert_eq!(Action::from_code(action.as_str()), Some(action));
        }
        assert_eq!(Action::from_code("X"), None);
    }
}
