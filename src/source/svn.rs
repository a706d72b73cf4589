//! [`LogSource`] implementation backed by the `svn` command line client.

use std::process::Command;

use crate::error::{Result, RevLogError};
use crate::source::{parser, LogEntry, LogQueryFlags, LogSource};

/// Talks to a repository through the `svn` binary.
pub struct SvnLogSource {
    svn_bin: String,
}

impl SvnLogSource {
    pub fn new() -> SvnLogSource {
        SvnLogSource { svn_bin: "svn".to_string() }
    }

    /// Uses a non-default `svn` executable (e.g. a fixed path in tests).
    pub fn with_binary(svn_bin: &str) -> SvnLogSource {
        SvnLogSource { svn_bin: svn_bin.to_string() }
    }

    fn run(&self, args: &[&str]) -> Result<String> {
        let output = Command::new(&self.svn_bin)
            .arg("--non-interactive")
            .args(args)
            .output()
            .map_err(RevLogError::Io)?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(RevLogError::Source(format!(
                "`svn {}` failed: {}",
                args.join(" "),
                stderr.trim()
            )));
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

impl Default for SvnLogSource {
    fn default() -> SvnLogSource {
        SvnLogSource::new()
    }
}

impl LogSource for SvnLogSource {
    fn first_revision(&self, project_url: &str) -> Result<u32> {
        let xml = self.run(&["log", "-r", "1:HEAD", "--limit", "1", "--xml", project_url])?;
        let entries = parser::parse_log(&xml)?;

        entries
            .first()
            .map(|entry| entry.revision)
            .ok_or_else(|| RevLogError::Source(format!("the \"{}\" url has no revisions", project_url)))
    }

    fn last_revision(&self, project_url: &str) -> Result<u32> {
        let raw = self.run(&["info", "--show-item", "last-changed-revision", project_url])?;

        raw.trim()
            .parse::<u32>()
            .map_err(|_| RevLogError::Source(format!("unexpected `svn info` output: {}", raw.trim())))
    }

    fn query_log(
        &self,
        project_url: &str,
        from_revision: u32,
        to_revision: u32,
        flags: LogQueryFlags,
    ) -> Result<Vec<LogEntry>> {
        let range = format!("{}:{}", from_revision, to_revision);
        let mut args = vec!["log", "-r", &range, "--xml"];

        if flags.verbose {
            args.push("--verbose");
        }

        if flags.merge_history {
            args.push("--use-merge-history");
        }

        args.push(project_url);

        let xml = self.run(&args)?;
        parser::parse_log(&xml)
    }

    fn property(&self, name: &str, path_or_url: &str, revision: Option<u32>) -> Result<String> {
        let target = match revision {
            Some(revision) => format!("{}@{}", path_or_url, revision),
            None => path_or_url.to_string(),
        };

        let output = Command::new(&self.svn_bin)
            .arg("--non-interactive")
            .args(["propget", name, &target])
            .output()
            .map_err(RevLogError::Io)?;

        if output.status.success() {
            return Ok(String::from_utf8_lossy(&output.stdout).trim_end().to_string());
        }

        let stderr = String::from_utf8_lossy(&output.stderr);

        // Reading an unset property is not an error; svn <1.9 reported it
        // with the generic E200000 code, newer clients with W200017.
        if stderr.contains("W200017") || stderr.contains("E200000") {
            return Ok(String::new());
        }

        Err(RevLogError::Source(format!(
            "`svn propget {}` failed: {}",
            name,
            stderr.trim()
        )))
    }
}
