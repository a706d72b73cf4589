//! Detects nesting conflicts between candidate project roots.
//!
//! A candidate project path collides when it is an ancestor or a descendant
//! of an already-known project path; the paths plugin then stores the path
//! project-less instead of inferring a mis-rooted project.

use std::collections::{HashMap, HashSet};

#[derive(Default)]
pub struct PathCollisionDetector {
    /// Exactly-registered paths.
    known_paths: HashSet<String>,
    /// Every ancestor prefix (trailing slash included) of a known path,
    /// mapped to its length.
    expanded_paths: HashMap<String, usize>,
    longest_path_length: usize,
}

impl PathCollisionDetector {
    pub fn new() -> PathCollisionDetector {
        let mut expanded_paths = HashMap::new();
        expanded_paths.insert("/".to_string(), 1);

        PathCollisionDetector { known_paths: HashSet::new(), expanded_paths, longest_path_length: 1 }
    }

    /// Registers paths together with all of their ancestor directories.
    pub fn add_paths<I, S>(&mut self, paths: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for path in paths {
            let path = path.as_ref();
            self.known_paths.insert(path.to_string());

            let mut parent = path.trim_end_matches('/').to_string();

            loop {
                let prefix = format!("{}/", parent);
                self.expanded_paths.insert(prefix.clone(), prefix.len());

                parent = parent_dir(&parent).to_string();

                if parent == "/" || parent.is_empty() {
                    break;
                }
            }
        }

        self.longest_path_length = self.expanded_paths.values().copied().max().unwrap_or(0);
    }

    /// True when `path` nests inside (or contains) a known path without
    /// being exactly known itself.
    pub fn is_collision(&self, path: &str) -> bool {
        if self.known_paths.is_empty() || self.known_paths.contains(path) {
            return false;
        }

        let truncated = path.get(..self.longest_path_length).unwrap_or(path);

        self.expanded_paths.contains_key(truncated)
    }
}

/// Parent directory without trailing slash: `/a/b` -> `/a`, `/a` -> `/`.
fn parent_dir(path: &str) -> &str {
    let trimmed = path.trim_end_matches('/');

    match trimmed.rfind('/') {
        Some(0) | None => "/",
        Some(index) => &trimmed[..index],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_detector_never_collides() {
        let detector = PathCollisionDetector::new();
        assert!(!detector.is_collision("/anything/"));
    }

    #[test]
    fn exactly_known_path_is_not_a_collision() {
        let mut detector = PathCollisionDetector::new();
        detector.add_paths(["/projects/alpha/"]);
        assert!(!detector.is_collision("/projects/alpha/"));
    }

    #[test]
    fn ancestor_of_known_path_collides() {
        let mut detector = PathCollisionDetector::new();
        detector.add_paths(["/projects/alpha/"]);
        assert!(detector.is_collision("/projects/"));
        assert!(detector.is_collision("/"));
    }

    #[test]
    fn descendant_of_known_path_collides() {
        let mut detector = PathCollisionDetector::new();
        detector.add_paths(["/projects/alpha/"]);
        assert!(detector.is_collision("/projects/alpha/nested/"));
    }

    #[test]
    fn sibling_does_not_collide() {
        let mut detector = PathCollisionDetector::new();
        detector.add_paths(["/projects/alpha/"]);
        assert!(!detector.is_collision("/projects/beta/"));
    }

    #[test]
    fn multiple_known_paths() {
        let mut detector = PathCollisionDetector::new();
        detector.add_paths(["/projects/alpha/", "/tools/beta/"]);
        assert!(detector.is_collision("/tools/"));
        assert!(!detector.is_collision("/tools/gamma/"));
        assert!(!detector.is_collision("/projects/beta/"));
    }

    #[test]
    fn repository_root_project() {
        let mut detector = PathCollisionDetector::new();
        detector.add_paths(["/"]);
        assert!(!detector.is_collision("/"));
        assert!(detector.is_collision("/anything/"));
    }
}
