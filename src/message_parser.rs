//! Extracts bug IDs from commit messages using a project's
//! `bugtraq:logregex` property.
//!
//! The property holds either one regular expression whose first capture
//! group is the bug ID, or two newline-separated expressions: the first
//! pre-filters message fragments, the second extracts IDs from each
//! fragment.

use regex::Regex;

/// Mantis-style `bugtraq:logregex` value that some legacy projects carry.
/// Historically rewritten to the JIRA format instead of being used as-is.
const MANTIS_LOGREGEX: &str = concat!(
    r"(?:[Bb]ugs?|[Ii]ssues?|[Rr]eports?|[Ff]ixe?s?|[Rr]esolves?)+\s+(?:#?(?:\d+)[,\.\s]*)+",
    "\n",
    r"(\d+)",
    "\n"
);

pub struct LogMessageParser {
    pre_filter: Option<Regex>,
    filter: Option<Regex>,
}

impl LogMessageParser {
    pub fn new(bugtraq_logregex: &str) -> LogMessageParser {
        let bugtraq_logregex = replace_mantis_with_jira(bugtraq_logregex);
        let lines: Vec<&str> = bugtraq_logregex
            .split('\n')
            .filter(|line| !line.trim().is_empty())
            .collect();

        let (pre_filter, filter) = match lines.as_slice() {
            [pre, main] => (compile(pre), compile(main)),
            [main] => (None, compile(main)),
            _ => (None, None),
        };

        LogMessageParser { pre_filter, filter }
    }

    /// Finds bug IDs in a log message, deduplicated, in order of appearance.
    pub fn parse(&self, log_message: &str) -> Vec<String> {
        let filter = match &self.filter {
            Some(filter) => filter,
            None => return Vec::new(),
        };

        let mut bugs = Vec::new();

        match &self.pre_filter {
            Some(pre_filter) => {
                for fragment in pre_filter.find_iter(log_message) {
                    collect_bugs(filter, fragment.as_str(), &mut bugs);
                }
            }
            None => collect_bugs(filter, log_message, &mut bugs),
        }

        bugs
    }
}

fn collect_bugs(filter: &Regex, haystack: &str, bugs: &mut Vec<String>) {
    for caps in filter.captures_iter(haystack) {
        let bug = match caps.get(1) {
            Some(group) => group.as_str(),
            None => continue,
        };

        if !bugs.iter().any(|known| known == bug) {
            bugs.push(bug.to_string());
        }
    }
}

/// Compiles one expression line with dot-matches-newline semantics.
/// An invalid expression disables extraction rather than failing ingestion.
fn compile(pattern: &str) -> Option<Regex> {
    Regex::new(&format!("(?s){}", pattern)).ok()
}

fn replace_mantis_with_jira(bugtraq_logregex: &str) -> &str {
    if bugtraq_logregex == MANTIS_LOGREGEX {
        r"([A-Z]+\-\d+)"
    } else {
        bugtraq_logregex
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_expression_extracts_group() {
        let parser = LogMessageParser::new(r"([A-Z]+\-\d+)");
        assert_eq!(parser.parse("JRA-42 fix the thing"), vec!["JRA-42"]);
    }

    #[test]
    fn no_match_is_empty() {
        let parser = LogMessageParser::new(r"([A-Z]+\-\d+)");
        assert!(parser.parse("nothing to see here").is_empty());
    }

    #[test]
    fn duplicates_are_removed() {
        let parser = LogMessageParser::new(r"([A-Z]+\-\d+)");
        assert_eq!(parser.parse("JRA-1, JRA-2, JRA-1"), vec!["JRA-1", "JRA-2"]);
    }

    #[test]
    fn two_line_expression_pre_filters() {
        let parser = LogMessageParser::new("[Ff]ixes #\\d+\n#(\\d+)");
        assert_eq!(parser.parse("Fixes #123 and mentions #999 in passing"), vec!["123"]);
    }

    #[test]
    fn empty_property_yields_nothing() {
        let parser = LogMessageParser::new("");
        assert!(parser.parse("JRA-42").is_empty());
    }

    #[test]
    fn mantis_expression_is_treated_as_jira() {
        let parser = LogMessageParser::new(MANTIS_LOGREGEX);
        assert_eq!(parser.parse("ABC-77 something"), vec!["ABC-77"]);
    }

    #[test]
    fn invalid_expression_disables_extraction() {
        let parser = LogMessageParser::new("([unclosed");
        assert!(parser.parse("anything").is_empty());
    }
}
