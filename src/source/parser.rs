//! Parses `svn log --xml` output into [`LogEntry`] batches.
//!
//! `svn log` emits a small, fixed XML vocabulary (`log`, `logentry`,
//! `author`, `date`, `paths`, `path`, `msg`, plus nested `logentry` nodes
//! for merge history) with only the five predefined entities and numeric
//! character references. The scanner below covers exactly that subset
//! without pulling in an XML crate.

use crate::error::{Result, RevLogError};
use crate::source::{Action, CopyFrom, LogEntry, NodeKind, PathChange};

/// Parses the full output of one `svn log --xml` invocation.
pub fn parse_log(xml: &str) -> Result<Vec<LogEntry>> {
    let mut scanner = Scanner::new(xml);

    loop {
        match scanner.next_token()? {
            Some(Token::Open { name, .. }) if name == "log" => break,
            Some(Token::Text(_)) => continue,
            Some(_) => return Err(malformed("expected <log> root element")),
            None => return Err(malformed("no <log> element in output")),
        }
    }

    let mut entries = Vec::new();

    loop {
        match scanner.next_token()? {
            Some(Token::Open { name, attrs, self_closing }) if name == "logentry" => {
                entries.push(parse_entry(&mut scanner, &attrs, self_closing)?);
            }
            Some(Token::Close(name)) if name == "log" => break,
            Some(Token::Text(_)) => continue,
            Some(_) => return Err(malformed("unexpected element inside <log>")),
            None => return Err(malformed("unterminated <log> element")),
        }
    }

    Ok(entries)
}

fn parse_entry(scanner: &mut Scanner<'_>, attrs: &[(String, String)], self_closing: bool) -> Result<LogEntry> {
    let revision = required_attr(attrs, "revision", "logentry")?
        .parse::<u32>()
        .map_err(|_| malformed("logentry revision is not a number"))?;

    let mut entry = LogEntry { revision, ..LogEntry::default() };

    if self_closing {
        return Ok(entry);
    }

    loop {
        match scanner.next_token()? {
            Some(Token::Open { name, attrs, self_closing }) => match name.as_str() {
                "author" => entry.author = element_text(scanner, "author", self_closing)?,
                "date" => {
                    let raw = element_text(scanner, "date", self_closing)?;
                    entry.date = parse_svn_date(&raw)
                        .ok_or_else(|| malformed("unparsable logentry date"))?;
                }
                "msg" => entry.message = element_text(scanner, "msg", self_closing)?,
                "paths" => {
                    if !self_closing {
                        entry.paths = Some(parse_paths(scanner)?);
                    } else {
                        entry.paths = Some(Vec::new());
                    }
                }
                "logentry" => {
                    // Merge-history sub-entry; only its revision matters.
                    let merged = parse_entry(scanner, &attrs, self_closing)?;
                    entry.merged_revisions.push(merged.revision);
                }
                _ => {
                    if !self_closing {
                        skip_element(scanner, &name)?;
                    }
                }
            },
            Some(Token::Close(name)) if name == "logentry" => break,
            Some(Token::Text(_)) => continue,
            Some(Token::Close(_)) => return Err(malformed("mismatched closing tag in <logentry>")),
            None => return Err(malformed("unterminated <logentry> element")),
        }
    }

    Ok(entry)
}

fn parse_paths(scanner: &mut Scanner<'_>) -> Result<Vec<PathChange>> {
    let mut paths = Vec::new();

    loop {
        match scanner.next_token()? {
            Some(Token::Open { name, attrs, self_closing }) if name == "path" => {
                let action_code = required_attr(&attrs, "action", "path")?;
                let action = Action::from_code(&action_code)
                    .ok_or_else(|| malformed("unknown path action code"))?;
                let kind = match attr(&attrs, "kind") {
                    Some("dir") => NodeKind::Dir,
                    _ => NodeKind::File,
                };
                let copy_from = match (attr(&attrs, "copyfrom-path"), attr(&attrs, "copyfrom-rev")) {
                    (Some(path), Some(rev)) => Some(CopyFrom {
                        path: path.to_string(),
                        revision: rev
                            .parse::<u32>()
                            .map_err(|_| malformed("copyfrom-rev is not a number"))?,
                    }),
                    _ => None,
                };
                let path = element_text(scanner, "path", self_closing)?;

                paths.push(PathChange { path, action, kind, copy_from });
            }
            Some(Token::Close(name)) if name == "paths" => break,
            Some(Token::Text(_)) => continue,
            Some(_) => return Err(malformed("unexpected element inside <paths>")),
            None => return Err(malformed("unterminated <paths> element")),
        }
    }

    Ok(paths)
}

/// Collects the text content of an element up to its closing tag.
fn element_text(scanner: &mut Scanner<'_>, name: &str, self_closing: bool) -> Result<String> {
    if self_closing {
        return Ok(String::new());
    }

    let mut text = String::new();

    loop {
        match scanner.next_token()? {
            Some(Token::Text(chunk)) => text.push_str(&chunk),
            Some(Token::Close(closed)) if closed == name => break,
            Some(_) => return Err(malformed("unexpected markup inside text element")),
            None => return Err(malformed("unterminated text element")),
        }
    }

    Ok(text)
}

/// Skips an unknown element, including any nested markup.
fn skip_element(scanner: &mut Scanner<'_>, name: &str) -> Result<()> {
    let mut depth = 1usize;

    loop {
        match scanner.next_token()? {
            Some(Token::Open { name: child, self_closing, .. }) => {
                if child == name && !self_closing {
                    depth += 1;
                }
            }
            Some(Token::Close(closed)) if closed == name => {
                depth -= 1;
                if depth == 0 {
                    return Ok(());
                }
            }
            Some(_) => continue,
            None => return Err(malformed("unterminated element")),
        }
    }
}

fn attr<'a>(attrs: &'a [(String, String)], name: &str) -> Option<&'a str> {
    attrs
        .iter()
        .find(|(attr_name, _)| attr_name == name)
        .map(|(_, value)| value.as_str())
}

fn required_attr(attrs: &[(String, String)], name: &str, element: &str) -> Result<String> {
    attr(attrs, name)
        .map(str::to_string)
        .ok_or_else(|| malformed(&format!("<{}> is missing the \"{}\" attribute", element, name)))
}

fn malformed(detail: &str) -> RevLogError {
    RevLogError::Source(format!("malformed svn log output: {}", detail))
}

/// Parses an `svn log` ISO 8601 date (`2015-10-13T13:30:16.473960Z`) to a
/// unix timestamp using the civil calendar algorithm.
///
/// Ref: http://howardhinnant.github.io/date_algorithms.html
pub fn parse_svn_date(raw: &str) -> Option<i64> {
    let (date_str, time_str) = raw.split_once('T')?;

    let date_parts: Vec<i64> = date_str.split('-').filter_map(|p| p.parse().ok()).collect();
    let time_str = time_str.trim_end_matches('Z');
    let time_str = time_str.split('.').next()?;
    let time_parts: Vec<i64> = time_str.split(':').filter_map(|p| p.parse().ok()).collect();

    if date_parts.len() != 3 || time_parts.len() != 3 {
        return None;
    }

    let (year, month, day) = (date_parts[0], date_parts[1], date_parts[2]);
    let (hour, min, sec) = (time_parts[0], time_parts[1], time_parts[2]);

    let y = if month <= 2 { year - 1 } else { year };
    let era = y.div_euclid(400);
    let yoe = y - era * 400;
    let m = if month > 2 { month - 3 } else { month + 9 };
    let doy = (153 * m + 2) / 5 + day - 1;
    let doe = yoe * 365 + yoe / 4 - yoe / 100 + doy;
    let days = era * 146097 + doe - 719468;

    Some(days * 86400 + hour * 3600 + min * 60 + sec)
}

#[derive(Debug, PartialEq)]
enum Token {
    Open { name: String, attrs: Vec<(String, String)>, self_closing: bool },
    Close(String),
    Text(String),
}

struct Scanner<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Scanner<'a> {
    fn new(input: &'a str) -> Scanner<'a> {
        Scanner { bytes: input.as_bytes(), pos: 0 }
    }

    fn next_token(&mut self) -> Result<Option<Token>> {
        loop {
            if self.pos >= self.bytes.len() {
                return Ok(None);
            }

            if self.bytes[self.pos] != b'<' {
                return self.text_token().map(Some);
            }

            if self.starts_with(b"<?") {
                self.skip_past(b"?>")?;
                continue;
            }

            if self.starts_with(b"<!--") {
                self.skip_past(b"-->")?;
                continue;
            }

            if self.starts_with(b"</") {
                self.pos += 2;
                let name = self.read_name();
                self.skip_whitespace();
                self.expect(b'>')?;
                return Ok(Some(Token::Close(name)));
            }

            self.pos += 1;
            return self.open_token().map(Some);
        }
    }

    fn text_token(&mut self) -> Result<Token> {
        let start = self.pos;
        while self.pos < self.bytes.len() && self.bytes[self.pos] != b'<' {
            self.pos += 1;
        }
        let raw = std::str::from_utf8(&self.bytes[start..self.pos])
            .map_err(|_| malformed("output is not valid UTF-8"))?;
        Ok(Token::Text(decode_entities(raw)?))
    }

    fn open_token(&mut self) -> Result<Token> {
        let name = self.read_name();
        if name.is_empty() {
            return Err(malformed("empty element name"));
        }

        let mut attrs = Vec::new();

        loop {
            self.skip_whitespace();

            match self.peek() {
                Some(b'>') => {
                    self.pos += 1;
                    return Ok(Token::Open { name, attrs, self_closing: false });
                }
                Some(b'/') => {
                    self.pos += 1;
                    self.expect(b'>')?;
                    return Ok(Token::Open { name, attrs, self_closing: true });
                }
                Some(_) => {
                    let attr_name = self.read_name();
                    if attr_name.is_empty() {
                        return Err(malformed("empty attribute name"));
                    }
                    self.skip_whitespace();
                    self.expect(b'=')?;
                    self.skip_whitespace();
                    self.expect(b'"')?;
                    let start = self.pos;
                    while self.pos < self.bytes.len() && self.bytes[self.pos] != b'"' {
                        self.pos += 1;
                    }
                    let raw = std::str::from_utf8(&self.bytes[start..self.pos])
                        .map_err(|_| malformed("output is not valid UTF-8"))?;
                    self.expect(b'"')?;
                    attrs.push((attr_name, decode_entities(raw)?));
                }
                None => return Err(malformed("unterminated element")),
            }
        }
    }

    fn read_name(&mut self) -> String {
        let start = self.pos;
        while self.pos < self.bytes.len() {
            match self.bytes[self.pos] {
                b'>' | b'/' | b'=' | b' ' | b'\t' | b'\r' | b'\n' => break,
                _ => self.pos += 1,
            }
        }
        String::from_utf8_lossy(&self.bytes[start..self.pos]).into_owned()
    }

    fn skip_whitespace(&mut self) {
        while self.pos < self.bytes.len() && self.bytes[self.pos].is_ascii_whitespace() {
            self.pos += 1;
        }
    }

    fn skip_past(&mut self, marker: &[u8]) -> Result<()> {
        while self.pos < self.bytes.len() {
            if self.bytes[self.pos..].starts_with(marker) {
                self.pos += marker.len();
                return Ok(());
            }
            self.pos += 1;
        }
        Err(malformed("unterminated processing instruction or comment"))
    }

    fn starts_with(&self, prefix: &[u8]) -> bool {
        self.bytes[self.pos..].starts_with(prefix)
    }

    fn peek(&self) -> Option<u8> {
        self.bytes.get(self.pos).copied()
    }

    fn expect(&mut self, byte: u8) -> Result<()> {
        if self.peek() == Some(byte) {
            self.pos += 1;
            Ok(())
        } else {
            Err(malformed("unexpected character in markup"))
        }
    }
}

fn decode_entities(raw: &str) -> Result<String> {
    if !raw.contains('&') {
        return Ok(raw.to_string());
    }

    let mut decoded = String::with_capacity(raw.len());
    let mut rest = raw;

    while let Some(amp) = rest.find('&') {
        decoded.push_str(&rest[..amp]);
        rest = &rest[amp..];

        let semi = rest
            .find(';')
            .ok_or_else(|| malformed("unterminated entity reference"))?;
        let entity = &rest[1..semi];

        match entity {
            "amp" => decoded.push('&'),
            "lt" => decoded.push('<'),
            "gt" => decoded.push('>'),
            "quot" => decoded.push('"'),
            "apos" => decoded.push('\''),
            _ => {
                let code = if let Some(hex) = entity.strip_prefix("#x") {
                    u32::from_str_radix(hex, 16).ok()
                } else if let Some(dec) = entity.strip_prefix('#') {
                    dec.parse::<u32>().ok()
                } else {
                    None
                };
                let ch = code
                    .and_then(char::from_u32)
                    .ok_or_else(|| malformed("unknown entity reference"))?;
                decoded.push(ch);
            }
        }

        rest = &rest[semi + 1..];
    }

    decoded.push_str(rest);
    Ok(decoded)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"<?xml version="1.0"?>
<log>
<logentry
   revision="20128">
<author>alex</author>
<date>2015-10-13T13:30:16.473960Z</date>
<paths>
<path
   kind="file"
   action="M">/projects/alpha/trunk/docs/guide.txt</path>
<path
   kind="file"
   action="A"
   copyfrom-path="/projects/alpha/trunk/old.c"
   copyfrom-rev="20120">/projects/alpha/trunk/new.c</path>
</paths>
<msg>#40846 - task title
1. task item</msg>
</logentry>
<logentry
   revision="20127">
<author>erik</author>
<date>2015-10-13T13:00:15.434252Z</date>
<paths>
<path
   kind="dir"
   action="D">/projects/alpha/trunk/folder</path>
</paths>
<msg>#40904 - task title</msg>
</logentry>
</log>"#;

    #[test]
    fn parses_entries_with_paths() {
        let entries = parse_log(SAMPLE).unwrap();
        assert_eq!(entries.len(), 2);

        let first = &entries[0];
        assert_eq!(first.revision, 20128);
        assert_eq!(first.author, "alex");
        assert_eq!(first.message, "#40846 - task title\n1. task item");

        let paths = first.paths.as_ref().unwrap();
        assert_eq!(paths.len(), 2);
        assert_eq!(paths[0].path, "/projects/alpha/trunk/docs/guide.txt");
        assert_eq!(paths[0].action, Action::Modified);
        assert_eq!(paths[0].kind, NodeKind::File);
        assert!(paths[0].copy_from.is_none());

        let copy = paths[1].copy_from.as_ref().unwrap();
        assert_eq!(copy.path, "/projects/alpha/trunk/old.c");
        assert_eq!(copy.revision, 20120);

        assert_eq!(entries[1].paths.as_ref().unwrap()[0].kind, NodeKind::Dir);
        assert_eq!(entries[1].paths.as_ref().unwrap()[0].action, Action::Deleted);
    }

    #[test]
    fn parses_merge_history_sub_entries() {
        let xml = r#"<log>
<logentry revision="300">
<author>joe</author>
<date>2016-01-01T00:00:00.000000Z</date>
<msg>merge</msg>
<logentry revision="298">
<author>joe</author>
<date>2015-12-30T00:00:00.000000Z</date>
<msg>merged one</msg>
</logentry>
<logentry revision="299">
<author>joe</author>
<date>2015-12-31T00:00:00.000000Z</date>
<msg>merged two</msg>
</logentry>
</logentry>
</log>"#;
        let entries = parse_log(xml).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].revision, 300);
        assert_eq!(entries[0].merged_revisions, vec![298, 299]);
    }

    #[test]
    fn entry_without_paths_node() {
        let xml = r#"<log>
<logentry revision="5">
<author>a</author>
<date>2015-01-01T00:00:00.000000Z</date>
<msg>no details requested</msg>
</logentry>
</log>"#;
        let entries = parse_log(xml).unwrap();
        assert!(entries[0].paths.is_none());
    }

    #[test]
    fn decodes_entities_in_message() {
        let xml = r#"<log>
<logentry revision="7">
<author>a&amp;b</author>
<date>2015-01-01T00:00:00.000000Z</date>
<msg>1 &lt; 2 &amp;&amp; 3 &gt; 2 &#x41;</msg>
</logentry>
</log>"#;
        let entries = parse_log(xml).unwrap();
        assert_eq!(entries[0].author, "a&b");
        assert_eq!(entries[0].message, "1 < 2 && 3 > 2 A");
    }

    #[test]
    fn self_closing_msg() {
        let xml = r#"<log>
<logentry revision="9">
<author>a</author>
<date>2015-01-01T00:00:00.000000Z</date>
<msg/>
</logentry>
</log>"#;
        let entries = parse_log(xml).unwrap();
        assert_eq!(entries[0].message, "");
    }

    #[test]
    fn rejects_output_without_log_root() {
        assert!(parse_log("<oops/>").is_err());
        assert!(parse_log("").is_err());
    }

    #[test]
    fn svn_date_to_unix() {
        // 2015-10-13 13:30:16 UTC
        assert_eq!(parse_svn_date("2015-10-13T13:30:16.473960Z"), Some(1444743016));
        // Epoch.
        assert_eq!(parse_svn_date("1970-01-01T00:00:00.000000Z"), Some(0));
        assert_eq!(parse_svn_date("not-a-date"), None);
    }
}
