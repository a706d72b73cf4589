//! Write-through row cache used during one ingestion batch.
//!
//! Point lookups against `Projects`, `ProjectRefs` and `Paths` happen far
//! more often than writes while a batch of commits is parsed; the cache
//! keeps every row (and every confirmed absence) that was looked up, so
//! the same row is fetched from SQLite at most once per batch.

use std::collections::HashMap;

use rusqlite::types::Value;

use crate::error::Result;

/// One cached row: column name to value.
pub type RowFields = HashMap<&'static str, Value>;

#[derive(Default)]
pub struct DatabaseCache {
    tables: HashMap<&'static str, HashMap<String, Option<RowFields>>>,
}

impl DatabaseCache {
    pub fn new() -> DatabaseCache {
        DatabaseCache::default()
    }

    /// Registers a table for caching. Registering the same table again is a
    /// no-op; entries cached earlier in the run are kept.
    pub fn cache_table(&mut self, table: &'static str) {
        self.tables.entry(table).or_default();
    }

    /// Returns the cached entry for `key`, running `fetch` and caching its
    /// result (including a `None` for a confirmed absence) on a miss.
    pub fn get_or_fetch<F>(&mut self, table: &'static str, key: &str, fetch: F) -> Result<Option<RowFields>>
    where
        F: FnOnce() -> Result<Option<RowFields>>,
    {
        if let Some(cached) = self.tables.get(table).and_then(|rows| rows.get(key)) {
            return Ok(cached.clone());
        }

        let fetched = fetch()?;
        self.tables
            .entry(table)
            .or_default()
            .insert(key.to_string(), fetched.clone());

        Ok(fetched)
    }

    /// Peeks at the cache without a fallback query. `None` means the key was
    /// never looked up; `Some(None)` means a cached absence.
    pub fn peek(&self, table: &str, key: &str) -> Option<Option<&RowFields>> {
        self.tables
            .get(table)
            .and_then(|rows| rows.get(key))
            .map(|entry| entry.as_ref())
    }

    /// Stores (or merges into) the cached row for `key`.
    pub fn set(&mut self, table: &'static str, key: &str, fields: RowFields) {
        let entry = self
            .tables
            .entry(table)
            .or_default()
            .entry(key.to_string())
            .or_insert(None);

        match entry {
            Some(existing) => existing.extend(fields),
            None => *entry = Some(fields),
        }
    }

    /// Drops all cached rows, keeping the set of registered tables.
    /// Called at batch boundaries to bound memory.
    pub fn clear(&mut self) {
        for rows in self.tables.values_mut() {
            rows.clear();
        }
    }
}

/// Reads an integer column from a cached row; `None` for SQL NULL or a
/// missing column.
pub fn field_i64(row: &RowFields, name: &str) -> Option<i64> {
    match row.get(name) {
        Some(Value::Integer(value)) => Some(*value),
        _ => None,
    }
}

/// Reads a revision-number column from a cached row.
pub fn field_u32(row: &RowFields, name: &str) -> Option<u32> {
    field_i64(row, name).map(|value| value as u32)
}

/// Reads a text column from a cached row.
pub fn field_str<'a>(row: &'a RowFields, name: &str) -> Option<&'a str> {
    match row.get(name) {
        Some(Value::Text(value)) => Some(value.as_str()),
        _ => None,
    }
}
