//! Incremental SVN revision-log indexer.
//!
//! Pulls commit history in bounded windows from a log source, feeds each
//! window to a set of indexer plugins that maintain derived tables in a
//! per-repository SQLite store, and answers structured queries (by path,
//! bug ID, merge ancestry, ref, author) without re-scanning history.

pub mod db;
pub mod engine;
pub mod error;
pub mod message_parser;
pub mod plugins;
pub mod source;
