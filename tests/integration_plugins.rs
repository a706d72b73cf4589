mod common;

use std::cell::RefCell;
use std::rc::Rc;

use common::{open_engine, query_i64, CommitBuilder, MockLogSource};
use revlog::db::cache::DatabaseCache;
use revlog::engine::RevisionLog;
use revlog::error::RevLogError;
use revlog::source::{Action, NodeKind};

const URL: &str = "svn://localhost/a/trunk";

fn criteria(values: &[&str]) -> Vec<String> {
    values.iter().map(|value| value.to_string()).collect()
}

fn find_revisions(log: &RevisionLog, plugin: &str, values: &[&str]) -> Vec<u32> {
    log.find(plugin, &criteria(values)).unwrap().into_revisions()
}

fn trunk_commit(revision: u32) -> CommitBuilder {
    CommitBuilder::new(revision).path(
        Action::Modified,
        NodeKind::File,
        "/a/trunk/file.txt",
    )
}

fn source_with_trunk() -> Rc<MockLogSource> {
    let source = MockLogSource::new();
    source.add_commit(
        CommitBuilder::new(1)
            .path(Action::Added, NodeKind::Dir, "/a/trunk")
            .path(Action::Added, NodeKind::File, "/a/trunk/file.txt")
            .build(),
    );
    source
}

#[test]
fn bug_ids_are_extracted_with_project_regexp() {
    let source = source_with_trunk();
    source.set_property("svn://localhost/a/trunk/", r"(JRA-\d+)");
    source.add_commit(trunk_commit(100).message("JRA-42 fix the thing").build());
    source.add_commit(trunk_commit(101).message("no bug reference").build());

    let tmp = tempfile::tempdir().unwrap();
    let log = open_engine(source, tmp.path(), URL);

    assert_eq!(
        query_i64(&log, "SELECT COUNT(*) FROM CommitBugs WHERE Revision = 100 AND Bug = 'JRA-42'"),
        1
    );

    assert_eq!(find_revisions(&log, "bugs", &["JRA-42"]), vec![100]);
    assert!(find_revisions(&log, "bugs", &["JRA-99"]).is_empty());

    let data = log.get_revisions_data("bugs", &[100, 101]).unwrap();
    assert_eq!(data[&100], serde_json::json!(["JRA-42"]));
    assert_eq!(data[&101], serde_json::json!([]));
}

#[test]
fn bug_regexp_is_detected_once_and_cached() {
    let source = source_with_trunk();
    source.set_property("svn://localhost/a/trunk/", r"(JRA-\d+)");

    let tmp = tempfile::tempdir().unwrap();
    let mut log = open_engine(source.clone(), tmp.path(), URL);

    let stored: String = log
        .db()
        .query_row("SELECT BugRegExp FROM Projects WHERE Path = '/a/'", [], |row| row.get(0))
        .unwrap();
    assert_eq!(stored, r"(JRA-\d+)");

    // Property changes upstream; the cached expression keeps being used.
    source.set_property("svn://localhost/a/trunk/", r"(OTHER-\d+)");
    source.add_commit(trunk_commit(50).message("OTHER-7 and JRA-7").build());
    log.refresh(None).unwrap();

    assert_eq!(find_revisions(&log, "bugs", &["JRA-7"]), vec![50]);
    assert!(find_revisions(&log, "bugs", &["OTHER-7"]).is_empty());
}

#[test]
fn merge_facts_round_trip() {
    let source = source_with_trunk();
    source.add_commit(trunk_commit(100).build());
    source.add_commit(trunk_commit(200).build());
    source.add_commit(trunk_commit(300).message("merge branch").merges(&[100, 200]).build());

    let tmp = tempfile::tempdir().unwrap();
    let log = open_engine(source, tmp.path(), URL);

    assert_eq!(find_revisions(&log, "merges", &["all_merges"]), vec![300]);
    assert_eq!(find_revisions(&log, "merges", &["all_merged"]), vec![100, 200]);
    assert_eq!(find_revisions(&log, "merges", &["300"]), vec![100, 200]);

    let data = log.get_revisions_data("merges", &[100, 150]).unwrap();
    assert_eq!(data[&100], serde_json::json!([300]));
    assert_eq!(data[&150], serde_json::json!([]));
}

#[test]
fn unknown_merge_revision_fails() {
    let source = source_with_trunk();
    source.add_commit(trunk_commit(100).build());
    source.add_commit(trunk_commit(300).merges(&[100]).build());

    let tmp = tempfile::tempdir().unwrap();
    let log = open_engine(source, tmp.path(), URL);

    let err = log.find("merges", &criteria(&["999"])).unwrap_err();
    match err {
        RevLogError::RevisionsNotFound { plugin, revisions } => {
            assert_eq!(plugin, "merges");
            assert_eq!(revisions, vec![999]);
        }
        other => panic!("unexpected error: {:?}", other),
    }
}

#[test]
fn reparse_rederives_merge_data() {
    let source = source_with_trunk();
    source.add_commit(trunk_commit(100).build());
    source.add_commit(trunk_commit(200).build());
    // Initially recorded with partial merge history.
    source.add_commit(trunk_commit(300).merges(&[100]).build());

    let tmp = tempfile::tempdir().unwrap();
    let mut log = open_engine(source.clone(), tmp.path(), URL);

    assert_eq!(find_revisions(&log, "merges", &["300"]), vec![100]);

    source.replace_commit(trunk_commit(300).merges(&[100, 200]).build());
    log.reparse(300, None).unwrap();

    assert_eq!(find_revisions(&log, "merges", &["300"]), vec![100, 200]);
    assert_eq!(
        query_i64(&log, "SELECT COUNT(*) FROM Merges WHERE MergeRevision = 300"),
        2,
        "prior rows must be removed, not duplicated"
    );

    // Watermarks stay where they were.
    for (_, last_revision) in log.watermarks().unwrap() {
        assert_eq!(last_revision, 300);
    }

    // Summary rows were not duplicated either.
    assert_eq!(query_i64(&log, "SELECT COUNT(*) FROM Commits WHERE Revision = 300"), 1);
}

#[test]
fn refs_plugin_lists_and_searches_refs() {
    let source = source_with_trunk();
    source.add_commit(
        CommitBuilder::new(20)
            .path(Action::Added, NodeKind::Dir, "/a/branches/dev")
            .path(Action::Added, NodeKind::File, "/a/branches/dev/work.txt")
            .build(),
    );
    source.add_commit(trunk_commit(30).build());

    let tmp = tempfile::tempdir().unwrap();
    let log = open_engine(source, tmp.path(), URL);

    match log.find("refs", &criteria(&["all_refs"])).unwrap() {
        revlog::plugins::FindResult::Names(mut names) => {
            names.sort();
            assert_eq!(names, vec!["branches/dev", "trunk"]);
        }
        other => panic!("unexpected find result: {:?}", other),
    }

    assert_eq!(find_revisions(&log, "refs", &["branches/dev"]), vec![20]);
    assert_eq!(find_revisions(&log, "refs", &["trunk"]), vec![1, 30]);
    assert_eq!(find_revisions(&log, "refs", &["trunk", "branches/dev"]), vec![1, 20, 30]);

    let data = log.get_revisions_data("refs", &[20, 999]).unwrap();
    assert_eq!(data[&20], serde_json::json!(["branches/dev"]));
    assert_eq!(data[&999], serde_json::json!([]));
}

#[test]
fn summary_finds_by_author_only() {
    let source = source_with_trunk();
    source.add_commit(trunk_commit(100).author("bob").build());
    source.add_commit(trunk_commit(200).author("alice").build());

    let tmp = tempfile::tempdir().unwrap();
    let log = open_engine(source, tmp.path(), URL);

    assert_eq!(find_revisions(&log, "summary", &["author:bob"]), vec![100]);

    let err = log.find("summary", &criteria(&["message:fix"])).unwrap_err();
    assert!(matches!(err, RevLogError::BadCriterion { .. }));

    let err = log.find("summary", &criteria(&["bare-criterion"])).unwrap_err();
    assert!(matches!(err, RevLogError::BadCriterion { .. }));
}

#[test]
fn summary_revisions_data_reports_missing() {
    let source = source_with_trunk();
    source.add_commit(trunk_commit(100).message("the fix").build());

    let tmp = tempfile::tempdir().unwrap();
    let log = open_engine(source, tmp.path(), URL);

    let data = log.get_revisions_data("summary", &[100]).unwrap();
    assert_eq!(data[&100]["author"], "alice");
    assert_eq!(data[&100]["msg"], "the fix");

    let err = log.get_revisions_data("summary", &[100, 12345]).unwrap_err();
    match err {
        RevLogError::RevisionsNotFound { plugin, revisions } => {
            assert_eq!(plugin, "summary");
            assert_eq!(revisions, vec![12345]);
        }
        other => panic!("unexpected error: {:?}", other),
    }
}

#[test]
fn projects_plugin_fails_on_unknown_project() {
    let source = source_with_trunk();

    let tmp = tempfile::tempdir().unwrap();
    let log = open_engine(source, tmp.path(), URL);

    assert_eq!(find_revisions(&log, "projects", &["/a/"]), vec![1]);

    let err = log.find("projects", &criteria(&["/a/", "/missing/"])).unwrap_err();
    match err {
        RevLogError::ProjectNotFound(paths) => assert_eq!(paths, vec!["/missing/"]),
        other => panic!("unexpected error: {:?}", other),
    }
}

#[test]
fn facade_rejects_unknown_plugin() {
    let source = source_with_trunk();

    let tmp = tempfile::tempdir().unwrap();
    let log = open_engine(source, tmp.path(), URL);

    let err = log.find("mocked", &criteria(&["x"])).unwrap_err();
    assert!(matches!(err, RevLogError::UnknownPlugin(name) if name == "mocked"));

    let err = log.get_revisions_data("mocked", &[1]).unwrap_err();
    assert!(matches!(err, RevLogError::UnknownPlugin(_)));
}

#[test]
fn duplicate_plugin_registration_fails() {
    let db = Rc::new(rusqlite::Connection::open_in_memory().unwrap());
    let cache = Rc::new(RefCell::new(DatabaseCache::new()));
    let filler = Rc::new(revlog::engine::filler::RepositoryFiller::new(db.clone(), cache.clone()));
    let source: Rc<dyn revlog::source::LogSource> = MockLogSource::new();

    let mut log = RevisionLog::new(URL, source, db.clone(), cache);

    log.register_plugin(revlog::plugins::AnyPlugin::Repository(Box::new(
        revlog::plugins::SummaryPlugin::new(db.clone(), filler.clone()),
    )))
    .unwrap();

    let err = log
        .register_plugin(revlog::plugins::AnyPlugin::Repository(Box::new(
            revlog::plugins::SummaryPlugin::new(db, filler),
        )))
        .unwrap_err();

    assert!(matches!(err, RevLogError::Config(_)));
}

#[test]
fn refresh_without_plugins_fails() {
    let db = Rc::new(rusqlite::Connection::open_in_memory().unwrap());
    let cache = Rc::new(RefCell::new(DatabaseCache::new()));
    let source: Rc<dyn revlog::source::LogSource> = MockLogSource::new();

    let mut log = RevisionLog::new(URL, source, db, cache);

    let err = log.refresh(None).unwrap_err();
    assert!(matches!(err, RevLogError::Config(_)));
}

#[test]
fn get_revision_data_extracts_single_revision() {
    let source = source_with_trunk();
    source.add_commit(trunk_commit(100).message("one").build());

    let tmp = tempfile::tempdir().unwrap();
    let log = open_engine(source, tmp.path(), URL);

    let data = log.get_revision_data("summary", 100).unwrap();
    assert_eq!(data["msg"], "one");
}
