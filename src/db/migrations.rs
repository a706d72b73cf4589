//! Ordered, idempotent schema and data migrations.
//!
//! Migrations are embedded in the binary and identified by name
//! (`YYYYMMDD_HHMM_description`); natural name order is execution order.
//! The runner records executed migrations in the `Migrations` table, so any
//! previously-created store can always be brought up to the current schema.

use std::time::{SystemTime, UNIX_EPOCH};

use rusqlite::Connection;

use crate::engine::RevisionLog;
use crate::error::{Result, RevLogError};

/// What a migration does when it runs.
pub enum MigrationKind {
    /// One or more `;`-separated SQL statements.
    Sql(&'static str),
    /// A data migration that may call back into higher-level logic.
    Data(fn(&MigrationContext<'_>) -> Result<()>),
}

pub struct Migration {
    pub name: &'static str,
    pub kind: MigrationKind,
}

/// Everything a migration may touch: the store handle and, when run through
/// the factory, the engine itself.
pub struct MigrationContext<'a> {
    db: &'a Connection,
    revision_log: Option<&'a RevisionLog>,
}

impl<'a> MigrationContext<'a> {
    pub fn new(db: &'a Connection) -> MigrationContext<'a> {
        MigrationContext { db, revision_log: None }
    }

    pub fn with_revision_log(db: &'a Connection, revision_log: &'a RevisionLog) -> MigrationContext<'a> {
        MigrationContext { db, revision_log: Some(revision_log) }
    }

    pub fn db(&self) -> &Connection {
        self.db
    }

    /// Engine handle; absent when migrations run outside the factory
    /// (data migrations that need it skip themselves in that case).
    pub fn revision_log(&self) -> Option<&RevisionLog> {
        self.revision_log
    }
}

pub struct MigrationRunner {
    migrations: Vec<Migration>,
}

impl MigrationRunner {
    pub fn new() -> MigrationRunner {
        MigrationRunner { migrations: builtin_migrations() }
    }

    /// Runner over an explicit migration set (tests).
    pub fn with_migrations(migrations: Vec<Migration>) -> MigrationRunner {
        MigrationRunner { migrations }
    }

    /// Applies every migration not yet recorded, each inside its own
    /// transaction, and prunes tracking rows of migrations that no longer
    /// exist in this build.
    pub fn run(&self, context: &MigrationContext<'_>) -> Result<()> {
        let db = context.db();
        db.execute(
            "CREATE TABLE IF NOT EXISTS \"Migrations\" (
                \"Name\" TEXT NOT NULL,
                \"ExecutedOn\" INTEGER NOT NULL,
                PRIMARY KEY (\"Name\")
            )",
            [],
        )?;

        let executed = self.executed_migrations(db)?;

        for migration in &self.migrations {
            if executed.iter().any(|name| name == migration.name) {
                continue;
            }

            let tx = db.unchecked_transaction()?;

            match &migration.kind {
                MigrationKind::Sql(sql) => {
                    let statements: Vec<&str> = sql
                        .split(';')
                        .map(str::trim)
                        .filter(|statement| !statement.is_empty())
                        .collect();

                    if statements.is_empty() {
                        return Err(RevLogError::Config(format!(
                            "the \"{}\" migration contains no SQL statements",
                            migration.name
                        )));
                    }

                    for statement in statements {
                        tx.execute(statement, [])?;
                    }
                }
                MigrationKind::Data(run) => run(context)?,
            }

            tx.execute(
                "INSERT INTO Migrations (Name, ExecutedOn) VALUES (?1, ?2)",
                rusqlite::params![migration.name, unix_now()],
            )?;
            tx.commit()?;
        }

        // Rolling back to an older build must not leave orphaned markers.
        for name in executed {
            if !self.migrations.iter().any(|migration| migration.name == name) {
                db.execute("DELETE FROM Migrations WHERE Name = ?1", [&name])?;
            }
        }

        Ok(())
    }

    fn executed_migrations(&self, db: &Connection) -> Result<Vec<String>> {
        let mut statement = db.prepare("SELECT Name FROM Migrations ORDER BY Name")?;
        let names = statement
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(names)
    }
}

impl Default for MigrationRunner {
    fn default() -> MigrationRunner {
        MigrationRunner::new()
    }
}

fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
}

const CREATE_SCHEMA: &str = r#"
CREATE TABLE "Projects" (
    "Id" INTEGER NOT NULL PRIMARY KEY AUTOINCREMENT,
    "Path" TEXT NOT NULL,
    "IsDeleted" INTEGER NOT NULL DEFAULT 0,
    "BugRegExp" TEXT
);
CREATE UNIQUE INDEX "IDX_Projects_Path" ON "Projects" ("Path");

CREATE TABLE "ProjectRefs" (
    "Id" INTEGER NOT NULL PRIMARY KEY AUTOINCREMENT,
    "ProjectId" INTEGER NOT NULL,
    "Name" TEXT NOT NULL
);
CREATE INDEX "IDX_ProjectRefs_ProjectId" ON "ProjectRefs" ("ProjectId");

CREATE TABLE "Paths" (
    "Id" INTEGER NOT NULL PRIMARY KEY AUTOINCREMENT,
    "Path" TEXT NOT NULL,
    "PathNestingLevel" INTEGER NOT NULL,
    "PathHash" INTEGER NOT NULL,
    "RefName" TEXT NOT NULL,
    "ProjectPath" TEXT NOT NULL,
    "RevisionAdded" INTEGER NOT NULL,
    "RevisionDeleted" INTEGER,
    "RevisionLastSeen" INTEGER NOT NULL
);
CREATE UNIQUE INDEX "IDX_Paths_PathHash" ON "Paths" ("PathHash");
CREATE INDEX "IDX_Paths_ProjectPath" ON "Paths" ("ProjectPath");

CREATE TABLE "Commits" (
    "Revision" INTEGER NOT NULL PRIMARY KEY,
    "Author" TEXT NOT NULL,
    "Date" INTEGER NOT NULL,
    "Message" TEXT NOT NULL
);
CREATE INDEX "IDX_Commits_Author" ON "Commits" ("Author");

CREATE TABLE "CommitPaths" (
    "Revision" INTEGER NOT NULL,
    "Action" TEXT NOT NULL,
    "Kind" TEXT NOT NULL,
    "PathId" INTEGER NOT NULL,
    "CopyRevision" INTEGER,
    "CopyPathId" INTEGER
);
CREATE INDEX "IDX_CommitPaths_Revision" ON "CommitPaths" ("Revision");
CREATE INDEX "IDX_CommitPaths_PathId" ON "CommitPaths" ("PathId");

CREATE TABLE "CommitProjects" (
    "ProjectId" INTEGER NOT NULL,
    "Revision" INTEGER NOT NULL
);
CREATE INDEX "IDX_CommitProjects_ProjectId" ON "CommitProjects" ("ProjectId");
CREATE INDEX "IDX_CommitProjects_Revision" ON "CommitProjects" ("Revision");

CREATE TABLE "CommitRefs" (
    "Revision" INTEGER NOT NULL,
    "RefId" INTEGER NOT NULL
);
CREATE INDEX "IDX_CommitRefs_RefId" ON "CommitRefs" ("RefId");
CREATE INDEX "IDX_CommitRefs_Revision" ON "CommitRefs" ("Revision");

CREATE TABLE "CommitBugs" (
    "Revision" INTEGER NOT NULL,
    "Bug" TEXT NOT NULL
);
CREATE INDEX "IDX_CommitBugs_Bug" ON "CommitBugs" ("Bug");
CREATE INDEX "IDX_CommitBugs_Revision" ON "CommitBugs" ("Revision");

CREATE TABLE "Merges" (
    "MergeRevision" INTEGER NOT NULL,
    "MergedRevision" INTEGER NOT NULL
);
CREATE INDEX "IDX_Merges_MergeRevision" ON "Merges" ("MergeRevision");
CREATE INDEX "IDX_Merges_MergedRevision" ON "Merges" ("MergedRevision");

CREATE TABLE "PluginData" (
    "Name" TEXT NOT NULL,
    "LastRevision" INTEGER NOT NULL,
    PRIMARY KEY ("Name")
);
"#;

/// Directories deleted before their contents were individually recorded left
/// descendants without a `RevisionDeleted`; backfill it from the directory.
fn propagate_path_revision_deleted(context: &MigrationContext<'_>) -> Result<()> {
    let db = context.db();

    let mut statement = db.prepare(
        "SELECT Path, RevisionDeleted
        FROM Paths
        WHERE Path LIKE '%/' AND RevisionDeleted IS NOT NULL",
    )?;
    let deleted_dirs = statement
        .query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, u32>(1)?))
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    for (path, revision) in deleted_dirs {
        db.execute(
            "UPDATE Paths
            SET RevisionDeleted = ?1
            WHERE Path LIKE ?2 AND RevisionDeleted IS NULL",
            rusqlite::params![revision, format!("{}%", path)],
        )?;
    }

    Ok(())
}

fn builtin_migrations() -> Vec<Migration> {
    vec![
        Migration {
            name: "20240325_1000_create_revision_log_schema",
            kind: MigrationKind::Sql(CREATE_SCHEMA),
        },
        Migration {
            name: "20241019_1708_propagate_path_revision_deleted",
            kind: MigrationKind::Data(propagate_path_revision_deleted),
        },
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn memory_db() -> Connection {
        Connection::open_in_memory().expect("in-memory database")
    }

    fn executed_names(db: &Connection) -> Vec<String> {
        let mut statement = db.prepare("SELECT Name FROM Migrations ORDER BY Name").unwrap();
        statement
            .query_map([], |row| row.get::<_, String>(0))
            .unwrap()
            .collect::<std::result::Result<Vec<_>, _>>()
            .unwrap()
    }

    #[test]
    fn creates_schema_and_records_migrations() {
        let db = memory_db();
        MigrationRunner::new().run(&MigrationContext::new(&db)).unwrap();

        let tables: i64 = db
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = 'Paths'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(tables, 1);

        assert_eq!(
            executed_names(&db),
            vec![
                "20240325_1000_create_revision_log_schema".to_string(),
                "20241019_1708_propagate_path_revision_deleted".to_string(),
            ]
        );
    }

    #[test]
    fn run_is_idempotent() {
        let db = memory_db();
        let runner = MigrationRunner::new();
        runner.run(&MigrationContext::new(&db)).unwrap();
        runner.run(&MigrationContext::new(&db)).unwrap();

        assert_eq!(executed_names(&db).len(), 2);
    }

    #[test]
    fn empty_sql_migration_fails() {
        let db = memory_db();
        let runner = MigrationRunner::with_migrations(vec![Migration {
            name: "20990101_0000_empty",
            kind: MigrationKind::Sql("  ;  "),
        }]);

        let err = runner.run(&MigrationContext::new(&db)).unwrap_err();
        assert!(matches!(err, RevLogError::Config(_)));
    }

    #[test]
    fn removed_migrations_are_pruned() {
        let db = memory_db();

        let full = MigrationRunner::with_migrations(vec![
            Migration {
                name: "20990101_0000_one",
                kind: MigrationKind::Sql("CREATE TABLE One (Id INTEGER)"),
            },
            Migration {
                name: "20990102_0000_two",
                kind: MigrationKind::Sql("CREATE TABLE Two (Id INTEGER)"),
            },
        ]);
        full.run(&MigrationContext::new(&db)).unwrap();
        assert_eq!(executed_names(&db).len(), 2);

        // A rolled-back build no longer ships the second migration.
        let reduced = MigrationRunner::with_migrations(vec![Migration {
            name: "20990101_0000_one",
            kind: MigrationKind::Sql("CREATE TABLE One (Id INTEGER)"),
        }]);
        reduced.run(&MigrationContext::new(&db)).unwrap();
        assert_eq!(executed_names(&db), vec!["20990101_0000_one".to_string()]);
    }

    #[test]
    fn propagates_revision_deleted_to_descendants() {
        let db = memory_db();
        db.execute_batch(
            "CREATE TABLE Paths (
                Id INTEGER PRIMARY KEY AUTOINCREMENT,
                Path TEXT NOT NULL,
                RevisionDeleted INTEGER
            );
            INSERT INTO Paths (Path, RevisionDeleted) VALUES ('/proj/trunk/', 50);
            INSERT INTO Paths (Path, RevisionDeleted) VALUES ('/proj/trunk/file.txt', NULL);
            INSERT INTO Paths (Path, RevisionDeleted) VALUES ('/other/file.txt', NULL);",
        )
        .unwrap();

        propagate_path_revision_deleted(&MigrationContext::new(&db)).unwrap();

        let file_deleted: Option<u32> = db
            .query_row(
                "SELECT RevisionDeleted FROM Paths WHERE Path = '/proj/trunk/file.txt'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(file_deleted, Some(50));

        let other_deleted: Option<u32> = db
            .query_row(
                "SELECT RevisionDeleted FROM Paths WHERE Path = '/other/file.txt'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(other_deleted, None);
    }
}
