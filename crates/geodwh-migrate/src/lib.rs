//! Ordered, reversible SQL migrations for the warehouse schema.
//!
//! Migration files live in one directory and are named
//! `<name>.<up|down>.sql`. A run executes every matching file inside a
//! single transaction; a failure anywhere rolls the whole batch back.

use std::path::{Path, PathBuf};

use sqlx::{Executor, PgPool};
use thiserror::Error;
use tokio::fs;
use tracing::{debug, info};

pub const CRATE_NAME: &str = "geodwh-migrate";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Up,
    Down,
}

impl Direction {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Up => "up",
            Self::Down => "down",
        }
    }
}

#[derive(Debug, Error)]
pub enum MigrateError {
    #[error("migrations path `{0}` is not a directory")]
    DirectoryNotFound(PathBuf),
    #[error("reading migration `{file}`: {source}")]
    Io {
        file: String,
        #[source]
        source: std::io::Error,
    },
    #[error("migration `{file}` failed: {source}")]
    Migration {
        file: String,
        #[source]
        source: sqlx::Error,
    },
    #[error("migration transaction failed: {0}")]
    Transaction(#[source] sqlx::Error),
}

/// Applies the migration set in a given direction, one transaction per run.
#[derive(Debug, Clone)]
pub struct MigrationRunner {
    migrations_path: PathBuf,
}

impl MigrationRunner {
    pub fn new(migrations_path: impl Into<PathBuf>) -> Self {
        Self {
            migrations_path: migrations_path.into(),
        }
    }

    /// Apply all `up` migrations in ascending filename order.
    pub async fn migrate_up(&self, pool: &PgPool) -> Result<(), MigrateError> {
        let mut files = self.discover(Direction::Up)?;
        files.sort();
        self.apply(pool, &files).await
    }

    /// Apply all `down` migrations in descending filename order.
    pub async fn migrate_down(&self, pool: &PgPool) -> Result<(), MigrateError> {
        let mut files = self.discover(Direction::Down)?;
        files.sort();
        files.reverse();
        self.apply(pool, &files).await
    }

    /// Revert then reapply everything, producing a deterministic schema
    /// regardless of prior runs. Down migrations are written idempotently
    /// (`DROP ... IF EXISTS`) so this is safe against a fresh database.
    pub async fn migrate_with_clean_start(&self, pool: &PgPool) -> Result<(), MigrateError> {
        self.migrate_down(pool).await?;
        self.migrate_up(pool).await
    }

    async fn apply(&self, pool: &PgPool, files: &[PathBuf]) -> Result<(), MigrateError> {
        let mut tx = pool.begin().await.map_err(MigrateError::Transaction)?;

        for file in files {
            let name = display_name(file);
            let sql = fs::read_to_string(file).await.map_err(|source| {
                MigrateError::Io {
                    file: name.clone(),
                    source,
                }
            })?;

            debug!(migration = %name, "executing migration");
            // Calling through `Executor::execute` instead of `RawSql::execute`
            // keeps the future `Send` at every lifetime (rust-lang/rust#102211
            // fires on the `RawSql::execute` wrapper's lifetime setup).
            (&mut *tx)
                .execute(sqlx::raw_sql(&sql))
                .await
                .map_err(|source| MigrateError::Migration { file: name, source })?;
        }

        tx.commit().await.map_err(MigrateError::Transaction)?;
        info!(count = files.len(), "migration batch committed");
        Ok(())
    }

    /// List files matching `<name>.<direction>.sql`. Anything else in the
    /// directory is silently ignored; a missing directory is fatal.
    fn discover(&self, direction: Direction) -> Result<Vec<PathBuf>, MigrateError> {
        if !self.migrations_path.is_dir() {
            return Err(MigrateError::DirectoryNotFound(self.migrations_path.clone()));
        }

        let entries = std::fs::read_dir(&self.migrations_path).map_err(|source| {
            MigrateError::Io {
                file: self.migrations_path.display().to_string(),
                source,
            }
        })?;

        let mut files = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|source| MigrateError::Io {
                file: self.migrations_path.display().to_string(),
                source,
            })?;
            let path = entry.path();
            if path.is_file() && matches_direction(&path, direction) {
                files.push(path);
            }
        }
        Ok(files)
    }
}

/// Classification follows the filename's dot segments: at least three, the
/// last `sql`, the second-to-last exactly the direction (case-sensitive).
fn matches_direction(path: &Path, direction: Direction) -> bool {
    let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
        return false;
    };
    let parts: Vec<&str> = name.split('.').collect();
    if parts.len() < 3 {
        return false;
    }
    parts[parts.len() - 1] == "sql" && parts[parts.len() - 2] == direction.as_str()
}

fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn touch(dir: &Path, name: &str) {
        std::fs::write(dir.join(name), "SELECT 1;").expect("write migration");
    }

    #[test]
    fn classification_requires_direction_and_sql_suffix() {
        let dir = tempdir().expect("tempdir");
        touch(dir.path(), "001_init.up.sql");
        touch(dir.path(), "001_init.down.sql");
        touch(dir.path(), "002_tables.up.sql");
        touch(dir.path(), "notes.txt");
        touch(dir.path(), "loose.sql");
        touch(dir.path(), "003_wrong.UP.sql");
        touch(dir.path(), "004_wrong.up.sql.bak");

        let runner = MigrationRunner::new(dir.path());

        let mut ups = runner.discover(Direction::Up).expect("discover up");
        ups.sort();
        let names: Vec<String> = ups.iter().map(|p| display_name(p)).collect();
        assert_eq!(names, vec!["001_init.up.sql", "002_tables.up.sql"]);

        let downs = runner.discover(Direction::Down).expect("discover down");
        assert_eq!(downs.len(), 1);
    }

    #[test]
    fn dotted_names_keep_their_last_two_segments_authoritative() {
        let dir = tempdir().expect("tempdir");
        touch(dir.path(), "001.add.users.up.sql");

        let runner = MigrationRunner::new(dir.path());
        assert_eq!(runner.discover(Direction::Up).expect("up").len(), 1);
        assert!(runner.discover(Direction::Down).expect("down").is_empty());
    }

    #[test]
    fn subdirectories_are_ignored() {
        let dir = tempdir().expect("tempdir");
        std::fs::create_dir(dir.path().join("archived.up.sql")).expect("mkdir");
        touch(dir.path(), "001_init.up.sql");

        let runner = MigrationRunner::new(dir.path());
        assert_eq!(runner.discover(Direction::Up).expect("up").len(), 1);
    }

    #[test]
    fn missing_directory_is_fatal() {
        let dir = tempdir().expect("tempdir");
        let runner = MigrationRunner::new(dir.path().join("nope"));

        let err = runner.discover(Direction::Up).expect_err("must fail");
        assert!(matches!(err, MigrateError::DirectoryNotFound(_)));
    }

    #[test]
    fn down_order_is_the_reverse_of_up_order() {
        let dir = tempdir().expect("tempdir");
        touch(dir.path(), "001_schema.down.sql");
        touch(dir.path(), "002_regions.down.sql");
        touch(dir.path(), "003_markers.down.sql");

        let runner = MigrationRunner::new(dir.path());
        let mut files = runner.discover(Direction::Down).expect("down");
        files.sort();
        files.reverse();
        let names: Vec<String> = files.iter().map(|p| display_name(p)).collect();
        assert_eq!(
            names,
            vec![
                "003_markers.down.sql",
                "002_regions.down.sql",
                "001_schema.down.sql"
            ]
        );
    }
}
