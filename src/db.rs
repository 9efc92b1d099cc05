use anyhow::{Context, Result};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Open (creating if needed) a writable SQLite database at `db_path`.
pub async fn connect(db_path: &Path) -> Result<SqlitePool> {
    // Ensure parent directory exists
    if let Some(parent) = db_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
    }

    // Rollback journal rather than WAL so read-only readers never need the
    // -shm file.
    let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", db_path.display()))?
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Delete);

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await
        .with_context(|| format!("Failed to open database {}", db_path.display()))?;

    Ok(pool)
}

/// Open an existing database for queries only.
pub async fn connect_read_only(db_path: &Path) -> Result<SqlitePool> {
    let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", db_path.display()))?
        .read_only(true)
        .create_if_missing(false);

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await
        .with_context(|| format!("Failed to open database {} read-only", db_path.display()))?;

    Ok(pool)
}

/// Delete the database file and its journal siblings. Missing files are fine.
pub fn remove_database(db_path: &Path) -> Result<()> {
    for path in database_files(db_path) {
        match std::fs::remove_file(&path) {
            Ok(()) => tracing::debug!(path = %path.display(), "removed database file"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                return Err(e).with_context(|| format!("Failed to remove {}", path.display()))
            }
        }
    }
    Ok(())
}

fn database_files(db_path: &Path) -> Vec<PathBuf> {
    let mut files = vec![db_path.to_path_buf()];
    for suffix in ["-wal", "-shm", "-journal"] {
        let mut name = db_path.as_os_str().to_os_string();
        name.push(suffix);
        files.push(PathBuf::from(name));
    }
    files
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn create_query_and_remove() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("nested/tables.sqlite");

        let pool = connect(&path).await.unwrap();
        sqlx::query("CREATE TABLE t (a BIGINT)").execute(&pool).await.unwrap();
        pool.close().await;
        assert!(path.exists());

        let ro = connect_read_only(&path).await.unwrap();
        let err = sqlx::query("INSERT INTO t VALUES (1)").execute(&ro).await;
        assert!(err.is_err());
        ro.close().await;

        remove_database(&path).unwrap();
        assert!(!path.exists());
        // Idempotent.
        remove_database(&path).unwrap();
    }

    #[tokio::test]
    async fn read_only_open_of_missing_file_fails() {
        let tmp = TempDir::new().unwrap();
        assert!(connect_read_only(&tmp.path().join("none.sqlite")).await.is_err());
    }
}
