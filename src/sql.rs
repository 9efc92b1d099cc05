//! Relational query surface for the reasoning loop.
//!
//! [`SqlEngine`] is the seam between tools and the database. [`SqliteEngine`]
//! runs queries against the materialized tables and renders results as
//! pipe-separated text. [`GuardedSql`] wraps any engine and refuses
//! statements that look like they modify data.
//!
//! # Limitations
//!
//! [`is_safe_sql`] is a keyword filter, not a security boundary: it does not
//! parse SQL, so it rejects harmless queries that mention a keyword (for
//! example inside a string literal) and cannot reason about statements it
//! does not list. [`SqliteEngine::open`] additionally opens the database
//! read-only, which is what actually prevents writes.

use std::path::Path;
use std::sync::LazyLock;

use anyhow::Result;
use async_trait::async_trait;
use regex::Regex;
use sqlx::sqlite::{SqlitePool, SqliteRow};
use sqlx::{Column, Row, ValueRef};
use thiserror::Error;

/// Content returned in place of a result when a query is refused.
pub const BLOCKED_MESSAGE: &str = "Query blocked: Only SELECT/PRAGMA queries are allowed.";

/// Sample rows shown by [`SqlEngine::describe`].
const DESCRIBE_SAMPLE_ROWS: usize = 3;

#[derive(Debug, Error)]
pub enum SqlError {
    #[error("table '{0}' does not exist")]
    UnknownTable(String),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

static WRITE_KEYWORD_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(insert|update|delete|drop|alter|create|replace)\b").unwrap()
});

/// True if `sql` contains none of the data-modifying keywords as a whole word.
pub fn is_safe_sql(sql: &str) -> bool {
    !WRITE_KEYWORD_RE.is_match(sql)
}

/// A database that tools can query.
#[async_trait]
pub trait SqlEngine: Send + Sync {
    /// Execute a query and render the result as text.
    async fn run(&self, sql: &str) -> Result<String>;
    /// User table names, sorted.
    async fn list_tables(&self) -> Result<Vec<String>>;
    /// DDL plus a few sample rows for one table.
    async fn describe(&self, table: &str) -> Result<String>;
}

pub struct SqliteEngine {
    pool: SqlitePool,
}

impl SqliteEngine {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Open the database at `db_path` read-only.
    pub async fn open(db_path: &Path) -> Result<Self> {
        Ok(Self::new(crate::db::connect_read_only(db_path).await?))
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

#[async_trait]
impl SqlEngine for SqliteEngine {
    async fn run(&self, sql: &str) -> Result<String> {
        let (columns, rows) = fetch_rows(&self.pool, sql).await?;
        Ok(render_table(&columns, &rows))
    }

    async fn list_tables(&self) -> Result<Vec<String>> {
        list_tables(&self.pool).await
    }

    async fn describe(&self, table: &str) -> Result<String> {
        let ddl: Option<String> =
            sqlx::query_scalar("SELECT sql FROM sqlite_master WHERE type = 'table' AND name = ?")
                .bind(table)
                .fetch_optional(&self.pool)
                .await
                .map_err(SqlError::from)?;
        let ddl = ddl.ok_or_else(|| SqlError::UnknownTable(table.to_string()))?;

        let sample_sql = format!(
            "SELECT * FROM {} LIMIT {}",
            quote_ident(table),
            DESCRIBE_SAMPLE_ROWS
        );
        let (columns, rows) = fetch_rows(&self.pool, &sample_sql).await?;

        Ok(format!(
            "{}\n\n/*\n{} rows from {} table:\n{}\n*/",
            ddl.trim(),
            DESCRIBE_SAMPLE_ROWS,
            table,
            render_table(&columns, &rows)
        ))
    }
}

/// Refuses unsafe statements before they reach the wrapped engine.
pub struct GuardedSql<E: SqlEngine> {
    inner: E,
}

impl<E: SqlEngine> GuardedSql<E> {
    pub fn new(inner: E) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl<E: SqlEngine> SqlEngine for GuardedSql<E> {
    async fn run(&self, sql: &str) -> Result<String> {
        if !is_safe_sql(sql) {
            tracing::warn!(query = %sql, "blocked SQL statement");
            return Ok(BLOCKED_MESSAGE.to_string());
        }
        self.inner.run(sql).await
    }

    async fn list_tables(&self) -> Result<Vec<String>> {
        self.inner.list_tables().await
    }

    async fn describe(&self, table: &str) -> Result<String> {
        self.inner.describe(table).await
    }
}

/// Double-quote an identifier for interpolation into SQL.
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

pub(crate) async fn list_tables(pool: &SqlitePool) -> Result<Vec<String>> {
    let tables: Vec<String> = sqlx::query_scalar(
        "SELECT name FROM sqlite_master WHERE type = 'table' AND name NOT LIKE 'sqlite_%' ORDER BY name",
    )
    .fetch_all(pool)
    .await
    .map_err(SqlError::from)?;
    Ok(tables)
}

/// Run a query and stringify every cell. Empty results carry no columns.
pub(crate) async fn fetch_rows(
    pool: &SqlitePool,
    sql: &str,
) -> Result<(Vec<String>, Vec<Vec<String>>)> {
    let rows: Vec<SqliteRow> = sqlx::query(sql)
        .fetch_all(pool)
        .await
        .map_err(SqlError::from)?;

    let columns = rows
        .first()
        .map(|r| r.columns().iter().map(|c| c.name().to_string()).collect())
        .unwrap_or_default();

    let cells = rows
        .iter()
        .map(|row| (0..row.len()).map(|i| cell_text(row, i)).collect())
        .collect();

    Ok((columns, cells))
}

fn cell_text(row: &SqliteRow, i: usize) -> String {
    match row.try_get_raw(i) {
        Ok(raw) if raw.is_null() => return "NULL".to_string(),
        Ok(_) => {}
        Err(_) => return String::new(),
    }
    if let Ok(v) = row.try_get::<i64, _>(i) {
        return v.to_string();
    }
    if let Ok(v) = row.try_get::<f64, _>(i) {
        return v.to_string();
    }
    if let Ok(v) = row.try_get::<String, _>(i) {
        return v;
    }
    match row.try_get::<Vec<u8>, _>(i) {
        Ok(bytes) => format!("<{} bytes>", bytes.len()),
        Err(_) => String::new(),
    }
}

/// Render rows as an aligned pipe table:
///
/// ```text
/// a | b
/// --+--
/// 1 | x
/// ```
pub fn render_table(columns: &[String], rows: &[Vec<String>]) -> String {
    if rows.is_empty() {
        return "(no rows)".to_string();
    }

    let mut widths: Vec<usize> = columns.iter().map(|c| c.chars().count()).collect();
    for row in rows {
        for (i, cell) in row.iter().enumerate() {
            if let Some(w) = widths.get_mut(i) {
                *w = (*w).max(cell.chars().count());
            }
        }
    }

    let pad = |cells: &[String]| -> String {
        cells
            .iter()
            .zip(&widths)
            .map(|(cell, &w)| format!("{:<width$}", cell, width = w))
            .collect::<Vec<_>>()
            .join(" | ")
            .trim_end()
            .to_string()
    };

    let mut lines = Vec::with_capacity(rows.len() + 2);
    lines.push(pad(columns));
    lines.push(
        widths
            .iter()
            .map(|&w| "-".repeat(w.max(1)))
            .collect::<Vec<_>>()
            .join("-+-"),
    );
    for row in rows {
        lines.push(pad(row));
    }
    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn safe_queries() {
        assert!(is_safe_sql("SELECT * FROM t"));
        assert!(is_safe_sql("PRAGMA table_info(t)"));
        assert!(is_safe_sql("select updated_at, created_by from t"));
    }

    #[test]
    fn unsafe_queries_any_case() {
        for sql in [
            "DROP TABLE t",
            "delete from t",
            "Insert into t values (1)",
            "UPDATE t SET a = 1",
            "ALTER TABLE t ADD b",
            "create table x (a)",
            "SELECT replace(a, 'x', 'y') FROM t",
            "SELECT 1; DROP TABLE t",
        ] {
            assert!(!is_safe_sql(sql), "{sql}");
        }
    }

    #[test]
    fn renders_pipe_table() {
        let out = render_table(
            &["a".into(), "b".into()],
            &[vec!["1".into(), "x".into()], vec!["22".into(), "NULL".into()]],
        );
        assert_eq!(out, "a  | b\n---+-----\n1  | x\n22 | NULL");
        assert_eq!(render_table(&[], &[]), "(no rows)");
    }

    struct Recording {
        runs: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl SqlEngine for Recording {
        async fn run(&self, sql: &str) -> Result<String> {
            self.runs.fetch_add(1, Ordering::SeqCst);
            Ok(format!("ran: {sql}"))
        }
        async fn list_tables(&self) -> Result<Vec<String>> {
            Ok(vec!["t".into()])
        }
        async fn describe(&self, table: &str) -> Result<String> {
            Ok(format!("CREATE TABLE {table} (a)"))
        }
    }

    #[tokio::test]
    async fn guard_blocks_without_touching_inner() {
        let runs = Arc::new(AtomicUsize::new(0));
        let guarded = GuardedSql::new(Recording {
            runs: Arc::clone(&runs),
        });
        let out = guarded.run("DELETE FROM t").await.unwrap();
        assert_eq!(out, BLOCKED_MESSAGE);
        assert_eq!(runs.load(Ordering::SeqCst), 0);

        let out = guarded.run("SELECT 1").await.unwrap();
        assert_eq!(out, "ran: SELECT 1");
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn sqlite_engine_runs_and_describes() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("t.sqlite");
        let pool = crate::db::connect(&path).await.unwrap();
        sqlx::query("CREATE TABLE people (name VARCHAR, age BIGINT, score DOUBLE)")
            .execute(&pool)
            .await
            .unwrap();
        sqlx::query("INSERT INTO people VALUES ('ann', 31, 1.5), ('bob', NULL, 2.0)")
            .execute(&pool)
            .await
            .unwrap();
        pool.close().await;

        let engine = SqliteEngine::open(&path).await.unwrap();
        assert_eq!(engine.list_tables().await.unwrap(), vec!["people"]);

        let out = engine
            .run("SELECT name, age FROM people ORDER BY name")
            .await
            .unwrap();
        assert_eq!(out, "name | age\n-----+-----\nann  | 31\nbob  | NULL");

        let out = engine.run("SELECT * FROM people WHERE age > 100").await.unwrap();
        assert_eq!(out, "(no rows)");

        let desc = engine.describe("people").await.unwrap();
        assert!(desc.starts_with("CREATE TABLE people"));
        assert!(desc.contains("3 rows from people table"));
        assert!(desc.contains("ann"));

        assert!(engine.describe("nope").await.is_err());
        assert!(engine.run("SELEC broken").await.is_err());
        engine.close().await;
    }
}
