//! Table materializer: loads every tabular file under a data directory into
//! a fresh SQLite database and describes each resulting table with a
//! summary card for the similarity index.
//!
//! The database is rebuilt from scratch on every run. Tables are named from
//! the file stem (CSV) or `{stem}__{sheet}` (xlsx), passed through
//! [`sanitize_table_name`]. When two sources map to the same name, the later
//! one (in path order) wins and a warning names both origins.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use sqlx::sqlite::SqlitePool;
use sqlx::{QueryBuilder, Row, Sqlite};

use crate::models::{FileClass, IndexedDocument, SourceType};
use crate::scan::{discover, ScanOptions};
use crate::sql::{fetch_rows, list_tables, quote_ident, render_table};
use crate::tabular::{convert_cell, read_csv, read_xlsx, Cell, Grid};

/// Rows shown on a summary card.
const CARD_SAMPLE_ROWS: usize = 5;

/// SQLite's default host-parameter ceiling for one statement.
const MAX_BIND_PARAMS: usize = 999;

/// Result of one materialization run.
#[derive(Debug)]
pub struct Materialized {
    /// Writable pool on the new database, `None` when no tabular files exist.
    pub db: Option<SqlitePool>,
    pub tables: Vec<String>,
    pub cards: Vec<IndexedDocument>,
}

impl Materialized {
    pub fn empty() -> Self {
        Self {
            db: None,
            tables: Vec::new(),
            cards: Vec::new(),
        }
    }

    /// Close the pool, if any.
    pub async fn close(&self) {
        if let Some(pool) = &self.db {
            pool.close().await;
        }
    }
}

/// Turn an arbitrary string into a safe SQL identifier.
///
/// Runs of non-alphanumeric characters collapse to `_`, edge underscores are
/// trimmed, and names that are empty or start with a digit get a `t_` prefix.
pub fn sanitize_table_name(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut pending_sep = false;
    for c in raw.chars() {
        if c.is_ascii_alphanumeric() {
            if pending_sep && !out.is_empty() {
                out.push('_');
            }
            pending_sep = false;
            out.push(c.to_ascii_lowercase());
        } else {
            pending_sep = true;
        }
    }

    if out.is_empty() || out.starts_with(|c: char| c.is_ascii_digit()) {
        out.insert_str(0, "t_");
    }
    out
}

pub async fn materialize(source_dir: &Path, db_path: &Path) -> Result<Materialized> {
    materialize_with(source_dir, db_path, &ScanOptions::default()).await
}

/// Materialize every tabular file under `source_dir` into `db_path`.
///
/// Any existing database is removed first. With no tabular files no new
/// database is created.
pub async fn materialize_with(
    source_dir: &Path,
    db_path: &Path,
    opts: &ScanOptions,
) -> Result<Materialized> {
    let files = discover(source_dir, FileClass::Tabular, opts)?;
    crate::db::remove_database(db_path)?;
    if files.is_empty() {
        tracing::info!(dir = %source_dir.display(), "no tabular files found");
        return Ok(Materialized::empty());
    }

    let pool = crate::db::connect(db_path).await?;

    let mut origins: HashMap<String, PathBuf> = HashMap::new();
    for file in &files {
        for (table, grid) in load_grids(file) {
            if let Some(previous) = origins.get(&table) {
                tracing::warn!(
                    table = %table,
                    previous = %previous.display(),
                    replacement = %file.display(),
                    "table name collision, later source replaces earlier"
                );
            }
            match write_table(&pool, &table, &grid).await {
                Ok(()) => {
                    tracing::debug!(table = %table, rows = grid.rows.len(), source = %file.display(), "loaded table");
                    origins.insert(table, file.clone());
                }
                Err(e) => {
                    tracing::warn!(table = %table, source = %file.display(), error = %e, "failed to load table, skipping");
                }
            }
        }
    }

    let tables = list_tables(&pool).await?;
    let mut cards = Vec::with_capacity(tables.len());
    for table in &tables {
        let source = origins
            .get(table)
            .map(|p| p.display().to_string())
            .unwrap_or_default();
        cards.push(build_summary_card(&pool, table, &source, db_path).await?);
    }

    tracing::info!(
        files = files.len(),
        tables = tables.len(),
        db = %db_path.display(),
        "materialized tables"
    );

    Ok(Materialized {
        db: Some(pool),
        tables,
        cards,
    })
}

/// Parse one file into named grids. Unreadable files and sheets are logged
/// and yield nothing.
fn load_grids(path: &Path) -> Vec<(String, Grid)> {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .unwrap_or_default();

    match ext.as_str() {
        "csv" => match read_csv(path) {
            Ok(grid) if grid.is_empty() => {
                tracing::warn!(file = %path.display(), "CSV file is empty, skipping");
                Vec::new()
            }
            Ok(grid) => vec![(sanitize_table_name(&stem), grid)],
            Err(e) => {
                tracing::warn!(file = %path.display(), error = %format!("{:#}", e), "failed to read CSV, skipping");
                Vec::new()
            }
        },
        "xlsx" => match read_xlsx(path) {
            Ok(sheets) => sheets
                .into_iter()
                .filter_map(|sheet| match sheet.grid {
                    Ok(grid) => Some((sanitize_table_name(&format!("{}__{}", stem, sheet.name)), grid)),
                    Err(e) => {
                        tracing::warn!(file = %path.display(), sheet = %sheet.name, error = %e, "skipping sheet");
                        None
                    }
                })
                .collect(),
            Err(e) => {
                tracing::warn!(file = %path.display(), error = %format!("{:#}", e), "failed to open workbook, skipping");
                Vec::new()
            }
        },
        "xls" => {
            tracing::warn!(file = %path.display(), "legacy .xls format is not supported, skipping");
            Vec::new()
        }
        _ => Vec::new(),
    }
}

/// Create or replace `table` with the contents of `grid`, in one transaction.
async fn write_table(pool: &SqlitePool, table: &str, grid: &Grid) -> Result<()> {
    let types = grid.infer_types();
    let ident = quote_ident(table);

    let column_defs = grid
        .columns
        .iter()
        .zip(&types)
        .map(|(name, ty)| format!("{} {}", quote_ident(name), ty.as_sql()))
        .collect::<Vec<_>>()
        .join(", ");

    let mut tx = pool.begin().await?;
    sqlx::query(&format!("DROP TABLE IF EXISTS {}", ident))
        .execute(&mut *tx)
        .await?;
    sqlx::query(&format!("CREATE TABLE {} ({})", ident, column_defs))
        .execute(&mut *tx)
        .await?;

    let rows_per_insert = (MAX_BIND_PARAMS / grid.columns.len().max(1)).max(1);
    for batch in grid.rows.chunks(rows_per_insert) {
        let typed = batch.iter().map(|row| {
            row.iter()
                .zip(&types)
                .map(|(raw, ty)| convert_cell(raw.as_deref(), *ty))
                .collect::<Vec<Cell>>()
        });

        let mut qb: QueryBuilder<Sqlite> =
            QueryBuilder::new(format!("INSERT INTO {} ", ident));
        qb.push_values(typed, |mut b, row| {
            for cell in row {
                match cell {
                    Cell::Null => b.push_bind(None::<String>),
                    Cell::Bool(v) => b.push_bind(v),
                    Cell::Int(v) => b.push_bind(v),
                    Cell::Float(v) => b.push_bind(v),
                    Cell::Text(v) => b.push_bind(v),
                };
            }
        });
        qb.build().execute(&mut *tx).await?;
    }

    tx.commit().await?;
    Ok(())
}

/// Describe one live table as a `table_summary` document.
pub async fn build_summary_card(
    pool: &SqlitePool,
    table: &str,
    source: &str,
    db_path: &Path,
) -> Result<IndexedDocument> {
    let ident = quote_ident(table);

    let info = sqlx::query(&format!("PRAGMA table_info({})", ident))
        .fetch_all(pool)
        .await
        .with_context(|| format!("Failed to describe table {}", table))?;
    let mut columns = Vec::with_capacity(info.len());
    for row in &info {
        let name: String = row.try_get("name")?;
        let ty: String = row.try_get("type")?;
        columns.push(format!("{}:{}", name, ty));
    }

    let row_count: i64 = sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {}", ident))
        .fetch_one(pool)
        .await?;

    let (sample_cols, sample_rows) = fetch_rows(
        pool,
        &format!("SELECT * FROM {} LIMIT {}", ident, CARD_SAMPLE_ROWS),
    )
    .await?;

    let content = format!(
        "TABLE CARD: {}\nsource: {}\ncolumns: {}\nrow_count: {}\nsample_rows (first {}):\n{}",
        table,
        source,
        columns.join(", "),
        row_count,
        CARD_SAMPLE_ROWS,
        render_table(&sample_cols, &sample_rows)
    );

    Ok(IndexedDocument::new(SourceType::TableSummary, content)
        .with_meta("table", table)
        .with_meta("db_path", db_path.display().to_string())
        .with_meta("source", source))
}
