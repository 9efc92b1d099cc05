//! Session: owns one workspace's paths, index, database, and tools.
//!
//! A [`Session`] replaces process-wide state. Ingestion takes the write side
//! of a [`tokio::sync::RwLock`], so no tool call can observe a half-rebuilt
//! session; tool calls take the read side and may run concurrently.
//!
//! [`Session::teardown`] closes the database, drops the index, and removes
//! the working directory when the session owns it. It is idempotent and safe
//! to call on a session that never finished ingesting.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use serde_json::Value;
use sqlx::SqlitePool;
use tokio::sync::RwLock;

use crate::chunk::RecursiveSplitter;
use crate::config::Config;
use crate::embedding::{create_embedder, Embedder};
use crate::extract::{ContentExtractor, FileExtractor};
use crate::ingest::{BuildReport, IndexBuilder};
use crate::ocr::create_ocr;
use crate::scan::ScanOptions;
use crate::sql::SqliteEngine;
use crate::tools::{ToolContext, ToolInfo, ToolOutput, ToolRegistry};

#[derive(Default)]
struct Ready {
    ctx: ToolContext,
    pool: Option<SqlitePool>,
    report: Option<BuildReport>,
}

pub struct Session {
    config: Config,
    data_dir: PathBuf,
    db_path: PathBuf,
    index_path: PathBuf,
    /// Removed on teardown when set.
    owned_workdir: Option<PathBuf>,
    embedder: Arc<dyn Embedder>,
    extractor: Arc<dyn ContentExtractor>,
    tools: ToolRegistry,
    state: RwLock<Ready>,
    torn_down: AtomicBool,
}

impl Session {
    /// A session over the paths in `config.paths`. Nothing is deleted on teardown.
    pub fn open(config: Config) -> Result<Self> {
        let data_dir = config.paths.data_dir.clone();
        let db_path = config.paths.db_path.clone();
        let index_path = config.paths.index_path.clone();
        Self::build(config, data_dir, db_path, index_path, None)
    }

    /// A session rooted in `workdir`, which it creates and owns:
    /// `data/` for sources, `tables.sqlite`, and `index/`.
    pub fn in_workdir(config: Config, workdir: &Path) -> Result<Self> {
        let data_dir = workdir.join("data");
        std::fs::create_dir_all(&data_dir)
            .with_context(|| format!("Failed to create {}", data_dir.display()))?;
        Self::build(
            config,
            data_dir,
            workdir.join("tables.sqlite"),
            workdir.join("index"),
            Some(workdir.to_path_buf()),
        )
    }

    /// A session in a fresh directory under the system temp dir.
    pub fn temporary(config: Config) -> Result<Self> {
        let workdir = std::env::temp_dir().join(format!("anyfile-{}", uuid::Uuid::new_v4()));
        Self::in_workdir(config, &workdir)
    }

    fn build(
        config: Config,
        data_dir: PathBuf,
        db_path: PathBuf,
        index_path: PathBuf,
        owned_workdir: Option<PathBuf>,
    ) -> Result<Self> {
        let embedder = create_embedder(&config.embedding)?;
        let extractor: Arc<dyn ContentExtractor> =
            Arc::new(FileExtractor::new(create_ocr(&config.ocr)?));
        let top_k = config.retrieval.top_k;

        Ok(Self {
            config,
            data_dir,
            db_path,
            index_path,
            owned_workdir,
            embedder,
            extractor,
            tools: ToolRegistry::with_builtins(),
            state: RwLock::new(Ready {
                ctx: ToolContext::new().with_top_k(top_k),
                ..Ready::default()
            }),
            torn_down: AtomicBool::new(false),
        })
    }

    pub fn with_embedder(mut self, embedder: Arc<dyn Embedder>) -> Self {
        self.embedder = embedder;
        self
    }

    pub fn with_extractor(mut self, extractor: Arc<dyn ContentExtractor>) -> Self {
        self.extractor = extractor;
        self
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    pub fn index_path(&self) -> &Path {
        &self.index_path
    }

    pub fn tool_infos(&self) -> Vec<ToolInfo> {
        self.tools.list()
    }

    pub fn has_tool(&self, name: &str) -> bool {
        self.tools.find(name).is_some()
    }

    /// Copy `src` into the data directory. A name that is already taken gets
    /// a short random suffix instead of overwriting.
    pub fn add_file(&self, src: &Path) -> Result<PathBuf> {
        let file_name = src
            .file_name()
            .with_context(|| format!("{} has no file name", src.display()))?;
        std::fs::create_dir_all(&self.data_dir)
            .with_context(|| format!("Failed to create {}", self.data_dir.display()))?;

        let mut dest = self.data_dir.join(file_name);
        if dest.exists() {
            let stem = Path::new(file_name)
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_default();
            let suffix = &uuid::Uuid::new_v4().simple().to_string()[..8];
            let renamed = match Path::new(file_name).extension() {
                Some(ext) => format!("{}_{}.{}", stem, suffix, ext.to_string_lossy()),
                None => format!("{}_{}", stem, suffix),
            };
            dest = self.data_dir.join(renamed);
        }

        std::fs::copy(src, &dest)
            .with_context(|| format!("Failed to copy {} to {}", src.display(), dest.display()))?;
        tracing::debug!(src = %src.display(), dest = %dest.display(), "added file");
        Ok(dest)
    }

    /// Build or load the index and open the database for tools.
    pub async fn ingest(&self, force_rebuild: bool) -> Result<BuildReport> {
        if self.torn_down.load(Ordering::SeqCst) {
            anyhow::bail!("session has been torn down");
        }

        let mut state = self.state.write().await;
        // The rebuild may delete the database file underneath the old pool.
        if let Some(pool) = state.pool.take() {
            pool.close().await;
        }
        state.ctx = ToolContext::new().with_top_k(self.config.retrieval.top_k);
        state.report = None;

        let builder = IndexBuilder::new(
            Arc::clone(&self.embedder),
            Arc::clone(&self.extractor),
            RecursiveSplitter::from_config(&self.config.chunking),
            self.config.embedding.batch_size,
        )
        .with_scan_options(ScanOptions::from(&self.config.scan));

        let (handle, report) = builder
            .build_or_load_with_report(&self.data_dir, &self.db_path, &self.index_path, force_rebuild)
            .await?;

        let mut ctx = ToolContext::new()
            .with_top_k(self.config.retrieval.top_k)
            .with_index(Arc::new(handle));

        if self.db_path.is_file() {
            let engine = SqliteEngine::open(&self.db_path).await?;
            state.pool = Some(engine.pool().clone());
            ctx = ctx.with_sql(engine);
        }

        state.ctx = ctx;
        state.report = Some(report.clone());
        Ok(report)
    }

    /// Report of the last successful ingestion, if any.
    pub async fn last_report(&self) -> Option<BuildReport> {
        self.state.read().await.report.clone()
    }

    pub async fn is_ready(&self) -> bool {
        self.state.read().await.report.is_some()
    }

    /// Run a tool. Never fails; see [`ToolRegistry::call`].
    pub async fn call_tool(&self, name: &str, params: Value) -> ToolOutput {
        let state = self.state.read().await;
        self.tools.call(name, params, &state.ctx).await
    }

    /// Release everything the session holds. Safe to call more than once.
    pub async fn teardown(&self) -> Result<()> {
        if self.torn_down.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let mut state = self.state.write().await;
        if let Some(pool) = state.pool.take() {
            pool.close().await;
        }
        *state = Ready::default();
        drop(state);

        if let Some(dir) = &self.owned_workdir {
            match std::fs::remove_dir_all(dir) {
                Ok(()) => tracing::debug!(dir = %dir.display(), "removed session workdir"),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => {
                    return Err(e).with_context(|| format!("Failed to remove {}", dir.display()))
                }
            }
        }
        Ok(())
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if self.torn_down.load(Ordering::SeqCst) {
            return;
        }
        if let Some(dir) = &self.owned_workdir {
            let _ = std::fs::remove_dir_all(dir);
        }
    }
}
