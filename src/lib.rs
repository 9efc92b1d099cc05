//! # anyfile-index
//!
//! Turns a directory of heterogeneous files into two complementary
//! retrieval surfaces for an external reasoning loop:
//!
//! - a persisted similarity index of documents tagged by modality
//!   (`text_chunk`, `image_text`, `table_summary`), and
//! - a SQLite mirror of every CSV file and spreadsheet sheet.
//!
//! Both are exposed as tools: `retrieve` for tag-filtered semantic search,
//! and a guarded `sql_db_*` family for read-only SQL.
//!
//! ## Architecture
//!
//! ```text
//!                 ┌────────────────┐
//!            ┌───▶│   Normalizer   │──┐  text chunks, image text
//! ┌────────┐ │    └────────────────┘  │   ┌───────────────┐   ┌────────────┐
//! │ files  │─┤                        ├──▶│ Index Builder │──▶│ index.sqlite│
//! └────────┘ │    ┌────────────────┐  │   └───────────────┘   └─────┬──────┘
//!            └───▶│  Materializer  │──┘  summary cards              │
//!                 └───────┬────────┘                                │
//!                         ▼                                         ▼
//!                 ┌────────────────┐                        ┌──────────────┐
//!                 │ tables.sqlite  │◀── guarded SQL tools ──│   Session    │
//!                 └────────────────┘                        │ retrieve tool│
//!                                                           └──────────────┘
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Source types, file classes, indexed documents |
//! | [`scan`] | Recursive file discovery |
//! | [`extract`] | Plain-text extraction (PDF, OOXML, HTML, text) |
//! | [`ocr`] | OCR backends for images |
//! | [`chunk`] | Recursive overlap-aware text splitter |
//! | [`normalize`] | Text and image documents |
//! | [`tabular`] | CSV and xlsx readers, type inference |
//! | [`materialize`] | Tables, sanitized names, summary cards |
//! | [`db`] | SQLite connections |
//! | [`sql`] | Query engine and write guard |
//! | [`embedding`] | Embedding providers and vector utilities |
//! | [`index`] | Persisted similarity index |
//! | [`ingest`] | Build-or-load orchestration |
//! | [`retrieve`] | Tag-filtered retrieval |
//! | [`tools`] | Tool trait, built-ins, registry |
//! | [`session`] | Per-workspace state and lifecycle |
//! | [`server`] | HTTP tool server |

pub mod chunk;
pub mod config;
pub mod db;
pub mod embedding;
pub mod extract;
pub mod index;
pub mod ingest;
pub mod materialize;
pub mod models;
pub mod normalize;
pub mod ocr;
pub mod retrieve;
pub mod scan;
pub mod server;
pub mod session;
pub mod sql;
pub mod tabular;
pub mod tools;
