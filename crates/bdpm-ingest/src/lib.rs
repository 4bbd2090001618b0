//! BDPM Ingest Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Ingestion of the tab-separated reference files published by the French
//! public drug database (BDPM): specialties, presentations, compositions,
//! HAS opinions, generic groups, prescription conditions and important
//! information.
//!
//! # Components
//!
//! - [`schema`]: column declarations and the built-in registry of source files
//! - [`decoder`]: per-line decoding into typed records plus diagnostics
//! - [`pipeline`]: line-by-line processing of a file, JSON and SQL artifacts
//! - [`statement`]: INSERT and conditional UPDATE builders
//! - [`database`]: SQLite schema creation and script loading
//! - [`download`] and [`orchestrator`]: fetching and per-file fan-out
//!
//! # Example
//!
//! ```no_run
//! use bdpm_ingest::{IngestConfig, Orchestrator, SchemaRegistry};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = IngestConfig::load()?;
//!     let orchestrator = Orchestrator::new(config, SchemaRegistry::builtin()?)?;
//!     let report = orchestrator.run().await?;
//!     report.log_summary();
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod database;
pub mod decoder;
pub mod download;
pub mod orchestrator;
pub mod pipeline;
pub mod schema;
pub mod statement;

pub use config::IngestConfig;
pub use decoder::{decode_line, Decoded, Diagnostic, DiagnosticKind, Record, Value};
pub use orchestrator::{FileOutcome, FileSummary, Orchestrator, RunReport};
pub use pipeline::{Artifacts, Pipeline, PipelineOutput};
pub use schema::{Column, Schema, SchemaRegistry, SourceFile};
pub use statement::{InsertBuilder, StatementBuilder, UpdateBuilder};
