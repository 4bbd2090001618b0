//! BDPM ingestion orchestrator
//!
//! Fans out one run per source file with buffer_unordered, collects every
//! outcome, then loads the produced scripts in registry order.

use crate::config::IngestConfig;
use crate::database::Database;
use crate::download::Downloader;
use crate::pipeline::{ArtifactPaths, Artifacts, Pipeline};
use crate::schema::{SchemaOverrides, SchemaRegistry, SourceFile};
use bdpm_common::{BdpmError, Result};
use encoding_rs::Encoding;
use futures::stream::{self, StreamExt};
use std::time::Instant;
use tracing::{error, info, warn};

/// Summary of one successfully processed file
#[derive(Debug, Clone, Default)]
pub struct FileSummary {
    pub records: usize,
    pub statements: usize,
    pub diagnostics: usize,
    pub artifacts: ArtifactPaths,
    /// Rows affected by the loaded script, when the database is enabled
    pub rows_loaded: Option<u64>,
    script: Option<String>,
}

/// Result for one source file
#[derive(Debug)]
pub struct FileOutcome {
    pub key: String,
    pub name: String,
    pub result: Result<FileSummary>,
}

impl FileOutcome {
    pub fn is_success(&self) -> bool {
        self.result.is_ok()
    }
}

/// Outcome of a whole run, in registry order
#[derive(Debug)]
pub struct RunReport {
    pub outcomes: Vec<FileOutcome>,
    pub duration_seconds: f64,
}

impl RunReport {
    pub fn is_success(&self) -> bool {
        self.outcomes.iter().all(FileOutcome::is_success)
    }

    pub fn failures(&self) -> impl Iterator<Item = &FileOutcome> {
        self.outcomes.iter().filter(|o| !o.is_success())
    }

    pub fn get(&self, key: &str) -> Option<&FileOutcome> {
        self.outcomes.iter().find(|o| o.key == key)
    }

    pub fn total_records(&self) -> usize {
        self.outcomes
            .iter()
            .filter_map(|o| o.result.as_ref().ok())
            .map(|s| s.records)
            .sum()
    }

    /// Log one line per file and a final tally
    pub fn log_summary(&self) {
        for outcome in &self.outcomes {
            match &outcome.result {
                Ok(summary) => info!(
                    file = %outcome.key,
                    name = %outcome.name,
                    records = summary.records,
                    statements = summary.statements,
                    diagnostics = summary.diagnostics,
                    "✓ File ingested"
                ),
                Err(e) => error!(
                    file = %outcome.key,
                    name = %outcome.name,
                    error = %e,
                    "✗ File failed"
                ),
            }
        }

        let failed = self.failures().count();
        info!(
            "Run completed in {:.2}s: {} / {} files successful, {} records",
            self.duration_seconds,
            self.outcomes.len() - failed,
            self.outcomes.len(),
            self.total_records()
        );
    }
}

/// Drives download, decoding and loading of every registered file
pub struct Orchestrator {
    config: IngestConfig,
    registry: SchemaRegistry,
    overrides: SchemaOverrides,
    downloader: Downloader,
    encoding: &'static Encoding,
}

impl Orchestrator {
    pub fn new(config: IngestConfig, registry: SchemaRegistry) -> Result<Self> {
        config.validate()?;
        let downloader = Downloader::new(&config)?;
        let encoding = config.encoding()?;

        Ok(Self {
            config,
            registry,
            overrides: SchemaOverrides::default(),
            downloader,
            encoding,
        })
    }

    /// Load per-file column overrides from `config.schema_file`, if set
    pub async fn with_schema_file(mut self) -> Result<Self> {
        if let Some(path) = &self.config.schema_file {
            self.overrides = SchemaOverrides::load(path).await?;
            info!("Loaded schema overrides from {}", path.display());
        }
        Ok(self)
    }

    pub fn with_overrides(mut self, overrides: SchemaOverrides) -> Self {
        self.overrides = overrides;
        self
    }

    pub fn with_downloader(mut self, downloader: Downloader) -> Self {
        self.downloader = downloader;
        self
    }

    /// Run every file and load the results
    ///
    /// Errors returned here are global (data directory, database
    /// connection, schema creation). Per-file failures are in the report.
    pub async fn run(&self) -> Result<RunReport> {
        let start = Instant::now();
        tokio::fs::create_dir_all(&self.config.data_dir).await?;

        let database = if self.config.load_database {
            let database = Database::connect(&self.config.database_url).await?;
            database.recreate_schema(self.registry.tables()).await?;
            Some(database)
        } else {
            None
        };

        let total = self.registry.len();
        info!(
            "Processing {} files (concurrency={})",
            total, self.config.concurrency
        );

        let mut results: Vec<(usize, Result<FileSummary>)> =
            stream::iter(self.registry.files().iter().enumerate())
                .map(|(index, file)| async move {
                    info!("Starting {} ({} / {})", file.key, index + 1, total);
                    (index, self.run_file(file).await)
                })
                .buffer_unordered(self.config.concurrency)
                .collect()
                .await;
        results.sort_by_key(|(index, _)| *index);

        let mut outcomes = Vec::with_capacity(results.len());
        for ((_, result), file) in results.into_iter().zip(self.registry.files()) {
            let result = match (result, &database) {
                (Ok(summary), Some(database)) => load_script(database, file, summary).await,
                (result, _) => result,
            };

            if let Err(e) = &result {
                warn!(
                    file = %file.key,
                    name = %file.name,
                    error = %e,
                    "Failed to ingest file"
                );
            }

            outcomes.push(FileOutcome {
                key: file.key.clone(),
                name: file.name.clone(),
                result,
            });
        }

        if let Some(database) = database {
            database.close().await;
        }

        Ok(RunReport {
            outcomes,
            duration_seconds: start.elapsed().as_secs_f64(),
        })
    }

    async fn run_file(&self, file: &SourceFile) -> Result<FileSummary> {
        let schema = self.overrides.schema_for(file)?;
        let path = self.config.source_path(&file.key);

        if self.config.offline {
            if !tokio::fs::try_exists(&path).await? {
                return Err(BdpmError::Io(std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    format!("offline mode: {} not found", path.display()),
                )));
            }
        } else {
            let url = self.config.source_url(&file.key);
            self.downloader.download_to(&url, &path).await?;
        }

        let builder = file.statement_builder(&schema);
        let mut pipeline = Pipeline::new(&file.key, &schema).with_encoding(self.encoding);
        if let Some(builder) = builder.as_deref() {
            pipeline = pipeline.with_builder(builder);
        }

        let artifacts = Artifacts {
            json: self.config.write_json,
            sql: self.config.write_sql,
        };
        let output = pipeline.process_file(&path, artifacts).await?;

        Ok(FileSummary {
            records: output.records.len(),
            statements: output.statements.len(),
            diagnostics: output.diagnostics,
            script: self.config.load_database.then(|| output.sql_script()),
            artifacts: output.artifacts,
            rows_loaded: None,
        })
    }
}

async fn load_script(
    database: &Database,
    file: &SourceFile,
    mut summary: FileSummary,
) -> Result<FileSummary> {
    if let Some(script) = summary.script.take() {
        let rows = database.execute_script(&script).await?;
        info!("Loaded {}: {} rows affected", file.key, rows);
        summary.rows_loaded = Some(rows);
    }
    Ok(summary)
}
