//! BDPM Ingest - downloads, decodes and loads the BDPM reference files

use anyhow::Result;
use bdpm_common::logging::{init_logging, LogConfig};
use bdpm_ingest::{IngestConfig, Orchestrator, SchemaRegistry};
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let log_config = LogConfig::builder()
        .log_file_prefix("bdpm-ingest")
        .filter_directives("sqlx=warn,hyper=info,reqwest=info")
        .build()
        .merge_env()?;

    // Keep the guard alive for the whole run so file logs are flushed
    let _guard = init_logging(&log_config)?;

    info!("Starting BDPM ingestion");

    let config = IngestConfig::load()?;
    info!(
        "Data directory: {}, database: {}",
        config.data_dir.display(),
        config.database_url
    );

    let orchestrator = Orchestrator::new(config, SchemaRegistry::builtin()?)?
        .with_schema_file()
        .await?;

    let report = orchestrator.run().await?;
    report.log_summary();

    if !report.is_success() {
        let failed: Vec<&str> = report.failures().map(|o| o.key.as_str()).collect();
        anyhow::bail!("{} file(s) failed: {}", failed.len(), failed.join(", "));
    }

    info!("Ingestion complete");
    Ok(())
}
