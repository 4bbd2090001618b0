//! Configuration management

use bdpm_common::{BdpmError, Result};
use encoding_rs::Encoding;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

// ============================================================================
// Ingest Configuration Constants
// ============================================================================

/// Download endpoint of the public drug database.
pub const DEFAULT_BASE_URL: &str =
    "https://base-donnees-publique.medicaments.gouv.fr/telechargement.php";

/// Directory for downloaded files and artifacts.
pub const DEFAULT_DATA_DIR: &str = "./bdpm";

pub const DEFAULT_DATABASE_URL: &str = "sqlite://bdpm.sqlite";

/// Files processed concurrently.
pub const DEFAULT_CONCURRENCY: usize = 4;

/// HTTP request timeout in seconds.
pub const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 120;

/// Download attempts per file.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Encoding of the published files (WHATWG label).
pub const DEFAULT_ENCODING: &str = "windows-1252";

/// Ingest configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestConfig {
    pub base_url: String,
    pub data_dir: PathBuf,
    pub database_url: String,
    pub concurrency: usize,
    pub http_timeout_secs: u64,
    pub max_retries: u32,
    /// Reuse files already in `data_dir` instead of downloading
    pub offline: bool,
    pub encoding: String,
    pub write_json: bool,
    pub write_sql: bool,
    pub load_database: bool,
    /// JSON file of per-key column overrides
    pub schema_file: Option<PathBuf>,
    /// Per-key download URLs replacing `<base_url>?fichier=<key>.txt`
    pub url_overrides: HashMap<String, String>,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            data_dir: PathBuf::from(DEFAULT_DATA_DIR),
            database_url: DEFAULT_DATABASE_URL.to_string(),
            concurrency: DEFAULT_CONCURRENCY,
            http_timeout_secs: DEFAULT_HTTP_TIMEOUT_SECS,
            max_retries: DEFAULT_MAX_RETRIES,
            offline: false,
            encoding: DEFAULT_ENCODING.to_string(),
            write_json: true,
            write_sql: true,
            load_database: true,
            schema_file: None,
            url_overrides: HashMap::new(),
        }
    }
}

impl IngestConfig {
    /// Load configuration from `.env`, the environment and defaults
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_vars(|name| std::env::var(name).ok())
    }

    /// Build configuration from a variable lookup
    pub fn from_vars<F>(var: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let config = IngestConfig {
            base_url: var("BDPM_BASE_URL").unwrap_or(defaults.base_url),
            data_dir: var("BDPM_DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.data_dir),
            database_url: var("BDPM_DATABASE_URL").unwrap_or(defaults.database_url),
            concurrency: parse_var(&var, "BDPM_CONCURRENCY").unwrap_or(defaults.concurrency),
            http_timeout_secs: parse_var(&var, "BDPM_HTTP_TIMEOUT").unwrap_or(defaults.http_timeout_secs),
            max_retries: parse_var(&var, "BDPM_MAX_RETRIES").unwrap_or(defaults.max_retries),
            offline: parse_var(&var, "BDPM_OFFLINE").unwrap_or(defaults.offline),
            encoding: var("BDPM_ENCODING").unwrap_or(defaults.encoding),
            write_json: parse_var(&var, "BDPM_WRITE_JSON").unwrap_or(defaults.write_json),
            write_sql: parse_var(&var, "BDPM_WRITE_SQL").unwrap_or(defaults.write_sql),
            load_database: parse_var(&var, "BDPM_LOAD_DATABASE").unwrap_or(defaults.load_database),
            schema_file: var("BDPM_SCHEMA_FILE")
                .filter(|s| !s.trim().is_empty())
                .map(PathBuf::from),
            url_overrides: match var("BDPM_URL_OVERRIDES") {
                Some(list) => parse_url_overrides(&list)?,
                None => HashMap::new(),
            },
        };

        config.validate()?;

        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.base_url.trim().is_empty() {
            return Err(BdpmError::config("Base URL cannot be empty"));
        }

        if self.load_database && self.database_url.trim().is_empty() {
            return Err(BdpmError::config("Database URL cannot be empty"));
        }

        if self.concurrency == 0 {
            return Err(BdpmError::config("Concurrency must be greater than 0"));
        }

        if self.http_timeout_secs == 0 {
            return Err(BdpmError::config("HTTP timeout must be greater than 0"));
        }

        if self.max_retries == 0 {
            return Err(BdpmError::config("Max retries must be at least 1"));
        }

        self.encoding()?;

        if !self.write_json && !self.write_sql && !self.load_database {
            return Err(BdpmError::config(
                "Nothing to produce: enable JSON, SQL or database output",
            ));
        }

        Ok(())
    }

    /// Resolved source encoding
    pub fn encoding(&self) -> Result<&'static Encoding> {
        Encoding::for_label(self.encoding.trim().as_bytes())
            .ok_or_else(|| BdpmError::config(format!("Unknown encoding `{}`", self.encoding)))
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }

    /// Download URL of a source file
    pub fn source_url(&self, key: &str) -> String {
        match self.url_overrides.get(key) {
            Some(url) => url.clone(),
            None => format!("{}?fichier={}.txt", self.base_url, key),
        }
    }

    /// Local path of a source file
    pub fn source_path(&self, key: &str) -> PathBuf {
        self.data_dir.join(format!("{}.txt", key))
    }
}

fn parse_var<T, F>(var: &F, name: &str) -> Option<T>
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    var(name).and_then(|s| s.trim().parse().ok())
}

/// `KEY=url,KEY2=url2`
fn parse_url_overrides(list: &str) -> Result<HashMap<String, String>> {
    list.split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(|entry| match entry.split_once('=') {
            Some((key, url)) if !key.trim().is_empty() && !url.trim().is_empty() => {
                Ok((key.trim().to_string(), url.trim().to_string()))
            },
            _ => Err(BdpmError::config(format!("Invalid URL override `{}`", entry))),
        })
        .collect()
}
