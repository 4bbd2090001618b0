//! Batch pipeline for one source file
//!
//! Reads a tab-separated file line by line, normalizes the legacy encoding,
//! decodes every line against the file's schema and collects the records and
//! generated statements. The results are persisted as two artifacts next to
//! the source:
//!
//! - `<source>.json`: pretty-printed array of records
//! - `<source>.sql`: the statements wrapped in a single transaction

use crate::decoder::{decode_line, Record};
use crate::schema::Schema;
use crate::statement::StatementBuilder;
use bdpm_common::{BdpmError, Result};
use encoding_rs::{Encoding, WINDOWS_1252};
use std::borrow::Cow;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use tokio::fs::File;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tracing::{debug, info, warn};

/// Right single quotation mark in windows-1252, published in place of `'`
pub const LEGACY_APOSTROPHE: u8 = 0x92;

/// Which artifacts to persist
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Artifacts {
    pub json: bool,
    pub sql: bool,
}

impl Default for Artifacts {
    fn default() -> Self {
        Self {
            json: true,
            sql: true,
        }
    }
}

/// Paths of the artifacts actually written
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ArtifactPaths {
    pub json: Option<PathBuf>,
    pub sql: Option<PathBuf>,
}

/// Everything produced from one source file
#[derive(Debug, Clone, Default)]
pub struct PipelineOutput {
    pub records: Vec<Record>,
    /// Generated statements in line order; records without one are skipped
    pub statements: Vec<String>,
    /// Non-blank lines read
    pub lines: usize,
    pub diagnostics: usize,
    pub artifacts: ArtifactPaths,
}

impl PipelineOutput {
    /// The SQL script for this file
    pub fn sql_script(&self) -> String {
        render_sql(&self.statements)
    }
}

/// Split one raw line into fields
///
/// Returns `None` for blank lines. Byte `0x92` is rewritten to `'` before
/// decoding when `encoding` is single-byte.
pub fn frame_line(raw: &[u8], encoding: &'static Encoding) -> Option<Vec<String>> {
    let bytes: Cow<'_, [u8]> = if encoding.is_single_byte() && raw.contains(&LEGACY_APOSTROPHE) {
        Cow::Owned(
            raw.iter()
                .map(|&b| if b == LEGACY_APOSTROPHE { b'\'' } else { b })
                .collect(),
        )
    } else {
        Cow::Borrowed(raw)
    };

    let (text, _) = encoding.decode_without_bom_handling(&bytes);
    let line = text.trim_end();
    if line.trim_start().is_empty() {
        return None;
    }

    Some(line.split('\t').map(str::to_owned).collect())
}

/// Wrap statements in one `BEGIN TRANSACTION;` / `COMMIT;` pair
pub fn render_sql<S: AsRef<str>>(statements: &[S]) -> String {
    let mut script = String::from("BEGIN TRANSACTION;\n");
    for statement in statements {
        let statement = statement.as_ref().trim_end();
        script.push_str(statement);
        if !statement.ends_with(';') {
            script.push(';');
        }
        script.push('\n');
    }
    script.push_str("COMMIT;\n");
    script
}

pub fn render_json(records: &[Record]) -> Result<String> {
    Ok(serde_json::to_string_pretty(records)?)
}

/// `<source><suffix>`, e.g. `CIS_bdpm.txt` -> `CIS_bdpm.txt.json`
pub fn artifact_path(source: &Path, suffix: &str) -> PathBuf {
    let mut path = OsString::from(source.as_os_str());
    path.push(suffix);
    PathBuf::from(path)
}

/// Write `contents` to a temporary sibling, then rename it over `path`
pub(crate) async fn write_atomic(path: &Path, contents: impl AsRef<[u8]>) -> Result<()> {
    let tmp = artifact_path(path, ".tmp");
    tokio::fs::write(&tmp, contents).await?;
    if let Err(e) = tokio::fs::rename(&tmp, path).await {
        let _ = tokio::fs::remove_file(&tmp).await;
        return Err(BdpmError::Io(e));
    }
    Ok(())
}

/// Decodes one source file
pub struct Pipeline<'a> {
    key: &'a str,
    schema: &'a Schema,
    builder: Option<&'a dyn StatementBuilder>,
    encoding: &'static Encoding,
}

impl<'a> Pipeline<'a> {
    /// `key` identifies the file in log events
    pub fn new(key: &'a str, schema: &'a Schema) -> Self {
        Self {
            key,
            schema,
            builder: None,
            encoding: WINDOWS_1252,
        }
    }

    pub fn with_builder(mut self, builder: &'a dyn StatementBuilder) -> Self {
        self.builder = Some(builder);
        self
    }

    pub fn with_encoding(mut self, encoding: &'static Encoding) -> Self {
        self.encoding = encoding;
        self
    }

    /// Decode every line of `reader`
    ///
    /// Field problems are logged and counted, never returned as errors. Only
    /// a failing read aborts.
    pub async fn process<R>(&self, mut reader: R) -> Result<PipelineOutput>
    where
        R: AsyncBufRead + Unpin,
    {
        let mut output = PipelineOutput::default();
        let mut buf = Vec::with_capacity(1024);
        let mut line_number = 0usize;

        loop {
            buf.clear();
            if reader.read_until(b'\n', &mut buf).await? == 0 {
                break;
            }
            line_number += 1;

            let Some(fields) = frame_line(&buf, self.encoding) else {
                continue;
            };
            output.lines += 1;

            let decoded = decode_line(self.schema, &fields);
            for diagnostic in &decoded.diagnostics {
                warn!(
                    file = %self.key,
                    line = line_number,
                    field = %diagnostic.field,
                    value = %diagnostic.raw,
                    kind = %diagnostic.kind,
                    "{}",
                    diagnostic.message
                );
            }
            output.diagnostics += decoded.diagnostics.len();

            if let Some(statement) = self.builder.and_then(|b| b.build(&decoded.record)) {
                output.statements.push(statement);
            }
            output.records.push(decoded.record);

            if line_number % 10_000 == 0 {
                debug!(file = %self.key, lines = line_number, "Decoding in progress");
            }
        }

        info!(
            file = %self.key,
            records = output.records.len(),
            statements = output.statements.len(),
            diagnostics = output.diagnostics,
            "Decoded source file"
        );

        Ok(output)
    }

    /// Decode the file at `source` and persist the requested artifacts
    pub async fn process_file(&self, source: &Path, artifacts: Artifacts) -> Result<PipelineOutput> {
        let file = File::open(source).await?;
        let mut output = self.process(BufReader::new(file)).await?;
        output.artifacts = write_artifacts(source, &output, artifacts).await?;
        Ok(output)
    }
}

/// Write the JSON and SQL artifacts concurrently
pub async fn write_artifacts(
    source: &Path,
    output: &PipelineOutput,
    artifacts: Artifacts,
) -> Result<ArtifactPaths> {
    let json = async {
        if !artifacts.json {
            return Ok::<_, BdpmError>(None);
        }
        let path = artifact_path(source, ".json");
        write_atomic(&path, render_json(&output.records)?).await?;
        Ok(Some(path))
    };

    let sql = async {
        if !artifacts.sql {
            return Ok::<_, BdpmError>(None);
        }
        let path = artifact_path(source, ".sql");
        write_atomic(&path, output.sql_script()).await?;
        Ok(Some(path))
    };

    // Both writes complete even when one fails
    let (json, sql) = tokio::join!(json, sql);
    Ok(ArtifactPaths {
        json: json?,
        sql: sql?,
    })
}
