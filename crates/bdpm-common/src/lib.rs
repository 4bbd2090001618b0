//! BDPM Common Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Shared error handling and logging for the BDPM ingest workspace.
//!
//! - **Error Handling**: [`BdpmError`] and the [`Result`] alias used by every
//!   file-level operation (download, pipeline, database load)
//! - **Logging**: [`logging::init_logging`] and its environment-driven
//!   [`logging::LogConfig`]
//!
//! # Example
//!
//! ```no_run
//! use bdpm_common::{BdpmError, Result};
//!
//! fn read_source(path: &str) -> Result<Vec<u8>> {
//!     Ok(std::fs::read(path)?)
//! }
//! ```

pub mod error;
pub mod logging;

// Re-export commonly used types
pub use error::{BdpmError, Result};
