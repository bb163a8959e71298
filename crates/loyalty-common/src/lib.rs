//! Loyalty Sync Common Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Shared plumbing for the loyalty-sync workspace members.
//!
//! # Overview
//!
//! - **Types**: the record/page/batch data model passed through the pipeline
//! - **Env**: typed parsing of environment variables into configuration values
//! - **Error Handling**: the configuration error shared by every config loader
//! - **Logging**: `tracing` subscriber setup (console, rolling file, JSON)
//!
//! # Example
//!
//! ```no_run
//! use loyalty_common::env::EnvReader;
//! use loyalty_common::ConfigResult;
//!
//! fn batch_size() -> ConfigResult<usize> {
//!     EnvReader::process().parse_or("INGEST_BATCH_SIZE", 100_000)
//! }
//! ```

pub mod env;
pub mod error;
pub mod logging;
pub mod types;

// Re-export commonly used types
pub use error::{ConfigError, ConfigResult};
pub use types::{Batch, BatchKind, Page, Record, UploadTask};
