//! Loyalty Ingest Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Pulls loyalty customer profiles from the source API and appends them to
//! the warehouse in fixed-size batches.
//!
//! # Pipeline
//!
//! - **Rate limiting**: one shared [`RateLimiter`](rate_limit::RateLimiter)
//!   paces every page request, retries included
//! - **Fetching**: [`PageFetcher`](source::PageFetcher) retries with linear
//!   backoff and waits out 429s without spending attempts
//! - **Pagination**: [`PaginationDriver`](pagination::PaginationDriver)
//!   follows the cursor and stops after too many consecutive failures
//! - **Batching**: [`BatchBuffer`](buffer::BatchBuffer) cuts batches of
//!   exactly `batch_size` records plus one final remainder
//! - **Upload**: [`UploadDispatcher`](dispatch::UploadDispatcher) runs a
//!   fixed worker pool under an in-flight ceiling
//!
//! # Example
//!
//! ```no_run
//! use loyalty_ingest::config::IngestConfig;
//! use loyalty_ingest::pipeline::run_ingestion;
//! use loyalty_ingest::sink::WarehouseSink;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = IngestConfig::from_env()?;
//!     let sink = Arc::new(WarehouseSink::new(&config.sink)?);
//!     let report = run_ingestion(&config.source, &config.pipeline, sink).await?;
//!     println!("uploaded {} records", report.records_uploaded);
//!     Ok(())
//! }
//! ```

pub mod buffer;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod pagination;
pub mod pipeline;
pub mod rate_limit;
pub mod sink;
pub mod source;

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
pub(crate) mod test_support;

pub use error::{IngestError, Result};
pub use pipeline::{Pipeline, PipelineStats, RunReport, RunStatus};
