//! Upload destinations
//!
//! A [`Sink`] receives one [`UploadTask`] per call and either accepts the
//! whole batch or returns an error; there is no partial acknowledgment.
//! Records are wrapped as [`SinkRecord`]s carrying the compact JSON document
//! and the ingestion timestamp.

mod jsonl;
mod warehouse;

pub use jsonl::JsonLinesSink;
pub use warehouse::WarehouseSink;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use loyalty_common::{Record, UploadTask};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SinkError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("sink rejected batch with HTTP {status}: {body}")]
    Rejected { status: u16, body: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("{0}")]
    Other(String),
}

#[async_trait]
pub trait Sink: Send + Sync {
    /// Short name for logs
    fn name(&self) -> &str;

    async fn upload(&self, task: &UploadTask) -> Result<(), SinkError>;
}

/// Warehouse row: the record as compact JSON plus its ingestion time
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SinkRecord {
    pub json_response: String,
    /// Unix seconds
    pub time: i64,
}

/// Wrap every record with the same ingestion timestamp
pub fn wrap_records(
    records: &[Record],
    ingested_at: DateTime<Utc>,
) -> Result<Vec<SinkRecord>, serde_json::Error> {
    let time = ingested_at.timestamp();
    records
        .iter()
        .map(|record| {
            Ok(SinkRecord {
                json_response: serde_json::to_string(record)?,
                time,
            })
        })
        .collect()
}
