//! HTTP bulk-append sink for the warehouse

use super::{wrap_records, Sink, SinkError};
use crate::config::SinkConfig;
use async_trait::async_trait;
use chrono::Utc;
use loyalty_common::UploadTask;
use reqwest::header::AUTHORIZATION;
use reqwest::{Client, Url};
use tracing::{debug, info};

/// Appends each batch to `{endpoint}/v3/table/append/{database}/{table}`.
///
/// One client is built per sink and shared by all upload workers.
#[derive(Debug, Clone)]
pub struct WarehouseSink {
    client: Client,
    url: Url,
    auth_header: String,
    name: String,
}

impl WarehouseSink {
    pub fn new(config: &SinkConfig) -> Result<Self, SinkError> {
        let client = Client::builder()
            .timeout(config.upload_timeout())
            .user_agent(concat!("loyalty-ingest/", env!("CARGO_PKG_VERSION")))
            .build()?;

        let url = Url::parse(&format!(
            "{}/v3/table/append/{}/{}",
            config.endpoint.trim_end_matches('/'),
            config.database,
            config.table
        ))
        .map_err(|e| SinkError::Other(format!("invalid sink URL: {}", e)))?;

        Ok(Self {
            client,
            url,
            auth_header: format!("TD1 {}", config.api_key),
            name: format!("warehouse:{}.{}", config.database, config.table),
        })
    }
}

#[async_trait]
impl Sink for WarehouseSink {
    fn name(&self) -> &str {
        &self.name
    }

    async fn upload(&self, task: &UploadTask) -> Result<(), SinkError> {
        if task.is_empty() {
            debug!(sequence = task.sequence, "Skipping empty batch");
            return Ok(());
        }

        let rows = wrap_records(task.batch.records(), Utc::now())?;
        let response = self
            .client
            .post(self.url.clone())
            .header(AUTHORIZATION, &self.auth_header)
            .json(&rows)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SinkError::Rejected {
                status: status.as_u16(),
                body: body.chars().take(500).collect(),
            });
        }

        info!(sequence = task.sequence, records = rows.len(), "Batch appended");
        Ok(())
    }
}
