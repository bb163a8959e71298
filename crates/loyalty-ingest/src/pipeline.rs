//! Run orchestration: paginate, batch, upload, drain, report

use crate::buffer::BatchBuffer;
use crate::config::{PipelineConfig, SourceConfig};
use crate::dispatch::{UploadDispatcher, UploadFailure};
use crate::error::{IngestError, Result};
use crate::pagination::PaginationDriver;
use crate::rate_limit::RateLimiter;
use crate::sink::Sink;
use crate::source::{acquire_token, CustomersEndpoint, HttpTransport, PageFetcher, PageSource};
use loyalty_common::ConfigError;
use reqwest::Client;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{error, info, info_span, warn, Instrument};
use uuid::Uuid;

const PROGRESS_EVERY_PAGES: u64 = 100;

/// Counters owned by the fetch loop
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PipelineStats {
    pub pages_fetched: u64,
    pub records_seen: u64,
    pub batches_dispatched: u64,
    pub consecutive_errors: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunStatus {
    Complete,
    /// Pagination stopped early; everything fetched before that was uploaded
    Incomplete {
        reason: String,
        last_cursor: Option<String>,
    },
}

impl RunStatus {
    pub fn is_complete(&self) -> bool {
        matches!(self, RunStatus::Complete)
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunStatus::Complete => f.write_str("complete"),
            RunStatus::Incomplete { reason, .. } => write!(f, "incomplete ({})", reason),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RunReport {
    pub run_id: Uuid,
    pub stats: PipelineStats,
    pub records_uploaded: u64,
    pub status: RunStatus,
    pub elapsed: Duration,
}

impl RunReport {
    pub fn is_complete(&self) -> bool {
        self.status.is_complete()
    }

    pub fn log_summary(&self) {
        info!(
            run_id = %self.run_id,
            pages = self.stats.pages_fetched,
            records = self.stats.records_seen,
            batches = self.stats.batches_dispatched,
            uploaded = self.records_uploaded,
            consecutive_errors = self.stats.consecutive_errors,
            elapsed_secs = self.elapsed.as_secs_f64(),
            status = %self.status,
            "Ingestion summary"
        );
        if let RunStatus::Incomplete { reason, last_cursor } = &self.status {
            warn!(
                %reason,
                last_cursor = last_cursor.as_deref().unwrap_or("<none>"),
                "Run stopped early; data may be incomplete"
            );
        }
    }
}

pub struct Pipeline<S> {
    source: S,
    sink: Arc<dyn Sink>,
    config: PipelineConfig,
}

impl<S: PageSource> Pipeline<S> {
    pub fn new(source: S, sink: Arc<dyn Sink>, config: PipelineConfig) -> Self {
        Self {
            source,
            sink,
            config,
        }
    }

    /// Fetch every page, upload every batch, and report.
    ///
    /// Pagination that stops early is an `Incomplete` report, not an error.
    /// A failed upload or an unbuildable first request fails the run.
    pub async fn run(self) -> Result<RunReport> {
        let run_id = Uuid::new_v4();
        let span = info_span!("ingest_run", %run_id);
        self.execute(run_id).instrument(span).await
    }

    async fn execute(self, run_id: Uuid) -> Result<RunReport> {
        let started = Instant::now();
        let config = self.config;
        info!(
            sink = self.sink.name(),
            batch_size = config.batch_size,
            workers = config.upload_workers,
            max_in_flight = config.max_in_flight,
            "Starting ingestion"
        );

        let mut stats = PipelineStats::default();
        let mut driver = PaginationDriver::new(self.source, config.max_consecutive_errors);
        let mut buffer = BatchBuffer::new(config.batch_size);
        let mut dispatcher =
            UploadDispatcher::spawn(self.sink, config.upload_workers, config.max_in_flight);
        let mut refused: Option<UploadFailure> = None;

        'fetch: while let Some(records) = driver.next_page().await {
            stats.pages_fetched += 1;
            stats.records_seen += records.len() as u64;
            if stats.pages_fetched % PROGRESS_EVERY_PAGES == 0 {
                info!(
                    pages = stats.pages_fetched,
                    records = stats.records_seen,
                    batches = stats.batches_dispatched,
                    "Progress"
                );
            }

            for task in buffer.push(records) {
                if let Err(failure) = dispatcher.submit(task).await {
                    refused = Some(failure);
                    break 'fetch;
                }
                stats.batches_dispatched += 1;
            }
        }
        stats.consecutive_errors = driver.consecutive_failures();

        if refused.is_none() {
            if let Some(task) = buffer.finish() {
                match dispatcher.submit(task).await {
                    Ok(()) => stats.batches_dispatched += 1,
                    Err(failure) => refused = Some(failure),
                }
            }
        }

        let drained = dispatcher.drain().await;
        let elapsed = started.elapsed();

        let summary = match (drained, refused) {
            (Err(e), _) => return Err(fail(e, &stats, elapsed)),
            (Ok(_), Some(failure)) => return Err(fail(failure.into(), &stats, elapsed)),
            (Ok(summary), None) => summary,
        };

        let status = match driver.abort_reason() {
            Some(reason) if reason.fails_run() => {
                return Err(fail(IngestError::fetch(reason.to_string()), &stats, elapsed));
            },
            Some(reason) => RunStatus::Incomplete {
                reason: reason.to_string(),
                last_cursor: driver.last_cursor().map(str::to_string),
            },
            None => RunStatus::Complete,
        };

        let report = RunReport {
            run_id,
            stats,
            records_uploaded: summary.records_uploaded,
            status,
            elapsed,
        };
        report.log_summary();
        Ok(report)
    }
}

fn fail(err: IngestError, stats: &PipelineStats, elapsed: Duration) -> IngestError {
    error!(
        error = %err,
        pages = stats.pages_fetched,
        records = stats.records_seen,
        batches = stats.batches_dispatched,
        consecutive_errors = stats.consecutive_errors,
        elapsed_secs = elapsed.as_secs_f64(),
        "Ingestion failed"
    );
    err
}

/// Authenticate against the source and run the full pipeline into `sink`
pub async fn run_ingestion(
    source: &SourceConfig,
    pipeline: &PipelineConfig,
    sink: Arc<dyn Sink>,
) -> Result<RunReport> {
    let client = Client::builder()
        .timeout(source.request_timeout())
        .user_agent(concat!("loyalty-ingest/", env!("CARGO_PKG_VERSION")))
        .build()?;

    let token = acquire_token(&client, source).await?;

    let endpoint = CustomersEndpoint::new(&source.base_url, &source.store_id, source.page_size)
        .map_err(|e| ConfigError::invalid("YOTPO_BASE_URL", &source.base_url, e.to_string()))?;
    let limiter = Arc::new(RateLimiter::new(pipeline.requests_per_second));
    let fetcher = PageFetcher::new(
        HttpTransport::with_client(client, token),
        limiter,
        endpoint,
        pipeline.retry_policy(),
    );

    Pipeline::new(fetcher, sink, pipeline.clone()).run().await
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::source::FetchOutcome;
    use crate::test_support::{records, RecordingSink, ScriptedSource};
    use async_trait::async_trait;
    use loyalty_common::{BatchKind, Page};

    /// Serves `total` records in pages of `page_size`
    struct GeneratedSource {
        total: u64,
        page_size: u64,
    }

    #[async_trait]
    impl PageSource for GeneratedSource {
        async fn fetch(&self, cursor: Option<&str>) -> FetchOutcome {
            let start: u64 = cursor.map(|c| c.parse().unwrap()).unwrap_or(0);
            let end = (start + self.page_size).min(self.total);
            let next = (end < self.total).then(|| end.to_string());
            FetchOutcome::Success(Page::new(records(start, end - start), next))
        }
    }

    fn config(batch_size: usize) -> PipelineConfig {
        PipelineConfig {
            batch_size,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_end_to_end_batching() {
        let source = GeneratedSource {
            total: 250_001,
            page_size: 100,
        };
        let sink = Arc::new(RecordingSink::new());

        let report = Pipeline::new(source, sink.clone(), config(100_000))
            .run()
            .await
            .unwrap();

        assert!(report.is_complete());
        assert_eq!(report.stats.pages_fetched, 2501);
        assert_eq!(report.stats.records_seen, 250_001);
        assert_eq!(report.stats.batches_dispatched, 3);
        assert_eq!(report.records_uploaded, 250_001);

        let mut received = sink.received();
        received.sort_by_key(|t| t.sequence);
        let sizes: Vec<usize> = received.iter().map(|t| t.len()).collect();
        assert_eq!(sizes, vec![100_000, 100_000, 50_001]);
        assert_eq!(received[2].batch.kind(), BatchKind::Final);

        let ids_in_order = received
            .iter()
            .flat_map(|t| t.batch.records().iter())
            .map(|r| r["id"].as_u64().unwrap())
            .eq(0..250_001);
        assert!(ids_in_order);
    }

    #[tokio::test]
    async fn test_incomplete_run_keeps_fetched_records() {
        let source = ScriptedSource::new(vec![
            FetchOutcome::Success(Page::new(records(0, 10), Some("C1".into()))),
            FetchOutcome::RetryableFailure("HTTP 503".into()),
            FetchOutcome::RetryableFailure("HTTP 503".into()),
            FetchOutcome::RetryableFailure("HTTP 503".into()),
        ]);
        let sink = Arc::new(RecordingSink::new());

        let report = Pipeline::new(source, sink.clone(), config(4)).run().await.unwrap();

        assert_eq!(report.records_uploaded, 10);
        assert_eq!(report.stats.batches_dispatched, 3);
        assert_eq!(report.stats.consecutive_errors, 3);
        match report.status {
            RunStatus::Incomplete { last_cursor, .. } => {
                assert_eq!(last_cursor.as_deref(), Some("C1"))
            },
            RunStatus::Complete => panic!("expected an incomplete run"),
        }
    }

    #[tokio::test]
    async fn test_no_results_is_a_complete_empty_run() {
        let source = ScriptedSource::new(vec![FetchOutcome::Success(Page::empty())]);
        let sink = Arc::new(RecordingSink::new());

        let report = Pipeline::new(source, sink.clone(), config(10)).run().await.unwrap();

        assert!(report.is_complete());
        assert_eq!(report.stats.batches_dispatched, 0);
        assert!(sink.sequences().is_empty());
    }

    #[tokio::test]
    async fn test_fatal_first_page_fails_run() {
        let source = ScriptedSource::new(vec![FetchOutcome::FatalFailure("bad request".into())]);
        let sink = Arc::new(RecordingSink::new());

        let err = Pipeline::new(source, sink, config(10)).run().await.unwrap_err();
        assert!(matches!(err, IngestError::Fetch(_)));
    }

    #[tokio::test]
    async fn test_upload_failure_fails_completed_pagination() {
        let source = ScriptedSource::new(vec![
            FetchOutcome::Success(Page::new(records(0, 5), Some("C1".into()))),
            FetchOutcome::Success(Page::new(records(5, 5), None)),
        ]);
        let sink = Arc::new(RecordingSink::new().failing_on(2));

        let err = Pipeline::new(source, sink, config(5)).run().await.unwrap_err();
        match err {
            IngestError::Upload { sequence, .. } => assert_eq!(sequence, 2),
            other => panic!("unexpected {:?}", other),
        }
    }
}
