//! Ingestion configuration
//!
//! Built once at startup from environment variables (the binary seeds them
//! from `.env` first) and passed by reference into each component. Every
//! section validates on construction, so a bad value stops the process before
//! the first request is sent.

use crate::source::RetryPolicy;
use loyalty_common::env::EnvReader;
use loyalty_common::{ConfigError, ConfigResult};
use reqwest::Url;
use std::fmt;
use std::time::Duration;

pub const DEFAULT_SOURCE_BASE_URL: &str = "https://api.yotpo.com/core/v3";
pub const DEFAULT_SINK_ENDPOINT: &str = "https://api.treasuredata.com";

/// Stay under the source's 5 requests/second ceiling with room for clock skew
pub const DEFAULT_REQUESTS_PER_SECOND: f64 = 4.5;
pub const DEFAULT_PAGE_SIZE: u32 = 100;
pub const DEFAULT_BATCH_SIZE: usize = 100_000;
pub const DEFAULT_UPLOAD_WORKERS: usize = 2;
pub const DEFAULT_MAX_IN_FLIGHT: usize = 3;
pub const DEFAULT_MAX_RETRIES: u32 = 3;
pub const DEFAULT_RETRY_DELAY_SECS: u64 = 2;
pub const DEFAULT_MAX_RATE_LIMIT_WAITS: u32 = 20;
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_UPLOAD_TIMEOUT_SECS: u64 = 300;
pub const DEFAULT_MAX_CONSECUTIVE_ERRORS: u32 = 3;

/// Source API connection settings
#[derive(Clone)]
pub struct SourceConfig {
    pub base_url: String,
    pub store_id: String,
    pub client_secret: String,
    /// `limit` sent with the first page request
    pub page_size: u32,
    pub request_timeout_secs: u64,
}

impl SourceConfig {
    /// Environment variables: `YOTPO_CLIENT_SECRET`, `YOTPO_STORE_ID` (required),
    /// `YOTPO_BASE_URL`, `INGEST_PAGE_SIZE`, `INGEST_REQUEST_TIMEOUT_SECS`
    pub fn from_reader(env: &EnvReader<'_>) -> ConfigResult<Self> {
        let config = Self {
            base_url: env.string_or("YOTPO_BASE_URL", DEFAULT_SOURCE_BASE_URL),
            store_id: env.required("YOTPO_STORE_ID")?,
            client_secret: env.required("YOTPO_CLIENT_SECRET")?,
            page_size: env.parse_or("INGEST_PAGE_SIZE", DEFAULT_PAGE_SIZE)?,
            request_timeout_secs: env
                .parse_or("INGEST_REQUEST_TIMEOUT_SECS", DEFAULT_REQUEST_TIMEOUT_SECS)?,
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> ConfigResult<()> {
        validate_url("YOTPO_BASE_URL", &self.base_url)?;
        if self.store_id.is_empty() {
            return Err(ConfigError::missing("YOTPO_STORE_ID"));
        }
        if self.client_secret.is_empty() {
            return Err(ConfigError::missing("YOTPO_CLIENT_SECRET"));
        }
        if self.page_size == 0 {
            return Err(ConfigError::invalid(
                "INGEST_PAGE_SIZE",
                self.page_size,
                "must be greater than 0",
            ));
        }
        if self.request_timeout_secs == 0 {
            return Err(ConfigError::invalid(
                "INGEST_REQUEST_TIMEOUT_SECS",
                self.request_timeout_secs,
                "must be greater than 0",
            ));
        }
        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

impl fmt::Debug for SourceConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SourceConfig")
            .field("base_url", &self.base_url)
            .field("store_id", &self.store_id)
            .field("client_secret", &"<redacted>")
            .field("page_size", &self.page_size)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .finish()
    }
}

/// Warehouse sink settings
#[derive(Clone)]
pub struct SinkConfig {
    pub endpoint: String,
    pub api_key: String,
    pub database: String,
    pub table: String,
    pub upload_timeout_secs: u64,
}

impl SinkConfig {
    /// Environment variables: `TD_API_KEY`, `TD_DATABASE`, `TD_TABLE` (required),
    /// `TD_ENDPOINT`, `INGEST_UPLOAD_TIMEOUT_SECS`
    pub fn from_reader(env: &EnvReader<'_>) -> ConfigResult<Self> {
        let config = Self {
            endpoint: env.string_or("TD_ENDPOINT", DEFAULT_SINK_ENDPOINT),
            api_key: env.required("TD_API_KEY")?,
            database: env.required("TD_DATABASE")?,
            table: env.required("TD_TABLE")?,
            upload_timeout_secs: env
                .parse_or("INGEST_UPLOAD_TIMEOUT_SECS", DEFAULT_UPLOAD_TIMEOUT_SECS)?,
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> ConfigResult<()> {
        validate_url("TD_ENDPOINT", &self.endpoint)?;
        if self.api_key.is_empty() {
            return Err(ConfigError::missing("TD_API_KEY"));
        }
        for (name, value) in [("TD_DATABASE", &self.database), ("TD_TABLE", &self.table)] {
            if value.is_empty() {
                return Err(ConfigError::missing(name));
            }
            if value.contains('/') {
                return Err(ConfigError::invalid(name, value, "must not contain '/'"));
            }
        }
        if self.upload_timeout_secs == 0 {
            return Err(ConfigError::invalid(
                "INGEST_UPLOAD_TIMEOUT_SECS",
                self.upload_timeout_secs,
                "must be greater than 0",
            ));
        }
        Ok(())
    }

    pub fn upload_timeout(&self) -> Duration {
        Duration::from_secs(self.upload_timeout_secs)
    }
}

impl fmt::Debug for SinkConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SinkConfig")
            .field("endpoint", &self.endpoint)
            .field("api_key", &"<redacted>")
            .field("database", &self.database)
            .field("table", &self.table)
            .field("upload_timeout_secs", &self.upload_timeout_secs)
            .finish()
    }
}

/// Throughput and failure-tolerance knobs for the pipeline
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineConfig {
    pub requests_per_second: f64,
    pub batch_size: usize,
    pub upload_workers: usize,
    /// Submitted-but-unfinished uploads allowed before the producer blocks
    pub max_in_flight: usize,
    /// Retries after the first attempt of a page fetch
    pub max_retries: u32,
    pub retry_delay_secs: u64,
    /// 429 waits per page, which do not count as retries
    pub max_rate_limit_waits: u32,
    pub max_consecutive_errors: u32,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            requests_per_second: DEFAULT_REQUESTS_PER_SECOND,
            batch_size: DEFAULT_BATCH_SIZE,
            upload_workers: DEFAULT_UPLOAD_WORKERS,
            max_in_flight: DEFAULT_MAX_IN_FLIGHT,
            max_retries: DEFAULT_MAX_RETRIES,
            retry_delay_secs: DEFAULT_RETRY_DELAY_SECS,
            max_rate_limit_waits: DEFAULT_MAX_RATE_LIMIT_WAITS,
            max_consecutive_errors: DEFAULT_MAX_CONSECUTIVE_ERRORS,
        }
    }
}

impl PipelineConfig {
    pub fn from_reader(env: &EnvReader<'_>) -> ConfigResult<Self> {
        let config = Self {
            requests_per_second: env
                .parse_or("INGEST_REQUESTS_PER_SECOND", DEFAULT_REQUESTS_PER_SECOND)?,
            batch_size: env.parse_or("INGEST_BATCH_SIZE", DEFAULT_BATCH_SIZE)?,
            upload_workers: env.parse_or("INGEST_UPLOAD_WORKERS", DEFAULT_UPLOAD_WORKERS)?,
            max_in_flight: env.parse_or("INGEST_MAX_IN_FLIGHT", DEFAULT_MAX_IN_FLIGHT)?,
            max_retries: env.parse_or("INGEST_MAX_RETRIES", DEFAULT_MAX_RETRIES)?,
            retry_delay_secs: env.parse_or("INGEST_RETRY_DELAY_SECS", DEFAULT_RETRY_DELAY_SECS)?,
            max_rate_limit_waits: env
                .parse_or("INGEST_MAX_RATE_LIMIT_WAITS", DEFAULT_MAX_RATE_LIMIT_WAITS)?,
            max_consecutive_errors: env
                .parse_or("INGEST_MAX_CONSECUTIVE_ERRORS", DEFAULT_MAX_CONSECUTIVE_ERRORS)?,
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> ConfigResult<()> {
        if !self.requests_per_second.is_finite() || self.requests_per_second <= 0.0 {
            return Err(ConfigError::invalid(
                "INGEST_REQUESTS_PER_SECOND",
                self.requests_per_second,
                "must be a positive number",
            ));
        }
        let positive = [
            ("INGEST_BATCH_SIZE", self.batch_size),
            ("INGEST_UPLOAD_WORKERS", self.upload_workers),
            ("INGEST_MAX_IN_FLIGHT", self.max_in_flight),
            ("INGEST_MAX_CONSECUTIVE_ERRORS", self.max_consecutive_errors as usize),
        ];
        for (name, value) in positive {
            if value == 0 {
                return Err(ConfigError::invalid(name, value, "must be greater than 0"));
            }
        }
        Ok(())
    }

    pub fn min_request_interval(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.requests_per_second)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_retries,
            retry_delay: Duration::from_secs(self.retry_delay_secs),
            max_rate_limit_waits: self.max_rate_limit_waits,
        }
    }
}

/// Complete configuration for a run against the warehouse
#[derive(Debug, Clone)]
pub struct IngestConfig {
    pub source: SourceConfig,
    pub sink: SinkConfig,
    pub pipeline: PipelineConfig,
}

impl IngestConfig {
    /// Load all sections from the process environment
    pub fn from_env() -> ConfigResult<Self> {
        Self::from_reader(&EnvReader::process())
    }

    /// Load from an arbitrary lookup, e.g. a map in tests
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String> + Send + Sync) -> ConfigResult<Self> {
        Self::from_reader(&EnvReader::from_fn(lookup))
    }

    pub fn from_reader(env: &EnvReader<'_>) -> ConfigResult<Self> {
        Ok(Self {
            source: SourceConfig::from_reader(env)?,
            sink: SinkConfig::from_reader(env)?,
            pipeline: PipelineConfig::from_reader(env)?,
        })
    }

    pub fn validate(&self) -> ConfigResult<()> {
        self.source.validate()?;
        self.sink.validate()?;
        self.pipeline.validate()
    }
}

fn validate_url(name: &str, value: &str) -> ConfigResult<()> {
    let url = Url::parse(value).map_err(|e| ConfigError::invalid(name, value, e.to_string()))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(ConfigError::invalid(name, value, "expected an http(s) URL"));
    }
    Ok(())
}
