//! Logging configuration and initialization
//!
//! All binaries in the workspace log through `tracing`. This module turns a
//! [`LogConfig`] into an installed subscriber:
//!
//! - console output, a daily-rolling log file, or both
//! - human-readable text or JSON lines
//! - a base level plus extra `EnvFilter` directives (`reqwest=warn,hyper=info`)
//!
//! Use structured fields rather than formatted strings where a value is worth
//! querying later:
//!
//! ```rust,ignore
//! info!(page = page_number, records = page.len(), "Fetched page");
//! warn!(attempt, status = %status, "Unexpected status, retrying");
//! ```
//!
//! # Example
//!
//! ```no_run
//! use loyalty_common::logging::{init_logging, LogConfig};
//!
//! fn main() -> anyhow::Result<()> {
//!     let config = LogConfig::from_env()?;
//!     let _guard = init_logging(&config)?;
//!     tracing::info!("started");
//!     Ok(())
//! }
//! ```

use crate::env::EnvReader;
use crate::error::{ConfigError, ConfigResult};
use anyhow::{Context, Result};
use std::path::PathBuf;
use std::str::FromStr;
use tracing::Level;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{
    fmt::{self, format::FmtSpan, MakeWriter},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter, Layer, Registry,
};

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

/// Where log lines are written
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogOutput {
    #[default]
    Console,
    File,
    Both,
}

impl LogOutput {
    fn writes_console(self) -> bool {
        matches!(self, LogOutput::Console | LogOutput::Both)
    }

    fn writes_file(self) -> bool {
        matches!(self, LogOutput::File | LogOutput::Both)
    }
}

impl FromStr for LogOutput {
    type Err = ConfigError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "console" | "stdout" => Ok(LogOutput::Console),
            "file" => Ok(LogOutput::File),
            "both" | "all" => Ok(LogOutput::Both),
            _ => Err(ConfigError::invalid("LOG_OUTPUT", s, "expected console, file or both")),
        }
    }
}

/// Line format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "text" | "pretty" => Ok(LogFormat::Text),
            "json" => Ok(LogFormat::Json),
            _ => Err(ConfigError::invalid("LOG_FORMAT", s, "expected text or json")),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Minimum level for the crate's own events
    pub level: Level,

    pub output: LogOutput,

    pub format: LogFormat,

    /// Directory for rolling log files (only used when output includes file)
    pub log_dir: PathBuf,

    /// File name prefix, e.g. "loyalty-ingest" -> "loyalty-ingest.log.2026-01-18"
    pub log_file_prefix: String,

    /// Extra filter directives, comma separated
    pub filter_directives: Option<String>,

    pub include_location: bool,

    pub include_thread_ids: bool,

    pub include_targets: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: Level::INFO,
            output: LogOutput::Console,
            format: LogFormat::Text,
            log_dir: PathBuf::from("./logs"),
            log_file_prefix: "loyalty-sync".to_string(),
            filter_directives: None,
            include_location: false,
            include_thread_ids: false,
            include_targets: true,
        }
    }
}

impl LogConfig {
    /// Load from the process environment
    ///
    /// Environment variables:
    /// - `LOG_LEVEL`: trace, debug, info, warn, error
    /// - `LOG_OUTPUT`: console, file, both
    /// - `LOG_FORMAT`: text, json
    /// - `LOG_DIR`, `LOG_FILE_PREFIX`, `LOG_FILTER`
    /// - `LOG_INCLUDE_LOCATION`, `LOG_INCLUDE_THREAD_IDS`, `LOG_INCLUDE_TARGETS`
    pub fn from_env() -> ConfigResult<Self> {
        Self::from_reader(&EnvReader::process())
    }

    /// Load from an arbitrary reader, starting from the defaults
    pub fn from_reader(env: &EnvReader<'_>) -> ConfigResult<Self> {
        Self::default().merge_reader(env)
    }

    /// Override fields that are set in `env`, keeping the rest
    pub fn merge_reader(mut self, env: &EnvReader<'_>) -> ConfigResult<Self> {
        if let Some(raw) = env.get("LOG_LEVEL") {
            self.level = raw
                .parse()
                .map_err(|_| ConfigError::invalid("LOG_LEVEL", &raw, "unknown level"))?;
        }
        if let Some(output) = env.parse_opt("LOG_OUTPUT")? {
            self.output = output;
        }
        if let Some(format) = env.parse_opt("LOG_FORMAT")? {
            self.format = format;
        }
        if let Some(dir) = env.get("LOG_DIR") {
            self.log_dir = PathBuf::from(dir);
        }
        if let Some(prefix) = env.get("LOG_FILE_PREFIX") {
            self.log_file_prefix = prefix;
        }
        if let Some(filter) = env.get("LOG_FILTER") {
            self.filter_directives = Some(filter);
        }
        self.include_location = env.bool_or("LOG_INCLUDE_LOCATION", self.include_location)?;
        self.include_thread_ids = env.bool_or("LOG_INCLUDE_THREAD_IDS", self.include_thread_ids)?;
        self.include_targets = env.bool_or("LOG_INCLUDE_TARGETS", self.include_targets)?;
        Ok(self)
    }

    pub fn builder() -> LogConfigBuilder {
        LogConfigBuilder::default()
    }
}

#[derive(Default)]
pub struct LogConfigBuilder {
    config: LogConfig,
}

impl LogConfigBuilder {
    pub fn level(mut self, level: Level) -> Self {
        self.config.level = level;
        self
    }

    pub fn output(mut self, output: LogOutput) -> Self {
        self.config.output = output;
        self
    }

    pub fn format(mut self, format: LogFormat) -> Self {
        self.config.format = format;
        self
    }

    pub fn log_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.log_dir = dir.into();
        self
    }

    pub fn log_file_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.config.log_file_prefix = prefix.into();
        self
    }

    pub fn filter_directives(mut self, filter: impl Into<String>) -> Self {
        self.config.filter_directives = Some(filter.into());
        self
    }

    pub fn build(self) -> LogConfig {
        self.config
    }
}

/// Keeps the background file writer alive; drop it only at shutdown so
/// buffered lines are flushed.
#[must_use = "dropping the guard stops the log file writer"]
pub struct LogGuard {
    _file: Option<WorkerGuard>,
}

/// Install the global subscriber. Call once, at startup.
pub fn init_logging(config: &LogConfig) -> Result<LogGuard> {
    let filter = build_filter(config)?;
    let mut layers: Vec<BoxedLayer> = Vec::new();

    if config.output.writes_console() {
        layers.push(fmt_layer(config, std::io::stdout, true));
    }

    let file_guard = if config.output.writes_file() {
        std::fs::create_dir_all(&config.log_dir).with_context(|| {
            format!("Failed to create log directory {}", config.log_dir.display())
        })?;
        let appender = tracing_appender::rolling::daily(
            &config.log_dir,
            format!("{}.log", config.log_file_prefix),
        );
        let (writer, guard) = tracing_appender::non_blocking(appender);
        layers.push(fmt_layer(config, writer, false));
        Some(guard)
    } else {
        None
    };

    tracing_subscriber::registry()
        .with(layers)
        .with(filter)
        .try_init()
        .context("A global tracing subscriber is already installed")?;

    Ok(LogGuard { _file: file_guard })
}

fn build_filter(config: &LogConfig) -> Result<EnvFilter> {
    let mut filter = EnvFilter::builder()
        .with_default_directive(config.level.into())
        .from_env_lossy();

    if let Some(ref directives) = config.filter_directives {
        for directive in directives.split(',').map(str::trim).filter(|d| !d.is_empty()) {
            filter = filter.add_directive(
                directive
                    .parse()
                    .with_context(|| format!("Failed to parse filter directive '{directive}'"))?,
            );
        }
    }

    Ok(filter)
}

fn fmt_layer<W>(config: &LogConfig, writer: W, ansi: bool) -> BoxedLayer
where
    W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
{
    let layer = fmt::layer()
        .with_writer(writer)
        .with_ansi(ansi)
        .with_target(config.include_targets)
        .with_thread_ids(config.include_thread_ids)
        .with_file(config.include_location)
        .with_line_number(config.include_location)
        .with_span_events(FmtSpan::CLOSE);

    match config.format {
        LogFormat::Text => layer.boxed(),
        LogFormat::Json => layer.json().boxed(),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_output_and_format_from_str() {
        assert_eq!("console".parse::<LogOutput>().unwrap(), LogOutput::Console);
        assert_eq!("FILE".parse::<LogOutput>().unwrap(), LogOutput::File);
        assert_eq!("all".parse::<LogOutput>().unwrap(), LogOutput::Both);
        assert!("syslog".parse::<LogOutput>().is_err());

        assert_eq!("json".parse::<LogFormat>().unwrap(), LogFormat::Json);
        assert_eq!("pretty".parse::<LogFormat>().unwrap(), LogFormat::Text);
        assert!("xml".parse::<LogFormat>().is_err());
    }

    #[test]
    fn test_from_reader_overrides_defaults() {
        let env = EnvReader::from_pairs([
            ("LOG_LEVEL", "debug"),
            ("LOG_OUTPUT", "both"),
            ("LOG_FORMAT", "json"),
            ("LOG_FILTER", "reqwest=warn"),
            ("LOG_INCLUDE_TARGETS", "false"),
        ]);
        let config = LogConfig::from_reader(&env).unwrap();

        assert_eq!(config.level, Level::DEBUG);
        assert_eq!(config.output, LogOutput::Both);
        assert_eq!(config.format, LogFormat::Json);
        assert_eq!(config.filter_directives.as_deref(), Some("reqwest=warn"));
        assert!(!config.include_targets);
        assert_eq!(config.log_file_prefix, "loyalty-sync");
    }

    #[test]
    fn test_invalid_level_names_variable() {
        let env = EnvReader::from_pairs([("LOG_LEVEL", "loud")]);
        let err = LogConfig::from_reader(&env).unwrap_err();
        assert_eq!(err.setting(), "LOG_LEVEL");
    }

    #[test]
    fn test_merge_keeps_builder_values() {
        let base = LogConfig::builder()
            .level(Level::DEBUG)
            .log_file_prefix("loyalty-ingest")
            .build();
        let merged = base.merge_reader(&EnvReader::from_pairs([("LOG_FORMAT", "json")])).unwrap();

        assert_eq!(merged.level, Level::DEBUG);
        assert_eq!(merged.log_file_prefix, "loyalty-ingest");
        assert_eq!(merged.format, LogFormat::Json);
    }

    #[test]
    fn test_init_file_logging_creates_directory() {
        let dir = tempfile::tempdir().unwrap();
        let log_dir = dir.path().join("nested/logs");
        let config = LogConfig::builder()
            .output(LogOutput::File)
            .log_dir(&log_dir)
            .filter_directives("hyper=warn, reqwest=info")
            .build();

        let guard = init_logging(&config).unwrap();
        tracing::info!("written to file");
        drop(guard);

        assert!(log_dir.is_dir());
    }
}
