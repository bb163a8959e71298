//! Loyalty Ingest - customer profile ingestion tool

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use loyalty_common::env::EnvReader;
use loyalty_common::logging::{init_logging, LogConfig};
use loyalty_ingest::config::{IngestConfig, PipelineConfig, SourceConfig};
use loyalty_ingest::pipeline::{run_ingestion, RunReport};
use loyalty_ingest::sink::{JsonLinesSink, Sink, WarehouseSink};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info, warn, Level};

/// Exit code for a run whose pagination stopped early
const EXIT_INCOMPLETE: u8 = 2;

#[derive(Parser, Debug)]
#[command(name = "loyalty-ingest")]
#[command(author, version, about = "Loyalty profile ingestion tool")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Fetch every customer profile and upload it
    Run(RunArgs),

    /// Validate configuration and print the effective values
    CheckConfig,
}

#[derive(Args, Debug)]
struct RunArgs {
    /// Write batches as JSON lines instead of uploading
    #[arg(long)]
    dry_run: bool,

    /// Output directory for --dry-run
    #[arg(long, default_value = "./data/batches")]
    output_dir: PathBuf,

    /// Exit with code 2 when pagination stops early
    #[arg(long)]
    fail_on_incomplete: bool,

    /// Records per upload batch
    #[arg(long, env = "INGEST_BATCH_SIZE")]
    batch_size: Option<usize>,

    /// Parallel upload workers
    #[arg(long, env = "INGEST_UPLOAD_WORKERS")]
    upload_workers: Option<usize>,

    /// Outbound request ceiling
    #[arg(long, env = "INGEST_REQUESTS_PER_SECOND")]
    requests_per_second: Option<f64>,

    /// Submitted-but-unfinished uploads before fetching pauses
    #[arg(long, env = "INGEST_MAX_IN_FLIGHT")]
    max_in_flight: Option<usize>,
}

impl RunArgs {
    fn apply(&self, mut pipeline: PipelineConfig) -> Result<PipelineConfig> {
        if let Some(batch_size) = self.batch_size {
            pipeline.batch_size = batch_size;
        }
        if let Some(workers) = self.upload_workers {
            pipeline.upload_workers = workers;
        }
        if let Some(rps) = self.requests_per_second {
            pipeline.requests_per_second = rps;
        }
        if let Some(max_in_flight) = self.max_in_flight {
            pipeline.max_in_flight = max_in_flight;
        }
        pipeline.validate()?;
        Ok(pipeline)
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    // A missing .env file is fine; the environment may already be set
    let dotenv = dotenvy::dotenv();

    let cli = Cli::parse();

    let _guard = match init(&cli) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("Failed to initialize logging: {:#}", e);
            return ExitCode::FAILURE;
        },
    };
    if let Ok(path) = dotenv {
        info!(path = %path.display(), "Loaded environment file");
    }

    match execute(cli.command).await {
        Ok(code) => code,
        Err(e) => {
            error!(error = %format!("{:#}", e), "Ingestion failed");
            ExitCode::FAILURE
        },
    }
}

fn init(cli: &Cli) -> Result<loyalty_common::logging::LogGuard> {
    let level = if cli.verbose { Level::DEBUG } else { Level::INFO };

    // Environment variables take precedence over the flag
    let log_config = LogConfig::builder()
        .level(level)
        .log_file_prefix("loyalty-ingest")
        .build()
        .merge_reader(&EnvReader::process())?;

    init_logging(&log_config)
}

async fn execute(command: Command) -> Result<ExitCode> {
    match command {
        Command::Run(args) => run(args).await,
        Command::CheckConfig => check_config(),
    }
}

async fn run(args: RunArgs) -> Result<ExitCode> {
    let env = EnvReader::process();

    let (source, pipeline, sink): (SourceConfig, PipelineConfig, Arc<dyn Sink>) = if args.dry_run
    {
        let source = SourceConfig::from_reader(&env).context("Invalid source configuration")?;
        let pipeline = args.apply(PipelineConfig::from_reader(&env)?)?;
        let sink = JsonLinesSink::new(&args.output_dir).with_context(|| {
            format!("Failed to prepare output directory {}", args.output_dir.display())
        })?;
        info!(dir = %args.output_dir.display(), "Dry run: writing batches locally");
        let sink: Arc<dyn Sink> = Arc::new(sink);
        (source, pipeline, sink)
    } else {
        let config = IngestConfig::from_reader(&env).context("Invalid configuration")?;
        let pipeline = args.apply(config.pipeline)?;
        let sink = WarehouseSink::new(&config.sink).context("Failed to create warehouse client")?;
        let sink: Arc<dyn Sink> = Arc::new(sink);
        (config.source, pipeline, sink)
    };

    let report = run_ingestion(&source, &pipeline, sink).await?;
    Ok(exit_code(&report, args.fail_on_incomplete))
}

fn exit_code(report: &RunReport, fail_on_incomplete: bool) -> ExitCode {
    if report.is_complete() {
        info!(
            pages = report.stats.pages_fetched,
            records = report.stats.records_seen,
            batches = report.stats.batches_dispatched,
            elapsed_secs = report.elapsed.as_secs_f64(),
            "Ingestion complete"
        );
        ExitCode::SUCCESS
    } else if fail_on_incomplete {
        warn!("Ingestion incomplete");
        ExitCode::from(EXIT_INCOMPLETE)
    } else {
        warn!("Ingestion incomplete; exiting successfully without --fail-on-incomplete");
        ExitCode::SUCCESS
    }
}

fn check_config() -> Result<ExitCode> {
    let config = IngestConfig::from_env().context("Invalid configuration")?;
    info!(source = ?config.source, "Source configuration");
    info!(sink = ?config.sink, "Sink configuration");
    info!(pipeline = ?config.pipeline, "Pipeline configuration");
    info!("Configuration OK");
    Ok(ExitCode::SUCCESS)
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_run_overrides_are_validated() {
        let cli = Cli::try_parse_from(["loyalty-ingest", "run", "--batch-size", "0"]).unwrap();
        let Command::Run(args) = cli.command else {
            panic!("expected run");
        };
        assert!(args.apply(PipelineConfig::default()).is_err());
    }

    #[test]
    fn test_dry_run_flags() {
        let cli = Cli::try_parse_from([
            "loyalty-ingest",
            "-v",
            "run",
            "--dry-run",
            "--output-dir",
            "/tmp/out",
            "--fail-on-incomplete",
            "--upload-workers",
            "4",
        ])
        .unwrap();

        assert!(cli.verbose);
        let Command::Run(args) = cli.command else {
            panic!("expected run");
        };
        assert!(args.dry_run && args.fail_on_incomplete);
        assert_eq!(args.output_dir, PathBuf::from("/tmp/out"));
        assert_eq!(args.apply(PipelineConfig::default()).unwrap().upload_workers, 4);
    }
}
