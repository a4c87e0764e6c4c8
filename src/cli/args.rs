//! Command-line arguments

use clap::{Parser, Subcommand};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use super::CliError;
use crate::harvester::config::{
    HarvestConfig, HttpConfig, PipelineConfig, DEFAULT_BATCH_SIZE, DEFAULT_CONCURRENCY,
};
use crate::TaskType;

/// Upper bound for `--concurrency`
pub const MAX_CONCURRENCY: usize = 64;

fn parse_concurrency(s: &str) -> Result<usize, String> {
    let value: usize = s
        .parse()
        .map_err(|_| format!("'{s}' is not a valid number"))?;

    if value == 0 {
        return Err("concurrency must be at least 1".to_string());
    }
    if value > MAX_CONCURRENCY {
        return Err(format!(
            "concurrency {value} exceeds maximum of {MAX_CONCURRENCY}"
        ));
    }
    Ok(value)
}

fn parse_batch_size(s: &str) -> Result<usize, String> {
    let value: usize = s
        .parse()
        .map_err(|_| format!("'{s}' is not a valid number"))?;
    if value == 0 {
        return Err("batch size must be at least 1".to_string());
    }
    Ok(value)
}

fn parse_positive_f64(s: &str) -> Result<f64, String> {
    let value: f64 = s
        .parse()
        .map_err(|_| format!("'{s}' is not a valid number"))?;
    if !value.is_finite() || value <= 0.0 {
        return Err(format!("{value} must be a positive number"));
    }
    Ok(value)
}

fn parse_seconds(s: &str) -> Result<f64, String> {
    let value: f64 = s
        .parse()
        .map_err(|_| format!("'{s}' is not a valid number of seconds"))?;
    if !value.is_finite() || value < 0.0 {
        return Err(format!("{value} must not be negative"));
    }
    Ok(value)
}

/// Catalog harvester CLI
#[derive(Parser, Debug)]
#[command(name = "catalog-harvester")]
#[command(about = "Harvest store catalog items and review time series", long_about = None)]
#[command(version)]
pub struct Cli {
    /// Command to execute
    #[command(subcommand)]
    pub command: Commands,

    /// Directory holding the checkpoint, failure ledger and default database
    #[arg(long, global = true, env = "HARVEST_DATA_DIR", default_value = "./data")]
    pub data_dir: PathBuf,

    /// SQLite database path (default: <data-dir>/harvest.db)
    #[arg(long, global = true, env = "HARVEST_DB")]
    pub db: Option<PathBuf>,

    /// Store base URL, for mirrors and testing
    #[arg(long, global = true, env = "HARVEST_BASE_URL")]
    pub base_url: Option<String>,

    /// Concurrent item fetches
    #[arg(long, global = true, default_value_t = DEFAULT_CONCURRENCY, value_parser = parse_concurrency)]
    pub concurrency: usize,

    /// Successful fetches per storage write
    #[arg(long, global = true, default_value_t = DEFAULT_BATCH_SIZE, value_parser = parse_batch_size)]
    pub batch_size: usize,

    /// Requests per second allowed by the rate limiter
    #[arg(long, global = true, default_value = "5", value_parser = parse_positive_f64)]
    pub rate: f64,

    /// Rate limiter burst capacity
    #[arg(long, global = true, default_value = "10", value_parser = parse_positive_f64)]
    pub burst: f64,

    /// Request timeout in seconds
    #[arg(long, global = true, default_value_t = 30)]
    pub timeout: u64,

    /// Retries after the first attempt for transient failures
    #[arg(long, global = true, default_value_t = 3, value_parser = clap::value_parser!(u32).range(0..=20))]
    pub max_retries: u32,

    /// Minimum politeness delay after a detail fetch (seconds)
    #[arg(long, global = true, default_value = "1.0", value_parser = parse_seconds)]
    pub min_delay: f64,

    /// Maximum politeness delay after a detail fetch (seconds)
    #[arg(long, global = true, default_value = "3.0", value_parser = parse_seconds)]
    pub max_delay: f64,

    /// Minimum seconds between checkpoint writes for single updates
    #[arg(long, global = true, default_value_t = 5)]
    pub save_interval: u64,

    /// UTC offset (hours) used to date review rollups
    #[arg(long, global = true, default_value_t = 8, allow_hyphen_values = true)]
    pub rollup_utc_offset: i32,

    /// Serve Prometheus metrics on this address (e.g. 127.0.0.1:9090)
    #[arg(long, global = true, env = "HARVEST_METRICS_ADDR")]
    pub metrics_addr: Option<SocketAddr>,
}

/// CLI commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Scan the catalog and store item details
    Catalog(CatalogArgs),

    /// Fetch review time series for a list of ids
    Timeseries(TimeseriesArgs),

    /// Catalog scan followed by a time-series pass over every stored item
    All(AllArgs),

    /// Retry ids the checkpoint has marked failed
    RetryFailed(RetryFailedArgs),

    /// Print the failure ledger
    Failures(FailuresArgs),

    /// Reset checkpoint state (and optionally the failure ledger)
    Clean(CleanArgs),
}

/// Arguments for `catalog`
#[derive(Parser, Debug)]
pub struct CatalogArgs {
    /// Scan at most this many pages
    #[arg(long)]
    pub pages: Option<u32>,

    /// Also fetch ids previously marked failed
    #[arg(long, default_value_t = false)]
    pub force_retry: bool,

    /// Clear catalog checkpoint state first
    #[arg(long, default_value_t = false)]
    pub fresh: bool,
}

/// Arguments for `timeseries`
#[derive(Parser, Debug)]
pub struct TimeseriesArgs {
    /// File with one id per line (default: every item in storage)
    #[arg(long, short)]
    pub input: Option<PathBuf>,

    /// Clear time-series checkpoint state first
    #[arg(long, default_value_t = false)]
    pub fresh: bool,
}

/// Arguments for `all`
#[derive(Parser, Debug)]
pub struct AllArgs {
    /// Scan at most this many catalog pages
    #[arg(long)]
    pub pages: Option<u32>,
}

/// Arguments for `retry-failed`
#[derive(Parser, Debug)]
pub struct RetryFailedArgs {
    /// Namespace to retry: catalog or timeseries
    #[arg(long)]
    pub task: TaskType,
}

/// Arguments for `failures`
#[derive(Parser, Debug)]
pub struct FailuresArgs {
    /// Only show this namespace
    #[arg(long)]
    pub task: Option<TaskType>,
}

/// Arguments for `clean`
#[derive(Parser, Debug)]
pub struct CleanArgs {
    /// Only reset this namespace (default: everything)
    #[arg(long)]
    pub task: Option<TaskType>,

    /// Also delete the failure ledger
    #[arg(long, default_value_t = false)]
    pub failures: bool,
}

impl Cli {
    /// Checkpoint file path
    pub fn checkpoint_path(&self) -> PathBuf {
        self.data_dir.join(".checkpoint.json")
    }

    /// Failure ledger path
    pub fn failures_path(&self) -> PathBuf {
        self.data_dir.join("failures.json")
    }

    /// Database path
    pub fn db_path(&self) -> PathBuf {
        self.db
            .clone()
            .unwrap_or_else(|| self.data_dir.join("harvest.db"))
    }

    /// Build the injected configuration from flags
    pub fn harvest_config(&self) -> Result<HarvestConfig, CliError> {
        if self.min_delay > self.max_delay {
            return Err(CliError::InvalidArgument(format!(
                "--min-delay {} exceeds --max-delay {}",
                self.min_delay, self.max_delay
            )));
        }
        if !(-23..=23).contains(&self.rollup_utc_offset) {
            return Err(CliError::InvalidArgument(format!(
                "--rollup-utc-offset {} is outside -23..=23",
                self.rollup_utc_offset
            )));
        }

        let http = HttpConfig {
            timeout: Duration::from_secs(self.timeout.max(1)),
            max_retries: self.max_retries,
            min_delay: Duration::from_secs_f64(self.min_delay),
            max_delay: Duration::from_secs_f64(self.max_delay),
            ..HttpConfig::default()
        };
        let pipeline = PipelineConfig::new(self.concurrency, self.batch_size)
            .with_save_interval(Duration::from_secs(self.save_interval));

        Ok(HarvestConfig {
            http,
            pipeline,
            rate: self.rate,
            burst: self.burst,
            rollup_utc_offset_hours: self.rollup_utc_offset,
        })
    }
}
