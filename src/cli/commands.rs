//! Command execution
//!
//! Each command wires the store API, checkpoint, failure ledger and SQLite
//! storage together from the global flags, then hands off to a pipeline.

use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};

use super::args::{
    AllArgs, CatalogArgs, CleanArgs, Cli, Commands, FailuresArgs, RetryFailedArgs, TimeseriesArgs,
};
use super::CliError;
use crate::fetcher::http::FetchClient;
use crate::fetcher::store_api::{StoreApi, StoreEndpoints};
use crate::harvester::{
    CatalogPipeline, CatalogRunOptions, HarvestConfig, HarvestReport, ListFetcher, RateLimiter,
};
use crate::resume::{CheckpointStore, FailureLedger};
use crate::shutdown::SharedShutdown;
use crate::storage::{SqliteStorage, Storage};
use crate::{ItemId, TaskType};

/// Collaborators shared by one command
struct Harness {
    config: HarvestConfig,
    source: Arc<StoreApi>,
    checkpoint: Arc<CheckpointStore>,
    failures: Arc<FailureLedger>,
    storage: Arc<SqliteStorage>,
    shutdown: SharedShutdown,
}

impl Harness {
    async fn open(cli: &Cli, shutdown: SharedShutdown) -> Result<Self, CliError> {
        let config = cli.harvest_config()?;

        let limiter = Arc::new(RateLimiter::new(config.rate, config.burst));
        let client = FetchClient::new(config.http.clone(), limiter)?;
        let endpoints = match &cli.base_url {
            Some(base_url) => StoreEndpoints::with_base_url(base_url),
            None => StoreEndpoints::default(),
        };
        let source = Arc::new(StoreApi::new(
            client,
            endpoints,
            config.rollup_utc_offset_hours,
        ));

        let checkpoint = Arc::new(CheckpointStore::open(
            cli.checkpoint_path(),
            config.pipeline.save_interval,
        )?);
        let failures = Arc::new(FailureLedger::open(cli.failures_path())?);
        let storage = Arc::new(SqliteStorage::open(cli.db_path()).await?);

        Ok(Self {
            config,
            source,
            checkpoint,
            failures,
            storage,
            shutdown,
        })
    }

    fn catalog_pipeline(&self) -> CatalogPipeline {
        CatalogPipeline::new(
            self.source.clone(),
            self.checkpoint.clone(),
            self.failures.clone(),
            self.storage.clone(),
            self.config.pipeline.clone(),
            self.shutdown.clone(),
        )
    }

    fn list_fetcher(&self) -> ListFetcher {
        ListFetcher::new(
            self.source.clone(),
            self.checkpoint.clone(),
            self.failures.clone(),
            self.storage.clone(),
            self.config.pipeline.clone(),
            self.shutdown.clone(),
        )
    }
}

/// Run the parsed command to completion
pub async fn execute(cli: &Cli, shutdown: SharedShutdown) -> Result<(), CliError> {
    match &cli.command {
        Commands::Catalog(args) => run_catalog(cli, args, shutdown).await,
        Commands::Timeseries(args) => run_timeseries(cli, args, shutdown).await,
        Commands::All(args) => run_all(cli, args, shutdown).await,
        Commands::RetryFailed(args) => run_retry_failed(cli, args, shutdown).await,
        Commands::Failures(args) => show_failures(cli, args),
        Commands::Clean(args) => clean(cli, args),
    }
}

async fn run_catalog(
    cli: &Cli,
    args: &CatalogArgs,
    shutdown: SharedShutdown,
) -> Result<(), CliError> {
    let harness = Harness::open(cli, shutdown).await?;
    if args.fresh {
        harness.checkpoint.clear_namespace(TaskType::Catalog)?;
    }

    let mut options = CatalogRunOptions::default().with_force_retry(args.force_retry);
    if let Some(pages) = args.pages {
        options = options.with_page_limit(pages);
    }
    let report = harness.catalog_pipeline().run(options).await?;
    print_report(TaskType::Catalog, &report);
    Ok(())
}

async fn run_timeseries(
    cli: &Cli,
    args: &TimeseriesArgs,
    shutdown: SharedShutdown,
) -> Result<(), CliError> {
    let harness = Harness::open(cli, shutdown).await?;
    if args.fresh {
        harness.checkpoint.clear_namespace(TaskType::TimeSeries)?;
    }

    let ids = match &args.input {
        Some(path) => read_id_file(path)?,
        None => harness.storage.get_all_ids().await?,
    };
    if ids.is_empty() {
        warn!("No ids to fetch; run the catalog scan first or pass --input");
        return Ok(());
    }

    let report = harness.list_fetcher().run(&ids).await?;
    print_report(TaskType::TimeSeries, &report);
    Ok(())
}

async fn run_all(cli: &Cli, args: &AllArgs, shutdown: SharedShutdown) -> Result<(), CliError> {
    let harness = Harness::open(cli, shutdown).await?;

    let mut options = CatalogRunOptions::default();
    if let Some(pages) = args.pages {
        options = options.with_page_limit(pages);
    }
    let catalog = harness.catalog_pipeline().run(options).await?;
    print_report(TaskType::Catalog, &catalog);

    if catalog.cancelled {
        info!("Catalog scan was interrupted, skipping time-series pass");
        return Ok(());
    }

    let ids = harness.storage.get_all_ids().await?;
    let series = harness.list_fetcher().run(&ids).await?;
    print_report(TaskType::TimeSeries, &series);
    Ok(())
}

async fn run_retry_failed(
    cli: &Cli,
    args: &RetryFailedArgs,
    shutdown: SharedShutdown,
) -> Result<(), CliError> {
    let harness = Harness::open(cli, shutdown).await?;
    let report = match args.task {
        TaskType::Catalog => harness.catalog_pipeline().retry_failed().await?,
        TaskType::TimeSeries => harness.list_fetcher().retry_failed().await?,
    };
    print_report(args.task, &report);
    Ok(())
}

fn show_failures(cli: &Cli, args: &FailuresArgs) -> Result<(), CliError> {
    let ledger = FailureLedger::open(cli.failures_path())?;
    let records = ledger.get_failures(args.task);

    if records.is_empty() {
        println!("No failures recorded");
        return Ok(());
    }

    for record in &records {
        let when = chrono::DateTime::from_timestamp(record.timestamp, 0)
            .map(|t| t.to_rfc3339())
            .unwrap_or_else(|| record.timestamp.to_string());
        println!(
            "{:<10} {:>10}  {}  {}",
            record.task_type, record.id, when, record.reason
        );
    }
    println!("{} failure(s)", records.len());
    Ok(())
}

fn clean(cli: &Cli, args: &CleanArgs) -> Result<(), CliError> {
    let checkpoint = CheckpointStore::open(cli.checkpoint_path(), Default::default())?;
    match args.task {
        Some(task) => checkpoint.clear_namespace(task)?,
        None => checkpoint.clear_all()?,
    }

    if args.failures {
        FailureLedger::open(cli.failures_path())?.clear()?;
    }

    println!("Checkpoint state cleared");
    Ok(())
}

fn print_report(task: TaskType, report: &HarvestReport) {
    println!("{task}: {report}");
}

/// Parse one id per line, skipping blank lines and warning on invalid ones
pub fn read_id_file(path: &Path) -> Result<Vec<ItemId>, CliError> {
    let contents = std::fs::read_to_string(path).map_err(|e| {
        CliError::InvalidArgument(format!("cannot read {}: {e}", path.display()))
    })?;
    Ok(parse_id_lines(&contents))
}

fn parse_id_lines(contents: &str) -> Vec<ItemId> {
    contents
        .lines()
        .enumerate()
        .filter_map(|(index, line)| {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                return None;
            }
            match line.parse::<ItemId>() {
                Ok(id) => Some(id),
                Err(_) => {
                    warn!(line = index + 1, value = line, "Ignoring invalid id");
                    None
                }
            }
        })
        .collect()
}
