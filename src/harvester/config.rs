//! Harvest configuration values and backoff calculation
//!
//! Every component receives its configuration through its constructor; there is
//! no process-wide default instance.

use rand::Rng;
use std::time::Duration;

/// Request timeout in seconds.
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Retries after the first attempt before a transient failure is surfaced.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Lower bound of the post-success politeness delay.
pub const DEFAULT_MIN_DELAY_MS: u64 = 1_000;

/// Upper bound of the post-success politeness delay.
pub const DEFAULT_MAX_DELAY_MS: u64 = 3_000;

/// Initial backoff; retry `n` waits `INITIAL_BACKOFF_MS * 2^n` plus jitter.
pub const INITIAL_BACKOFF_MS: u64 = 1_000;

/// Backoff cap.
pub const MAX_BACKOFF_MS: u64 = 30_000;

/// Upper bound of the uniform jitter added to every backoff.
pub const DEFAULT_JITTER_MS: u64 = 1_000;

/// Wait applied on a 429 response without a usable Retry-After header.
pub const DEFAULT_RATE_LIMIT_WAIT_SECS: u64 = 60;

/// Consecutive 429 waits tolerated for one request.
pub const DEFAULT_MAX_RATE_LIMIT_WAITS: u32 = 10;

/// Worker pool / semaphore size.
pub const DEFAULT_CONCURRENCY: usize = 10;

/// Successes buffered before a committer flush.
pub const DEFAULT_BATCH_SIZE: usize = 50;

/// Minimum seconds between checkpoint writes for single-id mutations.
pub const DEFAULT_SAVE_INTERVAL_SECS: u64 = 5;

/// Token bucket refill rate (requests per second).
pub const DEFAULT_RATE: f64 = 5.0;

/// Token bucket capacity.
pub const DEFAULT_BURST: f64 = 10.0;

/// Rollup dates are computed in this UTC offset.
pub const DEFAULT_ROLLUP_UTC_OFFSET_HOURS: i32 = 8;

/// Committer's bounded wait on the result queue.
pub const DEFAULT_COMMIT_POLL_MS: u64 = 500;

const DEFAULT_USER_AGENT: &str = concat!("catalog-harvester/", env!("CARGO_PKG_VERSION"));

/// Settings for [`crate::fetcher::http::FetchClient`]
#[derive(Debug, Clone)]
pub struct HttpConfig {
    /// Overall request timeout
    pub timeout: Duration,
    /// Retries after the first attempt
    pub max_retries: u32,
    /// Politeness delay lower bound
    pub min_delay: Duration,
    /// Politeness delay upper bound
    pub max_delay: Duration,
    /// First backoff step
    pub initial_backoff: Duration,
    /// Backoff cap
    pub max_backoff: Duration,
    /// Jitter upper bound
    pub jitter: Duration,
    /// Fallback wait for 429 responses
    pub rate_limit_wait: Duration,
    /// Consecutive 429 waits before giving up
    pub max_rate_limit_waits: u32,
    /// User-Agent header
    pub user_agent: String,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            max_retries: DEFAULT_MAX_RETRIES,
            min_delay: Duration::from_millis(DEFAULT_MIN_DELAY_MS),
            max_delay: Duration::from_millis(DEFAULT_MAX_DELAY_MS),
            initial_backoff: Duration::from_millis(INITIAL_BACKOFF_MS),
            max_backoff: Duration::from_millis(MAX_BACKOFF_MS),
            jitter: Duration::from_millis(DEFAULT_JITTER_MS),
            rate_limit_wait: Duration::from_secs(DEFAULT_RATE_LIMIT_WAIT_SECS),
            max_rate_limit_waits: DEFAULT_MAX_RATE_LIMIT_WAITS,
            user_agent: DEFAULT_USER_AGENT.to_string(),
        }
    }
}

impl HttpConfig {
    /// Zero delays everywhere; used by tests and local mirrors
    pub fn immediate() -> Self {
        Self {
            min_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            initial_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(5),
            jitter: Duration::ZERO,
            rate_limit_wait: Duration::from_millis(5),
            ..Self::default()
        }
    }

    /// Random politeness delay in `[min_delay, max_delay]`
    pub fn politeness_delay(&self) -> Duration {
        if self.max_delay <= self.min_delay {
            return self.min_delay;
        }
        let min = self.min_delay.as_secs_f64();
        let max = self.max_delay.as_secs_f64();
        Duration::from_secs_f64(rand::rng().random_range(min..=max))
    }
}

/// Settings shared by [`crate::harvester::CatalogPipeline`] and [`crate::harvester::ListFetcher`]
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Worker pool / semaphore size
    pub concurrency: usize,
    /// Successes per storage flush
    pub batch_size: usize,
    /// Checkpoint save threshold for single-id mutations
    pub save_interval: Duration,
    /// Bounded id-queue capacity
    pub id_queue_capacity: usize,
    /// Bounded result-queue capacity
    pub result_queue_capacity: usize,
    /// Committer's bounded wait between drain checks
    pub commit_poll_interval: Duration,
}

impl PipelineConfig {
    /// Derive queue capacities from concurrency and batch size
    pub fn new(concurrency: usize, batch_size: usize) -> Self {
        let concurrency = concurrency.max(1);
        let batch_size = batch_size.max(1);
        Self {
            concurrency,
            batch_size,
            save_interval: Duration::from_secs(DEFAULT_SAVE_INTERVAL_SECS),
            id_queue_capacity: concurrency * 4,
            result_queue_capacity: batch_size * 2,
            commit_poll_interval: Duration::from_millis(DEFAULT_COMMIT_POLL_MS),
        }
    }

    /// Override the checkpoint save interval
    pub fn with_save_interval(mut self, save_interval: Duration) -> Self {
        self.save_interval = save_interval;
        self
    }

    /// Override the committer poll interval
    pub fn with_commit_poll_interval(mut self, interval: Duration) -> Self {
        self.commit_poll_interval = interval;
        self
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self::new(DEFAULT_CONCURRENCY, DEFAULT_BATCH_SIZE)
    }
}

/// Complete injected configuration for one harvest run
#[derive(Debug, Clone)]
pub struct HarvestConfig {
    /// HTTP client settings
    pub http: HttpConfig,
    /// Pipeline settings
    pub pipeline: PipelineConfig,
    /// Token bucket base rate (requests per second)
    pub rate: f64,
    /// Token bucket capacity
    pub burst: f64,
    /// Offset used to date rollups
    pub rollup_utc_offset_hours: i32,
}

impl Default for HarvestConfig {
    fn default() -> Self {
        Self {
            http: HttpConfig::default(),
            pipeline: PipelineConfig::default(),
            rate: DEFAULT_RATE,
            burst: DEFAULT_BURST,
            rollup_utc_offset_hours: DEFAULT_ROLLUP_UTC_OFFSET_HOURS,
        }
    }
}

/// Calculate exponential backoff delay (without jitter)
pub fn calculate_backoff(retry_count: u32, initial: Duration, max: Duration) -> Duration {
    let factor = 2u32.saturating_pow(retry_count.min(31));
    initial.saturating_mul(factor).min(max)
}

/// Add uniform jitter in `[0, jitter)` to a delay
pub fn jittered(delay: Duration, jitter: Duration) -> Duration {
    if jitter.is_zero() {
        return delay;
    }
    let extra = rand::rng().random_range(0.0..jitter.as_secs_f64());
    delay + Duration::from_secs_f64(extra)
}
