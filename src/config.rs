use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, ValueEnum};

use crate::record::Columns;
use crate::request::RetryPolicy;
use crate::{
    Error, Result, DEFAULT_BASE_URL, DEFAULT_FALLBACK_ROWS, DEFAULT_OUTPUT_FILE, DEFAULT_PAGE_SIZE,
};

/// How page requests are scheduled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Policy {
    /// Fixed-size concurrent batches with a cooldown in between, appending as pages arrive.
    ThrottledBatch,
    /// Every page at once, written in a single pass at the end.
    SingleWave,
}

#[derive(Debug, Clone, Parser)]
#[command(name = "opendump", version, about = "Dump a paginated open-data endpoint to CSV")]
pub struct Config {
    /// JSON resource to page through.
    #[arg(long, env = "OPENDUMP_BASE_URL", default_value = DEFAULT_BASE_URL)]
    pub base_url: String,

    /// CSV file to write.
    #[arg(short, long, env = "OPENDUMP_OUTPUT", default_value = DEFAULT_OUTPUT_FILE)]
    pub output: PathBuf,

    #[arg(long, value_enum, default_value_t = Policy::ThrottledBatch)]
    pub policy: Policy,

    /// Rows per request (`$limit`).
    #[arg(long, default_value_t = DEFAULT_PAGE_SIZE)]
    pub page_size: u64,

    /// Concurrent requests per batch (throttled-batch only).
    #[arg(long, default_value_t = 5)]
    pub batch_size: usize,

    /// Pause between batches (throttled-batch only).
    #[arg(long, default_value_t = 5)]
    pub cooldown_secs: u64,

    /// Per-request timeout.
    #[arg(long, default_value_t = 15)]
    pub timeout_secs: u64,

    #[arg(long, default_value_t = 3)]
    pub count_attempts: u32,

    #[arg(long, default_value_t = 5)]
    pub page_attempts: u32,

    /// Transport failures wait `backoff_base_ms * 2^retry`.
    #[arg(long, default_value_t = 1000)]
    pub backoff_base_ms: u64,

    /// Row estimate used when the count query fails.
    #[arg(long, default_value_t = DEFAULT_FALLBACK_ROWS)]
    pub fallback_rows: u64,

    /// Skip the count query and fetch this many rows.
    #[arg(long)]
    pub total_rows: Option<u64>,

    /// Header to write up front instead of discovering it from the data.
    #[arg(long, value_delimiter = ',')]
    pub columns: Vec<String>,
}

impl Config {
    pub fn validate(&self) -> Result<()> {
        if self.page_size == 0 {
            return Err(Error::Config("page size must be greater than zero".into()));
        }
        if self.batch_size == 0 {
            return Err(Error::Config("batch size must be greater than zero".into()));
        }
        if self.count_attempts == 0 || self.page_attempts == 0 {
            return Err(Error::Config("attempt ceilings must be at least 1".into()));
        }
        Ok(())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn cooldown(&self) -> Duration {
        Duration::from_secs(self.cooldown_secs)
    }

    pub fn count_retry(&self) -> RetryPolicy {
        RetryPolicy::new(self.count_attempts, self.backoff_base())
    }

    pub fn page_retry(&self) -> RetryPolicy {
        RetryPolicy::new(self.page_attempts, self.backoff_base())
    }

    pub fn header(&self) -> Option<Columns> {
        (!self.columns.is_empty()).then(|| Columns::new(self.columns.clone()))
    }

    fn backoff_base(&self) -> Duration {
        Duration::from_millis(self.backoff_base_ms)
    }
}
