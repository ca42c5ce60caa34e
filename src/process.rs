use std::sync::Arc;

use chrono::Local;
use tracing::warn;

use crate::config::Config;
use crate::count::{total_or_estimate, CountEstimator};
use crate::fetch::PageFetcher;
use crate::plan::FetchPlan;
use crate::request::Endpoint;
use crate::schedule::{policy_for, RunSummary};
use crate::{info_time, Result};

/// Counts the dataset, fetches every page under the configured policy, and writes the CSV.
pub async fn process_dataset(config: &Config) -> Result<RunSummary> {
    config.validate()?;
    let start_time = Local::now();
    let endpoint = Endpoint::new(&config.base_url, config.timeout())?;

    info_time!("Started fetching {}", endpoint.base_url());

    let total_rows = match config.total_rows {
        Some(total_rows) => total_rows,
        None => {
            let count = CountEstimator::new(endpoint.clone(), config.count_retry())
                .get_total_count()
                .await;
            total_or_estimate(count, config.fallback_rows)
        }
    };
    info_time!("Total rows to fetch: {total_rows}");

    let plan = FetchPlan::new(total_rows, config.page_size)?;
    let fetcher = Arc::new(PageFetcher::new(endpoint, config.page_retry()));
    let summary = policy_for(config).run(&plan, fetcher).await?;

    if summary.rows_written > 0 {
        info_time!(
            start_time,
            "Saved {} rows to {}",
            summary.rows_written,
            config.output.display()
        );
    } else {
        info_time!(start_time, "No data retrieved.");
    }
    if !summary.failed_offsets.is_empty() {
        let offsets: Vec<u64> = summary.failed_offsets.iter().map(|(o, _)| *o).collect();
        warn!(
            failed = offsets.len(),
            "Output is missing rows for offsets {offsets:?}"
        );
    }

    Ok(summary)
}
