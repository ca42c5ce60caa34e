use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Local;
use tokio::task::JoinSet;
use tokio::time::sleep;
use tracing::info;

use crate::config::{Config, Policy};
use crate::fetch::{Page, PageFetcher};
use crate::plan::FetchPlan;
use crate::record::Columns;
use crate::request::Failure;
use crate::sink::{write_snapshot, CsvSink};
use crate::{info_time, Result};

/// What a run fetched and wrote.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunSummary {
    pub pages_requested: usize,
    pub rows_written: usize,
    /// Offsets that answered with no rows.
    pub empty_offsets: Vec<u64>,
    /// Offsets whose rows are missing from the output.
    pub failed_offsets: Vec<(u64, Failure)>,
}

impl RunSummary {
    fn record_page(&mut self, page: &Page) {
        self.pages_requested += 1;
        match page.failure {
            Some(failure) => self.failed_offsets.push((page.offset, failure)),
            None if page.is_empty() => self.empty_offsets.push(page.offset),
            None => {}
        }
    }
}

/// Drives a whole [`FetchPlan`] through a [`PageFetcher`] into the output file.
#[async_trait]
pub trait FetchPolicy: Send + Sync {
    async fn run(&self, plan: &FetchPlan, fetcher: Arc<PageFetcher>) -> Result<RunSummary>;
}

/// Picks the policy named in `config`.
pub fn policy_for(config: &Config) -> Box<dyn FetchPolicy> {
    match config.policy {
        Policy::ThrottledBatch => Box::new(ThrottledBatch {
            output: config.output.clone(),
            batch_size: config.batch_size,
            cooldown: config.cooldown(),
            columns: config.header(),
        }),
        Policy::SingleWave => Box::new(SingleWave {
            output: config.output.clone(),
            columns: config.header(),
        }),
    }
}

/// Returns a `JoinSet` of all the page requests in `offsets`, so that they can be awaited.
fn request_pages(fetcher: &Arc<PageFetcher>, offsets: &[u64], limit: u64) -> JoinSet<Page> {
    let mut task_set = JoinSet::new();
    for &offset in offsets {
        task_set.spawn({
            // Fetcher is behind an Arc so we can clone cheaply
            let fetcher = fetcher.clone();
            async move { fetcher.fetch_page(offset, limit).await }
        });
    }
    task_set
}

/// At most `batch_size` requests in flight, `cooldown` between batches, rows appended as
/// soon as each page lands.
#[derive(Debug, Clone)]
pub struct ThrottledBatch {
    pub output: PathBuf,
    pub batch_size: usize,
    pub cooldown: Duration,
    pub columns: Option<Columns>,
}

#[async_trait]
impl FetchPolicy for ThrottledBatch {
    async fn run(&self, plan: &FetchPlan, fetcher: Arc<PageFetcher>) -> Result<RunSummary> {
        let mut sink = CsvSink::append(&self.output, self.columns.clone()).await?;
        let mut summary = RunSummary::default();

        let batches: Vec<&[u64]> = plan.batches(self.batch_size).collect();
        let batch_count = batches.len();
        for (idx, batch) in batches.into_iter().enumerate() {
            let start_batch_time = Local::now();
            let mut pages = request_pages(&fetcher, batch, plan.page_size());

            // Pages are appended in completion order, not offset order.
            while let Some(task) = pages.join_next().await {
                let page = task?;
                let written = sink.append_page(&page.records).await?;
                if written == 0 {
                    info!("No data returned at offset {}. Skipping.", page.offset);
                } else {
                    info!("Processed {written} rows at offset {}", page.offset);
                }
                summary.record_page(&page);
            }
            info_time!(
                start_batch_time,
                "Processed batch {}/{}",
                idx + 1,
                batch_count
            );

            if idx + 1 < batch_count {
                sleep(self.cooldown).await;
            }
        }

        summary.rows_written = sink.rows_written();
        Ok(summary)
    }
}

/// Every page requested at once, flattened in offset order and written in one pass.
#[derive(Debug, Clone)]
pub struct SingleWave {
    pub output: PathBuf,
    pub columns: Option<Columns>,
}

#[async_trait]
impl FetchPolicy for SingleWave {
    async fn run(&self, plan: &FetchPlan, fetcher: Arc<PageFetcher>) -> Result<RunSummary> {
        let start_time = Local::now();
        let mut task_set = request_pages(&fetcher, plan.offsets(), plan.page_size());

        let mut pages = Vec::with_capacity(plan.len());
        while let Some(task) = task_set.join_next().await {
            pages.push(task?);
        }
        pages.sort_unstable_by_key(|page| page.offset);
        info_time!(start_time, "Fetched {} pages", pages.len());

        let mut summary = RunSummary::default();
        let mut records = Vec::new();
        for mut page in pages {
            summary.record_page(&page);
            records.append(&mut page.records);
        }

        // Nothing fetched: leave any previous output alone.
        if !records.is_empty() {
            summary.rows_written =
                write_snapshot(&self.output, &records, self.columns.clone()).await?;
        }
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use reqwest::StatusCode;

    use super::*;

    fn page(offset: u64, rows: usize, failure: Option<Failure>) -> Page {
        let records = (0..rows)
            .map(|i| {
                let mut rec = crate::Record::new();
                rec.insert("id".into(), i.into());
                rec
            })
            .collect();
        Page {
            offset,
            records,
            failure,
        }
    }

    #[test]
    fn summary_separates_empty_and_failed_pages() {
        let mut summary = RunSummary::default();
        summary.record_page(&page(0, 3, None));
        summary.record_page(&page(1000, 0, None));
        summary.record_page(&page(
            2000,
            0,
            Some(Failure::Rejected(StatusCode::BAD_GATEWAY)),
        ));

        assert_eq!(summary.pages_requested, 3);
        assert_eq!(summary.empty_offsets, [1000]);
        assert_eq!(
            summary.failed_offsets,
            [(2000, Failure::Rejected(StatusCode::BAD_GATEWAY))]
        );
    }

    #[test]
    fn policy_follows_config() {
        use clap::Parser;

        let config = Config::try_parse_from(["opendump", "--policy", "single-wave"]).unwrap();
        assert_eq!(config.policy, Policy::SingleWave);
        // Both policies are usable as trait objects.
        let _policy: Box<dyn FetchPolicy> = policy_for(&config);
    }
}
