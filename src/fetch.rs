use tracing::{debug, info};

use crate::parse::decode_page;
use crate::record::Record;
use crate::request::{Endpoint, Failure, RetryPolicy};

/// The records fetched for one offset.
///
/// `records` is empty both when the source has no rows at `offset` and when the request
/// failed; `failure` tells the two apart.
#[derive(Debug, Clone, PartialEq)]
pub struct Page {
    pub offset: u64,
    pub records: Vec<Record>,
    pub failure: Option<Failure>,
}

impl Page {
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[derive(Debug, Clone)]
pub struct PageFetcher {
    endpoint: Endpoint,
    retry: RetryPolicy,
}

impl PageFetcher {
    pub fn new(endpoint: Endpoint, retry: RetryPolicy) -> Self {
        Self { endpoint, retry }
    }

    /// Requests `$limit=limit&$offset=offset`. Never fails: errors end up in `Page::failure`.
    pub async fn fetch_page(&self, offset: u64, limit: u64) -> Page {
        debug!("Fetching data at offset {offset}");
        let query = [("$limit", limit.to_string()), ("$offset", offset.to_string())];
        let what = format!("offset {offset}");

        match self
            .endpoint
            .get_with_retry(&what, &query, self.retry, decode_page)
            .await
        {
            Ok(records) => Page {
                offset,
                records,
                failure: None,
            },
            Err(failure) => {
                info!(%failure, "No data for offset {offset}");
                Page {
                    offset,
                    records: Vec::new(),
                    failure: Some(failure),
                }
            }
        }
    }
}
