//! Dumps a paginated open-data JSON endpoint (Socrata style `$limit`/`$offset`) to CSV.

pub mod config;
pub mod count;
mod error;
pub mod fetch;
mod macros;
mod parse;
pub mod plan;
pub mod process;
pub mod record;
pub mod request;
pub mod schedule;
pub mod sink;

pub use error::{Error, Result};
pub use record::Record;

pub const DEFAULT_BASE_URL: &str = "https://data.cityofnewyork.us/resource/quxm-hmyr.json";
pub const DEFAULT_OUTPUT_FILE: &str = "nyc_data.csv";
pub const DEFAULT_PAGE_SIZE: u64 = 1000;
/// Used in place of the total when the count query fails.
pub const DEFAULT_FALLBACK_ROWS: u64 = 50_000;
