use serde::Deserialize;

use crate::record::Record;
use crate::{Error, Result};

/// Decodes a page body: a JSON array of objects.
pub(crate) fn decode_page(body: &[u8]) -> Result<Vec<Record>> {
    Ok(serde_json::from_slice(body)?)
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum CountBody {
    Rows(Vec<CountRow>),
    Row(CountRow),
}

#[derive(Debug, Deserialize)]
struct CountRow {
    count: CountValue,
}

// The aggregate comes back as a string, but some sources send a bare number.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum CountValue {
    Number(u64),
    Text(String),
}

/// Decodes a `$select=count(*)` body, e.g. `[{"count": "12345"}]`.
pub(crate) fn decode_count(body: &[u8]) -> Result<u64> {
    let row = match serde_json::from_slice::<CountBody>(body)? {
        CountBody::Rows(rows) => rows.into_iter().next().ok_or(Error::MissingCount)?,
        CountBody::Row(row) => row,
    };
    match row.count {
        CountValue::Number(n) => Ok(n),
        CountValue::Text(s) => s.trim().parse().map_err(|_| Error::MissingCount),
    }
}
