use std::path::{Path, PathBuf};

use tokio::{
    fs::{self, File, OpenOptions},
    io::AsyncWriteExt,
};
use tracing::warn;

use crate::record::{Columns, Record};
use crate::Result;

/// Append-only CSV output. The only writer of its file for the whole run.
#[derive(Debug)]
pub struct CsvSink {
    path: PathBuf,
    file: File,
    columns: Option<Columns>,
    rows_written: usize,
    reported_drift: bool,
}

impl CsvSink {
    /// Opens `path` for appending, creating it if missing. Existing content is kept.
    ///
    /// With `columns` the header is written right away, otherwise it's taken from the first
    /// non-empty page. Either way each run writes exactly one header.
    pub async fn append(path: impl Into<PathBuf>, columns: Option<Columns>) -> Result<Self> {
        let path = path.into();
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;
        let mut sink = Self {
            path,
            file,
            columns: None,
            rows_written: 0,
            reported_drift: false,
        };
        if let Some(columns) = columns {
            let mut wtr = csv::Writer::from_writer(Vec::new());
            wtr.write_record(columns.names())?;
            sink.write_bytes(&wtr.into_inner()?).await?;
            sink.columns = Some(columns);
        }
        Ok(sink)
    }

    /// Appends one page's rows. Returns how many rows were written.
    pub async fn append_page(&mut self, records: &[Record]) -> Result<usize> {
        if records.is_empty() {
            return Ok(0);
        }

        let mut wtr = csv::Writer::from_writer(Vec::new());
        let columns = match self.columns.clone() {
            Some(columns) => columns,
            None => {
                let columns = Columns::discover(records);
                wtr.write_record(columns.names())?;
                self.columns = Some(columns.clone());
                columns
            }
        };
        let drifted = encode_rows(&mut wtr, &columns, records)?;
        if drifted && !self.reported_drift {
            self.reported_drift = true;
            warn!(path = %self.path.display(), "Records carry fields outside the header, dropping them");
        }

        self.write_bytes(&wtr.into_inner()?).await?;
        self.rows_written += records.len();
        Ok(records.len())
    }

    pub fn rows_written(&self) -> usize {
        self.rows_written
    }

    // Flushed per page so a crash loses at most the batch in flight.
    async fn write_bytes(&mut self, bytes: &[u8]) -> Result<()> {
        self.file.write_all(bytes).await?;
        self.file.flush().await?;
        Ok(())
    }
}

/// Writes all `records` to `path` in one go, replacing whatever was there.
///
/// The header is `columns`, or the union of all record keys in first-seen order.
pub async fn write_snapshot(
    path: &Path,
    records: &[Record],
    columns: Option<Columns>,
) -> Result<usize> {
    let columns = columns.unwrap_or_else(|| Columns::discover(records));
    let mut wtr = csv::Writer::from_writer(Vec::new());
    wtr.write_record(columns.names())?;
    if encode_rows(&mut wtr, &columns, records)? {
        warn!(path = %path.display(), "Records carry fields outside the header, dropping them");
    }
    fs::write(path, wtr.into_inner()?).await?;
    Ok(records.len())
}

/// Returns whether any record had fields that didn't fit `columns`.
fn encode_rows(
    wtr: &mut csv::Writer<Vec<u8>>,
    columns: &Columns,
    records: &[Record],
) -> Result<bool> {
    let mut drifted = false;
    for record in records {
        drifted |= !columns.unknown_fields(record).is_empty();
        wtr.write_record(columns.row(record))?;
    }
    Ok(drifted)
}

#[cfg(test)]
mod tests {
    use serde_json::{json, Value};

    use super::*;

    fn records(value: Value) -> Vec<Record> {
        serde_json::from_value(value).unwrap()
    }

    #[tokio::test]
    async fn header_comes_from_first_page() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.csv");

        let mut sink = CsvSink::append(&path, None).await.unwrap();
        sink.append_page(&records(json!([{"id": "1", "name": "a, b"}])))
            .await
            .unwrap();
        sink.append_page(&records(json!([{"name": "c", "id": "2"}, {"id": "3"}])))
            .await
            .unwrap();

        let out = std::fs::read_to_string(&path).unwrap();
        assert_eq!(out, "id,name\n1,\"a, b\"\n2,c\n3,\n");
        assert_eq!(sink.rows_written(), 3);
    }

    #[tokio::test]
    async fn configured_header_is_written_at_start() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.csv");

        let columns = Columns::new(vec!["id".into(), "zip".into()]);
        let mut sink = CsvSink::append(&path, Some(columns)).await.unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "id,zip\n");

        sink.append_page(&records(json!([{"id": 1, "zip": "10001", "extra": null}])))
            .await
            .unwrap();
        assert_eq!(
            std::fs::read_to_string(&path).unwrap(),
            "id,zip\n1,10001\n"
        );
    }

    #[tokio::test]
    async fn empty_page_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.csv");

        let mut sink = CsvSink::append(&path, None).await.unwrap();
        assert_eq!(sink.append_page(&[]).await.unwrap(), 0);
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "");
    }

    #[tokio::test]
    async fn reopening_appends_instead_of_truncating() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.csv");
        let page = records(json!([{"id": "1"}]));

        for _ in 0..2 {
            let mut sink = CsvSink::append(&path, None).await.unwrap();
            sink.append_page(&page).await.unwrap();
        }

        assert_eq!(std::fs::read_to_string(&path).unwrap(), "id\n1\nid\n1\n");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn pages_go_through_the_handle_opened_at_start() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.csv");
        let moved = dir.path().join("moved.csv");

        let mut sink = CsvSink::append(&path, None).await.unwrap();
        sink.append_page(&records(json!([{"id": "1"}])))
            .await
            .unwrap();
        std::fs::rename(&path, &moved).unwrap();
        sink.append_page(&records(json!([{"id": "2"}])))
            .await
            .unwrap();

        assert!(!path.exists());
        assert_eq!(std::fs::read_to_string(&moved).unwrap(), "id\n1\n2\n");
    }

    #[tokio::test]
    async fn snapshot_replaces_file_with_union_header() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.csv");
        std::fs::write(&path, "stale\n").unwrap();

        let rows = records(json!([{"a": 1}, {"b": [1, 2]}]));
        let written = write_snapshot(&path, &rows, None).await.unwrap();

        assert_eq!(written, 2);
        assert_eq!(
            std::fs::read_to_string(&path).unwrap(),
            "a,b\n1,\n,\"[1,2]\"\n"
        );
    }
}
