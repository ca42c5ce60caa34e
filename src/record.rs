use serde_json::{Map, Value};

/// One row as returned by the remote source. Field order is the order the source sent them in.
pub type Record = Map<String, Value>;

/// The fixed column layout of an output file.
///
/// Discovered once from the first records seen (or configured up front) and never widened
/// afterwards, so every row written to a file lines up with its header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Columns {
    names: Vec<String>,
}

impl Columns {
    pub fn new(names: Vec<String>) -> Self {
        Self { names }
    }

    /// Union of all keys in `records`, in first-seen order.
    pub fn discover(records: &[Record]) -> Self {
        let mut names: Vec<String> = Vec::new();
        for key in records.iter().flat_map(|r| r.keys()) {
            if !names.iter().any(|n| n == key) {
                names.push(key.clone());
            }
        }
        Self { names }
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    /// Projects a record onto these columns. Missing fields become empty cells.
    pub fn row(&self, record: &Record) -> Vec<String> {
        self.names
            .iter()
            .map(|name| record.get(name).map(render_cell).unwrap_or_default())
            .collect()
    }

    /// Keys of `record` that have no column and would be dropped by [`Columns::row`].
    pub fn unknown_fields<'r>(&self, record: &'r Record) -> Vec<&'r str> {
        record
            .keys()
            .filter(|k| !self.names.contains(k))
            .map(String::as_str)
            .collect()
    }
}

/// Renders a JSON value as a single CSV cell.
pub fn render_cell(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        // Nested values keep their JSON text.
        Value::Array(_) | Value::Object(_) => value.to_string(),
    }
}
