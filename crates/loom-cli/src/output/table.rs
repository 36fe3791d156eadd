//! Table formatting for CLI output

use comfy_table::{ContentArrangement, Table as ComfyTable};
use serde_json::Value;

/// Table for CLI output
#[derive(Debug, Clone)]
pub struct Table {
    inner: ComfyTable,
}

impl Table {
    /// Create a table from a JSON array of objects
    pub fn from_json_array(arr: &[Value]) -> Self {
        let mut table = ComfyTable::new();

        let headers = arr
            .first()
            .and_then(Value::as_object)
            .map(|obj| obj.keys().cloned().collect::<Vec<_>>());
        if let Some(headers) = headers {
            table.set_header(headers);
        }

        for obj in arr.iter().filter_map(Value::as_object) {
            let row: Vec<String> = obj.values().map(cell).collect();
            table.add_row(row);
        }

        table
            .set_content_arrangement(ContentArrangement::Dynamic)
            .set_width(120);

        Self { inner: table }
    }
}

fn cell(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        Value::Array(items) => items.iter().map(cell).collect::<Vec<_>>().join(", "),
        _ => value.to_string(),
    }
}

impl std::fmt::Display for Table {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.inner)
    }
}
