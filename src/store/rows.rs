//! Defensive decoding of store responses.
//!
//! Every read operation on the row store returns a serialized
//! rows-and-columns payload (`{"rows": [[...], ...]}`). Responses are
//! decoded leniently: a missing `rows` key, a non-array row, or a cell of
//! the wrong type is logged and treated as absent, never a panic.

use serde_json::Value;
use tracing::warn;

/// A decoded rows-and-columns response.
#[derive(Debug, Clone, Default)]
pub struct RowSet {
    pub rows: Vec<Vec<Value>>,
}

impl RowSet {
    /// Decode a raw store payload. Malformed payloads produce an empty set.
    pub fn decode(payload: &Value) -> Self {
        let Some(rows) = payload.get("rows") else {
            warn!("store response missing 'rows' key");
            return Self::default();
        };
        let Some(rows) = rows.as_array() else {
            warn!("store response 'rows' is not an array");
            return Self::default();
        };
        let rows = rows
            .iter()
            .filter_map(|row| match row.as_array() {
                Some(cells) => Some(cells.clone()),
                None => {
                    warn!("store row is not an array, skipping");
                    None
                }
            })
            .collect();
        Self { rows }
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// First cell of each row as a string, skipping rows without one.
    pub fn first_column(&self) -> Vec<String> {
        self.rows
            .iter()
            .filter_map(|row| str_cell(row, 0))
            .collect()
    }
}

/// Read a string cell, treating a missing or non-string cell as absent.
pub fn str_cell(row: &[Value], idx: usize) -> Option<String> {
    row.get(idx).and_then(Value::as_str).map(str::to_string)
}

/// Read an integer cell.
pub fn int_cell(row: &[Value], idx: usize) -> Option<i64> {
    row.get(idx).and_then(Value::as_i64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn decodes_rows_and_columns() {
        let set = RowSet::decode(&json!({"rows": [["a", 1], ["b", 2]]}));
        assert_eq!(set.len(), 2);
        assert_eq!(set.first_column(), vec!["a", "b"]);
    }

    #[test]
    fn missing_rows_key_is_empty() {
        let set = RowSet::decode(&json!({"result": "ok"}));
        assert!(set.is_empty());
    }

    #[test]
    fn non_array_rows_is_empty() {
        let set = RowSet::decode(&json!({"rows": "oops"}));
        assert!(set.is_empty());
    }

    #[test]
    fn malformed_row_is_skipped() {
        let set = RowSet::decode(&json!({"rows": [["a"], "not-a-row", ["b"]]}));
        assert_eq!(set.first_column(), vec!["a", "b"]);
    }

    #[test]
    fn wrong_typed_cells_are_absent() {
        let row = vec![json!(42), json!("text")];
        assert_eq!(str_cell(&row, 0), None);
        assert_eq!(str_cell(&row, 1).as_deref(), Some("text"));
        assert_eq!(int_cell(&row, 0), Some(42));
        assert_eq!(int_cell(&row, 5), None);
    }

    #[test]
    fn empty_payload_decodes_to_empty_set() {
        let set = RowSet::decode(&json!({"rows": []}));
        assert!(set.is_empty());
        assert_eq!(set.len(), 0);
        assert!(set.first_column().is_empty());
    }
}
