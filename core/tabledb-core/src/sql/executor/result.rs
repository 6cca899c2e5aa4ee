//! Query result returned to shells and network layers.
//!
//! Serialized as
//! `{ "status": "success"|"error", "message", "rows_affected"?, "data"?: [ {col: value} ] }`
//! with each data object keyed in projection order.

use crate::error::TdbError;
use crate::storage::Row;
use crate::value::Value;
use serde::ser::{SerializeMap, SerializeStruct};
use serde::{Serialize, Serializer};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum QueryStatus {
    Success,
    Error,
}

#[derive(Debug, Clone, PartialEq)]
pub struct QueryResult {
    pub status: QueryStatus,
    pub message: String,
    /// Error category (`TdbError::code`) for failed statements.
    pub error_code: Option<&'static str>,
    pub rows_affected: Option<usize>,
    /// Output column labels, in projection order.
    pub columns: Vec<String>,
    /// `None` for statements that return no rows.
    pub data: Option<Vec<Vec<Value>>>,
}

impl QueryResult {
    pub fn message(message: impl Into<String>) -> Self {
        Self {
            status: QueryStatus::Success,
            message: message.into(),
            error_code: None,
            rows_affected: None,
            columns: Vec::new(),
            data: None,
        }
    }

    pub fn affected(rows: usize, message: impl Into<String>) -> Self {
        Self {
            rows_affected: Some(rows),
            ..Self::message(message)
        }
    }

    pub fn rows(columns: Vec<String>, data: Vec<Vec<Value>>) -> Self {
        let message = format!("{} row(s) returned", data.len());
        Self {
            columns,
            data: Some(data),
            ..Self::message(message)
        }
    }

    pub fn error(err: &TdbError) -> Self {
        Self {
            status: QueryStatus::Error,
            message: err.to_string(),
            error_code: Some(err.code()),
            rows_affected: None,
            columns: Vec::new(),
            data: None,
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == QueryStatus::Success
    }

    pub fn row_count(&self) -> usize {
        self.data.as_ref().map_or(0, Vec::len)
    }

    /// Value at (`row`, `column` label).
    pub fn get(&self, row: usize, column: &str) -> Option<&Value> {
        let slot = self.columns.iter().position(|c| c == column)?;
        self.data.as_ref()?.get(row)?.get(slot)
    }

    /// Every value of one output column.
    pub fn column_values(&self, column: &str) -> Vec<Value> {
        let Some(slot) = self.columns.iter().position(|c| c == column) else {
            return Vec::new();
        };
        self.data
            .iter()
            .flatten()
            .map(|r| r.get(slot).cloned().unwrap_or_default())
            .collect()
    }

    /// Data rows as column → value maps.
    pub fn to_rows(&self) -> Vec<Row> {
        self.data
            .iter()
            .flatten()
            .map(|r| self.columns.iter().cloned().zip(r.iter().cloned()).collect())
            .collect()
    }
}

struct OrderedRow<'a> {
    columns: &'a [String],
    values: &'a [Value],
}

impl Serialize for OrderedRow<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.columns.len()))?;
        for (c, v) in self.columns.iter().zip(self.values) {
            map.serialize_entry(c, v)?;
        }
        map.end()
    }
}

impl Serialize for QueryResult {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut fields = 2;
        fields += usize::from(self.error_code.is_some());
        fields += usize::from(self.rows_affected.is_some());
        fields += usize::from(self.data.is_some()) * 2;
        let mut s = serializer.serialize_struct("QueryResult", fields)?;
        s.serialize_field("status", &self.status)?;
        s.serialize_field("message", &self.message)?;
        if let Some(code) = self.error_code {
            s.serialize_field("error_code", code)?;
        }
        if let Some(n) = self.rows_affected {
            s.serialize_field("rows_affected", &n)?;
        }
        if let Some(data) = &self.data {
            s.serialize_field("columns", &self.columns)?;
            let rows: Vec<OrderedRow<'_>> = data
                .iter()
                .map(|values| OrderedRow {
                    columns: &self.columns,
                    values,
                })
                .collect();
            s.serialize_field("data", &rows)?;
        }
        s.end()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn data_keeps_projection_order() {
        let result = QueryResult::rows(
            vec!["name".to_string(), "age".to_string()],
            vec![vec![Value::from("Alice"), Value::Int(30)]],
        );
        let json = serde_json::to_string(&result).unwrap();
        assert!(json.contains(r#""data":[{"name":"Alice","age":30}]"#));
        assert_eq!(result.get(0, "age"), Some(&Value::Int(30)));
        assert_eq!(result.column_values("name"), vec![Value::from("Alice")]);
    }

    #[test]
    fn error_result_carries_code() {
        let result = QueryResult::error(&TdbError::unknown_column("users", "salary"));
        assert!(!result.is_success());
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["status"], "error");
        assert_eq!(json["error_code"], "UnknownColumn");
        assert!(json.get("data").is_none());
    }
}
