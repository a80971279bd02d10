use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use crate::dialect::DatabaseFamily;

/// A single decoded cell.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum SqlValue {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
    Boolean(bool),
    Blob(Vec<u8>),
    /// Only produced by callers binding parameters; decoded rows carry
    /// timestamps as text.
    Timestamp(NaiveDateTime),
}

impl SqlValue {
    /// Render as a literal that can be spliced into SQL for `family`.
    pub fn to_literal(&self, family: DatabaseFamily) -> String {
        match self {
            SqlValue::Null => "NULL".to_string(),
            SqlValue::Integer(v) => v.to_string(),
            SqlValue::Real(v) if v.is_finite() => v.to_string(),
            SqlValue::Real(_) => "NULL".to_string(),
            SqlValue::Text(v) => family.text_literal(v),
            SqlValue::Boolean(v) => family.bool_literal(*v).to_string(),
            SqlValue::Blob(v) => family.blob_literal(v),
            SqlValue::Timestamp(v) => family.timestamp_literal(*v),
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            SqlValue::Integer(v) => Some(*v),
            SqlValue::Real(v) if v.fract() == 0.0 => Some(*v as i64),
            SqlValue::Text(v) => v.trim().parse().ok(),
            SqlValue::Boolean(v) => Some(i64::from(*v)),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, SqlValue::Null)
    }
}

impl From<i64> for SqlValue {
    fn from(v: i64) -> Self {
        SqlValue::Integer(v)
    }
}

impl From<&str> for SqlValue {
    fn from(v: &str) -> Self {
        SqlValue::Text(v.to_string())
    }
}

impl From<String> for SqlValue {
    fn from(v: String) -> Self {
        SqlValue::Text(v)
    }
}

impl std::fmt::Display for SqlValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SqlValue::Null => f.write_str("NULL"),
            SqlValue::Integer(v) => write!(f, "{v}"),
            SqlValue::Real(v) => write!(f, "{v}"),
            SqlValue::Text(v) => f.write_str(v),
            SqlValue::Boolean(v) => write!(f, "{v}"),
            SqlValue::Blob(v) => write!(f, "0x{}", hex::encode(v)),
            SqlValue::Timestamp(v) => write!(f, "{}", v.format("%Y-%m-%d %H:%M:%S")),
        }
    }
}

/// One result row, columns in select order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Row {
    pub columns: Vec<String>,
    pub values: Vec<SqlValue>,
}

impl Row {
    pub fn push(&mut self, column: impl Into<String>, value: SqlValue) {
        self.columns.push(column.into());
        self.values.push(value);
    }

    /// Value of a column, matched case-insensitively.
    pub fn get(&self, column: &str) -> Option<&SqlValue> {
        self.columns
            .iter()
            .position(|c| c.eq_ignore_ascii_case(column))
            .map(|i| &self.values[i])
    }

    pub fn into_first(self) -> Option<SqlValue> {
        self.values.into_iter().next()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_literals() {
        let pg = DatabaseFamily::Postgres;
        assert_eq!(SqlValue::Integer(42).to_literal(pg), "42");
        assert_eq!(SqlValue::Text("it's".into()).to_literal(pg), "'it''s'");
        assert_eq!(SqlValue::Boolean(true).to_literal(pg), "TRUE");
        assert_eq!(SqlValue::Boolean(true).to_literal(DatabaseFamily::Sqlite), "1");
        assert_eq!(SqlValue::Null.to_literal(pg), "NULL");
        assert_eq!(SqlValue::Real(f64::NAN).to_literal(pg), "NULL");
        assert_eq!(
            SqlValue::Blob(vec![0xde, 0xad]).to_literal(DatabaseFamily::Sqlite),
            "X'dead'"
        );
        assert_eq!(
            SqlValue::Blob(vec![0xde, 0xad]).to_literal(pg),
            "'\\xdead'::bytea"
        );
    }

    #[test]
    fn test_as_i64() {
        assert_eq!(SqlValue::Integer(7).as_i64(), Some(7));
        assert_eq!(SqlValue::Real(3.0).as_i64(), Some(3));
        assert_eq!(SqlValue::Real(3.5).as_i64(), None);
        assert_eq!(SqlValue::Text(" 12 ".into()).as_i64(), Some(12));
        assert_eq!(SqlValue::Null.as_i64(), None);
    }

    #[test]
    fn test_row_lookup_is_case_insensitive() {
        let mut row = Row::default();
        row.push("EMP_ID", SqlValue::Integer(1));
        assert_eq!(row.get("emp_id"), Some(&SqlValue::Integer(1)));
        assert_eq!(row.get("other"), None);
    }

    #[test]
    fn test_row_json_keeps_types() {
        let mut row = Row::default();
        row.push("id", SqlValue::Integer(1));
        row.push("payload", SqlValue::Blob(vec![1, 2]));
        let json = serde_json::to_string(&row).unwrap();
        let back: Row = serde_json::from_str(&json).unwrap();
        assert_eq!(back, row);
    }
}
