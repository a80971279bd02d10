//! Primary-key resolution and chunked `IN (...)` predicates.
//!
//! Tables that other tables depend on are captured as a key set before any
//! row moves, so every chunked statement afterwards sees the same rows.

use super::{EngineResult, template::ResolvedDetail};
use crate::{
    db::{DbConnection, SqlValue},
    dialect::{DatabaseFamily, where_body},
};

/// Materialized primary keys of one detail.
#[derive(Debug, Clone, PartialEq)]
pub struct PrimaryKeySet {
    pub column: String,
    pub keys: Vec<SqlValue>,
}

impl PrimaryKeySet {
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// One `<column> IN (...)` predicate per chunk of at most `limit` keys.
    pub fn predicates(&self, family: DatabaseFamily, limit: usize) -> Vec<String> {
        key_predicates(&self.column, &self.keys, family, limit)
    }
}

/// Run `SELECT <pk> FROM <table> WHERE <filter>` once and keep every key.
pub async fn resolve_to_keys(
    conn: &mut dyn DbConnection,
    detail: &ResolvedDetail,
) -> EngineResult<PrimaryKeySet> {
    let table = detail.table();
    let column = conn.primary_key_column(table).await?;
    let sql = format!(
        "SELECT {column} FROM {table} WHERE {} ORDER BY {column}",
        where_body(&detail.filter)
    );
    let keys: Vec<SqlValue> = conn
        .fetch_column(&sql)
        .await?
        .into_iter()
        .filter(|v| !v.is_null())
        .collect();

    tracing::debug!(table, column = %column, keys = keys.len(), "Resolved primary keys");
    Ok(PrimaryKeySet { column, keys })
}

/// Chunk `values` into `<column> IN (...)` predicates of at most `limit`
/// values each. No values yields no predicates.
pub fn key_predicates(
    column: &str,
    values: &[SqlValue],
    family: DatabaseFamily,
    limit: usize,
) -> Vec<String> {
    values
        .chunks(limit.max(1))
        .map(|chunk| {
            let literals: Vec<String> = chunk.iter().map(|v| v.to_literal(family)).collect();
            format!("{column} IN ({})", literals.join(", "))
        })
        .collect()
}

/// A single predicate matching any of `values`; chunks are OR-ed together.
pub fn in_list_predicate(
    column: &str,
    values: &[SqlValue],
    family: DatabaseFamily,
    limit: usize,
) -> Option<String> {
    let mut predicates = key_predicates(column, values, family, limit);
    match predicates.len() {
        0 => None,
        1 => predicates.pop(),
        _ => Some(format!("({})", predicates.join(" OR "))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ints(range: std::ops::Range<i64>) -> Vec<SqlValue> {
        range.map(SqlValue::Integer).collect()
    }

    #[test]
    fn test_chunk_count_is_ceiling() {
        for (n, expected) in [(0, 0), (1, 1), (500, 1), (501, 2), (1000, 2), (1234, 3)] {
            let preds = key_predicates("id", &ints(0..n), DatabaseFamily::Postgres, 500);
            assert_eq!(preds.len(), expected, "n = {n}");
        }
    }

    #[test]
    fn test_chunks_cover_every_key_once() {
        let keys = ints(0..1001);
        let preds = key_predicates("id", &keys, DatabaseFamily::Sqlite, 500);
        let total: usize = preds
            .iter()
            .map(|p| p.trim_start_matches("id IN (").trim_end_matches(')').split(", ").count())
            .sum();
        assert_eq!(total, 1001);
        assert!(preds[2].ends_with("(1000)"));
    }

    #[test]
    fn test_in_list_predicate_or_joins_chunks() {
        let keys = ints(1..4);
        assert_eq!(
            in_list_predicate("e", &keys, DatabaseFamily::Sqlite, 2).unwrap(),
            "(e IN (1, 2) OR e IN (3))"
        );
        assert_eq!(
            in_list_predicate("e", &keys, DatabaseFamily::Sqlite, 10).unwrap(),
            "e IN (1, 2, 3)"
        );
        assert!(in_list_predicate("e", &[], DatabaseFamily::Sqlite, 10).is_none());
    }
}
