//! Connection answering reads from a fixed script.

use std::collections::VecDeque;

use async_trait::async_trait;

use crate::{
    db::{DbConnection, DbError, DbResult, Row, SqlValue},
    dialect::DatabaseFamily,
};

/// Replays queued result sets in order and records every read.
pub struct ScriptedConnection {
    family: DatabaseFamily,
    key_column: String,
    results: VecDeque<Vec<Row>>,
    pub queries: Vec<String>,
}

impl ScriptedConnection {
    pub fn new(family: DatabaseFamily, key_column: &str) -> Self {
        Self {
            family,
            key_column: key_column.to_string(),
            results: VecDeque::new(),
            queries: Vec::new(),
        }
    }

    /// Queue a single-column result set.
    pub fn then_column(mut self, values: Vec<SqlValue>) -> Self {
        let rows = values
            .into_iter()
            .map(|value| {
                let mut row = Row::default();
                row.push("v", value);
                row
            })
            .collect();
        self.results.push_back(rows);
        self
    }

    pub fn then_count(self, n: i64) -> Self {
        self.then_column(vec![SqlValue::Integer(n)])
    }
}

#[async_trait]
impl DbConnection for ScriptedConnection {
    fn family(&self) -> DatabaseFamily {
        self.family
    }

    async fn fetch_rows(&mut self, sql: &str) -> DbResult<Vec<Row>> {
        self.queries.push(sql.to_string());
        self.results
            .pop_front()
            .ok_or_else(|| DbError::Internal(format!("unexpected query: {sql}")))
    }

    async fn execute(&mut self, sql: &str) -> DbResult<u64> {
        Err(DbError::Internal(format!("unexpected statement: {sql}")))
    }

    async fn execute_bound(&mut self, sql: &str, _params: &[SqlValue]) -> DbResult<u64> {
        self.execute(sql).await
    }

    async fn primary_key_column(&mut self, _table: &str) -> DbResult<String> {
        Ok(self.key_column.clone())
    }

    async fn commit(&mut self) -> DbResult<()> {
        Ok(())
    }

    async fn rollback(&mut self) -> DbResult<()> {
        Ok(())
    }
}
