//! Database connections used by a policy run.
//!
//! A run holds two [`DbConnection`]s (core and archive). Each wraps a
//! single-connection pool and lazily opens a transaction on the first
//! statement; nothing is visible to other sessions until [`DbConnection::commit`].

mod error;
#[cfg(feature = "database-postgres")]
pub mod postgres;
#[cfg(feature = "database-sqlite")]
pub mod sqlite;
mod value;

use async_trait::async_trait;
pub use error::{DbError, DbResult};
pub use value::{Row, SqlValue};

use crate::{config::DatabaseConfig, dialect::DatabaseFamily};

/// Rows per multi-row `INSERT ... VALUES` statement.
const INSERT_CHUNK_ROWS: usize = 100;

/// A transactional connection executing dynamically generated SQL.
#[async_trait]
pub trait DbConnection: Send {
    /// SQL family of the underlying driver.
    fn family(&self) -> DatabaseFamily;

    async fn fetch_rows(&mut self, sql: &str) -> DbResult<Vec<Row>>;

    /// Execute a statement and return the number of affected rows.
    async fn execute(&mut self, sql: &str) -> DbResult<u64>;

    /// Execute a statement whose `params` are bound to the markers of
    /// [`DatabaseFamily::placeholder`], in order. A `Null` is bound as text.
    async fn execute_bound(&mut self, sql: &str, params: &[SqlValue]) -> DbResult<u64>;

    /// Name of the single-column primary key of `table`.
    async fn primary_key_column(&mut self, table: &str) -> DbResult<String>;

    async fn commit(&mut self) -> DbResult<()>;

    async fn rollback(&mut self) -> DbResult<()>;

    /// First column of every row.
    async fn fetch_column(&mut self, sql: &str) -> DbResult<Vec<SqlValue>> {
        let rows = self.fetch_rows(sql).await?;
        Ok(rows.into_iter().filter_map(Row::into_first).collect())
    }

    /// Single integer result such as `SELECT COUNT(*) ...`.
    async fn fetch_count(&mut self, sql: &str) -> DbResult<u64> {
        let value = self.fetch_column(sql).await?.into_iter().next();
        match value {
            None | Some(SqlValue::Null) => Ok(0),
            Some(v) => v
                .as_i64()
                .and_then(|n| u64::try_from(n).ok())
                .ok_or_else(|| DbError::Validation(format!("expected a count, got {v}"))),
        }
    }

    /// Insert exported rows into `table`, matching columns by name.
    async fn insert_rows(&mut self, table: &str, rows: &[Row]) -> DbResult<u64> {
        let family = self.family();
        let mut inserted = 0;
        for chunk in rows.chunks(INSERT_CHUNK_ROWS) {
            let Some(first) = chunk.first() else { continue };
            let columns = first.columns.join(", ");
            let values: Vec<String> = chunk
                .iter()
                .map(|row| {
                    let literals: Vec<String> =
                        row.values.iter().map(|v| v.to_literal(family)).collect();
                    format!("({})", literals.join(", "))
                })
                .collect();
            let sql = format!(
                "INSERT INTO {table} ({columns}) VALUES {}",
                values.join(", ")
            );
            inserted += self.execute(&sql).await?;
        }
        Ok(inserted)
    }
}

/// Open a connection from configuration.
pub async fn connect(config: &DatabaseConfig) -> DbResult<Box<dyn DbConnection>> {
    match config {
        DatabaseConfig::None => Err(DbError::NotConfigured),
        #[cfg(feature = "database-sqlite")]
        DatabaseConfig::Sqlite(cfg) => {
            let conn = sqlite::SqliteDbConnection::from_config(cfg).await?;
            Ok(Box::new(conn))
        }
        #[cfg(feature = "database-postgres")]
        DatabaseConfig::Postgres(cfg) => {
            let conn = postgres::PostgresDbConnection::from_config(cfg).await?;
            Ok(Box::new(conn))
        }
    }
}

/// Split `schema.table` into its parts.
pub(crate) fn split_qualified(table: &str) -> (Option<&str>, &str) {
    match table.rsplit_once('.') {
        Some((schema, name)) => (Some(schema), name),
        None => (None, table),
    }
}
