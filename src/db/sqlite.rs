use std::time::Duration;

use async_trait::async_trait;
use sqlx::{
    Column, Row as _, Sqlite, SqlitePool, Transaction, TypeInfo, ValueRef,
    sqlite::{SqliteConnectOptions, SqliteConnection, SqlitePoolOptions, SqliteRow},
};

use super::{DbConnection, DbError, DbResult, Row, SqlValue, split_qualified};
use crate::{config::SqliteConfig, dialect::DatabaseFamily};

/// SQLite connection with a lazily started transaction.
pub struct SqliteDbConnection {
    pool: SqlitePool,
    tx: Option<Transaction<'static, Sqlite>>,
}

impl SqliteDbConnection {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool, tx: None }
    }

    pub async fn from_config(cfg: &SqliteConfig) -> DbResult<Self> {
        let attach = cfg.attach.clone();
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .after_connect(move |conn, _meta| {
                let attach = attach.clone();
                Box::pin(async move {
                    for (schema, path) in &attach {
                        let sql = format!(
                            "ATTACH DATABASE '{}' AS {schema}",
                            path.replace('\'', "''")
                        );
                        sqlx::query(&sql).execute(&mut *conn).await?;
                    }
                    Ok(())
                })
            })
            .connect_with(
                SqliteConnectOptions::new()
                    .filename(&cfg.path)
                    .create_if_missing(cfg.create_if_missing)
                    .busy_timeout(Duration::from_millis(cfg.busy_timeout_ms)),
            )
            .await?;
        Ok(Self::new(pool))
    }

    async fn conn(&mut self) -> DbResult<&mut SqliteConnection> {
        if self.tx.is_none() {
            self.tx = Some(self.pool.begin().await?);
        }
        self.tx
            .as_deref_mut()
            .ok_or_else(|| DbError::Internal("transaction not started".into()))
    }
}

fn decode_row(row: &SqliteRow) -> DbResult<Row> {
    let mut out = Row::default();
    for (i, column) in row.columns().iter().enumerate() {
        let raw = row.try_get_raw(i)?;
        let value = if raw.is_null() {
            SqlValue::Null
        } else {
            // Storage class of the value, not the declared column type
            let type_name = raw.type_info().name().to_string();
            match type_name.as_str() {
                "INTEGER" | "BOOLEAN" => SqlValue::Integer(row.try_get_unchecked::<i64, _>(i)?),
                "REAL" | "NUMERIC" => SqlValue::Real(row.try_get_unchecked::<f64, _>(i)?),
                "BLOB" => SqlValue::Blob(row.try_get_unchecked::<Vec<u8>, _>(i)?),
                "TEXT" | "DATE" | "TIME" | "DATETIME" => {
                    SqlValue::Text(row.try_get_unchecked::<String, _>(i)?)
                }
                _ => {
                    return Err(DbError::UnsupportedType {
                        column: column.name().to_string(),
                        type_name,
                    });
                }
            }
        };
        out.push(column.name(), value);
    }
    Ok(out)
}

#[async_trait]
impl DbConnection for SqliteDbConnection {
    fn family(&self) -> DatabaseFamily {
        DatabaseFamily::Sqlite
    }

    async fn fetch_rows(&mut self, sql: &str) -> DbResult<Vec<Row>> {
        let conn = self.conn().await?;
        let rows = sqlx::query(sql).persistent(false).fetch_all(&mut *conn).await?;
        rows.iter().map(decode_row).collect()
    }

    async fn execute(&mut self, sql: &str) -> DbResult<u64> {
        let conn = self.conn().await?;
        let result = sqlx::query(sql).persistent(false).execute(&mut *conn).await?;
        Ok(result.rows_affected())
    }

    async fn execute_bound(&mut self, sql: &str, params: &[SqlValue]) -> DbResult<u64> {
        let conn = self.conn().await?;
        let mut query = sqlx::query(sql);
        for param in params {
            query = match param {
                SqlValue::Null => query.bind(None::<String>),
                SqlValue::Integer(v) => query.bind(*v),
                SqlValue::Real(v) => query.bind(*v),
                SqlValue::Text(v) => query.bind(v.as_str()),
                SqlValue::Boolean(v) => query.bind(*v),
                SqlValue::Blob(v) => query.bind(v.as_slice()),
                SqlValue::Timestamp(v) => query.bind(*v),
            };
        }
        let result = query.execute(&mut *conn).await?;
        Ok(result.rows_affected())
    }

    /// Falls back to `rowid` for tables without a declared primary key.
    async fn primary_key_column(&mut self, table: &str) -> DbResult<String> {
        let (schema, name) = split_qualified(table);
        let conn = self.conn().await?;
        let columns: Vec<String> = sqlx::query_scalar(
            "SELECT name FROM pragma_table_info(?, ?) WHERE pk > 0 ORDER BY pk",
        )
        .bind(name)
        .bind(schema.unwrap_or("main"))
        .fetch_all(&mut *conn)
        .await?;

        match columns.as_slice() {
            [] => Ok("rowid".to_string()),
            [column] => Ok(column.clone()),
            _ => Err(DbError::Validation(format!(
                "table {table} has a composite primary key ({})",
                columns.join(", ")
            ))),
        }
    }

    async fn commit(&mut self) -> DbResult<()> {
        if let Some(tx) = self.tx.take() {
            tx.commit().await?;
        }
        Ok(())
    }

    async fn rollback(&mut self) -> DbResult<()> {
        if let Some(tx) = self.tx.take() {
            tx.rollback().await?;
        }
        Ok(())
    }
}
