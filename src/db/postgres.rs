use std::time::Duration;

use async_trait::async_trait;
use sqlx::{
    Column, PgPool, Postgres, Row as _, Transaction, TypeInfo, ValueRef,
    postgres::{PgConnection, PgPoolOptions, PgRow},
};

use super::{DbConnection, DbError, DbResult, Row, SqlValue};
use crate::{config::PostgresConfig, dialect::DatabaseFamily};

/// PostgreSQL connection with a lazily started transaction.
pub struct PostgresDbConnection {
    pool: PgPool,
    tx: Option<Transaction<'static, Postgres>>,
}

impl PostgresDbConnection {
    pub fn new(pool: PgPool) -> Self {
        Self { pool, tx: None }
    }

    pub async fn from_config(cfg: &PostgresConfig) -> DbResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(1)
            .acquire_timeout(Duration::from_secs(cfg.connect_timeout_secs))
            .connect(&cfg.url)
            .await?;
        Ok(Self::new(pool))
    }

    async fn conn(&mut self) -> DbResult<&mut PgConnection> {
        if self.tx.is_none() {
            self.tx = Some(self.pool.begin().await?);
        }
        self.tx
            .as_deref_mut()
            .ok_or_else(|| DbError::Internal("transaction not started".into()))
    }
}

fn decode_row(row: &PgRow) -> DbResult<Row> {
    let mut out = Row::default();
    for (i, column) in row.columns().iter().enumerate() {
        let raw = row.try_get_raw(i)?;
        if raw.is_null() {
            out.push(column.name(), SqlValue::Null);
            continue;
        }
        let type_name = raw.type_info().name().to_string();
        let value = match type_name.as_str() {
            "INT2" => SqlValue::Integer(row.try_get::<i16, _>(i)?.into()),
            "INT4" => SqlValue::Integer(row.try_get::<i32, _>(i)?.into()),
            "INT8" => SqlValue::Integer(row.try_get::<i64, _>(i)?),
            "FLOAT4" => SqlValue::Real(row.try_get::<f32, _>(i)?.into()),
            "FLOAT8" => SqlValue::Real(row.try_get::<f64, _>(i)?),
            // Exact decimals travel as text; PostgreSQL casts the literal back
            "NUMERIC" => SqlValue::Text(row.try_get::<rust_decimal::Decimal, _>(i)?.to_string()),
            "BOOL" => SqlValue::Boolean(row.try_get::<bool, _>(i)?),
            "BYTEA" => SqlValue::Blob(row.try_get::<Vec<u8>, _>(i)?),
            "TIMESTAMP" => SqlValue::Text(
                row.try_get::<chrono::NaiveDateTime, _>(i)?
                    .format("%Y-%m-%d %H:%M:%S%.f")
                    .to_string(),
            ),
            "TIMESTAMPTZ" => SqlValue::Text(
                row.try_get::<chrono::DateTime<chrono::Utc>, _>(i)?
                    .to_rfc3339(),
            ),
            "DATE" => SqlValue::Text(row.try_get::<chrono::NaiveDate, _>(i)?.to_string()),
            "UUID" => SqlValue::Text(row.try_get::<uuid::Uuid, _>(i)?.to_string()),
            "JSON" | "JSONB" => {
                SqlValue::Text(row.try_get::<serde_json::Value, _>(i)?.to_string())
            }
            "TEXT" | "VARCHAR" | "BPCHAR" | "NAME" | "CHAR" => {
                SqlValue::Text(row.try_get::<String, _>(i)?)
            }
            _ => {
                return Err(DbError::UnsupportedType {
                    column: column.name().to_string(),
                    type_name,
                });
            }
        };
        out.push(column.name(), value);
    }
    Ok(out)
}

#[async_trait]
impl DbConnection for PostgresDbConnection {
    fn family(&self) -> DatabaseFamily {
        DatabaseFamily::Postgres
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

    async fn primary_key_column(&mut self, table: &str) -> DbResult<String> {
        let conn = self.conn().await?;
        let columns: Vec<String> = sqlx::query_scalar(
            r#"
            SELECT a.attname::text
            FROM pg_index i
            JOIN pg_attribute a ON a.attrelid = i.indrelid AND a.attnum = ANY(i.indkey)
            WHERE i.indrelid = $1::regclass AND i.indisprimary
            ORDER BY a.attnum
            "#,
        )
        .bind(table)
        .fetch_all(&mut *conn)
        .await?;

        match columns.as_slice() {
            [column] => Ok(column.clone()),
            [] => Err(DbError::Validation(format!(
                "table {table} has no primary key"
            ))),
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
