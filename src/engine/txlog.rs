//! Persistent record of policy runs.
//!
//! Every run writes one transaction row and one detail row per committed
//! batch. Detail rows are written on the core connection inside the batch's
//! own transaction, so they exist only for batches that committed.

use async_trait::async_trait;
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::EngineResult;
use crate::{
    config::TransactionLogConfig,
    db::{DbConnection, SqlValue},
    dialect::DatabaseFamily,
};

/// Status of a transaction or detail record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionStatus {
    Pending,
    Applied,
    Error,
}

impl TransactionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionStatus::Pending => "PENDING",
            TransactionStatus::Applied => "APPLIED",
            TransactionStatus::Error => "ERROR",
        }
    }
}

impl std::fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.pad(self.as_str())
    }
}

/// One policy run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransactionRecord {
    pub id: Uuid,
    pub policy: String,
    pub status: TransactionStatus,
    pub started_at: NaiveDateTime,
    pub finished_at: Option<NaiveDateTime>,
    pub message: String,
    pub records_affected: u64,
    /// Run parameters as given on the command line or by the scheduler.
    pub params: String,
}

impl TransactionRecord {
    pub fn pending(policy: &str, params: &str, started_at: NaiveDateTime) -> Self {
        Self {
            id: Uuid::new_v4(),
            policy: policy.to_string(),
            status: TransactionStatus::Pending,
            started_at,
            finished_at: None,
            message: String::new(),
            records_affected: 0,
            params: params.to_string(),
        }
    }
}

/// One committed batch of a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransactionDetailRecord {
    pub id: Uuid,
    pub transaction_id: Uuid,
    /// Tables touched, one per line.
    pub tables: String,
    /// Predicates used, one per line, aligned with `tables`.
    pub filters: String,
    pub message: String,
    pub started_at: NaiveDateTime,
    pub finished_at: NaiveDateTime,
    pub status: TransactionStatus,
}

/// Storage for run records.
#[async_trait]
pub trait TransactionLog: Send + Sync {
    /// Create the log tables if they do not exist.
    async fn install(&self, conn: &mut dyn DbConnection) -> EngineResult<()>;

    async fn create_transaction(
        &self,
        conn: &mut dyn DbConnection,
        record: &TransactionRecord,
    ) -> EngineResult<()>;

    async fn update_transaction(
        &self,
        conn: &mut dyn DbConnection,
        record: &TransactionRecord,
    ) -> EngineResult<()>;

    async fn create_detail(
        &self,
        conn: &mut dyn DbConnection,
        detail: &TransactionDetailRecord,
    ) -> EngineResult<()>;
}

/// [`TransactionLog`] in two tables of the core database.
#[derive(Debug, Clone)]
pub struct SqlTransactionLog {
    transactions_table: String,
    details_table: String,
}

impl Default for SqlTransactionLog {
    fn default() -> Self {
        Self::from_config(&TransactionLogConfig::default())
    }
}

impl SqlTransactionLog {
    pub fn from_config(config: &TransactionLogConfig) -> Self {
        Self {
            transactions_table: config.transactions_table.clone(),
            details_table: config.details_table.clone(),
        }
    }

    pub fn transactions_table(&self) -> &str {
        &self.transactions_table
    }

    pub fn details_table(&self) -> &str {
        &self.details_table
    }
}

/// Comma-separated bind markers for `n` parameters.
fn markers(family: DatabaseFamily, n: usize) -> String {
    (1..=n)
        .map(|i| family.placeholder(i))
        .collect::<Vec<_>>()
        .join(", ")
}

fn count(value: u64) -> SqlValue {
    SqlValue::Integer(i64::try_from(value).unwrap_or(i64::MAX))
}

fn text(value: impl Into<String>) -> SqlValue {
    SqlValue::Text(value.into())
}

#[async_trait]
impl TransactionLog for SqlTransactionLog {
    async fn install(&self, conn: &mut dyn DbConnection) -> EngineResult<()> {
        conn.execute(&format!(
            "CREATE TABLE IF NOT EXISTS {} (
                id VARCHAR(36) PRIMARY KEY,
                policy_name VARCHAR(255) NOT NULL,
                status VARCHAR(16) NOT NULL,
                started_at TIMESTAMP NOT NULL,
                finished_at TIMESTAMP,
                message TEXT,
                records_affected BIGINT NOT NULL DEFAULT 0,
                run_params TEXT
            )",
            self.transactions_table
        ))
        .await?;
        conn.execute(&format!(
            "CREATE TABLE IF NOT EXISTS {} (
                id VARCHAR(36) PRIMARY KEY,
                transaction_id VARCHAR(36) NOT NULL,
                table_names TEXT NOT NULL,
                filters TEXT NOT NULL,
                message TEXT,
                started_at TIMESTAMP NOT NULL,
                finished_at TIMESTAMP NOT NULL,
                status VARCHAR(16) NOT NULL
            )",
            self.details_table
        ))
        .await?;
        conn.commit().await?;
        tracing::info!(
            transactions_table = %self.transactions_table,
            details_table = %self.details_table,
            "Transaction log tables installed"
        );
        Ok(())
    }

    async fn create_transaction(
        &self,
        conn: &mut dyn DbConnection,
        record: &TransactionRecord,
    ) -> EngineResult<()> {
        let mut columns = vec![
            "id",
            "policy_name",
            "status",
            "started_at",
            "message",
            "records_affected",
            "run_params",
        ];
        let mut params = vec![
            text(record.id.to_string()),
            text(&record.policy),
            text(record.status.as_str()),
            SqlValue::Timestamp(record.started_at),
            text(&record.message),
            count(record.records_affected),
            text(&record.params),
        ];
        // An untyped null does not bind to a timestamp column.
        if let Some(finished_at) = record.finished_at {
            columns.push("finished_at");
            params.push(SqlValue::Timestamp(finished_at));
        }
        let sql = format!(
            "INSERT INTO {} ({}) VALUES ({})",
            self.transactions_table,
            columns.join(", "),
            markers(conn.family(), params.len()),
        );
        conn.execute_bound(&sql, &params).await?;
        Ok(())
    }

    async fn update_transaction(
        &self,
        conn: &mut dyn DbConnection,
        record: &TransactionRecord,
    ) -> EngineResult<()> {
        let family = conn.family();
        let mut assignments = vec!["status", "message", "records_affected"];
        let mut params = vec![
            text(record.status.as_str()),
            text(&record.message),
            count(record.records_affected),
        ];
        if let Some(finished_at) = record.finished_at {
            assignments.push("finished_at");
            params.push(SqlValue::Timestamp(finished_at));
        }
        let set = assignments
            .iter()
            .enumerate()
            .map(|(i, column)| format!("{column} = {}", family.placeholder(i + 1)))
            .collect::<Vec<_>>()
            .join(", ");
        params.push(text(record.id.to_string()));
        let sql = format!(
            "UPDATE {} SET {set} WHERE id = {}",
            self.transactions_table,
            family.placeholder(params.len()),
        );
        conn.execute_bound(&sql, &params).await?;
        Ok(())
    }

    async fn create_detail(
        &self,
        conn: &mut dyn DbConnection,
        detail: &TransactionDetailRecord,
    ) -> EngineResult<()> {
        let params = [
            text(detail.id.to_string()),
            text(detail.transaction_id.to_string()),
            text(&detail.tables),
            text(&detail.filters),
            text(&detail.message),
            SqlValue::Timestamp(detail.started_at),
            SqlValue::Timestamp(detail.finished_at),
            text(detail.status.as_str()),
        ];
        let sql = format!(
            "INSERT INTO {} (id, transaction_id, table_names, filters, message, started_at, finished_at, status) \
             VALUES ({})",
            self.details_table,
            markers(conn.family(), params.len()),
        );
        conn.execute_bound(&sql, &params).await?;
        Ok(())
    }
}
