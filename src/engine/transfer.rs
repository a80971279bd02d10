//! Moving rows into the archive store.
//!
//! Schema mode copies rows with one `INSERT ... SELECT` on the core
//! connection. Database mode exports rows to working files and imports them
//! through the archive connection.

use std::{fmt, path::PathBuf, sync::Arc};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{EngineError, EngineResult};
use crate::{
    config::ArchiveMode,
    db::{DbConnection, Row},
};

/// Bulk export/import between two connections.
#[async_trait]
pub trait BulkTransfer: Send + Sync {
    /// Copy the rows of `table` matching `predicate` from `source` into
    /// `target`. Returns the number of rows imported.
    async fn transfer(
        &self,
        transaction_id: Uuid,
        source: &mut dyn DbConnection,
        target: &mut dyn DbConnection,
        table: &str,
        predicate: &str,
    ) -> EngineResult<u64>;

    /// Remove the working files of a transaction. Returns one message per
    /// file that could not be removed.
    async fn cleanup(&self, transaction_id: Uuid) -> Vec<String>;
}

/// Work description written next to the exported rows.
#[derive(Debug, Serialize, Deserialize)]
struct WorkConfig<'a> {
    table: &'a str,
    filter: &'a str,
    transaction_id: Uuid,
}

/// [`BulkTransfer`] through JSON working files in a directory.
///
/// Files are named `archive-work-<transaction id>.json` (work config) and
/// `archive-work-<transaction id>.jsonl` (one exported row per line), so
/// concurrent runs never share a file.
#[derive(Debug, Clone)]
pub struct JsonFileTransfer {
    work_dir: PathBuf,
}

impl JsonFileTransfer {
    pub fn new(work_dir: impl Into<PathBuf>) -> Self {
        Self {
            work_dir: work_dir.into(),
        }
    }

    pub fn config_path(&self, transaction_id: Uuid) -> PathBuf {
        self.work_dir
            .join(format!("archive-work-{transaction_id}.json"))
    }

    pub fn data_path(&self, transaction_id: Uuid) -> PathBuf {
        self.work_dir
            .join(format!("archive-work-{transaction_id}.jsonl"))
    }
}

fn io_error(path: &std::path::Path) -> impl FnOnce(std::io::Error) -> EngineError + '_ {
    move |source| EngineError::Io {
        path: path.to_path_buf(),
        source,
    }
}

#[async_trait]
impl BulkTransfer for JsonFileTransfer {
    async fn transfer(
        &self,
        transaction_id: Uuid,
        source: &mut dyn DbConnection,
        target: &mut dyn DbConnection,
        table: &str,
        predicate: &str,
    ) -> EngineResult<u64> {
        let config_path = self.config_path(transaction_id);
        let data_path = self.data_path(transaction_id);

        let config = WorkConfig {
            table,
            filter: predicate,
            transaction_id,
        };
        let config_json = serde_json::to_vec_pretty(&config)
            .map_err(|e| EngineError::Transfer(e.to_string()))?;
        tokio::fs::write(&config_path, config_json)
            .await
            .map_err(io_error(&config_path))?;

        let rows = source
            .fetch_rows(&format!("SELECT * FROM {table} WHERE {predicate}"))
            .await?;
        let mut lines = String::new();
        for row in &rows {
            let line =
                serde_json::to_string(row).map_err(|e| EngineError::Transfer(e.to_string()))?;
            lines.push_str(&line);
            lines.push('\n');
        }
        tokio::fs::write(&data_path, lines)
            .await
            .map_err(io_error(&data_path))?;

        let exported = tokio::fs::read_to_string(&data_path)
            .await
            .map_err(io_error(&data_path))?;
        let imported: Vec<Row> = exported
            .lines()
            .filter(|l| !l.trim().is_empty())
            .map(serde_json::from_str)
            .collect::<Result<_, _>>()
            .map_err(|e| EngineError::Transfer(format!("{}: {e}", data_path.display())))?;

        let inserted = target.insert_rows(table, &imported).await?;
        tracing::debug!(
            table,
            exported = rows.len(),
            inserted,
            file = %data_path.display(),
            "Transferred rows through work file"
        );
        Ok(inserted)
    }

    async fn cleanup(&self, transaction_id: Uuid) -> Vec<String> {
        let mut failures = Vec::new();
        for path in [self.config_path(transaction_id), self.data_path(transaction_id)] {
            match tokio::fs::remove_file(&path).await {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => {
                    tracing::warn!(file = %path.display(), error = %e, "Could not delete work file");
                    failures.push(format!("Could not delete work file {}: {e}", path.display()));
                }
            }
        }
        failures
    }
}

/// How archived rows reach the archive store.
#[derive(Clone)]
pub enum ArchiveTransport {
    Schema { archive_schema: String },
    Bulk(Arc<dyn BulkTransfer>),
}

impl fmt::Debug for ArchiveTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArchiveTransport::Schema { archive_schema } => f
                .debug_struct("Schema")
                .field("archive_schema", archive_schema)
                .finish(),
            ArchiveTransport::Bulk(_) => f.write_str("Bulk"),
        }
    }
}

impl ArchiveTransport {
    pub fn from_mode(mode: &ArchiveMode) -> Self {
        match mode {
            ArchiveMode::Schema { archive_schema } => ArchiveTransport::Schema {
                archive_schema: archive_schema.clone(),
            },
            ArchiveMode::Database { work_dir } => {
                ArchiveTransport::Bulk(Arc::new(JsonFileTransfer::new(work_dir.clone())))
            }
        }
    }

    /// Copy matching rows of `table` into the archive. Returns rows copied.
    pub async fn move_rows(
        &self,
        transaction_id: Uuid,
        core: &mut dyn DbConnection,
        archive: &mut dyn DbConnection,
        table: &str,
        predicate: &str,
    ) -> EngineResult<u64> {
        match self {
            ArchiveTransport::Schema { archive_schema } => {
                let sql = format!(
                    "INSERT INTO {archive_schema}.{table} SELECT * FROM {table} WHERE {predicate}"
                );
                Ok(core.execute(&sql).await?)
            }
            ArchiveTransport::Bulk(bulk) => {
                bulk.transfer(transaction_id, core, archive, table, predicate)
                    .await
            }
        }
    }

    pub async fn cleanup(&self, transaction_id: Uuid) -> Vec<String> {
        match self {
            ArchiveTransport::Schema { .. } => Vec::new(),
            ArchiveTransport::Bulk(bulk) => bulk.cleanup(transaction_id).await,
        }
    }
}
