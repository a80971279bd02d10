//! Batch commit and rollback across the core and archive connections.
//!
//! Every queued item of a batch shares fate: either all of them are applied
//! and both connections commit, or both connections roll back. The
//! accumulator is empty afterwards in both cases.

use chrono::Utc;

use super::{
    EngineError, EngineResult,
    accumulator::{ItemPredicate, TransactionItem},
    run::{CommitTarget, ConnectionPair, PolicyRun},
    txlog::{TransactionDetailRecord, TransactionStatus},
};
use crate::dialect::where_body;

impl PolicyRun<'_> {
    /// Apply every queued item and commit both connections.
    ///
    /// Returns the rows affected by this batch. On failure both connections
    /// are rolled back and the error is wrapped in [`EngineError::Commit`],
    /// except a failed archive commit after a successful core commit, which
    /// is returned as [`EngineError::Inconsistent`].
    pub async fn commit(&mut self) -> EngineResult<u64> {
        let (items, mut log) = self.accumulator.drain();
        if items.is_empty() {
            self.messages.extend(log);
            return Ok(0);
        }

        let started_at = Utc::now().naive_utc();
        let applied = self.apply_items(&items, &mut log).await;
        let result = match applied {
            Ok(affected) => self
                .finish(&items, &mut log, started_at)
                .await
                .map(|()| affected),
            Err(e) => Err(e),
        };

        match result {
            Ok(affected) => {
                self.records_affected += affected;
                self.messages.extend(log);
                tracing::info!(
                    policy = %self.policy.name,
                    transaction_id = %self.transaction_id,
                    items = items.len(),
                    records_affected = affected,
                    total_records_affected = self.records_affected,
                    "Batch committed"
                );
                Ok(affected)
            }
            Err(err) => {
                self.rollback().await;
                tracing::error!(
                    policy = %self.policy.name,
                    transaction_id = %self.transaction_id,
                    items = items.len(),
                    error = %err,
                    "Batch rolled back"
                );
                if matches!(err, EngineError::Inconsistent(_)) {
                    Err(err)
                } else {
                    Err(EngineError::Commit(Box::new(err)))
                }
            }
        }
    }

    /// Discard queued work and roll back both connections. Rollback
    /// failures are logged; the connections are unusable either way.
    pub async fn rollback(&mut self) {
        self.accumulator.clear();
        if let Err(e) = self.connections.rollback().await {
            tracing::error!(
                policy = %self.policy.name,
                transaction_id = %self.transaction_id,
                error = %e,
                "Rollback failed"
            );
        }
        self.settings.transport.cleanup(self.transaction_id).await;
    }

    async fn apply_items(
        &mut self,
        items: &[TransactionItem],
        log: &mut Vec<String>,
    ) -> EngineResult<u64> {
        let mut total = 0;
        for item in items {
            let affected = self
                .apply_item(item)
                .await
                .map_err(|e| e.in_table(&item.table))?;
            let line = match self.target {
                CommitTarget::CoreToArchive => {
                    format!("{affected} records have been processed successfully")
                }
                CommitTarget::ArchiveOnly => {
                    format!("{affected} records have been deleted from Archive DB")
                }
            };
            tracing::debug!(
                policy = %self.policy.name,
                table = %item.table,
                records_affected = affected,
                "Item applied"
            );
            log.push(line);
            total += affected;
        }
        Ok(total)
    }

    /// Move then delete (archive), or delete only (purge). Keyed items run
    /// once per key chunk; the delete happens only if something moved.
    async fn apply_item(&mut self, item: &TransactionItem) -> EngineResult<u64> {
        let predicates: Vec<String> = match &item.predicate {
            ItemPredicate::Filter(filter) => vec![where_body(filter).to_string()],
            ItemPredicate::PrimaryKeys(keys) => {
                keys.predicates(self.family, self.settings.in_clause_limit)
            }
        };
        let table = item.table.as_str();
        let settings = self.settings;
        let transaction_id = self.transaction_id;
        let is_archive = self.policy.is_archive();
        let ConnectionPair { core, archive } = &mut *self.connections;

        match self.target {
            CommitTarget::ArchiveOnly => delete_all(archive.as_mut(), table, &predicates).await,
            CommitTarget::CoreToArchive if !is_archive => {
                delete_all(core.as_mut(), table, &predicates).await
            }
            CommitTarget::CoreToArchive => {
                let mut moved = 0;
                for predicate in &predicates {
                    moved += settings
                        .transport
                        .move_rows(transaction_id, core.as_mut(), archive.as_mut(), table, predicate)
                        .await?;
                }
                if moved == 0 {
                    return Ok(0);
                }
                delete_all(core.as_mut(), table, &predicates).await
            }
        }
    }

    /// Record the batch, remove work files, then commit core and archive.
    async fn finish(
        &mut self,
        items: &[TransactionItem],
        log: &mut Vec<String>,
        started_at: chrono::NaiveDateTime,
    ) -> EngineResult<()> {
        log.push("Work Committed".to_string());
        log.extend(self.settings.transport.cleanup(self.transaction_id).await);

        let detail = TransactionDetailRecord {
            id: uuid::Uuid::new_v4(),
            transaction_id: self.transaction_id,
            tables: items
                .iter()
                .map(|i| i.table.as_str())
                .collect::<Vec<_>>()
                .join("\n"),
            filters: items
                .iter()
                .map(TransactionItem::describe)
                .collect::<Vec<_>>()
                .join("\n"),
            message: log.join("\n"),
            started_at,
            finished_at: Utc::now().naive_utc(),
            status: TransactionStatus::Applied,
        };
        self.txlog
            .create_detail(self.connections.core.as_mut(), &detail)
            .await?;

        self.connections.commit().await
    }
}

async fn delete_all(
    conn: &mut dyn crate::db::DbConnection,
    table: &str,
    predicates: &[String],
) -> EngineResult<u64> {
    let mut deleted = 0;
    for predicate in predicates {
        deleted += conn
            .execute(&format!("DELETE FROM {table} WHERE {predicate}"))
            .await?;
    }
    Ok(deleted)
}
