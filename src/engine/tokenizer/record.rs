use super::Batch;
use crate::{
    db::DbConnection,
    dialect::{DatabaseFamily, Pagination, where_body},
    engine::{EngineResult, template::ResolvedDetail},
};

/// Splits one detail into row-count windows using the family's pagination.
///
/// The matching row count is taken once. Progress advances by the batch
/// size, except for [`Pagination::KeyRange`] whose windows may hold fewer
/// rows and are re-counted.
#[derive(Debug)]
pub struct RecordTokenizer {
    detail: ResolvedDetail,
    family: DatabaseFamily,
    pagination: Pagination,
    key_column: String,
    batch_size: u64,
    total: u64,
    processed: u64,
}

impl RecordTokenizer {
    pub async fn new(
        conn: &mut dyn DbConnection,
        detail: ResolvedDetail,
        family: DatabaseFamily,
        batch_size: u64,
    ) -> EngineResult<Self> {
        let table = detail.table().to_string();
        let total = conn
            .fetch_count(&format!(
                "SELECT COUNT(*) FROM {table} WHERE {}",
                where_body(&detail.filter)
            ))
            .await?;
        let key_column = conn.primary_key_column(&table).await?;

        tracing::debug!(
            table = %table,
            total,
            batch_size,
            pagination = ?family.pagination(),
            "Counted rows for record batches"
        );

        Ok(Self {
            detail,
            family,
            pagination: family.pagination(),
            key_column,
            batch_size: batch_size.max(1),
            total,
            processed: 0,
        })
    }

    pub fn has_any(&self) -> bool {
        self.total > 0
    }

    pub fn has_next(&self) -> bool {
        self.processed < self.total
    }

    pub fn total(&self) -> u64 {
        self.total
    }

    pub fn detail(&self) -> &ResolvedDetail {
        &self.detail
    }

    /// Next row-count window as a single-detail batch.
    pub async fn next_batch(
        &mut self,
        conn: &mut dyn DbConnection,
    ) -> EngineResult<Option<Batch>> {
        if !self.has_next() {
            return Ok(None);
        }
        let table = self.detail.table().to_string();
        let fragment = self.pagination.fragment(
            self.family,
            &table,
            &self.key_column,
            &self.detail.filter,
            self.batch_size,
        );

        if self.pagination.recounts() {
            let matched = conn
                .fetch_count(&format!("SELECT COUNT(*) FROM {table} WHERE {fragment}"))
                .await?;
            // An empty window means the remaining rows are gone
            self.processed = if matched == 0 {
                self.total
            } else {
                self.processed + matched
            };
        } else {
            self.processed += self.batch_size;
        }

        let label = format!(
            "Processing batch SQL for table {table} ({} of {} rows): {fragment}",
            self.processed.min(self.total),
            self.total
        );
        let mut detail = self.detail.clone();
        detail.filter = fragment;
        Ok(Some(Batch {
            label,
            details: vec![detail],
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::{super::scripted::ScriptedConnection, *};
    use crate::policy::PolicyDetail;

    fn pay_detail() -> ResolvedDetail {
        ResolvedDetail {
            detail: PolicyDetail::new("pay", "amount > 1", 1),
            filter: "amount > 1".into(),
        }
    }

    async fn drain(tokenizer: &mut RecordTokenizer, conn: &mut ScriptedConnection) -> Vec<Batch> {
        let mut batches = Vec::new();
        while let Some(batch) = tokenizer.next_batch(conn).await.unwrap() {
            batches.push(batch);
        }
        batches
    }

    #[tokio::test]
    async fn test_fixed_windows_advance_by_batch_size() {
        let mut conn = ScriptedConnection::new(DatabaseFamily::Sqlite, "id").then_count(7);
        let mut tokenizer = RecordTokenizer::new(&mut conn, pay_detail(), DatabaseFamily::Sqlite, 3)
            .await
            .unwrap();
        assert!(tokenizer.has_any());
        assert_eq!(tokenizer.total(), 7);

        let batches = drain(&mut tokenizer, &mut conn).await;
        assert_eq!(batches.len(), 3);
        assert!(batches[0].label.starts_with("Processing batch SQL for table pay (3 of 7 rows): "));
        assert!(batches[1].label.contains("(6 of 7 rows)"));
        assert!(batches[2].label.contains("(7 of 7 rows)"));
        for batch in &batches {
            assert_eq!(
                batch.details[0].filter,
                "id IN (SELECT id FROM pay WHERE amount > 1 ORDER BY id LIMIT 3)"
            );
        }
        // Only the initial count is queried
        assert_eq!(conn.queries, vec!["SELECT COUNT(*) FROM pay WHERE amount > 1"]);
    }

    #[tokio::test]
    async fn test_key_range_windows_are_recounted() {
        let mut conn = ScriptedConnection::new(DatabaseFamily::Db2Zos, "id")
            .then_count(7)
            .then_count(3)
            .then_count(1)
            .then_count(3);
        let mut tokenizer = RecordTokenizer::new(&mut conn, pay_detail(), DatabaseFamily::Db2Zos, 3)
            .await
            .unwrap();

        let batches = drain(&mut tokenizer, &mut conn).await;
        assert_eq!(batches.len(), 3);
        // A short window advances by what it matched, not the batch size
        assert!(batches[0].label.contains("(3 of 7 rows)"));
        assert!(batches[1].label.contains("(4 of 7 rows)"));
        assert!(batches[2].label.contains("(7 of 7 rows)"));
        assert_eq!(conn.queries.len(), 4);
        assert!(conn.queries[1].starts_with("SELECT COUNT(*) FROM pay WHERE (amount > 1) AND id >= "));
    }

    #[tokio::test]
    async fn test_empty_key_range_window_ends_iteration() {
        let mut conn = ScriptedConnection::new(DatabaseFamily::Db2Zos, "id")
            .then_count(7)
            .then_count(2)
            .then_count(0);
        let mut tokenizer = RecordTokenizer::new(&mut conn, pay_detail(), DatabaseFamily::Db2Zos, 3)
            .await
            .unwrap();

        assert!(tokenizer.next_batch(&mut conn).await.unwrap().is_some());
        assert!(tokenizer.has_next());
        let last = tokenizer.next_batch(&mut conn).await.unwrap().unwrap();
        assert!(last.label.contains("(7 of 7 rows)"));
        assert!(!tokenizer.has_next());
        // No further count is issued once the window came back empty
        assert!(tokenizer.next_batch(&mut conn).await.unwrap().is_none());
        assert_eq!(conn.queries.len(), 3);
    }

    #[tokio::test]
    async fn test_no_matching_rows_yields_nothing() {
        let mut conn = ScriptedConnection::new(DatabaseFamily::Postgres, "id").then_count(0);
        let mut tokenizer = RecordTokenizer::new(&mut conn, pay_detail(), DatabaseFamily::Postgres, 3)
            .await
            .unwrap();
        assert!(!tokenizer.has_any());
        assert!(tokenizer.next_batch(&mut conn).await.unwrap().is_none());
    }
}
