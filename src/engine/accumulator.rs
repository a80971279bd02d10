//! Pending work of the current batch.

use std::mem;

use super::keys::PrimaryKeySet;

/// How an item selects its rows at commit time.
#[derive(Debug, Clone, PartialEq)]
pub enum ItemPredicate {
    /// Resolved filter text.
    Filter(String),
    /// Keys captured when the item was queued. Applied in chunks.
    PrimaryKeys(PrimaryKeySet),
}

/// One table's pending move/delete.
#[derive(Debug, Clone, PartialEq)]
pub struct TransactionItem {
    pub table: String,
    pub predicate: ItemPredicate,
}

impl TransactionItem {
    /// Text recorded in the transaction detail.
    pub fn describe(&self) -> String {
        match &self.predicate {
            ItemPredicate::Filter(filter) => filter.clone(),
            ItemPredicate::PrimaryKeys(keys) => {
                format!("{} IN <{} primary keys>", keys.column, keys.len())
            }
        }
    }
}

/// Items and log lines buffered until the next commit or rollback.
#[derive(Debug, Default)]
pub struct TransactionAccumulator {
    items: Vec<TransactionItem>,
    log: Vec<String>,
}

impl TransactionAccumulator {
    pub fn push(&mut self, item: TransactionItem) {
        self.items.push(item);
    }

    pub fn log(&mut self, line: impl Into<String>) {
        self.log.push(line.into());
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty() && self.log.is_empty()
    }

    pub fn items(&self) -> &[TransactionItem] {
        &self.items
    }

    /// Take everything, leaving the accumulator empty.
    pub fn drain(&mut self) -> (Vec<TransactionItem>, Vec<String>) {
        (mem::take(&mut self.items), mem::take(&mut self.log))
    }

    pub fn clear(&mut self) {
        self.items.clear();
        self.log.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::SqlValue;

    #[test]
    fn test_drain_empties_accumulator() {
        let mut acc = TransactionAccumulator::default();
        acc.push(TransactionItem {
            table: "t".into(),
            predicate: ItemPredicate::Filter("a = 1".into()),
        });
        acc.log("queued t");
        assert!(!acc.is_empty());

        let (items, log) = acc.drain();
        assert_eq!(items.len(), 1);
        assert_eq!(log, vec!["queued t".to_string()]);
        assert!(acc.is_empty());
        assert!(acc.items().is_empty());
    }

    #[test]
    fn test_describe_primary_keys() {
        let item = TransactionItem {
            table: "t".into(),
            predicate: ItemPredicate::PrimaryKeys(PrimaryKeySet {
                column: "id".into(),
                keys: vec![SqlValue::Integer(1), SqlValue::Integer(2)],
            }),
        };
        assert_eq!(item.describe(), "id IN <2 primary keys>");
    }
}
