use super::Batch;
use crate::{
    db::{DbConnection, SqlValue},
    dialect::{DatabaseFamily, where_body},
    engine::{
        EngineError, EngineResult,
        template::{ALWAYS_TRUE, ResolvedDetail, identity_predicate},
    },
};

/// Splits a policy into fixed-size slices of identity values.
///
/// The identity set comes from the controlling detail's filter with its
/// selector neutralised. Each batch is a copy of every resolved detail with
/// the selector replaced by the slice.
#[derive(Debug)]
pub struct IdentityTokenizer {
    details: Vec<ResolvedDetail>,
    identities: Vec<SqlValue>,
    column: String,
    family: DatabaseFamily,
    in_clause_limit: usize,
    batch_size: usize,
    cursor: usize,
}

/// Settings shared by every identity batch.
#[derive(Debug, Clone)]
pub struct IdentitySettings<'a> {
    pub column: &'a str,
    pub family: DatabaseFamily,
    pub in_clause_limit: usize,
    pub batch_size: usize,
    pub controlling_priority: i32,
}

impl IdentityTokenizer {
    /// Query the distinct, ordered identity set once.
    pub async fn new(
        conn: &mut dyn DbConnection,
        details: Vec<ResolvedDetail>,
        settings: IdentitySettings<'_>,
    ) -> EngineResult<Self> {
        let controlling = details
            .iter()
            .find(|d| d.detail.priority == settings.controlling_priority)
            .ok_or_else(|| {
                EngineError::configuration(format!(
                    "no policy detail has the controlling priority {}",
                    settings.controlling_priority
                ))
            })?;
        if !controlling.has_identity_selector() {
            return Err(EngineError::configuration(format!(
                "controlling detail for table {} does not contain the identity selector",
                controlling.table()
            )));
        }

        let base = controlling.with_identity_predicate(ALWAYS_TRUE);
        let column = settings.column;
        let sql = format!(
            "SELECT DISTINCT {column} FROM {} WHERE {} ORDER BY {column}",
            base.table(),
            where_body(&base.filter)
        );
        let identities: Vec<SqlValue> = conn
            .fetch_column(&sql)
            .await?
            .into_iter()
            .filter(|v| !v.is_null())
            .collect();

        tracing::debug!(
            table = base.table(),
            identities = identities.len(),
            batch_size = settings.batch_size,
            "Loaded identity set"
        );

        Ok(Self {
            details,
            identities,
            column: column.to_string(),
            family: settings.family,
            in_clause_limit: settings.in_clause_limit,
            batch_size: settings.batch_size.max(1),
            cursor: 0,
        })
    }

    pub fn has_next(&self) -> bool {
        self.cursor < self.identities.len()
    }

    pub fn total(&self) -> usize {
        self.identities.len()
    }
}

impl Iterator for IdentityTokenizer {
    type Item = EngineResult<Batch>;

    fn next(&mut self) -> Option<Self::Item> {
        if !self.has_next() {
            return None;
        }
        let end = (self.cursor + self.batch_size).min(self.identities.len());
        let slice = &self.identities[self.cursor..end];
        let predicate =
            identity_predicate(&self.column, slice, self.family, self.in_clause_limit);
        let label = format!(
            "Processing {} employee(s), {} to {} of {}",
            slice.len(),
            self.cursor + 1,
            end,
            self.identities.len()
        );

        let details = self
            .details
            .iter()
            .map(|d| d.with_identity_predicate(&predicate))
            .collect();

        self.cursor = end;
        Some(Ok(Batch { label, details }))
    }
}
