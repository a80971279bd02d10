//! State owned by one policy run.

use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::{
    EngineError, EngineResult,
    accumulator::{ItemPredicate, TransactionAccumulator, TransactionItem},
    keys::resolve_to_keys,
    template::{ALWAYS_TRUE, ResolvedDetail, replace_identity_selector},
    transfer::ArchiveTransport,
    txlog::TransactionLog,
};
use crate::{
    config::{ArchivistConfig, EngineConfig},
    db::{self, DbConnection},
    dialect::DatabaseFamily,
    policy::Policy,
};

/// The core and archive connections of a run.
pub struct ConnectionPair {
    pub core: Box<dyn DbConnection>,
    pub archive: Box<dyn DbConnection>,
}

impl ConnectionPair {
    pub fn new(core: Box<dyn DbConnection>, archive: Box<dyn DbConnection>) -> Self {
        Self { core, archive }
    }

    /// Open both connections. Without an `[archive]` database the archive
    /// connection is a second session on the core database.
    pub async fn connect(config: &ArchivistConfig) -> EngineResult<Self> {
        let core = db::connect(&config.core).await?;
        let archive = if config.archive.is_none() {
            db::connect(&config.core).await?
        } else {
            db::connect(&config.archive).await?
        };
        Ok(Self { core, archive })
    }

    /// Roll back both connections. Both are attempted even if the first
    /// fails; the first error is returned.
    pub async fn rollback(&mut self) -> EngineResult<()> {
        let core = self.core.rollback().await;
        let archive = self.archive.rollback().await;
        core?;
        archive?;
        Ok(())
    }

    /// Commit core, then archive. An archive failure after the core commit
    /// is [`EngineError::Inconsistent`].
    pub async fn commit(&mut self) -> EngineResult<()> {
        self.core.commit().await?;
        self.archive
            .commit()
            .await
            .map_err(EngineError::Inconsistent)
    }
}

/// Which store a commit moves rows out of.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitTarget {
    /// Archive (or purge) rows of the core store.
    CoreToArchive,
    /// Purge rows already in the archive store.
    ArchiveOnly,
}

/// Engine settings shared by every run of a process.
#[derive(Debug, Clone)]
pub struct EngineSettings {
    /// Overrides the driver's family for generated SQL.
    pub dialect: Option<DatabaseFamily>,
    pub identity_column: String,
    pub in_clause_limit: usize,
    pub default_aging_days: u32,
    pub transport: ArchiveTransport,
}

impl EngineSettings {
    pub fn from_config(config: &EngineConfig) -> Self {
        Self {
            dialect: config.dialect,
            identity_column: config.identity_column.clone(),
            in_clause_limit: config.in_clause_limit,
            default_aging_days: config.default_aging_days,
            transport: ArchiveTransport::from_mode(&config.mode),
        }
    }

    /// Family used to generate SQL for `conn`.
    pub fn family_for(&self, conn: &dyn DbConnection) -> DatabaseFamily {
        self.dialect.unwrap_or_else(|| conn.family())
    }
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self::from_config(&EngineConfig::default())
    }
}

/// How a run ended when it did not fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    Completed,
    /// The cancellation token fired; no further batch was started.
    Interrupted,
}

/// One policy run against one target.
///
/// Owns the accumulator and the running totals. The connections are
/// borrowed exclusively for the duration of the run.
pub struct PolicyRun<'a> {
    pub policy: &'a Policy,
    pub connections: &'a mut ConnectionPair,
    pub settings: &'a EngineSettings,
    pub txlog: &'a dyn TransactionLog,
    pub transaction_id: Uuid,
    pub target: CommitTarget,
    pub family: DatabaseFamily,
    pub(super) cancel: CancellationToken,
    pub(super) accumulator: TransactionAccumulator,
    pub(super) records_affected: u64,
    pub(super) messages: Vec<String>,
}

impl<'a> PolicyRun<'a> {
    pub fn new(
        policy: &'a Policy,
        connections: &'a mut ConnectionPair,
        settings: &'a EngineSettings,
        txlog: &'a dyn TransactionLog,
        transaction_id: Uuid,
        target: CommitTarget,
        cancel: CancellationToken,
    ) -> Self {
        let family = match target {
            CommitTarget::CoreToArchive => settings.family_for(connections.core.as_ref()),
            CommitTarget::ArchiveOnly => settings.family_for(connections.archive.as_ref()),
        };
        Self {
            policy,
            connections,
            settings,
            txlog,
            transaction_id,
            target,
            family,
            cancel,
            accumulator: TransactionAccumulator::default(),
            records_affected: 0,
            messages: Vec::new(),
        }
    }

    /// Connection rows are read from and deleted on.
    pub fn source(&mut self) -> &mut dyn DbConnection {
        match self.target {
            CommitTarget::CoreToArchive => self.connections.core.as_mut(),
            CommitTarget::ArchiveOnly => self.connections.archive.as_mut(),
        }
    }

    pub fn is_interrupted(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Rows affected by committed batches.
    pub fn records_affected(&self) -> u64 {
        self.records_affected
    }

    /// Log lines of committed batches.
    pub fn messages(&self) -> &[String] {
        &self.messages
    }

    pub fn accumulator(&self) -> &TransactionAccumulator {
        &self.accumulator
    }

    /// Add a line to the current batch log.
    pub fn log(&mut self, line: impl Into<String>) {
        let line = line.into();
        tracing::info!(policy = %self.policy.name, "{line}");
        self.accumulator.log(line);
    }

    /// Queue one resolved detail for the next commit.
    ///
    /// Identity selectors still present match every row. Details resolved
    /// to primary keys capture their keys now, before any row moves.
    pub async fn queue(&mut self, detail: &ResolvedDetail) -> EngineResult<()> {
        let table = detail.table().to_string();
        self.log(format!("Processing archive detail for table {table}"));

        let filter = replace_identity_selector(&detail.filter, ALWAYS_TRUE);
        let predicate = if detail.detail.resolve_to_primary_key {
            let resolved = ResolvedDetail {
                detail: detail.detail.clone(),
                filter,
            };
            let keys = resolve_to_keys(self.source(), &resolved)
                .await
                .map_err(|e| e.in_table(&table))?;
            self.accumulator
                .log(format!("Resolved {} primary key(s) of {table}", keys.len()));
            ItemPredicate::PrimaryKeys(keys)
        } else {
            ItemPredicate::Filter(filter)
        };

        self.accumulator.push(TransactionItem { table, predicate });
        Ok(())
    }
}
