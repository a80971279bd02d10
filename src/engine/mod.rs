//! The archive/purge engine.
//!
//! A policy run resolves each detail's filter template, splits the work
//! into batches with one of the tokenizers, queues every batch's details in
//! a [`TransactionAccumulator`] and commits each batch across the core and
//! archive connections. [`Archiver`] runs a list of policies and records
//! one transaction per policy.

mod accumulator;
mod commit;
mod error;
pub mod handler;
pub mod keys;
pub mod notify;
pub mod orchestrator;
mod process;
mod run;
pub mod template;
pub mod tokenizer;
pub mod transfer;
pub mod txlog;

#[cfg(all(test, feature = "database-sqlite"))]
mod tests;

pub use accumulator::{ItemPredicate, TransactionAccumulator, TransactionItem};
pub use error::{EngineError, EngineResult};
pub use handler::{DEFAULT_HANDLER, HandlerRegistry, PolicyHandler, StrategyHandler};
pub use notify::{Notification, Notifier, TracingNotifier};
pub use process::{
    AgingSelection, Archiver, PolicyCheck, ProcessReport, RunRequest, aging_date, min_aging_date,
};
pub use run::{CommitTarget, ConnectionPair, EngineSettings, PolicyRun, RunOutcome};
pub use template::{ResolvedDetail, TemplateResolver};
pub use transfer::{ArchiveTransport, BulkTransfer, JsonFileTransfer};
pub use txlog::{
    SqlTransactionLog, TransactionDetailRecord, TransactionLog, TransactionRecord,
    TransactionStatus,
};
