//! Running a list of policies, one transaction record each.

use std::{fmt, sync::Arc};

use chrono::{Days, NaiveDate, NaiveDateTime, Utc};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::{
    EngineError, EngineResult,
    handler::{HandlerRegistry, PolicyHandler},
    notify::{Notifier, notify_transaction},
    run::{CommitTarget, ConnectionPair, EngineSettings, PolicyRun, RunOutcome},
    template::TemplateResolver,
    txlog::{TransactionLog, TransactionRecord, TransactionStatus},
};
use crate::{
    db::DbConnection,
    dialect::DatabaseFamily,
    policy::{Policy, PolicyStore},
};

/// Earliest aging date a run will use.
pub fn min_aging_date() -> NaiveDate {
    NaiveDate::from_ymd_opt(1900, 1, 1).unwrap_or(NaiveDate::MIN)
}

/// Run-level override of the aging boundary for archive policies.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum AgingSelection {
    /// Each policy's own `aging_days`, else the engine default.
    #[default]
    Default,
    Days(u32),
    Date(NaiveDate),
}

impl fmt::Display for AgingSelection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AgingSelection::Default => f.write_str("default"),
            AgingSelection::Days(n) => write!(f, "{n} days"),
            AgingSelection::Date(d) => write!(f, "{d}"),
        }
    }
}

/// Aging boundary of `policy` for a run on `today`, at midnight.
///
/// The override applies to archive policies only. Dates before
/// [`min_aging_date`] are raised to it.
pub fn aging_date(
    policy: &Policy,
    selection: AgingSelection,
    default_days: u32,
    today: NaiveDate,
) -> NaiveDateTime {
    let floor = min_aging_date();
    let days_before = |days: u32| {
        today
            .checked_sub_days(Days::new(u64::from(days)))
            .unwrap_or(floor)
    };
    let date = match (selection, policy.is_archive()) {
        (AgingSelection::Date(date), true) => date,
        (AgingSelection::Days(days), true) => days_before(days),
        _ => days_before(policy.aging_days.unwrap_or(default_days)),
    };
    date.max(floor).and_time(chrono::NaiveTime::default())
}

/// Which policies to run and how.
#[derive(Debug, Clone, Default)]
pub struct RunRequest {
    /// Policy names; empty or `ALL` selects every policy.
    pub policies: Vec<String>,
    pub aging: AgingSelection,
}

impl RunRequest {
    /// Run parameters as recorded on each transaction.
    pub fn params(&self) -> String {
        let policies = if self.policies.is_empty() {
            crate::policy::ALL_POLICIES.to_string()
        } else {
            self.policies.join(",")
        };
        format!("policies={policies} aging={}", self.aging)
    }
}

/// Result of a process run.
#[derive(Debug, Default)]
pub struct ProcessReport {
    /// One record per policy attempted, in run order.
    pub transactions: Vec<TransactionRecord>,
    pub has_errors: bool,
    /// Set when cancellation stopped the run before every policy ran.
    pub interrupted: bool,
    /// Earliest aging date of the archive policies that ran. Only set when
    /// at least one ran and no archive policy failed; purge failures do
    /// not affect it.
    pub boundary_date: Option<NaiveDate>,
}

impl ProcessReport {
    pub fn records_affected(&self) -> u64 {
        self.transactions.iter().map(|t| t.records_affected).sum()
    }
}

/// Templates of one policy resolved without touching data.
#[derive(Debug)]
pub struct PolicyCheck {
    pub policy: String,
    pub result: EngineResult<usize>,
}

enum PolicyEnd {
    Applied,
    Failed { fatal: bool },
    Interrupted,
}

/// Runs policies against a pair of connections.
pub struct Archiver {
    store: Arc<dyn PolicyStore>,
    txlog: Arc<dyn TransactionLog>,
    notifier: Arc<dyn Notifier>,
    handlers: HandlerRegistry,
    settings: EngineSettings,
    cancel: CancellationToken,
}

impl Archiver {
    pub fn new(
        store: Arc<dyn PolicyStore>,
        txlog: Arc<dyn TransactionLog>,
        notifier: Arc<dyn Notifier>,
        settings: EngineSettings,
    ) -> Self {
        Self {
            store,
            txlog,
            notifier,
            handlers: HandlerRegistry::default(),
            settings,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_handlers(mut self, handlers: HandlerRegistry) -> Self {
        self.handlers = handlers;
        self
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Token that interrupts the run when cancelled.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    /// Run the requested policies in order.
    ///
    /// A failed policy is recorded and the next one runs. An interruption,
    /// or a failure leaving the two stores inconsistent, stops the run.
    pub async fn run(
        &self,
        connections: &mut ConnectionPair,
        request: &RunRequest,
    ) -> EngineResult<ProcessReport> {
        let policies = self.store.load_policies(&request.policies).await?;
        let params = request.params();
        let today = Utc::now().date_naive();
        let mut report = ProcessReport::default();
        let mut boundary: Option<NaiveDate> = None;
        let mut archive_failed = false;

        tracing::info!(policies = policies.len(), params = %params, "Starting archive process");

        for policy in &policies {
            if self.cancel.is_cancelled() {
                report.interrupted = true;
                break;
            }
            if !policy.enabled {
                tracing::info!(policy = %policy.name, "Policy is disabled, skipping");
                continue;
            }

            let aging = aging_date(
                policy,
                request.aging,
                self.settings.default_aging_days,
                today,
            );
            let (record, end) = self.run_policy(connections, policy, &params, aging).await;
            report.transactions.push(record);

            match end {
                PolicyEnd::Applied => {
                    if policy.is_archive() {
                        let date = aging.date();
                        boundary = Some(boundary.map_or(date, |b| b.min(date)));
                    }
                }
                PolicyEnd::Failed { fatal } => {
                    report.has_errors = true;
                    archive_failed |= policy.is_archive();
                    if fatal {
                        tracing::error!(policy = %policy.name, "Stopping archive process");
                        break;
                    }
                }
                PolicyEnd::Interrupted => {
                    report.has_errors = true;
                    archive_failed |= policy.is_archive();
                    report.interrupted = true;
                    break;
                }
            }
        }

        if !archive_failed {
            report.boundary_date = boundary;
        }
        tracing::info!(
            transactions = report.transactions.len(),
            records_affected = report.records_affected(),
            has_errors = report.has_errors,
            interrupted = report.interrupted,
            boundary_date = ?report.boundary_date,
            "Archive process finished"
        );
        Ok(report)
    }

    /// Resolve every requested policy's templates without running any SQL.
    pub async fn check(
        &self,
        names: &[String],
        family: DatabaseFamily,
    ) -> EngineResult<Vec<PolicyCheck>> {
        let policies = self.store.load_policies(names).await?;
        let today = Utc::now().date_naive();
        let mut checks = Vec::with_capacity(policies.len());
        for policy in &policies {
            let aging = aging_date(
                policy,
                AgingSelection::Default,
                self.settings.default_aging_days,
                today,
            );
            let result = self.check_policy(policy, family, aging).await;
            checks.push(PolicyCheck {
                policy: policy.name.clone(),
                result,
            });
        }
        Ok(checks)
    }

    async fn check_policy(
        &self,
        policy: &Policy,
        family: DatabaseFamily,
        aging: NaiveDateTime,
    ) -> EngineResult<usize> {
        policy.commit_strategy()?;
        self.handler_for(policy)?;
        let resolver = TemplateResolver::new(
            self.store.details(&policy.name).await?,
            self.store.parameters(&policy.name).await?,
            family,
            Utc::now().naive_utc(),
        );
        Ok(resolver.resolve_all(aging)?.len())
    }

    async fn run_policy(
        &self,
        connections: &mut ConnectionPair,
        policy: &Policy,
        params: &str,
        aging: NaiveDateTime,
    ) -> (TransactionRecord, PolicyEnd) {
        let run_timestamp = Utc::now().naive_utc();
        let mut record = TransactionRecord::pending(&policy.name, params, run_timestamp);

        tracing::info!(
            policy = %policy.name,
            transaction_id = %record.id,
            kind = policy.kind.as_str(),
            strategy = policy.strategy.as_str(),
            aging_date = %aging,
            "Processing policy"
        );

        if let Err(e) = self.open_transaction(connections, &record).await {
            tracing::error!(policy = %policy.name, error = %e, "Could not record transaction");
            record.status = TransactionStatus::Error;
            record.finished_at = Some(Utc::now().naive_utc());
            record.message = e.diagnostic();
            return (record, PolicyEnd::Failed { fatal: e.is_fatal() });
        }

        let mut records_affected = 0;
        let mut messages = Vec::new();
        let result = self
            .execute_policy(
                connections,
                policy,
                record.id,
                run_timestamp,
                aging,
                &mut records_affected,
                &mut messages,
            )
            .await;

        record.records_affected = records_affected;
        record.finished_at = Some(Utc::now().naive_utc());
        let mut end = match result {
            Ok(RunOutcome::Completed) => {
                record.status = TransactionStatus::Applied;
                record.message = format!(
                    "{records_affected} total records have been processed successfully \n{}",
                    messages.join("\n")
                );
                PolicyEnd::Applied
            }
            Ok(RunOutcome::Interrupted) => {
                record.status = TransactionStatus::Error;
                messages.push("Process interrupted".to_string());
                record.message = error_message(records_affected, &messages);
                PolicyEnd::Interrupted
            }
            Err(e) => {
                tracing::error!(
                    policy = %policy.name,
                    transaction_id = %record.id,
                    records_affected,
                    error = %e.diagnostic(),
                    "Policy failed"
                );
                if let Err(rollback) = connections.rollback().await {
                    tracing::error!(policy = %policy.name, error = %rollback, "Rollback failed");
                }
                record.status = TransactionStatus::Error;
                messages.push(e.diagnostic());
                record.message = error_message(records_affected, &messages);
                PolicyEnd::Failed {
                    fatal: e.is_fatal(),
                }
            }
        };

        notify_transaction(self.notifier.as_ref(), policy, &mut record).await;

        if let Err(e) = self.close_transaction(connections, &record).await {
            tracing::error!(
                policy = %policy.name,
                transaction_id = %record.id,
                error = %e,
                "Could not update transaction"
            );
            if matches!(end, PolicyEnd::Applied) {
                end = PolicyEnd::Failed { fatal: false };
            }
        }

        tracing::info!(
            policy = %policy.name,
            transaction_id = %record.id,
            status = %record.status,
            records_affected = record.records_affected,
            "Policy finished"
        );
        (record, end)
    }

    #[allow(clippy::too_many_arguments)]
    async fn execute_policy(
        &self,
        connections: &mut ConnectionPair,
        policy: &Policy,
        transaction_id: Uuid,
        run_timestamp: NaiveDateTime,
        aging: NaiveDateTime,
        records_affected: &mut u64,
        messages: &mut Vec<String>,
    ) -> EngineResult<RunOutcome> {
        let handler = self.handler_for(policy)?;
        if self.cancel.is_cancelled() {
            return Ok(RunOutcome::Interrupted);
        }

        let details = self.store.details(&policy.name).await?;
        let params = self.store.parameters(&policy.name).await?;

        let mut targets = vec![CommitTarget::CoreToArchive];
        if policy.purge_archive {
            targets.push(CommitTarget::ArchiveOnly);
        }

        for target in targets {
            let mut run = PolicyRun::new(
                policy,
                connections,
                &self.settings,
                self.txlog.as_ref(),
                transaction_id,
                target,
                self.cancel.clone(),
            );
            let resolver =
                TemplateResolver::new(details.clone(), params.clone(), run.family, run_timestamp);

            let result = match target {
                CommitTarget::CoreToArchive if policy.is_archive() => {
                    handler.perform_archive(&mut run, &resolver, aging).await
                }
                _ => handler.perform_purge(&mut run, &resolver, aging).await,
            };
            *records_affected += run.records_affected();
            messages.extend(run.messages().iter().cloned());

            if result? == RunOutcome::Interrupted {
                return Ok(RunOutcome::Interrupted);
            }
        }
        Ok(RunOutcome::Completed)
    }

    fn handler_for(&self, policy: &Policy) -> EngineResult<Arc<dyn PolicyHandler>> {
        let handler = self.handlers.get(&policy.handler).ok_or_else(|| {
            EngineError::configuration(format!(
                "No handler registered as '{}' for policy {}",
                policy.handler, policy.name
            ))
        })?;
        if policy.is_archive() && !handler.supports_archive() {
            return Err(EngineError::configuration(format!(
                "Archive policy is of ARCHIVE type but implementing class does not perform archiving for policy {}",
                policy.name
            )));
        }
        if !policy.is_archive() && !handler.supports_purge() {
            return Err(EngineError::configuration(format!(
                "Archive policy is of PURGE type but implementing class does not perform purging for policy {}",
                policy.name
            )));
        }
        Ok(handler)
    }

    /// Write the PENDING record and commit it on its own.
    async fn open_transaction(
        &self,
        connections: &mut ConnectionPair,
        record: &TransactionRecord,
    ) -> EngineResult<()> {
        let core = connections.core.as_mut();
        let result = match self.txlog.create_transaction(core, record).await {
            Ok(()) => core.commit().await.map_err(EngineError::from),
            Err(e) => Err(e),
        };
        if result.is_err() {
            rollback_transaction_log(core, record).await;
        }
        result
    }

    async fn close_transaction(
        &self,
        connections: &mut ConnectionPair,
        record: &TransactionRecord,
    ) -> EngineResult<()> {
        let core = connections.core.as_mut();
        let result = match self.txlog.update_transaction(core, record).await {
            Ok(()) => core.commit().await.map_err(EngineError::from),
            Err(e) => Err(e),
        };
        if result.is_err() {
            rollback_transaction_log(core, record).await;
        }
        result
    }
}

async fn rollback_transaction_log(core: &mut dyn DbConnection, record: &TransactionRecord) {
    if let Err(e) = core.rollback().await {
        tracing::error!(
            policy = %record.policy,
            transaction_id = %record.id,
            error = %e,
            "Rollback of transaction record failed"
        );
    }
}

fn error_message(records_affected: u64, messages: &[String]) -> String {
    format!(
        "{records_affected} total records have been processed successfully. \n Errors occurred during processing  :\n{}",
        messages.join("\n")
    )
}
