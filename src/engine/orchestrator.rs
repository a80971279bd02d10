//! Drives a policy run according to its commit strategy.
//!
//! | Strategy              | Batches                               |
//! |-----------------------|---------------------------------------|
//! | `ALL_OR_NOTHING`      | every detail, one commit              |
//! | `EVERY_POLICY_DETAIL` | one commit per detail                 |
//! | `EVERY_X_DAYS`        | one commit per calendar window        |
//! | `EVERY_X_EMPLOYEES`   | one commit per identity slice         |
//! | `EVERY_X_RECORDS`     | one commit per row window per detail  |
//!
//! The cancellation token is polled before every queued item. Once it
//! fires, queued but uncommitted work is rolled back and no further batch
//! starts.

use chrono::NaiveDateTime;

use super::{
    EngineResult,
    run::{PolicyRun, RunOutcome},
    template::{ALWAYS_TRUE, TemplateResolver},
    tokenizer::{Batch, DayTokenizer, IdentitySettings, IdentityTokenizer, RecordTokenizer},
};
use crate::policy::CommitStrategy;

/// Run `strategy` to completion, interruption or failure.
///
/// Queued work is rolled back on failure and on interruption, so the
/// accumulator is always empty when this returns.
pub async fn execute(
    run: &mut PolicyRun<'_>,
    resolver: &TemplateResolver,
    strategy: &CommitStrategy,
    aging: NaiveDateTime,
) -> EngineResult<RunOutcome> {
    tracing::info!(
        policy = %run.policy.name,
        transaction_id = %run.transaction_id,
        target = ?run.target,
        family = %run.family,
        aging_date = %aging,
        "Running policy"
    );
    let result = dispatch(run, resolver, strategy, aging).await;
    match result {
        Ok(RunOutcome::Completed) => Ok(RunOutcome::Completed),
        Ok(RunOutcome::Interrupted) => {
            tracing::warn!(policy = %run.policy.name, "Policy run interrupted");
            run.rollback().await;
            Ok(RunOutcome::Interrupted)
        }
        Err(e) => {
            run.rollback().await;
            Err(e)
        }
    }
}

async fn dispatch(
    run: &mut PolicyRun<'_>,
    resolver: &TemplateResolver,
    strategy: &CommitStrategy,
    aging: NaiveDateTime,
) -> EngineResult<RunOutcome> {
    match strategy {
        CommitStrategy::AllOrNothing => {
            let batch = Batch {
                label: "Processing all policy details".to_string(),
                details: resolver.resolve_all(aging)?,
            };
            process_batch(run, &batch).await
        }
        CommitStrategy::EveryPolicyDetail => {
            for detail in resolver.resolve_all(aging)? {
                let batch = Batch {
                    label: format!("Processing policy detail for table {}", detail.table()),
                    details: vec![detail],
                };
                if process_batch(run, &batch).await? == RunOutcome::Interrupted {
                    return Ok(RunOutcome::Interrupted);
                }
            }
            Ok(RunOutcome::Completed)
        }
        CommitStrategy::EveryXDays {
            start_date,
            batch_days,
        } => {
            let tokenizer = DayTokenizer::new(resolver, *start_date, aging, *batch_days);
            for batch in tokenizer {
                if process_batch(run, &batch?).await? == RunOutcome::Interrupted {
                    return Ok(RunOutcome::Interrupted);
                }
            }
            Ok(RunOutcome::Completed)
        }
        CommitStrategy::EveryXEmployees {
            batch_size,
            controlling_priority,
        } => {
            let engine = run.settings;
            let settings = IdentitySettings {
                column: &engine.identity_column,
                family: run.family,
                in_clause_limit: engine.in_clause_limit,
                batch_size: *batch_size,
                controlling_priority: *controlling_priority,
            };
            let details = resolver.resolve_all(aging)?;
            let tokenizer = IdentityTokenizer::new(run.source(), details, settings).await?;
            if tokenizer.total() == 0 {
                run.log("No employees found for this policy");
                run.commit().await?;
            }
            for batch in tokenizer {
                if process_batch(run, &batch?).await? == RunOutcome::Interrupted {
                    return Ok(RunOutcome::Interrupted);
                }
            }
            Ok(RunOutcome::Completed)
        }
        CommitStrategy::EveryXRecords { batch_record_count } => {
            for detail in resolver.resolve_all(aging)? {
                let detail = detail.with_identity_predicate(ALWAYS_TRUE);
                let family = run.family;
                let mut tokenizer =
                    RecordTokenizer::new(run.source(), detail, family, *batch_record_count)
                        .await?;
                if !tokenizer.has_any() {
                    run.log(format!(
                        "No records found for this policy detail {}",
                        tokenizer.detail().table()
                    ));
                    run.commit().await?;
                    continue;
                }
                while let Some(batch) = tokenizer.next_batch(run.source()).await? {
                    if process_batch(run, &batch).await? == RunOutcome::Interrupted {
                        return Ok(RunOutcome::Interrupted);
                    }
                }
            }
            Ok(RunOutcome::Completed)
        }
    }
}

/// Queue every detail of `batch`, then commit it.
async fn process_batch(run: &mut PolicyRun<'_>, batch: &Batch) -> EngineResult<RunOutcome> {
    run.log(batch.label.as_str());
    for detail in &batch.details {
        if run.is_interrupted() {
            return Ok(RunOutcome::Interrupted);
        }
        run.queue(detail).await?;
    }
    run.commit().await?;
    Ok(RunOutcome::Completed)
}
