//! Commit and rollback scenarios
//!
//! Covers archive-then-purge, purge-only, archive-store purge, primary-key
//! chunking, the all-or-nothing fate of a failing batch, and an archive
//! commit that fails after the core side committed.

use std::sync::{Arc, atomic::Ordering};

use async_trait::async_trait;
use uuid::Uuid;

use super::harness::{
    Faults, FaultyConnection, Fixture, PAY_DDL, date, memory_connection, pay_rows, policy,
};
use crate::{
    db::DbConnection,
    engine::{
        Archiver, BulkTransfer, CommitTarget, EngineError, EngineResult, RunOutcome, RunRequest,
        TracingNotifier, TransactionStatus,
    },
    policy::{PolicyDetail, PolicyKind, StrategyKind, TomlPolicyStore},
};

fn work_files(fx: &Fixture) -> usize {
    std::fs::read_dir(fx.work_dir.path())
        .unwrap()
        .filter_map(Result::ok)
        .filter(|e| e.file_name().to_string_lossy().starts_with("archive-work-"))
        .count()
}

#[tokio::test]
async fn test_all_or_nothing_counts_only_matching_rows() {
    let mut fx = Fixture::database_mode().await;
    fx.create_table(PAY_DDL).await;
    fx.create_table("CREATE TABLE bonus (id INTEGER PRIMARY KEY, emp_id INTEGER)")
        .await;
    fx.seed_core(&pay_rows(10, 3)).await;
    fx.seed_core("INSERT INTO bonus VALUES (1, 1), (2, 2)").await;

    let policy = policy(
        PolicyKind::Archive,
        StrategyKind::AllOrNothing,
        vec![
            PolicyDetail::new("pay", "amount < 4", 1),
            PolicyDetail::new("bonus", "emp_id > 100", 2),
        ],
    );
    let result = fx.run_policy(&policy, date(2024, 1, 1)).await;

    assert_eq!(result.outcome.unwrap(), RunOutcome::Completed);
    assert_eq!(result.records_affected, 3);
    assert_eq!(fx.core_count("pay").await, 7);
    assert_eq!(fx.archive_count("pay").await, 3);
    assert_eq!(fx.core_count("bonus").await, 2);

    let details = fx.detail_messages().await;
    assert_eq!(details.len(), 1, "one committed batch");
    assert!(details[0].contains("3 records have been processed successfully"));
    assert!(details[0].contains("0 records have been processed successfully"));
    assert!(details[0].ends_with("Work Committed"));
    assert_eq!(work_files(&fx), 0);
}

#[tokio::test]
async fn test_failure_in_third_of_five_items_rolls_back_everything() {
    let mut fx = Fixture::database_mode().await;
    let mut details = Vec::new();
    for i in 1..=5 {
        let ddl = format!("CREATE TABLE t{i} (id INTEGER PRIMARY KEY, v INTEGER)");
        if i == 3 {
            // Missing from the archive, so the import fails
            fx.seed_core(&ddl).await;
        } else {
            fx.create_table(&ddl).await;
        }
        fx.seed_core(&format!("INSERT INTO t{i} VALUES (1, 1), (2, 2)"))
            .await;
        details.push(PolicyDetail::new(format!("t{i}"), "v > 0", i));
    }

    let policy = policy(PolicyKind::Archive, StrategyKind::AllOrNothing, details);
    let result = fx.run_policy(&policy, date(2024, 1, 1)).await;

    let err = result.outcome.unwrap_err();
    assert!(matches!(err, EngineError::Commit(_)), "got {err:?}");
    assert!(err.diagnostic().contains("t3"));
    assert!(!err.is_fatal());
    assert_eq!(result.records_affected, 0);

    for i in 1..=5 {
        assert_eq!(fx.core_count(&format!("t{i}")).await, 2, "core t{i}");
    }
    for i in [1, 2, 4, 5] {
        assert_eq!(fx.archive_count(&format!("t{i}")).await, 0, "archive t{i}");
    }
    assert!(fx.detail_messages().await.is_empty());
    assert_eq!(work_files(&fx), 0);
}

#[tokio::test]
async fn test_primary_key_items_run_once_per_chunk() {
    let mut fx = Fixture::database_mode().await;
    fx.settings.in_clause_limit = 2;
    fx.create_table(PAY_DDL).await;
    fx.create_table("CREATE TABLE pay_line (id INTEGER PRIMARY KEY, pay_id INTEGER)")
        .await;
    fx.seed_core(&pay_rows(5, 5)).await;
    let lines: Vec<String> = (1..=10).map(|i| format!("({i}, {})", (i - 1) / 2 + 1)).collect();
    fx.seed_core(&format!("INSERT INTO pay_line VALUES {}", lines.join(", ")))
        .await;

    // Both tables capture keys before the parent rows are deleted
    let policy = policy(
        PolicyKind::Archive,
        StrategyKind::AllOrNothing,
        vec![
            PolicyDetail::new("pay", "amount > 0", 1).with_primary_key(),
            PolicyDetail::new("pay_line", "pay_id IN (SELECT id FROM pay WHERE #WHERE.pay#)", 2)
                .with_primary_key(),
        ],
    );
    let result = fx.run_policy(&policy, date(2024, 1, 1)).await;

    assert_eq!(result.outcome.unwrap(), RunOutcome::Completed);
    assert_eq!(result.records_affected, 15);
    assert_eq!(fx.archive_count("pay").await, 5);
    assert_eq!(fx.archive_count("pay_line").await, 10);
    assert_eq!(fx.core_count("pay").await, 0);
    assert_eq!(fx.core_count("pay_line").await, 0);

    let details = fx.detail_messages().await;
    assert!(details[0].contains("Resolved 5 primary key(s) of pay"));
    assert!(details[0].contains("Resolved 10 primary key(s) of pay_line"));
}

#[tokio::test]
async fn test_purge_policy_deletes_without_archiving() {
    let mut fx = Fixture::database_mode().await;
    fx.create_table(PAY_DDL).await;
    fx.seed_core(&pay_rows(10, 3)).await;

    let policy = policy(
        PolicyKind::Purge,
        StrategyKind::AllOrNothing,
        vec![PolicyDetail::new("pay", "emp_id = 1", 1)],
    );
    let result = fx.run_policy(&policy, date(2024, 1, 1)).await;

    assert_eq!(result.outcome.unwrap(), RunOutcome::Completed);
    assert_eq!(result.records_affected, 4);
    assert_eq!(fx.core_count("pay").await, 6);
    assert_eq!(fx.archive_count("pay").await, 0);
}

/// Transfer that never copies anything.
struct NullTransfer;

#[async_trait]
impl BulkTransfer for NullTransfer {
    async fn transfer(
        &self,
        _: Uuid,
        _: &mut dyn DbConnection,
        _: &mut dyn DbConnection,
        _: &str,
        _: &str,
    ) -> EngineResult<u64> {
        Ok(0)
    }

    async fn cleanup(&self, _: Uuid) -> Vec<String> {
        Vec::new()
    }
}

#[tokio::test]
async fn test_rows_are_not_deleted_when_nothing_moved() {
    let mut fx = Fixture::database_mode()
        .await
        .with_transfer(Arc::new(NullTransfer));
    fx.create_table(PAY_DDL).await;
    fx.seed_core(&pay_rows(4, 2)).await;

    let policy = policy(
        PolicyKind::Archive,
        StrategyKind::AllOrNothing,
        vec![PolicyDetail::new("pay", "", 1)],
    );
    let result = fx.run_policy(&policy, date(2024, 1, 1)).await;

    assert_eq!(result.outcome.unwrap(), RunOutcome::Completed);
    assert_eq!(result.records_affected, 0);
    assert_eq!(fx.core_count("pay").await, 4);
}

#[tokio::test]
async fn test_schema_mode_copies_into_attached_schema() {
    let mut fx = Fixture::schema_mode().await;
    fx.create_table(PAY_DDL).await;
    fx.seed_core(&pay_rows(10, 3)).await;

    let policy = policy(
        PolicyKind::Archive,
        StrategyKind::AllOrNothing,
        vec![PolicyDetail::new("pay", "pay_date < #AGING_DATE#", 1)],
    );
    let result = fx.run_policy(&policy, date(2023, 1, 6)).await;

    assert_eq!(result.outcome.unwrap(), RunOutcome::Completed);
    assert_eq!(result.records_affected, 5);
    assert_eq!(fx.core_count("pay").await, 5);
    assert_eq!(fx.archive_count("pay").await, 5);
}

#[tokio::test]
async fn test_archive_only_target_purges_archive_store() {
    let mut fx = Fixture::database_mode().await;
    fx.create_table(PAY_DDL).await;
    fx.seed_core(&pay_rows(3, 3)).await;
    fx.seed_archive(&pay_rows(4, 2)).await;

    let policy = policy(
        PolicyKind::Archive,
        StrategyKind::AllOrNothing,
        vec![PolicyDetail::new("pay", "emp_id = 2", 1)],
    );
    let result = fx
        .run_target(&policy, CommitTarget::ArchiveOnly, date(2024, 1, 1))
        .await;

    assert_eq!(result.outcome.unwrap(), RunOutcome::Completed);
    assert_eq!(result.records_affected, 2);
    assert!(
        result
            .messages
            .contains(&"2 records have been deleted from Archive DB".to_string())
    );
    assert_eq!(fx.archive_count("pay").await, 2);
    assert_eq!(fx.core_count("pay").await, 3);
    // The batch record is written on the core connection
    assert_eq!(fx.detail_messages().await.len(), 1);
}

#[tokio::test]
async fn test_commit_with_nothing_queued_is_a_no_op() {
    let mut fx = Fixture::database_mode().await;
    let policy = policy(
        PolicyKind::Archive,
        StrategyKind::AllOrNothing,
        vec![PolicyDetail::new("pay", "", 1)],
    );
    let settings = fx.settings.clone();
    let mut run = crate::engine::PolicyRun::new(
        &policy,
        &mut fx.connections,
        &settings,
        &fx.txlog,
        Uuid::new_v4(),
        CommitTarget::CoreToArchive,
        fx.cancel.clone(),
    );
    run.log("No records found for this policy detail pay");
    assert_eq!(run.commit().await.unwrap(), 0);
    assert_eq!(run.messages().len(), 1);
    assert!(run.accumulator().is_empty());
    drop(run);
    assert!(fx.detail_messages().await.is_empty());
}

/// Pay fixture whose archive connection refuses to commit once switched.
async fn faulty_archive_fixture() -> (Fixture, Arc<Faults>) {
    let mut fx = Fixture::database_mode().await;
    fx.create_table(PAY_DDL).await;
    fx.seed_core(&pay_rows(10, 3)).await;
    let archive = std::mem::replace(&mut fx.connections.archive, memory_connection().await);
    let (archive, faults) = FaultyConnection::wrap(archive);
    fx.connections.archive = archive;
    (fx, faults)
}

#[tokio::test]
async fn test_archive_commit_failure_after_core_commit_is_fatal() {
    let (mut fx, faults) = faulty_archive_fixture().await;
    faults.fail_commit.store(true, Ordering::SeqCst);

    let policy = policy(
        PolicyKind::Archive,
        StrategyKind::AllOrNothing,
        vec![PolicyDetail::new("pay", "amount < 4", 1)],
    );
    let result = fx.run_policy(&policy, date(2024, 1, 1)).await;

    let err = result.outcome.unwrap_err();
    assert!(matches!(err.root(), EngineError::Inconsistent(_)), "got {err:?}");
    assert!(err.is_fatal());
    assert!(err.diagnostic().contains("commit refused"));

    faults.fail_commit.store(false, Ordering::SeqCst);
    // The core side committed: rows are gone there and never reached the archive
    assert_eq!(fx.core_count("pay").await, 7);
    assert_eq!(fx.archive_count("pay").await, 0);
    assert_eq!(fx.detail_messages().await.len(), 1);
}

#[tokio::test]
async fn test_inconsistent_commit_stops_the_process() {
    let (mut fx, faults) = faulty_archive_fixture().await;
    faults.fail_commit.store(true, Ordering::SeqCst);

    let mut first = policy(
        PolicyKind::Archive,
        StrategyKind::AllOrNothing,
        vec![PolicyDetail::new("pay", "amount < 4", 1)],
    );
    first.name = "first".into();
    let mut second = first.clone();
    second.name = "second".into();
    second.details = vec![PolicyDetail::new("pay", "amount > 8", 1)];

    let archiver = Archiver::new(
        Arc::new(TomlPolicyStore::new(vec![first, second]).unwrap()),
        Arc::new(fx.txlog.clone()),
        Arc::new(TracingNotifier),
        fx.settings.clone(),
    );
    let report = archiver
        .run(&mut fx.connections, &RunRequest::default())
        .await
        .unwrap();

    assert!(report.has_errors);
    assert!(!report.interrupted);
    assert_eq!(report.boundary_date, None);
    assert_eq!(report.transactions.len(), 1, "second policy must not start");
    assert_eq!(report.transactions[0].policy, "first");
    assert_eq!(report.transactions[0].status, TransactionStatus::Error);

    faults.fail_commit.store(false, Ordering::SeqCst);
    // Rows 9 and 10 belong to the policy that never ran
    assert_eq!(fx.core_count("pay").await, 7);
}
