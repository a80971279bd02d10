//! Policy definitions as stored in policy data.
//!
//! A policy names the tables to archive or purge, the filter template for
//! each, and how the work is split into committed batches.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use super::PolicyError;

/// One archive or purge policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Policy {
    pub name: String,

    /// Whether matching rows are archived before being purged.
    pub kind: PolicyKind,

    /// Disabled policies are skipped by the process runner.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Name of the registered handler that runs this policy.
    #[serde(default = "default_handler")]
    pub handler: String,

    /// Days of data kept in the core store. The aging boundary is today
    /// minus this many days.
    #[serde(default)]
    pub aging_days: Option<u32>,

    /// How the work is split into committed batches.
    pub strategy: StrategyKind,

    /// `EVERY_X_DAYS`: first day of the first window.
    #[serde(default)]
    pub start_date: Option<NaiveDate>,

    /// `EVERY_X_DAYS`: width of each window in days.
    #[serde(default)]
    pub batch_days: Option<u32>,

    /// `EVERY_X_EMPLOYEES`: identities per batch.
    #[serde(default)]
    pub batch_size: Option<usize>,

    /// `EVERY_X_EMPLOYEES`: priority of the detail whose filter selects
    /// the identity set.
    #[serde(default)]
    pub controlling_priority: Option<i32>,

    /// `EVERY_X_RECORDS`: rows per batch.
    #[serde(default)]
    pub batch_record_count: Option<u64>,

    /// Also purge the archive store after the main run.
    #[serde(default)]
    pub purge_archive: bool,

    #[serde(default)]
    pub notify: Option<NotifyTarget>,

    #[serde(default)]
    pub details: Vec<PolicyDetail>,

    #[serde(default)]
    pub params: Vec<PolicyParameter>,
}

fn default_true() -> bool {
    true
}

fn default_handler() -> String {
    "default".to_string()
}

impl Policy {
    pub fn is_archive(&self) -> bool {
        self.kind == PolicyKind::Archive
    }

    /// Build the commit strategy from the flat strategy settings.
    pub fn commit_strategy(&self) -> Result<CommitStrategy, PolicyError> {
        let missing = |field: &str| {
            PolicyError::Invalid(format!(
                "policy '{}': strategy {} requires '{}'",
                self.name,
                self.strategy.as_str(),
                field
            ))
        };
        let zero = |field: &str| {
            PolicyError::Invalid(format!(
                "policy '{}': '{}' must be greater than zero",
                self.name, field
            ))
        };

        match self.strategy {
            StrategyKind::AllOrNothing => Ok(CommitStrategy::AllOrNothing),
            StrategyKind::EveryPolicyDetail => Ok(CommitStrategy::EveryPolicyDetail),
            StrategyKind::EveryXDays => {
                let start_date = self.start_date.ok_or_else(|| missing("start_date"))?;
                let batch_days = self.batch_days.ok_or_else(|| missing("batch_days"))?;
                if batch_days == 0 {
                    return Err(zero("batch_days"));
                }
                Ok(CommitStrategy::EveryXDays {
                    start_date,
                    batch_days,
                })
            }
            StrategyKind::EveryXEmployees => {
                let batch_size = self.batch_size.ok_or_else(|| missing("batch_size"))?;
                let controlling_priority = self
                    .controlling_priority
                    .ok_or_else(|| missing("controlling_priority"))?;
                if batch_size == 0 {
                    return Err(zero("batch_size"));
                }
                Ok(CommitStrategy::EveryXEmployees {
                    batch_size,
                    controlling_priority,
                })
            }
            StrategyKind::EveryXRecords => {
                let batch_record_count = self
                    .batch_record_count
                    .ok_or_else(|| missing("batch_record_count"))?;
                if batch_record_count == 0 {
                    return Err(zero("batch_record_count"));
                }
                Ok(CommitStrategy::EveryXRecords { batch_record_count })
            }
        }
    }

    /// Details in processing order (ascending priority, stable).
    pub fn ordered_details(&self) -> Vec<PolicyDetail> {
        let mut details = self.details.clone();
        details.sort_by_key(|d| d.priority);
        details
    }

    pub fn validate(&self) -> Result<(), PolicyError> {
        if self.name.trim().is_empty() {
            return Err(PolicyError::Invalid("policy name cannot be empty".into()));
        }
        if self.details.is_empty() {
            return Err(PolicyError::Invalid(format!(
                "policy '{}' has no details",
                self.name
            )));
        }
        for detail in &self.details {
            if detail.table.trim().is_empty() {
                return Err(PolicyError::Invalid(format!(
                    "policy '{}': detail with priority {} has no table",
                    self.name, detail.priority
                )));
            }
        }
        self.commit_strategy().map(|_| ())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PolicyKind {
    Archive,
    Purge,
}

impl PolicyKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            PolicyKind::Archive => "archive",
            PolicyKind::Purge => "purge",
        }
    }
}

/// Commit strategy identifiers as they appear in stored policies.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StrategyKind {
    AllOrNothing,
    EveryPolicyDetail,
    EveryXDays,
    EveryXEmployees,
    EveryXRecords,
}

impl StrategyKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StrategyKind::AllOrNothing => "ALL_OR_NOTHING",
            StrategyKind::EveryPolicyDetail => "EVERY_POLICY_DETAIL",
            StrategyKind::EveryXDays => "EVERY_X_DAYS",
            StrategyKind::EveryXEmployees => "EVERY_X_EMPLOYEES",
            StrategyKind::EveryXRecords => "EVERY_X_RECORDS",
        }
    }
}

/// A validated commit strategy with its settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommitStrategy {
    AllOrNothing,
    EveryPolicyDetail,
    EveryXDays {
        start_date: NaiveDate,
        batch_days: u32,
    },
    EveryXEmployees {
        batch_size: usize,
        controlling_priority: i32,
    },
    EveryXRecords {
        batch_record_count: u64,
    },
}

/// One table-scoped filter rule.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct PolicyDetail {
    pub table: String,

    /// Raw filter template, e.g. `created_at < #AGING_DATE#`.
    #[serde(default)]
    pub filter: String,

    #[serde(default)]
    pub priority: i32,

    /// Capture matching primary keys once and move/delete by key.
    #[serde(default)]
    pub resolve_to_primary_key: bool,
}

impl PolicyDetail {
    pub fn new(table: impl Into<String>, filter: impl Into<String>, priority: i32) -> Self {
        Self {
            table: table.into(),
            filter: filter.into(),
            priority,
            resolve_to_primary_key: false,
        }
    }

    pub fn with_primary_key(mut self) -> Self {
        self.resolve_to_primary_key = true;
        self
    }
}

/// Named value substituted for `#PARAM.<name>#`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct PolicyParameter {
    pub name: String,
    pub value: String,
    #[serde(default)]
    pub kind: ParamKind,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ParamKind {
    /// Quoted string literal.
    #[default]
    Text,
    /// Bare numeric literal.
    Number,
    /// Date rendered as a dialect timestamp literal.
    Date,
    /// SQL inserted verbatim.
    Expression,
}

/// Notification target of a policy.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct NotifyTarget {
    /// Recipient (address, channel or user, interpreted by the notifier).
    pub to: String,
    #[serde(default)]
    pub on: NotifyOn,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum NotifyOn {
    #[default]
    Always,
    Success,
    Error,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(toml_str: &str) -> Policy {
        toml::from_str(toml_str).unwrap()
    }

    #[test]
    fn test_parse_every_x_days_policy() {
        let policy = parse(
            r#"
            name = "timesheets"
            kind = "archive"
            aging_days = 365
            strategy = "EVERY_X_DAYS"
            start_date = "2020-01-01"
            batch_days = 30

            [[details]]
            table = "work_summary"
            filter = "wrks_work_date < #AGING_DATE#"
            priority = 1
        "#,
        );
        assert!(policy.enabled);
        assert_eq!(policy.handler, "default");
        assert!(policy.is_archive());
        assert_eq!(
            policy.commit_strategy().unwrap(),
            CommitStrategy::EveryXDays {
                start_date: NaiveDate::from_ymd_opt(2020, 1, 1).unwrap(),
                batch_days: 30,
            }
        );
    }

    #[test]
    fn test_missing_strategy_setting_rejected() {
        let policy = parse(
            r#"
            name = "p"
            kind = "purge"
            strategy = "EVERY_X_EMPLOYEES"
            batch_size = 10

            [[details]]
            table = "t"
        "#,
        );
        let err = policy.commit_strategy().unwrap_err();
        assert!(err.to_string().contains("controlling_priority"));
    }

    #[test]
    fn test_zero_batch_rejected() {
        let policy = parse(
            r#"
            name = "p"
            kind = "purge"
            strategy = "EVERY_X_RECORDS"
            batch_record_count = 0

            [[details]]
            table = "t"
        "#,
        );
        assert!(policy.validate().is_err());
    }

    #[test]
    fn test_ordered_details_sorts_by_priority() {
        let policy = parse(
            r#"
            name = "p"
            kind = "purge"
            strategy = "ALL_OR_NOTHING"

            [[details]]
            table = "b"
            priority = 2

            [[details]]
            table = "a"
            priority = 1
        "#,
        );
        let tables: Vec<_> = policy
            .ordered_details()
            .into_iter()
            .map(|d| d.table)
            .collect();
        assert_eq!(tables, vec!["a", "b"]);
    }

    #[test]
    fn test_policy_without_details_rejected() {
        let policy = parse(
            r#"
            name = "empty"
            kind = "purge"
            strategy = "ALL_OR_NOTHING"
        "#,
        );
        assert!(policy.validate().is_err());
    }
}
