//! Engine configuration.
//!
//! Controls how rows are moved into the archive store and the shared
//! constants every policy run uses.
//!
//! # Example
//!
//! ```toml
//! [engine]
//! identity_column = "emp_id"
//! in_clause_limit = 500
//! default_aging_days = 99999
//!
//! [engine.mode]
//! type = "schema"
//! archive_schema = "archive"
//! ```

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use super::ConfigError;
use crate::dialect::DatabaseFamily;

/// Engine configuration shared by every policy run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EngineConfig {
    /// How archived rows reach the archive store.
    #[serde(default)]
    pub mode: ArchiveMode,

    /// Column used by `#EMP_ID_SELECTOR#` and the identity tokenizer.
    /// Default: "emp_id"
    #[serde(default = "default_identity_column")]
    pub identity_column: String,

    /// Maximum number of key values in one `IN (...)` predicate.
    /// Default: 500
    #[serde(default = "default_in_clause_limit")]
    pub in_clause_limit: usize,

    /// Aging days used when a run does not override them.
    /// Default: 99999 (effectively the 1900-01-01 floor)
    #[serde(default = "default_aging_days")]
    pub default_aging_days: u32,

    /// SQL family to generate fragments for. Defaults to the core driver's
    /// family; set it when the core database is reached through a gateway
    /// whose SQL dialect differs from the driver.
    #[serde(default)]
    pub dialect: Option<DatabaseFamily>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            mode: ArchiveMode::default(),
            identity_column: default_identity_column(),
            in_clause_limit: default_in_clause_limit(),
            default_aging_days: default_aging_days(),
            dialect: None,
        }
    }
}

impl EngineConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.identity_column.trim().is_empty() {
            return Err(ConfigError::Validation(
                "engine.identity_column cannot be empty".into(),
            ));
        }
        if self.in_clause_limit == 0 {
            return Err(ConfigError::Validation(
                "engine.in_clause_limit must be greater than zero".into(),
            ));
        }
        self.mode.validate()
    }
}

fn default_identity_column() -> String {
    "emp_id".to_string()
}

fn default_in_clause_limit() -> usize {
    500
}

fn default_aging_days() -> u32 {
    99_999
}

/// Archive transfer mode.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
#[serde(deny_unknown_fields)]
pub enum ArchiveMode {
    /// The archive tables live in a schema reachable from the core
    /// connection; rows are copied with `INSERT INTO <schema>.<table> SELECT`.
    Schema {
        #[serde(default = "default_archive_schema")]
        archive_schema: String,
    },

    /// The archive store is a separate database; rows are exported to a
    /// working file and imported through the archive connection.
    Database {
        #[serde(default = "default_work_dir")]
        work_dir: PathBuf,
    },
}

impl Default for ArchiveMode {
    fn default() -> Self {
        ArchiveMode::Schema {
            archive_schema: default_archive_schema(),
        }
    }
}

impl ArchiveMode {
    fn validate(&self) -> Result<(), ConfigError> {
        match self {
            ArchiveMode::Schema { archive_schema } if archive_schema.trim().is_empty() => Err(
                ConfigError::Validation("engine.mode.archive_schema cannot be empty".into()),
            ),
            _ => Ok(()),
        }
    }
}

fn default_archive_schema() -> String {
    "archive".to_string()
}

fn default_work_dir() -> PathBuf {
    std::env::temp_dir()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = EngineConfig::default();
        assert_eq!(config.identity_column, "emp_id");
        assert_eq!(config.in_clause_limit, 500);
        assert_eq!(config.default_aging_days, 99_999);
        assert_eq!(
            config.mode,
            ArchiveMode::Schema {
                archive_schema: "archive".into()
            }
        );
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_database_mode() {
        let config: EngineConfig = toml::from_str(
            r#"
            identity_column = "person_id"
            dialect = "db2_zos"

            [mode]
            type = "database"
            work_dir = "/var/tmp/archivist"
        "#,
        )
        .unwrap();
        assert_eq!(config.identity_column, "person_id");
        assert_eq!(config.dialect, Some(DatabaseFamily::Db2Zos));
        assert_eq!(
            config.mode,
            ArchiveMode::Database {
                work_dir: PathBuf::from("/var/tmp/archivist")
            }
        );
    }

    #[test]
    fn test_zero_in_clause_limit_rejected() {
        let config = EngineConfig {
            in_clause_limit: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_blank_archive_schema_rejected() {
        let config = EngineConfig {
            mode: ArchiveMode::Schema {
                archive_schema: " ".into(),
            },
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
