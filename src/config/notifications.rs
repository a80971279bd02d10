use serde::{Deserialize, Serialize};

use super::ConfigError;

/// Where run summaries go when a policy asks to be notified.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
#[serde(deny_unknown_fields)]
pub enum NotificationsConfig {
    /// Summaries are written to the log.
    #[default]
    Log,

    /// Summaries are POSTed as JSON to a webhook.
    #[cfg(feature = "webhook")]
    Webhook(WebhookConfig),
}

impl NotificationsConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        match self {
            NotificationsConfig::Log => Ok(()),
            #[cfg(feature = "webhook")]
            NotificationsConfig::Webhook(c) => {
                if c.url.is_empty() {
                    return Err(ConfigError::Validation(
                        "notifications.url cannot be empty".into(),
                    ));
                }
                Ok(())
            }
        }
    }
}

#[cfg(feature = "webhook")]
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WebhookConfig {
    /// Endpoint receiving the JSON summary.
    pub url: String,

    /// Request timeout in seconds.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

#[cfg(feature = "webhook")]
fn default_timeout_secs() -> u64 {
    10
}

/// Transaction-log table names.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TransactionLogConfig {
    /// Table holding one row per policy run.
    #[serde(default = "default_transactions_table")]
    pub transactions_table: String,

    /// Table holding one row per committed batch.
    #[serde(default = "default_details_table")]
    pub details_table: String,
}

impl Default for TransactionLogConfig {
    fn default() -> Self {
        Self {
            transactions_table: default_transactions_table(),
            details_table: default_details_table(),
        }
    }
}

fn default_transactions_table() -> String {
    "archive_transactions".to_string()
}

fn default_details_table() -> String {
    "archive_transaction_details".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_log() {
        assert!(matches!(NotificationsConfig::default(), NotificationsConfig::Log));
    }

    #[cfg(feature = "webhook")]
    #[test]
    fn test_parse_webhook() {
        let config: NotificationsConfig = toml::from_str(
            r#"
            type = "webhook"
            url = "https://hooks.example.com/archive"
        "#,
        )
        .unwrap();
        match config {
            NotificationsConfig::Webhook(c) => {
                assert_eq!(c.url, "https://hooks.example.com/archive");
                assert_eq!(c.timeout_secs, 10);
            }
            other => panic!("unexpected config {other:?}"),
        }
    }

    #[test]
    fn test_transaction_log_defaults() {
        let config = TransactionLogConfig::default();
        assert_eq!(config.transactions_table, "archive_transactions");
        assert_eq!(config.details_table, "archive_transaction_details");
    }
}
