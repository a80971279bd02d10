//! Run summaries sent to a policy's notification target.

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;

use super::txlog::{TransactionRecord, TransactionStatus};
use crate::{
    config::NotificationsConfig,
    policy::{NotifyOn, Policy},
};

pub const NOTIFICATION_SUBJECT: &str = "Archiving results";

/// Longest notification body, in characters.
pub const MAX_BODY_CHARS: usize = 4000;

#[derive(Debug, Error)]
pub enum NotifyError {
    #[cfg(feature = "webhook")]
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Notification rejected: {0}")]
    Rejected(String),
}

/// A summary addressed to one recipient.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Notification {
    pub to: String,
    pub subject: String,
    pub body: String,
}

impl Notification {
    /// Summary of a finished transaction.
    pub fn for_transaction(to: &str, record: &TransactionRecord) -> Self {
        let body = format!(
            "{} Status : {} Run params : {}",
            record.message, record.status, record.params
        );
        Self {
            to: to.to_string(),
            subject: NOTIFICATION_SUBJECT.to_string(),
            body: body.chars().take(MAX_BODY_CHARS).collect(),
        }
    }
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, notification: &Notification) -> Result<(), NotifyError>;
}

pub fn should_notify(on: NotifyOn, status: TransactionStatus) -> bool {
    match on {
        NotifyOn::Always => true,
        NotifyOn::Success => status == TransactionStatus::Applied,
        NotifyOn::Error => status == TransactionStatus::Error,
    }
}

/// Send the summary of `record` if the policy asks for it, and append the
/// outcome to the transaction message. Never fails.
pub async fn notify_transaction(
    notifier: &dyn Notifier,
    policy: &Policy,
    record: &mut TransactionRecord,
) {
    let Some(target) = &policy.notify else {
        return;
    };
    if !should_notify(target.on, record.status) {
        return;
    }

    let notification = Notification::for_transaction(&target.to, record);
    match notifier.send(&notification).await {
        Ok(()) => {
            record
                .message
                .push_str(&format!("\nNotification sent to {}", target.to));
        }
        Err(e) => {
            tracing::warn!(
                policy = %policy.name,
                to = %target.to,
                error = %e,
                "Failed to send notification"
            );
            record.message.push_str(&format!(
                "\nCould not send notification but transaction completed. Error : {e}"
            ));
        }
    }
}

/// Writes notifications to the log.
#[derive(Debug, Clone, Default)]
pub struct TracingNotifier;

#[async_trait]
impl Notifier for TracingNotifier {
    async fn send(&self, notification: &Notification) -> Result<(), NotifyError> {
        tracing::info!(
            to = %notification.to,
            subject = %notification.subject,
            body = %notification.body,
            "Notification"
        );
        Ok(())
    }
}

/// POSTs notifications as JSON.
#[cfg(feature = "webhook")]
#[derive(Debug, Clone)]
pub struct WebhookNotifier {
    client: reqwest::Client,
    url: String,
}

#[cfg(feature = "webhook")]
impl WebhookNotifier {
    pub fn new(config: &crate::config::WebhookConfig) -> Result<Self, NotifyError> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            client,
            url: config.url.clone(),
        })
    }
}

#[cfg(feature = "webhook")]
#[async_trait]
impl Notifier for WebhookNotifier {
    async fn send(&self, notification: &Notification) -> Result<(), NotifyError> {
        let response = self
            .client
            .post(&self.url)
            .json(notification)
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            return Err(NotifyError::Rejected(format!(
                "{} returned {status}",
                self.url
            )));
        }
        Ok(())
    }
}

/// Build the notifier selected in configuration.
pub fn from_config(
    config: &NotificationsConfig,
) -> Result<std::sync::Arc<dyn Notifier>, NotifyError> {
    match config {
        NotificationsConfig::Log => Ok(std::sync::Arc::new(TracingNotifier)),
        #[cfg(feature = "webhook")]
        NotificationsConfig::Webhook(c) => Ok(std::sync::Arc::new(WebhookNotifier::new(c)?)),
    }
}
