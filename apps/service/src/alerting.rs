//! Alert trigger and notifier collaborators.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::database::Database;
use crate::monitoring::types::ProbeResult;

pub const ALERT_SUBJECT: &str = "Urgent: Your Website Is Down – Immediate Action Required";

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("notifier transport failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("notifier rejected alert with status {status}: {body}")]
    Rejected { status: u16, body: String },
}

/// Template fields of the alert mail. All values are rendered as strings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AlertBody {
    pub response_time: String,
    pub url: String,
    pub status_code: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AlertRequest {
    pub recipients: Vec<String>,
    pub subject: String,
    pub body: AlertBody,
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, alert: &AlertRequest) -> Result<(), NotifyError>;
}

/// Writes alerts to the log instead of delivering them.
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, alert: &AlertRequest) -> Result<(), NotifyError> {
        info!(
            recipients = ?alert.recipients,
            url = %alert.body.url,
            status_code = %alert.body.status_code,
            "{}",
            alert.subject
        );
        Ok(())
    }
}

/// POSTs the alert as JSON to a mail relay or chat hook.
pub struct WebhookNotifier {
    client: Client,
    url: String,
}

impl WebhookNotifier {
    /// `timeout` bounds each delivery, so a hung endpoint cannot pile up dispatch tasks.
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = Client::builder().timeout(timeout).connect_timeout(timeout).build()?;
        Ok(Self { client, url: url.into() })
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn notify(&self, alert: &AlertRequest) -> Result<(), NotifyError> {
        let response = self.client.post(&self.url).json(alert).send().await?;
        let status = response.status();

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(NotifyError::Rejected { status: status.as_u16(), body });
        }

        Ok(())
    }
}

/// Decides from a probe result whether an alert goes out.
///
/// Only the configured HTTP status codes alert. Transport errors are recorded
/// in the log but never alert on their own.
pub struct AlertTrigger {
    status_codes: HashSet<u16>,
    directory: Arc<dyn Database>,
    notifier: Arc<dyn Notifier>,
}

impl AlertTrigger {
    pub fn new(
        status_codes: impl IntoIterator<Item = u16>,
        directory: Arc<dyn Database>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self { status_codes: status_codes.into_iter().collect(), directory, notifier }
    }

    pub async fn evaluate(&self, result: &ProbeResult) -> Option<AlertRequest> {
        let status_code = result.status_code()?;
        if !self.status_codes.contains(&status_code) {
            return None;
        }

        let recipients = match self.directory.alert_recipients().await {
            Ok(recipients) => recipients,
            Err(e) => {
                warn!(url = %result.website, error = %e, "could not resolve alert recipients");
                return None;
            }
        };

        Some(AlertRequest {
            recipients,
            subject: ALERT_SUBJECT.to_string(),
            body: AlertBody {
                response_time: result.response_time_ms().unwrap_or_default().to_string(),
                url: result.website.clone(),
                status_code: status_code.to_string(),
            },
        })
    }

    /// Hand the alert to the notifier without waiting on it.
    pub fn dispatch(&self, alert: AlertRequest) -> JoinHandle<()> {
        let notifier = Arc::clone(&self.notifier);
        tokio::spawn(async move {
            if let Err(e) = notifier.notify(&alert).await {
                warn!(url = %alert.body.url, error = %e, "alert notification failed");
            }
        })
    }
}
