//! Control-channel commands and the JSON records pushed to live channels.

use std::fmt;
use std::str::FromStr;

use serde::Deserialize;
use serde_json::{Value, json};
use thiserror::Error;

use crate::error::{RegistryError, ValidationError};
use crate::monitoring::types::{Interval, MonitorStatus, MonitorTarget, ProbeOutcome, ProbeResult, TargetId};
use crate::registry::JobRegistry;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    #[error("Invalid payload: {0}")]
    InvalidPayload(String),

    #[error("Missing 'action' field")]
    MissingAction,

    #[error("Unknown action: {0}")]
    UnknownAction(String),

    #[error("Missing 'website' field in {0} action")]
    MissingWebsite(Action),

    #[error(transparent)]
    Validation(#[from] ValidationError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Start,
    Stop,
    Pause,
    Resume,
    /// Manual probe of a running target
    Ping,
}

impl Action {
    pub fn as_str(self) -> &'static str {
        match self {
            Action::Start => "start",
            Action::Stop => "stop",
            Action::Pause => "pause",
            Action::Resume => "resume",
            Action::Ping => "ping",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Action {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "start" => Ok(Action::Start),
            "stop" => Ok(Action::Stop),
            "pause" => Ok(Action::Pause),
            "resume" => Ok(Action::Resume),
            "ping" => Ok(Action::Ping),
            _ => Err(ProtocolError::UnknownAction(s.to_string())),
        }
    }
}

/// The `website` object of a command. Which fields are required depends on the action.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebsitePayload {
    pub user_id: Option<i64>,
    pub project_id: Option<String>,
    pub url: Option<String>,
    pub interval: Option<Interval>,
    pub status: Option<MonitorStatus>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Start(MonitorTarget),
    Pause(TargetId),
    Resume(TargetId),
    Stop(TargetId),
    Ping(TargetId),
}

pub fn parse_command(text: &str) -> Result<Command, ProtocolError> {
    let value: Value = serde_json::from_str(text).map_err(|e| ProtocolError::InvalidPayload(e.to_string()))?;

    let action: Action = value
        .get("action")
        .and_then(Value::as_str)
        .ok_or(ProtocolError::MissingAction)?
        .parse()?;

    let website = match value.get("website") {
        Some(website) if !website.is_null() => website.clone(),
        _ => return Err(ProtocolError::MissingWebsite(action)),
    };
    let payload: WebsitePayload =
        serde_json::from_value(website).map_err(|e| ProtocolError::InvalidPayload(e.to_string()))?;

    let identity = |payload: &WebsitePayload| -> Result<TargetId, ProtocolError> {
        let url = payload.url.as_deref().ok_or(ValidationError::MissingField("url"))?;
        Ok(TargetId::parse(url)?)
    };

    match action {
        Action::Start => {
            if let Some(user_id) = payload.user_id.filter(|id| *id <= 0) {
                return Err(ValidationError::InvalidUserId(user_id).into());
            }
            let url = payload.url.ok_or(ValidationError::MissingField("url"))?;
            let project_id = payload.project_id.ok_or(ValidationError::MissingField("projectId"))?;
            let interval = payload.interval.ok_or(ValidationError::MissingField("interval"))?;
            Ok(Command::Start(MonitorTarget::new(url, project_id, interval)?))
        }
        Action::Pause => Ok(Command::Pause(identity(&payload)?)),
        Action::Resume => Ok(Command::Resume(identity(&payload)?)),
        Action::Stop => Ok(Command::Stop(identity(&payload)?)),
        Action::Ping => Ok(Command::Ping(identity(&payload)?)),
    }
}

/// Apply a command and render the plain-text success reply.
pub async fn dispatch(registry: &JobRegistry, command: Command) -> Result<String, RegistryError> {
    match command {
        Command::Start(target) => {
            let url = target.url.clone();
            registry.start(target).await?;
            Ok(format!("Monitoring started for: {url}"))
        }
        Command::Pause(id) => {
            if registry.pause(&id).await? {
                Ok(format!("Monitoring paused for: {id}"))
            } else {
                Ok(format!("Monitoring was not running for: {id}"))
            }
        }
        Command::Resume(id) => {
            registry.resume(&id).await?;
            Ok(format!("Monitoring resumed for: {id}"))
        }
        Command::Stop(id) => {
            registry.stop(&id).await?;
            Ok(format!("Monitoring stopped for: {id}"))
        }
        Command::Ping(id) => {
            registry.manual_probe(&id).await?;
            Ok(format!("Manual probe executed for: {id}"))
        }
    }
}

/// Parse, apply and reply. Failures come back as `Error: ...` text.
pub async fn handle_message(registry: &JobRegistry, text: &str) -> String {
    let command = match parse_command(text) {
        Ok(command) => command,
        Err(e) => return format!("Error: {e}"),
    };

    match dispatch(registry, command).await {
        Ok(reply) => reply,
        Err(e) => format!("Error: {e}"),
    }
}

/// Log entry as seen by project subscribers.
pub fn log_record(result: &ProbeResult) -> String {
    match &result.outcome {
        ProbeOutcome::Response { response_time_ms, status_code } => json!({
            "website": result.website,
            "timestamp": result.formatted_timestamp(),
            "responseTime": response_time_ms,
            "statusCode": status_code,
        }),
        ProbeOutcome::Error { message } => json!({
            "website": result.website,
            "error": message,
        }),
    }
    .to_string()
}

/// Tick notification for control sessions.
pub fn tick_record(target: &MonitorTarget, result: &ProbeResult) -> String {
    match &result.outcome {
        ProbeOutcome::Response { response_time_ms, status_code } => json!({
            "website": result.website,
            "projectId": target.project_id,
            "status": target.status,
            "responseTime": response_time_ms,
            "statusCode": status_code,
        }),
        ProbeOutcome::Error { message } => json!({
            "website": result.website,
            "projectId": target.project_id,
            "error": message,
        }),
    }
    .to_string()
}

/// First message of a control session: every registered target.
pub fn snapshot_json(targets: &[MonitorTarget]) -> String {
    Value::Array(
        targets
            .iter()
            .map(|target| {
                json!({
                    "projectId": target.project_id,
                    "url": target.url,
                    "interval": target.interval,
                    "status": target.status,
                })
            })
            .collect(),
    )
    .to_string()
}

pub fn session_record(session_id: &str) -> String {
    json!({ "sessionId": session_id }).to_string()
}
