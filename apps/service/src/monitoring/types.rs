use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer, de};

use super::validation::{validate_http_endpoint, validate_project_id};
use crate::error::ValidationError;

/// Identity of a monitored URL.
///
/// The URL is parsed and lowercased as a whole, so `HTTP://Good.Test/` and
/// `http://good.test/` are the same target. Equality is plain string equality.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct TargetId(String);

impl TargetId {
    pub fn parse(raw: &str) -> Result<Self, ValidationError> {
        let url = validate_http_endpoint(raw)?;
        Ok(Self(url.as_str().to_lowercase()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TargetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Monitoring cadence. Only these three are offered to users.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Interval {
    Ten,
    Thirty,
    Sixty,
}

impl Interval {
    pub const ALL: [Interval; 3] = [Interval::Ten, Interval::Thirty, Interval::Sixty];

    pub fn seconds(self) -> u64 {
        match self {
            Interval::Ten => 10,
            Interval::Thirty => 30,
            Interval::Sixty => 60,
        }
    }

    pub fn as_duration(self) -> Duration {
        Duration::from_secs(self.seconds())
    }

    pub fn from_seconds(seconds: u64) -> Result<Self, ValidationError> {
        Self::ALL
            .into_iter()
            .find(|interval| interval.seconds() == seconds)
            .ok_or(ValidationError::UnsupportedInterval(seconds))
    }

    pub fn name(self) -> &'static str {
        match self {
            Interval::Ten => "TEN",
            Interval::Thirty => "THIRTY",
            Interval::Sixty => "SIXTY",
        }
    }
}

impl FromStr for Interval {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if let Ok(seconds) = trimmed.parse::<u64>() {
            return Self::from_seconds(seconds);
        }
        Self::ALL
            .into_iter()
            .find(|interval| interval.name().eq_ignore_ascii_case(trimmed))
            .ok_or_else(|| ValidationError::UnknownInterval(trimmed.to_string()))
    }
}

impl fmt::Display for Interval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl Serialize for Interval {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.name())
    }
}

impl<'de> Deserialize<'de> for Interval {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        // Clients send either the enum name or the number of seconds
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Name(String),
            Seconds(u64),
        }

        match Raw::deserialize(deserializer)? {
            Raw::Name(name) => name.parse().map_err(de::Error::custom),
            Raw::Seconds(seconds) => Interval::from_seconds(seconds).map_err(de::Error::custom),
        }
    }
}

/// Desired status of a monitor target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum MonitorStatus {
    #[serde(alias = "active")]
    Active,
    #[serde(alias = "paused")]
    Paused,
}

impl MonitorStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            MonitorStatus::Active => "ACTIVE",
            MonitorStatus::Paused => "PAUSED",
        }
    }
}

impl FromStr for MonitorStatus {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "ACTIVE" => Ok(MonitorStatus::Active),
            "PAUSED" => Ok(MonitorStatus::Paused),
            _ => Err(ValidationError::UnknownStatus(s.to_string())),
        }
    }
}

impl fmt::Display for MonitorStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A registered URL under periodic observation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MonitorTarget {
    pub id: TargetId,
    /// URL as the user entered it, used for the outbound request
    pub url: String,
    pub project_id: String,
    pub interval: Interval,
    pub status: MonitorStatus,
}

impl MonitorTarget {
    /// Build a validated target with the default Active status.
    pub fn new(
        url: impl Into<String>,
        project_id: impl Into<String>,
        interval: Interval,
    ) -> Result<Self, ValidationError> {
        let url = url.into().trim().to_string();
        let project_id = project_id.into();
        validate_project_id(&project_id)?;
        let id = TargetId::parse(&url)?;

        Ok(Self { id, url, project_id, interval, status: MonitorStatus::Active })
    }

    pub fn with_status(mut self, status: MonitorStatus) -> Self {
        self.status = status;
        self
    }
}

/// What a single probe observed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ProbeOutcome {
    Response { response_time_ms: u64, status_code: u16 },
    Error { message: String },
}

/// Result of one probe. Never mutated after construction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProbeResult {
    pub timestamp: DateTime<Utc>,
    pub website: String,
    pub outcome: ProbeOutcome,
}

impl ProbeResult {
    pub fn response(website: impl Into<String>, response_time_ms: u64, status_code: u16) -> Self {
        Self {
            timestamp: Utc::now(),
            website: website.into(),
            outcome: ProbeOutcome::Response { response_time_ms, status_code },
        }
    }

    pub fn error(website: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            website: website.into(),
            outcome: ProbeOutcome::Error { message: message.into() },
        }
    }

    pub fn status_code(&self) -> Option<u16> {
        match self.outcome {
            ProbeOutcome::Response { status_code, .. } => Some(status_code),
            ProbeOutcome::Error { .. } => None,
        }
    }

    pub fn response_time_ms(&self) -> Option<u64> {
        match self.outcome {
            ProbeOutcome::Response { response_time_ms, .. } => Some(response_time_ms),
            ProbeOutcome::Error { .. } => None,
        }
    }

    /// UTC timestamp with millisecond precision, e.g. `2024-05-01T12:00:00.123+0000`.
    pub fn formatted_timestamp(&self) -> String {
        self.timestamp.format("%Y-%m-%dT%H:%M:%S%.3f%z").to_string()
    }
}

/// Bounded, newest-first history of probe results for one project.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectLog {
    pub project_id: String,
    /// Interval of the target that last wrote to this log
    pub interval: Option<Interval>,
    pub entries: Vec<ProbeResult>,
}

impl ProjectLog {
    pub fn new(project_id: impl Into<String>) -> Self {
        Self { project_id: project_id.into(), interval: None, entries: Vec::new() }
    }

    /// Insert at the front and evict from the tail beyond `capacity`.
    pub fn push(&mut self, entry: ProbeResult, capacity: usize) {
        self.entries.insert(0, entry);
        self.entries.truncate(capacity);
    }

    pub fn latest(&self) -> Option<&ProbeResult> {
        self.entries.first()
    }
}
