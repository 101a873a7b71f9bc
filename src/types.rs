use chrono::{DateTime, Utc};
use serde::ser::SerializeStruct;
use serde::{Deserialize, Serialize, Serializer};
use std::fmt;

/// Transport-assigned identifier of one live client session.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConnectionId(pub String);

impl ConnectionId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ConnectionId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Opaque id of a build configuration in the external CI server's namespace.
///
/// Ids starting with `-` are placeholders for builds not yet linked to the CI
/// server and must never become fetch targets.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BuildId(pub String);

impl BuildId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn is_watchable(&self) -> bool {
        !self.0.is_empty() && !self.0.starts_with('-')
    }
}

impl fmt::Display for BuildId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for BuildId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum BuildStatus {
    #[default]
    Unknown,
    Success,
    Failure,
    Running,
}

/// Latest result of one build configuration, as fetched from the CI server.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct StatusUpdate {
    #[serde(rename = "buildExternalId")]
    pub external_id: String,
    #[serde(rename = "buildName")]
    pub name: String,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub status: BuildStatus,
    #[serde(default)]
    pub url: String,
    #[serde(rename = "startTime", default)]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(rename = "finishTime", default)]
    pub finish_time: Option<DateTime<Utc>>,
    #[serde(rename = "testsPassed", default)]
    pub tests_passed: u32,
    #[serde(rename = "testsFailed", default)]
    pub tests_failed: u32,
    #[serde(rename = "testsIgnored", default)]
    pub tests_ignored: u32,
    #[serde(rename = "statementsCovered", default)]
    pub statements_covered: u32,
    #[serde(rename = "statementsTotal", default)]
    pub statements_total: u32,
}

impl StatusUpdate {
    pub fn tests_total(&self) -> u32 {
        self.tests_passed + self.tests_failed + self.tests_ignored
    }

    /// Statement coverage in percent, rounded to two decimals. Zero when the
    /// build reported no statements at all.
    pub fn coverage_percent(&self) -> f64 {
        if self.statements_total == 0 {
            0.0
        } else {
            let raw = f64::from(self.statements_covered) / f64::from(self.statements_total) * 100.0;
            (raw * 100.0).round() / 100.0
        }
    }
}

// The wire shape carries the derived counters alongside the stored ones, so
// serialization is spelled out instead of derived.
impl Serialize for StatusUpdate {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut s = serializer.serialize_struct("StatusUpdate", 14)?;
        s.serialize_field("buildExternalId", &self.external_id)?;
        s.serialize_field("buildName", &self.name)?;
        s.serialize_field("version", &self.version)?;
        s.serialize_field("status", &self.status)?;
        s.serialize_field("url", &self.url)?;
        s.serialize_field("startTime", &self.start_time)?;
        s.serialize_field("finishTime", &self.finish_time)?;
        s.serialize_field("testsPassed", &self.tests_passed)?;
        s.serialize_field("testsFailed", &self.tests_failed)?;
        s.serialize_field("testsIgnored", &self.tests_ignored)?;
        s.serialize_field("testsTotal", &self.tests_total())?;
        s.serialize_field("statementsCovered", &self.statements_covered)?;
        s.serialize_field("statementsTotal", &self.statements_total)?;
        s.serialize_field("coveragePercent", &self.coverage_percent())?;
        s.end()
    }
}

/// A build configuration record owned by a user's project. Carries the
/// subscription key (`external_id`) into the registry.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct BuildConfig {
    #[serde(default)]
    pub id: i64,
    #[serde(rename = "externalId")]
    pub external_id: String,
    #[serde(default)]
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Project {
    #[serde(default)]
    pub id: i64,
    pub name: String,
    #[serde(default)]
    pub order: i32,
    #[serde(default)]
    pub builds: Vec<BuildConfig>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RefreshPhase {
    Start,
    Stop,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FeedbackLevel {
    Info,
    Success,
    Error,
}

/// Everything the server ever pushes to a client, as one tagged union behind
/// the notifier contract.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", content = "payload")]
pub enum ClientMessage {
    RefreshLifecycle { phase: RefreshPhase },
    Feedback { level: FeedbackLevel, text: String },
    Status(StatusUpdate),
    ProjectSnapshot(Vec<Project>),
    BuildSnapshot(Vec<BuildConfig>),
    ProjectUpdated { old_id: i64, project: Project },
    BuildUpdated { old_id: i64, build: BuildConfig },
}

impl ClientMessage {
    pub fn info(text: impl Into<String>) -> Self {
        Self::Feedback {
            level: FeedbackLevel::Info,
            text: text.into(),
        }
    }

    pub fn success(text: impl Into<String>) -> Self {
        Self::Feedback {
            level: FeedbackLevel::Success,
            text: text.into(),
        }
    }

    pub fn lifecycle(phase: RefreshPhase) -> Self {
        Self::RefreshLifecycle { phase }
    }
}
