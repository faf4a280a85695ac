use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EntityKind {
    Tasks,
    FormResponses,
    Metrics,
}

impl EntityKind {
    pub const ALL: [EntityKind; 3] = [Self::Tasks, Self::FormResponses, Self::Metrics];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Tasks => "tasks",
            Self::FormResponses => "form-responses",
            Self::Metrics => "metrics",
        }
    }

    /// Noun used in human-readable sync messages.
    pub fn noun(self) -> &'static str {
        match self {
            Self::Tasks => "tasks",
            Self::FormResponses => "responses",
            Self::Metrics => "days of analytics data",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: String,
    pub name: String,
    pub status: Option<String>,
    pub is_closed: bool,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
    pub closed_at: Option<DateTime<Utc>>,
    pub custom_fields: serde_json::Value,
    pub raw: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FormResponse {
    pub id: String,
    pub submitted_at: Option<DateTime<Utc>>,
    pub answers: BTreeMap<String, serde_json::Value>,
    pub flagged: bool,
    pub raw: serde_json::Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricDay {
    pub date: NaiveDate,
    pub page_views: i64,
    pub button_clicks: i64,
}

impl MetricDay {
    pub fn zero(date: NaiveDate) -> Self {
        Self {
            date,
            page_views: 0,
            button_clicks: 0,
        }
    }
}

/// A single record that could not be taken over as-is from upstream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordIssue {
    pub record_id: Option<String>,
    pub field: String,
    pub message: String,
}

impl RecordIssue {
    pub fn new(record_id: Option<&str>, field: &str, message: impl Into<String>) -> Self {
        Self {
            record_id: record_id.map(ToString::to_string),
            field: field.to_string(),
            message: message.into(),
        }
    }
}

/// Output of a normalization pass: the canonical record plus anything that had to be dropped.
#[derive(Debug, Clone, PartialEq)]
pub struct Normalized<T> {
    pub record: Option<T>,
    pub issues: Vec<RecordIssue>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconcileCounts {
    pub inserted: u64,
    pub updated: u64,
    pub deleted: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconcileResult {
    pub inserted: u64,
    pub updated: u64,
    pub deleted: u64,
    pub errors: Vec<RecordIssue>,
}

impl ReconcileResult {
    pub fn counts(&self) -> ReconcileCounts {
        ReconcileCounts {
            inserted: self.inserted,
            updated: self.updated,
            deleted: self.deleted,
        }
    }

    pub fn upserted(&self) -> u64 {
        self.inserted + self.updated
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FormSyncMode {
    #[default]
    Mirror,
    ClearAndReload,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SyncSettings {
    pub window_days: u32,
    pub fetch_timeout_seconds: u64,
    pub refresh_interval_seconds: u64,
    pub flag_marker: String,
    pub form_sync_mode: FormSyncMode,
    pub sync_run_retention: u32,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            window_days: 90,
            fetch_timeout_seconds: 30,
            refresh_interval_seconds: 300,
            flag_marker: "calendly.com".to_string(),
            form_sync_mode: FormSyncMode::Mirror,
            sync_run_retention: 200,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SyncRunStatus {
    Running,
    Succeeded,
    Failed,
}

impl SyncRunStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncRunRecord {
    pub id: String,
    pub entity: EntityKind,
    pub status: SyncRunStatus,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub counts: ReconcileCounts,
    pub issue_count: u64,
    pub final_count: Option<u64>,
    pub error_message: Option<String>,
}

/// Result of one entity's fetch and reconcile, as reported to callers.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncOutcome {
    pub entity: EntityKind,
    pub success: bool,
    pub message: String,
    pub counts: ReconcileCounts,
    pub final_count: Option<u64>,
    pub errors: Vec<RecordIssue>,
    pub error: Option<String>,
    pub run_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncReport {
    pub success: bool,
    pub outcomes: Vec<SyncOutcome>,
}

impl SyncReport {
    pub fn outcome(&self, entity: EntityKind) -> Option<&SyncOutcome> {
        self.outcomes.iter().find(|outcome| outcome.entity == entity)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DayBucket<C> {
    pub date: NaiveDate,
    #[serde(flatten)]
    pub counters: C,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrafficCounters {
    pub page_views: i64,
    pub button_clicks: i64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskCounters {
    pub created: i64,
    pub closed: i64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FormCounters {
    pub total: i64,
    pub with_calendly: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrafficAggregate {
    pub total: i64,
    pub previous_period: i64,
    pub button_clicks: i64,
    pub previous_button_clicks: i64,
    pub total_change: f64,
    pub button_clicks_change: f64,
    pub data: Vec<DayBucket<TrafficCounters>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskAggregate {
    pub created: i64,
    pub closed: i64,
    pub previous_created: i64,
    pub previous_closed: i64,
    pub created_change: f64,
    pub closed_change: f64,
    /// Every task currently mirrored, regardless of when it was created.
    pub total_tasks: i64,
    pub open_tasks: i64,
    pub data: Vec<DayBucket<TaskCounters>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FormAggregate {
    pub total: i64,
    pub with_calendly: i64,
    pub previous_total: i64,
    pub previous_with_calendly: i64,
    pub total_change: f64,
    pub with_calendly_change: f64,
    pub calendly_rate: f64,
    pub data: Vec<DayBucket<FormCounters>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncStatusView {
    pub entity: EntityKind,
    pub last_run: Option<SyncRunRecord>,
    pub row_count: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub status: String,
}
