pub mod analytics;
pub mod clickup;
pub mod fixture;
pub mod typeform;

use crate::errors::{AppError, AppResult};
use crate::models::EntityKind;
use chrono::{DateTime, Datelike, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::pin::Pin;

/// Which of the two analytics reports a row came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AnalyticsReport {
    PageViews,
    ButtonClicks,
}

/// Raw upstream payload tagged with the provider that produced it.
///
/// The JSON is kept opaque until a provider-specific normalizer turns it into a
/// `Task`, `FormResponse` or `MetricDay`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "provider", rename_all = "kebab-case")]
pub enum UpstreamRecord {
    ClickupTask { payload: serde_json::Value },
    TypeformResponse { payload: serde_json::Value },
    AnalyticsRow { report: AnalyticsReport, payload: serde_json::Value },
}

impl UpstreamRecord {
    pub fn entity(&self) -> EntityKind {
        match self {
            Self::ClickupTask { .. } => EntityKind::Tasks,
            Self::TypeformResponse { .. } => EntityKind::FormResponses,
            Self::AnalyticsRow { .. } => EntityKind::Metrics,
        }
    }
}

/// Date range an adapter may use to bound what it asks upstream for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SnapshotWindow {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl SnapshotWindow {
    pub fn trailing(as_of: NaiveDate, window_days: u32) -> Self {
        Self {
            start: as_of - Duration::days(i64::from(window_days)),
            end: as_of,
        }
    }
}

pub type SnapshotFuture<'a> = Pin<Box<dyn Future<Output = AppResult<Vec<UpstreamRecord>>> + Send + 'a>>;

/// External collaborator producing the current upstream snapshot for one entity.
///
/// Implementations own authentication and pagination. Any error aborts that entity's sync
/// only; callers report it as `AppError::AdapterFetch`.
pub trait SourceAdapter: Send + Sync {
    fn entity(&self) -> EntityKind;

    fn name(&self) -> &str;

    fn fetch_snapshot(&self, window: SnapshotWindow) -> SnapshotFuture<'_>;
}

/// Reads an upstream date field into a UTC timestamp.
///
/// Accepts epoch milliseconds (number or digit string), RFC 3339, and bare `YYYY-MM-DD`
/// days (taken as midnight UTC). Absent, null and empty values are `Ok(None)`. Years outside
/// `0..=9999` are rejected since their stored form no longer sorts or parses as RFC 3339.
pub(crate) fn parse_upstream_timestamp(value: Option<&serde_json::Value>) -> Result<Option<DateTime<Utc>>, String> {
    let parsed = read_timestamp(value)?;
    match parsed {
        Some(timestamp) if !(0..=9999).contains(&timestamp.year()) => {
            Err(format!("'{}' is outside the supported year range", timestamp))
        }
        other => Ok(other),
    }
}

fn read_timestamp(value: Option<&serde_json::Value>) -> Result<Option<DateTime<Utc>>, String> {
    let Some(value) = value else {
        return Ok(None);
    };
    match value {
        serde_json::Value::Null => Ok(None),
        serde_json::Value::Number(number) => number
            .as_i64()
            .and_then(DateTime::<Utc>::from_timestamp_millis)
            .map(Some)
            .ok_or_else(|| format!("'{}' is not a valid epoch milliseconds value", number)),
        serde_json::Value::String(raw) => {
            let trimmed = raw.trim();
            if trimmed.is_empty() {
                return Ok(None);
            }
            if trimmed.chars().all(|c| c.is_ascii_digit()) {
                return trimmed
                    .parse::<i64>()
                    .ok()
                    .and_then(DateTime::<Utc>::from_timestamp_millis)
                    .map(Some)
                    .ok_or_else(|| format!("'{}' is not a valid epoch milliseconds value", trimmed));
            }
            if let Ok(parsed) = DateTime::parse_from_rfc3339(trimmed) {
                return Ok(Some(parsed.with_timezone(&Utc)));
            }
            if let Ok(day) = NaiveDate::parse_from_str(trimmed, "%Y-%m-%d") {
                return Ok(day.and_hms_opt(0, 0, 0).map(|naive| naive.and_utc()));
            }
            Err(format!("'{}' is not a recognised timestamp", trimmed))
        }
        other => Err(format!("unexpected timestamp value {}", other)),
    }
}

/// Upstream identifiers arrive as strings or numbers; anything else is treated as missing.
fn upstream_id(value: Option<&serde_json::Value>) -> Option<String> {
    match value? {
        serde_json::Value::String(raw) if !raw.trim().is_empty() => Some(raw.trim().to_string()),
        serde_json::Value::Number(number) => Some(number.to_string()),
        _ => None,
    }
}

/// First usable identifier among `fields`, or `MalformedRecord` naming the first field.
pub(crate) fn require_upstream_id(payload: &serde_json::Value, fields: &[&str]) -> AppResult<String> {
    fields
        .iter()
        .find_map(|field| upstream_id(payload.get(*field)))
        .ok_or_else(|| {
            AppError::MalformedRecord(format!(
                "payload has no usable '{}'",
                fields.first().copied().unwrap_or("id")
            ))
        })
}
