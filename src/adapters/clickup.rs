use super::{parse_upstream_timestamp, require_upstream_id};
use crate::models::{Normalized, RecordIssue, Task};

/// Turns one ClickUp task payload into the canonical `Task`.
///
/// Unparseable dates are dropped and reported; only a missing id rejects the record.
pub fn normalize_task(payload: &serde_json::Value) -> Normalized<Task> {
    let mut issues = Vec::new();

    let id = match require_upstream_id(payload, &["id"]) {
        Ok(id) => id,
        Err(error) => {
            issues.push(RecordIssue::new(None, "id", error.to_string()));
            return Normalized { record: None, issues };
        }
    };

    let name = payload
        .get("name")
        .and_then(|value| value.as_str())
        .unwrap_or_default()
        .to_string();

    let status_value = payload.get("status");
    let status = status_value
        .and_then(|status| status.get("status").or(Some(status)))
        .and_then(|value| value.as_str())
        .map(ToString::to_string);
    let is_closed = status_value
        .and_then(|status| status.get("type"))
        .and_then(|value| value.as_str())
        .map(|kind| kind.eq_ignore_ascii_case("closed"))
        .unwrap_or(false);

    let mut read_date = |field: &str| match parse_upstream_timestamp(payload.get(field)) {
        Ok(value) => value,
        Err(message) => {
            issues.push(RecordIssue::new(Some(&id), field, message));
            None
        }
    };
    let created_at = read_date("date_created");
    let updated_at = read_date("date_updated");
    let mut closed_at = read_date("date_closed");

    if let (Some(created), Some(closed)) = (created_at, closed_at) {
        if closed < created {
            issues.push(RecordIssue::new(
                Some(&id),
                "date_closed",
                format!("closed {} before it was created {}", closed, created),
            ));
            closed_at = None;
        }
    }

    let custom_fields = match payload.get("custom_fields") {
        Some(serde_json::Value::Array(fields)) => serde_json::Value::Array(fields.clone()),
        _ => serde_json::json!([]),
    };

    Normalized {
        record: Some(Task {
            id,
            name,
            status,
            is_closed,
            created_at,
            updated_at,
            closed_at,
            custom_fields,
            raw: payload.clone(),
        }),
        issues,
    }
}

#[cfg(test)]
mod tests {
    use super::normalize_task;
    use chrono::{TimeZone, Utc};

    #[test]
    fn normalizes_clickup_task_shape() {
        let payload = serde_json::json!({
            "id": "86a1b2",
            "name": "Write brief",
            "status": { "status": "complete", "type": "closed" },
            "date_created": "1704067200000",
            "date_updated": "1704153600000",
            "date_closed": "1704153600000",
            "custom_fields": [{ "id": "cf1", "value": 3 }]
        });

        let normalized = normalize_task(&payload);
        assert!(normalized.issues.is_empty());
        let task = normalized.record.expect("task");
        assert_eq!(task.id, "86a1b2");
        assert_eq!(task.status.as_deref(), Some("complete"));
        assert!(task.is_closed);
        assert_eq!(task.created_at, Some(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()));
        assert_eq!(task.closed_at, Some(Utc.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).unwrap()));
        assert_eq!(task.custom_fields.as_array().map(Vec::len), Some(1));
        assert_eq!(task.raw, payload);
    }

    #[test]
    fn bad_date_is_omitted_and_reported() {
        let payload = serde_json::json!({
            "id": "t1",
            "name": "x",
            "date_created": "not a date",
            "date_updated": "1704067200000"
        });

        let normalized = normalize_task(&payload);
        let task = normalized.record.expect("record kept");
        assert!(task.created_at.is_none());
        assert!(task.updated_at.is_some());
        assert_eq!(normalized.issues.len(), 1);
        assert_eq!(normalized.issues[0].field, "date_created");
        assert_eq!(normalized.issues[0].record_id.as_deref(), Some("t1"));
    }

    #[test]
    fn closed_before_created_drops_closed_at() {
        let payload = serde_json::json!({
            "id": "t2",
            "date_created": "2024-02-01T00:00:00Z",
            "date_closed": "2024-01-01T00:00:00Z"
        });

        let normalized = normalize_task(&payload);
        assert!(normalized.record.expect("record").closed_at.is_none());
        assert_eq!(normalized.issues[0].field, "date_closed");
    }

    #[test]
    fn missing_id_rejects_record() {
        let normalized = normalize_task(&serde_json::json!({ "name": "orphan" }));
        assert!(normalized.record.is_none());
        assert_eq!(normalized.issues[0].field, "id");
    }

    #[test]
    fn plain_string_status_is_accepted() {
        let normalized = normalize_task(&serde_json::json!({ "id": 42, "status": "open" }));
        let task = normalized.record.expect("record");
        assert_eq!(task.id, "42");
        assert_eq!(task.status.as_deref(), Some("open"));
        assert!(!task.is_closed);
    }
}
