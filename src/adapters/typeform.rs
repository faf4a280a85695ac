use super::{parse_upstream_timestamp, require_upstream_id};
use crate::models::{FormResponse, Normalized, RecordIssue};
use std::collections::BTreeMap;

/// Answer key under which the first marker-bearing answer is repeated.
pub const FLAGGED_ANSWER_KEY: &str = "calendly_link";

/// Turns one Typeform response payload into the canonical `FormResponse`.
///
/// `flagged` is derived here and nowhere else: it is set when any extracted answer or the
/// serialized raw payload contains `marker`, ignoring case.
pub fn normalize_response(payload: &serde_json::Value, marker: &str) -> Normalized<FormResponse> {
    let mut issues = Vec::new();

    let id = match require_upstream_id(payload, &["response_id", "token"]) {
        Ok(id) => id,
        Err(error) => {
            issues.push(RecordIssue::new(None, "response_id", error.to_string()));
            return Normalized { record: None, issues };
        }
    };

    let submitted_at = match parse_upstream_timestamp(payload.get("submitted_at")) {
        Ok(value) => value,
        Err(message) => {
            issues.push(RecordIssue::new(Some(&id), "submitted_at", message));
            None
        }
    };

    let marker = marker.to_lowercase();
    let mut answers = BTreeMap::new();
    let mut flagged_answer = None;

    if let Some(items) = payload.get("answers").and_then(|value| value.as_array()) {
        for (index, answer) in items.iter().enumerate() {
            let Some(field_ref) = answer
                .get("field")
                .and_then(|field| field.get("ref").or_else(|| field.get("id")))
                .and_then(|value| value.as_str())
            else {
                issues.push(RecordIssue::new(
                    Some(&id),
                    &format!("answers[{}]", index),
                    "answer has no field ref",
                ));
                continue;
            };

            let value = answer_value(answer);
            if flagged_answer.is_none() && !marker.is_empty() {
                if let Some(text) = value.as_str() {
                    if text.to_lowercase().contains(&marker) {
                        flagged_answer = Some(value.clone());
                    }
                }
            }
            answers.insert(field_ref.to_string(), value);
        }
    }

    let answer_flagged = flagged_answer.is_some();
    if let Some(link) = flagged_answer {
        answers.insert(FLAGGED_ANSWER_KEY.to_string(), link);
    }
    let flagged = answer_flagged || contains_marker(payload, &marker);

    Normalized {
        record: Some(FormResponse {
            id,
            submitted_at,
            answers,
            flagged,
            raw: payload.clone(),
        }),
        issues,
    }
}

/// Case-insensitive search for `marker` anywhere in the serialized payload.
pub fn contains_marker(payload: &serde_json::Value, marker: &str) -> bool {
    if marker.is_empty() {
        return false;
    }
    serde_json::to_string(payload)
        .map(|serialized| serialized.to_lowercase().contains(&marker.to_lowercase()))
        .unwrap_or(false)
}

fn answer_value(answer: &serde_json::Value) -> serde_json::Value {
    let text_at = |path: &[&str]| -> Option<serde_json::Value> {
        let mut current = answer;
        for key in path {
            current = current.get(*key)?;
        }
        if current.is_null() {
            None
        } else {
            Some(current.clone())
        }
    };

    if let Some(value) = text_at(&["text"]) {
        return value;
    }
    if let Some(value) = text_at(&["choice", "label"]) {
        return value;
    }
    if let Some(labels) = answer
        .get("choices")
        .and_then(|choices| choices.get("labels"))
        .and_then(|labels| labels.as_array())
    {
        let joined = labels
            .iter()
            .filter_map(|label| label.as_str())
            .collect::<Vec<_>>()
            .join(", ");
        return serde_json::Value::String(joined);
    }
    for key in ["email", "url", "file_url", "number", "boolean", "date", "phone_number"] {
        if let Some(value) = text_at(&[key]) {
            return value;
        }
    }
    serde_json::Value::Null
}
