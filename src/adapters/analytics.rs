use super::AnalyticsReport;
use crate::models::{MetricDay, RecordIssue};
use chrono::NaiveDate;
use std::collections::BTreeMap;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct MetricDays {
    pub days: Vec<MetricDay>,
    pub issues: Vec<RecordIssue>,
}

/// Merges page-view and button-click report rows into one `MetricDay` per calendar day.
///
/// Rows are accepted either in report shape (`dimensionValues[0]` is the `YYYYMMDD` day,
/// `metricValues[0]` the count) or flat (`date`, `value`). `as_of` always gets a row, zeroed
/// when upstream reported nothing for it yet.
pub fn normalize_rows<'a, I>(rows: I, as_of: NaiveDate) -> MetricDays
where
    I: IntoIterator<Item = (AnalyticsReport, &'a serde_json::Value)>,
{
    let mut merged: BTreeMap<NaiveDate, MetricDay> = BTreeMap::new();
    let mut issues = Vec::new();

    for (report, row) in rows {
        let raw_date = row_date(row);
        let Some(date) = raw_date.as_deref().and_then(parse_report_day) else {
            issues.push(RecordIssue::new(
                raw_date.as_deref(),
                "date",
                format!("analytics row has no usable date: {}", row),
            ));
            continue;
        };

        let key = date.format("%Y-%m-%d").to_string();
        let count = match row_count(row) {
            Ok(count) => count,
            Err(message) => {
                issues.push(RecordIssue::new(Some(&key), "value", message));
                0
            }
        };

        let day = merged.entry(date).or_insert_with(|| MetricDay::zero(date));
        match report {
            AnalyticsReport::PageViews => day.page_views = day.page_views.saturating_add(count),
            AnalyticsReport::ButtonClicks => day.button_clicks = day.button_clicks.saturating_add(count),
        }
    }

    merged.entry(as_of).or_insert_with(|| MetricDay::zero(as_of));

    MetricDays {
        days: merged.into_values().collect(),
        issues,
    }
}

fn row_date(row: &serde_json::Value) -> Option<String> {
    row.get("dimensionValues")
        .and_then(|values| values.get(0))
        .and_then(|value| value.get("value"))
        .or_else(|| row.get("date"))
        .and_then(|value| value.as_str())
        .map(ToString::to_string)
}

fn row_count(row: &serde_json::Value) -> Result<i64, String> {
    let value = row
        .get("metricValues")
        .and_then(|values| values.get(0))
        .and_then(|value| value.get("value"))
        .or_else(|| row.get("value"));

    let parsed = match value {
        Some(serde_json::Value::Number(number)) => number.as_i64(),
        Some(serde_json::Value::String(raw)) => raw.trim().parse::<i64>().ok(),
        _ => None,
    };

    match parsed {
        Some(count) if count >= 0 => Ok(count),
        Some(count) => Err(format!("negative count {} stored as 0", count)),
        None => Err(format!("unparseable count {:?} stored as 0", value)),
    }
}

fn parse_report_day(raw: &str) -> Option<NaiveDate> {
    let trimmed = raw.trim();
    NaiveDate::parse_from_str(trimmed, "%Y%m%d")
        .or_else(|_| NaiveDate::parse_from_str(trimmed, "%Y-%m-%d"))
        .ok()
}

#[cfg(test)]
mod tests {
    use super::normalize_rows;
    use crate::adapters::AnalyticsReport;
    use chrono::NaiveDate;

    fn day(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).expect("date")
    }

    #[test]
    fn merges_both_reports_per_day_and_adds_today() {
        let views = serde_json::json!({
            "dimensionValues": [{ "value": "20240101" }, { "value": "/boosting-brands" }],
            "metricValues": [{ "value": "12" }]
        });
        let clicks = serde_json::json!({
            "dimensionValues": [{ "value": "20240101" }],
            "metricValues": [{ "value": "3" }]
        });
        let clicks_only = serde_json::json!({ "date": "2024-01-02", "value": 5 });

        let result = normalize_rows(
            vec![
                (AnalyticsReport::PageViews, &views),
                (AnalyticsReport::ButtonClicks, &clicks),
                (AnalyticsReport::ButtonClicks, &clicks_only),
            ],
            day(2024, 1, 3),
        );

        assert!(result.issues.is_empty());
        assert_eq!(result.days.len(), 3);
        assert_eq!(result.days[0].date, day(2024, 1, 1));
        assert_eq!(result.days[0].page_views, 12);
        assert_eq!(result.days[0].button_clicks, 3);
        assert_eq!(result.days[1].page_views, 0);
        assert_eq!(result.days[1].button_clicks, 5);
        assert_eq!(result.days[2].date, day(2024, 1, 3));
        assert_eq!(result.days[2].page_views, 0);
    }

    #[test]
    fn bad_rows_are_isolated() {
        let no_date = serde_json::json!({ "metricValues": [{ "value": "1" }] });
        let negative = serde_json::json!({ "date": "20240101", "value": "-4" });

        let result = normalize_rows(
            vec![
                (AnalyticsReport::PageViews, &no_date),
                (AnalyticsReport::PageViews, &negative),
            ],
            day(2024, 1, 1),
        );

        assert_eq!(result.issues.len(), 2);
        assert_eq!(result.days.len(), 1);
        assert_eq!(result.days[0].page_views, 0);
    }

    #[test]
    fn huge_same_day_counts_saturate() {
        let first = serde_json::json!({ "date": "2024-01-02", "value": i64::MAX });
        let second = serde_json::json!({ "date": "2024-01-02", "value": i64::MAX });

        let result = normalize_rows(
            vec![(AnalyticsReport::PageViews, &first), (AnalyticsReport::PageViews, &second)],
            day(2024, 1, 2),
        );

        assert_eq!(result.days.len(), 1);
        assert_eq!(result.days[0].page_views, i64::MAX);
        assert!(result.issues.is_empty());
    }
}
