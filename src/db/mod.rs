use crate::errors::{AppError, AppResult};
use crate::models::{
    EntityKind, FormResponse, MetricDay, ReconcileCounts, SyncRunRecord, SyncRunStatus, SyncSettings, Task,
};
use chrono::{DateTime, Duration, NaiveDate, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use uuid::Uuid;

const SCHEMA_SQL: &str = include_str!("schema.sql");
const SETTINGS_KEY: &str = "sync";
const DAY_FORMAT: &str = "%Y-%m-%d";

const TASK_COLUMNS: &str =
    "id, name, status, is_closed, created_at, updated_at, closed_at, custom_fields_json, raw_json";
const FORM_COLUMNS: &str = "id, submitted_at, answers_json, flagged, raw_json";
const SYNC_RUN_COLUMNS: &str =
    "id, entity, status, started_at, finished_at, inserted, updated, deleted, issue_count, final_count, error_message";

/// SQLite-backed mirror of the upstream records plus sync bookkeeping.
///
/// Every public mutation is atomic on its own: single-row statements run as-is and batch
/// operations run inside one transaction. Nothing spans more than one call.
#[derive(Debug)]
pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    pub fn new(path: &Path) -> AppResult<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|err| AppError::Io(err.to_string()))?;
        }
        let conn = Connection::open(path).map_err(AppError::from)?;
        conn.busy_timeout(std::time::Duration::from_secs(5))?;
        conn.execute_batch(SCHEMA_SQL).map_err(AppError::from)?;

        let db = Self {
            conn: Mutex::new(conn),
        };

        db.ensure_default_settings()?;

        Ok(db)
    }

    fn conn(&self) -> AppResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| AppError::Internal("database mutex poisoned".to_string()))
    }

    // ─── Tasks ──────────────────────────────────────────────────────────────

    pub fn task_keys(&self) -> AppResult<BTreeSet<String>> {
        let conn = self.conn()?;
        collect_keys(&conn, "SELECT id FROM tasks")
    }

    pub fn delete_tasks(&self, keys: &[String]) -> AppResult<u64> {
        self.delete_keys("tasks", keys)
    }

    pub fn upsert_tasks(&self, tasks: &[Task]) -> AppResult<u64> {
        if tasks.is_empty() {
            return Ok(0);
        }
        let synced_at = format_time(Utc::now());
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO tasks (
                   id, name, status, is_closed, created_at, updated_at, closed_at,
                   custom_fields_json, raw_json, synced_at
                 ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
                 ON CONFLICT(id) DO UPDATE SET
                   name = excluded.name,
                   status = excluded.status,
                   is_closed = excluded.is_closed,
                   created_at = excluded.created_at,
                   updated_at = excluded.updated_at,
                   closed_at = excluded.closed_at,
                   custom_fields_json = excluded.custom_fields_json,
                   raw_json = excluded.raw_json,
                   synced_at = excluded.synced_at",
            )?;
            for task in tasks {
                stmt.execute(params![
                    task.id,
                    task.name,
                    task.status,
                    task.is_closed,
                    task.created_at.map(format_time),
                    task.updated_at.map(format_time),
                    task.closed_at.map(format_time),
                    serde_json::to_string(&task.custom_fields)?,
                    serde_json::to_string(&task.raw)?,
                    synced_at,
                ])?;
            }
        }
        tx.commit()?;
        Ok(tasks.len() as u64)
    }

    pub fn get_task(&self, id: &str) -> AppResult<Option<Task>> {
        let conn = self.conn()?;
        conn.query_row(
            &format!("SELECT {} FROM tasks WHERE id = ?1", TASK_COLUMNS),
            [id],
            parse_task_row,
        )
        .optional()
        .map_err(AppError::from)
    }

    pub fn list_tasks(&self) -> AppResult<Vec<Task>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!("SELECT {} FROM tasks ORDER BY id ASC", TASK_COLUMNS))?;
        let rows = stmt.query_map([], parse_task_row)?;
        let mut result = Vec::new();
        for row in rows {
            result.push(row?);
        }
        Ok(result)
    }

    /// Tasks created or closed on any calendar day in `[start, end]`.
    pub fn tasks_in_range(&self, start: NaiveDate, end: NaiveDate) -> AppResult<Vec<Task>> {
        let (lower, upper) = day_range_bounds(start, end);
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM tasks
             WHERE (created_at >= ?1 AND created_at < ?2)
                OR (closed_at >= ?1 AND closed_at < ?2)
             ORDER BY created_at DESC",
            TASK_COLUMNS
        ))?;
        let rows = stmt
            .query_map(params![lower, upper], parse_task_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn count_open_tasks(&self) -> AppResult<i64> {
        let conn = self.conn()?;
        let count = conn.query_row("SELECT COUNT(1) FROM tasks WHERE is_closed = 0", [], |row| row.get(0))?;
        Ok(count)
    }

    // ─── Form responses ─────────────────────────────────────────────────────

    pub fn form_response_keys(&self) -> AppResult<BTreeSet<String>> {
        let conn = self.conn()?;
        collect_keys(&conn, "SELECT id FROM form_responses")
    }

    pub fn delete_form_responses(&self, keys: &[String]) -> AppResult<u64> {
        self.delete_keys("form_responses", keys)
    }

    pub fn clear_form_responses(&self) -> AppResult<u64> {
        let conn = self.conn()?;
        let removed = conn.execute("DELETE FROM form_responses", [])?;
        Ok(removed as u64)
    }

    /// Plain insert; fails the whole batch on a duplicate key.
    pub fn insert_form_responses(&self, responses: &[FormResponse]) -> AppResult<u64> {
        self.write_form_responses(responses, false)
    }

    pub fn upsert_form_responses(&self, responses: &[FormResponse]) -> AppResult<u64> {
        self.write_form_responses(responses, true)
    }

    fn write_form_responses(&self, responses: &[FormResponse], upsert: bool) -> AppResult<u64> {
        if responses.is_empty() {
            return Ok(0);
        }
        let mut sql = String::from(
            "INSERT INTO form_responses (id, submitted_at, answers_json, flagged, raw_json, synced_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        );
        if upsert {
            sql.push_str(
                " ON CONFLICT(id) DO UPDATE SET
                   submitted_at = excluded.submitted_at,
                   answers_json = excluded.answers_json,
                   flagged = excluded.flagged,
                   raw_json = excluded.raw_json,
                   synced_at = excluded.synced_at",
            );
        }

        let synced_at = format_time(Utc::now());
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare(&sql)?;
            for response in responses {
                stmt.execute(params![
                    response.id,
                    response.submitted_at.map(format_time),
                    serde_json::to_string(&response.answers)?,
                    response.flagged,
                    serde_json::to_string(&response.raw)?,
                    synced_at,
                ])?;
            }
        }
        tx.commit()?;
        Ok(responses.len() as u64)
    }

    pub fn get_form_response(&self, id: &str) -> AppResult<Option<FormResponse>> {
        let conn = self.conn()?;
        conn.query_row(
            &format!("SELECT {} FROM form_responses WHERE id = ?1", FORM_COLUMNS),
            [id],
            parse_form_row,
        )
        .optional()
        .map_err(AppError::from)
    }

    pub fn form_responses_in_range(&self, start: NaiveDate, end: NaiveDate) -> AppResult<Vec<FormResponse>> {
        let (lower, upper) = day_range_bounds(start, end);
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM form_responses
             WHERE submitted_at >= ?1 AND submitted_at < ?2
             ORDER BY submitted_at DESC",
            FORM_COLUMNS
        ))?;
        let rows = stmt
            .query_map(params![lower, upper], parse_form_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    // ─── Metric days ────────────────────────────────────────────────────────

    pub fn metric_day_keys(&self) -> AppResult<BTreeSet<NaiveDate>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare("SELECT date FROM metric_days")?;
        let rows = stmt.query_map([], |row| parse_day(&row.get::<_, String>(0)?))?;
        let mut keys = BTreeSet::new();
        for row in rows {
            keys.insert(row?);
        }
        Ok(keys)
    }

    pub fn upsert_metric_days(&self, days: &[MetricDay]) -> AppResult<u64> {
        if days.is_empty() {
            return Ok(0);
        }
        let synced_at = format_time(Utc::now());
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO metric_days (date, page_views, button_clicks, synced_at)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(date) DO UPDATE SET
                   page_views = excluded.page_views,
                   button_clicks = excluded.button_clicks,
                   synced_at = excluded.synced_at",
            )?;
            for day in days {
                stmt.execute(params![
                    day.date.format(DAY_FORMAT).to_string(),
                    day.page_views.max(0),
                    day.button_clicks.max(0),
                    synced_at,
                ])?;
            }
        }
        tx.commit()?;
        Ok(days.len() as u64)
    }

    pub fn metric_days_in_range(&self, start: NaiveDate, end: NaiveDate) -> AppResult<Vec<MetricDay>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT date, page_views, button_clicks FROM metric_days
             WHERE date >= ?1 AND date <= ?2
             ORDER BY date DESC",
        )?;
        let rows = stmt
            .query_map(
                params![start.format(DAY_FORMAT).to_string(), end.format(DAY_FORMAT).to_string()],
                |row| {
                    Ok(MetricDay {
                        date: parse_day(&row.get::<_, String>(0)?)?,
                        page_views: row.get(1)?,
                        button_clicks: row.get(2)?,
                    })
                },
            )?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn count_rows(&self, entity: EntityKind) -> AppResult<i64> {
        let conn = self.conn()?;
        let count = conn.query_row(
            &format!("SELECT COUNT(1) FROM {}", table_for(entity)),
            [],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    fn delete_keys(&self, table: &str, keys: &[String]) -> AppResult<u64> {
        if keys.is_empty() {
            return Ok(0);
        }
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let mut removed = 0u64;
        {
            let mut stmt = tx.prepare(&format!("DELETE FROM {} WHERE id = ?1", table))?;
            for key in keys {
                removed += stmt.execute([key])? as u64;
            }
        }
        tx.commit()?;
        Ok(removed)
    }

    // ─── Settings ───────────────────────────────────────────────────────────

    pub fn get_settings(&self) -> AppResult<SyncSettings> {
        let conn = self.conn()?;
        let raw = conn
            .query_row(
                "SELECT value_json FROM settings WHERE key = ?1",
                [SETTINGS_KEY],
                |row| row.get::<_, String>(0),
            )
            .optional()?;

        match raw {
            Some(raw) => Ok(serde_json::from_str::<SyncSettings>(&raw).unwrap_or_default()),
            None => Ok(SyncSettings::default()),
        }
    }

    pub fn update_settings(&self, update: serde_json::Value) -> AppResult<SyncSettings> {
        let current = self.get_settings()?;
        let mut merged = serde_json::to_value(current)?;
        merge_json(&mut merged, update);
        let settings: SyncSettings =
            serde_json::from_value(merged).map_err(|err| AppError::Config(err.to_string()))?;
        validate_settings(&settings)?;

        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO settings (key, value_json, updated_at)
             VALUES (?1, ?2, ?3)
             ON CONFLICT(key) DO UPDATE SET value_json = excluded.value_json, updated_at = excluded.updated_at",
            params![SETTINGS_KEY, serde_json::to_string(&settings)?, format_time(Utc::now())],
        )?;

        Ok(settings)
    }

    fn ensure_default_settings(&self) -> AppResult<()> {
        let conn = self.conn()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(1) FROM settings WHERE key = ?1",
            [SETTINGS_KEY],
            |row| row.get(0),
        )?;
        if count == 0 {
            conn.execute(
                "INSERT INTO settings (key, value_json, updated_at) VALUES (?1, ?2, ?3)",
                params![
                    SETTINGS_KEY,
                    serde_json::to_string(&SyncSettings::default())?,
                    format_time(Utc::now())
                ],
            )?;
        }
        Ok(())
    }

    // ─── Sync run log ───────────────────────────────────────────────────────

    pub fn insert_sync_run(&self, entity: EntityKind) -> AppResult<SyncRunRecord> {
        let id = Uuid::new_v4().to_string();
        let started_at = Utc::now();
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO sync_runs (id, entity, status, started_at) VALUES (?1, ?2, ?3, ?4)",
            params![
                id,
                entity.as_str(),
                SyncRunStatus::Running.as_str(),
                format_time(started_at)
            ],
        )?;
        Ok(SyncRunRecord {
            id,
            entity,
            status: SyncRunStatus::Running,
            started_at,
            finished_at: None,
            counts: ReconcileCounts::default(),
            issue_count: 0,
            final_count: None,
            error_message: None,
        })
    }

    pub fn finish_sync_run(
        &self,
        run_id: &str,
        status: SyncRunStatus,
        counts: ReconcileCounts,
        issue_count: u64,
        final_count: Option<u64>,
        error_message: Option<&str>,
    ) -> AppResult<()> {
        let conn = self.conn()?;
        conn.execute(
            "UPDATE sync_runs
             SET status = ?1, finished_at = ?2, inserted = ?3, updated = ?4, deleted = ?5,
                 issue_count = ?6, final_count = ?7, error_message = ?8
             WHERE id = ?9",
            params![
                status.as_str(),
                format_time(Utc::now()),
                counts.inserted as i64,
                counts.updated as i64,
                counts.deleted as i64,
                issue_count as i64,
                final_count.map(|count| count as i64),
                error_message,
                run_id,
            ],
        )?;
        Ok(())
    }

    pub fn latest_sync_run(&self, entity: EntityKind) -> AppResult<Option<SyncRunRecord>> {
        let conn = self.conn()?;
        conn.query_row(
            &format!(
                "SELECT {} FROM sync_runs WHERE entity = ?1 ORDER BY started_at DESC, rowid DESC LIMIT 1",
                SYNC_RUN_COLUMNS
            ),
            [entity.as_str()],
            parse_sync_run_row,
        )
        .optional()
        .map_err(AppError::from)
    }

    pub fn list_sync_runs(&self, entity: EntityKind, limit: u32) -> AppResult<Vec<SyncRunRecord>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM sync_runs WHERE entity = ?1 ORDER BY started_at DESC, rowid DESC LIMIT ?2",
            SYNC_RUN_COLUMNS
        ))?;
        let rows = stmt
            .query_map(params![entity.as_str(), limit], parse_sync_run_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn prune_sync_runs(&self, entity: EntityKind, keep: u32) -> AppResult<u64> {
        let conn = self.conn()?;
        let removed = conn.execute(
            "DELETE FROM sync_runs
             WHERE entity = ?1
               AND id NOT IN (
                 SELECT id FROM sync_runs WHERE entity = ?1 ORDER BY started_at DESC, rowid DESC LIMIT ?2
               )",
            params![entity.as_str(), keep],
        )?;
        Ok(removed as u64)
    }

    /// Runs left in `running` by a previous process can never finish.
    pub fn mark_orphan_sync_runs_failed(&self) -> AppResult<u64> {
        let conn = self.conn()?;
        let updated = conn.execute(
            "UPDATE sync_runs
             SET status = ?1, finished_at = ?2, error_message = COALESCE(error_message, 'Interrupted by shutdown')
             WHERE status = ?3",
            params![
                SyncRunStatus::Failed.as_str(),
                format_time(Utc::now()),
                SyncRunStatus::Running.as_str()
            ],
        )?;
        Ok(updated as u64)
    }
}

fn table_for(entity: EntityKind) -> &'static str {
    match entity {
        EntityKind::Tasks => "tasks",
        EntityKind::FormResponses => "form_responses",
        EntityKind::Metrics => "metric_days",
    }
}

fn collect_keys(conn: &Connection, sql: &str) -> AppResult<BTreeSet<String>> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
    let mut keys = BTreeSet::new();
    for row in rows {
        keys.insert(row?);
    }
    Ok(keys)
}

fn validate_settings(settings: &SyncSettings) -> AppResult<()> {
    if settings.window_days == 0 {
        return Err(AppError::Config("windowDays must be at least 1".to_string()));
    }
    if settings.fetch_timeout_seconds == 0 {
        return Err(AppError::Config("fetchTimeoutSeconds must be at least 1".to_string()));
    }
    if settings.refresh_interval_seconds == 0 {
        return Err(AppError::Config("refreshIntervalSeconds must be at least 1".to_string()));
    }
    if settings.sync_run_retention == 0 {
        return Err(AppError::Config("syncRunRetention must be at least 1".to_string()));
    }
    if settings.flag_marker.trim().is_empty() {
        return Err(AppError::Config("flagMarker cannot be empty".to_string()));
    }
    Ok(())
}

/// Canonical stored form: UTC, millisecond precision, `Z` suffix. Sorts lexicographically.
pub fn format_time(value: DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn day_range_bounds(start: NaiveDate, end: NaiveDate) -> (String, String) {
    let lower = start.and_hms_opt(0, 0, 0).map(|naive| naive.and_utc());
    let upper = (end + Duration::days(1)).and_hms_opt(0, 0, 0).map(|naive| naive.and_utc());
    (
        lower.map(format_time).unwrap_or_default(),
        upper.map(format_time).unwrap_or_default(),
    )
}

fn parse_task_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Task> {
    Ok(Task {
        id: row.get(0)?,
        name: row.get(1)?,
        status: row.get(2)?,
        is_closed: row.get::<_, i32>(3)? != 0,
        created_at: read_record_time(row.get(4)?),
        updated_at: read_record_time(row.get(5)?),
        closed_at: read_record_time(row.get(6)?),
        custom_fields: serde_json::from_str::<serde_json::Value>(&row.get::<_, String>(7)?)
            .unwrap_or(serde_json::json!([])),
        raw: serde_json::from_str::<serde_json::Value>(&row.get::<_, String>(8)?)
            .unwrap_or(serde_json::json!({})),
    })
}

fn parse_form_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<FormResponse> {
    Ok(FormResponse {
        id: row.get(0)?,
        submitted_at: read_record_time(row.get(1)?),
        answers: serde_json::from_str::<BTreeMap<String, serde_json::Value>>(&row.get::<_, String>(2)?)
            .unwrap_or_default(),
        flagged: row.get::<_, i32>(3)? != 0,
        raw: serde_json::from_str::<serde_json::Value>(&row.get::<_, String>(4)?)
            .unwrap_or(serde_json::json!({})),
    })
}

fn parse_sync_run_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<SyncRunRecord> {
    Ok(SyncRunRecord {
        id: row.get(0)?,
        entity: parse_entity(&row.get::<_, String>(1)?)?,
        status: parse_sync_status(&row.get::<_, String>(2)?),
        started_at: parse_time(&row.get::<_, String>(3)?)?,
        finished_at: parse_optional_time(row.get(4)?)?,
        counts: ReconcileCounts {
            inserted: row.get::<_, i64>(5)?.max(0) as u64,
            updated: row.get::<_, i64>(6)?.max(0) as u64,
            deleted: row.get::<_, i64>(7)?.max(0) as u64,
        },
        issue_count: row.get::<_, i64>(8)?.max(0) as u64,
        final_count: row.get::<_, Option<i64>>(9)?.map(|count| count.max(0) as u64),
        error_message: row.get(10)?,
    })
}

fn parse_entity(raw: &str) -> rusqlite::Result<EntityKind> {
    match raw {
        "tasks" => Ok(EntityKind::Tasks),
        "form-responses" => Ok(EntityKind::FormResponses),
        "metrics" => Ok(EntityKind::Metrics),
        other => Err(conversion_error(format!("Unknown entity '{}'", other))),
    }
}

fn parse_sync_status(raw: &str) -> SyncRunStatus {
    match raw {
        "running" => SyncRunStatus::Running,
        "succeeded" => SyncRunStatus::Succeeded,
        _ => SyncRunStatus::Failed,
    }
}

fn parse_optional_time(raw: Option<String>) -> rusqlite::Result<Option<DateTime<Utc>>> {
    raw.map(|value| parse_time(&value)).transpose()
}

/// Mirrored record timestamps are advisory: one unreadable value drops that field, not the query.
fn read_record_time(raw: Option<String>) -> Option<DateTime<Utc>> {
    let raw = raw?;
    match parse_time(&raw) {
        Ok(value) => Some(value),
        Err(error) => {
            tracing::warn!(value = %raw, error = %error, "ignoring unreadable stored timestamp");
            None
        }
    }
}

fn parse_time(raw: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|error| conversion_error(error.to_string()))
}

fn parse_day(raw: &str) -> rusqlite::Result<NaiveDate> {
    NaiveDate::parse_from_str(raw, DAY_FORMAT).map_err(|error| conversion_error(error.to_string()))
}

fn conversion_error(message: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(
        0,
        rusqlite::types::Type::Text,
        Box::new(std::io::Error::new(std::io::ErrorKind::InvalidData, message)),
    )
}

fn merge_json(target: &mut serde_json::Value, update: serde_json::Value) {
    match (target, update) {
        (serde_json::Value::Object(target_map), serde_json::Value::Object(update_map)) => {
            for (key, value) in update_map {
                merge_json(target_map.entry(key).or_insert(serde_json::Value::Null), value);
            }
        }
        (target, update) => {
            *target = update;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{format_time, Database};
    use crate::models::{
        EntityKind, FormResponse, FormSyncMode, MetricDay, ReconcileCounts, SyncRunStatus, Task,
    };
    use chrono::{NaiveDate, TimeZone, Utc};
    use std::collections::BTreeMap;

    fn open() -> (tempfile::TempDir, Database) {
        let dir = tempfile::tempdir().expect("tempdir");
        let db = Database::new(&dir.path().join("test.db")).expect("db");
        (dir, db)
    }

    fn task(id: &str, created: (i32, u32, u32)) -> Task {
        Task {
            id: id.to_string(),
            name: format!("task {}", id),
            status: Some("open".to_string()),
            is_closed: false,
            created_at: Some(Utc.with_ymd_and_hms(created.0, created.1, created.2, 9, 0, 0).unwrap()),
            updated_at: None,
            closed_at: None,
            custom_fields: serde_json::json!([]),
            raw: serde_json::json!({ "id": id }),
        }
    }

    fn day(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).expect("valid day")
    }

    #[test]
    fn upsert_overwrites_existing_task_in_place() {
        let (_dir, db) = open();
        db.upsert_tasks(&[task("a", (2024, 1, 1))]).expect("first upsert");

        let mut renamed = task("a", (2024, 1, 1));
        renamed.name = "renamed".to_string();
        renamed.is_closed = true;
        db.upsert_tasks(&[renamed]).expect("second upsert");

        let stored = db.get_task("a").expect("get").expect("task present");
        assert_eq!(stored.name, "renamed");
        assert!(stored.is_closed);
        assert_eq!(db.count_rows(EntityKind::Tasks).expect("count"), 1);
        assert_eq!(db.count_open_tasks().expect("open count"), 0);
    }

    #[test]
    fn delete_tasks_only_removes_named_keys() {
        let (_dir, db) = open();
        db.upsert_tasks(&[task("a", (2024, 1, 1)), task("b", (2024, 1, 2)), task("c", (2024, 1, 3))])
            .expect("upsert");

        let removed = db
            .delete_tasks(&["a".to_string(), "missing".to_string()])
            .expect("delete");
        assert_eq!(removed, 1);

        let keys = db.task_keys().expect("keys");
        assert_eq!(keys.into_iter().collect::<Vec<_>>(), vec!["b".to_string(), "c".to_string()]);
    }

    #[test]
    fn task_range_query_matches_created_or_closed_day() {
        let (_dir, db) = open();
        let inside = task("inside", (2024, 3, 10));
        let before = task("before", (2024, 1, 1));
        let mut closed_inside = task("closed-inside", (2024, 1, 1));
        closed_inside.closed_at = Some(Utc.with_ymd_and_hms(2024, 3, 12, 23, 59, 0).unwrap());
        db.upsert_tasks(&[inside, before, closed_inside]).expect("upsert");

        let found = db
            .tasks_in_range(day(2024, 3, 1), day(2024, 3, 12))
            .expect("range query");
        let mut ids = found.into_iter().map(|task| task.id).collect::<Vec<_>>();
        ids.sort();
        assert_eq!(ids, vec!["closed-inside".to_string(), "inside".to_string()]);
    }

    #[test]
    fn insert_form_responses_rejects_duplicates_but_upsert_does_not() {
        let (_dir, db) = open();
        let response = FormResponse {
            id: "r1".to_string(),
            submitted_at: Some(Utc.with_ymd_and_hms(2024, 2, 1, 12, 0, 0).unwrap()),
            answers: BTreeMap::new(),
            flagged: false,
            raw: serde_json::json!({}),
        };
        db.insert_form_responses(std::slice::from_ref(&response)).expect("insert");
        assert!(db.insert_form_responses(std::slice::from_ref(&response)).is_err());

        let mut flagged = response.clone();
        flagged.flagged = true;
        db.upsert_form_responses(&[flagged]).expect("upsert");
        let stored = db.get_form_response("r1").expect("get").expect("present");
        assert!(stored.flagged);

        assert_eq!(db.clear_form_responses().expect("clear"), 1);
        assert!(db.form_response_keys().expect("keys").is_empty());
    }

    #[test]
    fn metric_days_upsert_by_date_and_query_inclusive_range() {
        let (_dir, db) = open();
        db.upsert_metric_days(&[
            MetricDay { date: day(2024, 1, 1), page_views: 3, button_clicks: 1 },
            MetricDay { date: day(2024, 1, 2), page_views: 5, button_clicks: 0 },
        ])
        .expect("upsert");
        db.upsert_metric_days(&[MetricDay { date: day(2024, 1, 2), page_views: 7, button_clicks: 2 }])
            .expect("re-upsert");

        let rows = db
            .metric_days_in_range(day(2024, 1, 1), day(2024, 1, 2))
            .expect("range");
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].date, day(2024, 1, 2));
        assert_eq!(rows[0].page_views, 7);
        assert_eq!(db.metric_day_keys().expect("keys").len(), 2);
    }

    #[test]
    fn settings_default_and_merge_update() {
        let (_dir, db) = open();
        let defaults = db.get_settings().expect("settings");
        assert_eq!(defaults.window_days, 90);
        assert_eq!(defaults.form_sync_mode, FormSyncMode::Mirror);

        let updated = db
            .update_settings(serde_json::json!({ "formSyncMode": "clear-and-reload", "fetchTimeoutSeconds": 5 }))
            .expect("update");
        assert_eq!(updated.form_sync_mode, FormSyncMode::ClearAndReload);
        assert_eq!(updated.fetch_timeout_seconds, 5);
        assert_eq!(updated.window_days, 90);

        assert!(db.update_settings(serde_json::json!({ "windowDays": 0 })).is_err());
        assert_eq!(db.get_settings().expect("reread").fetch_timeout_seconds, 5);
    }

    #[test]
    fn sync_runs_record_finish_and_prune() {
        let (_dir, db) = open();
        for _ in 0..3 {
            let run = db.insert_sync_run(EntityKind::Tasks).expect("insert run");
            db.finish_sync_run(
                &run.id,
                SyncRunStatus::Succeeded,
                ReconcileCounts { inserted: 2, updated: 1, deleted: 0 },
                0,
                Some(3),
                None,
            )
            .expect("finish run");
        }
        let orphan = db.insert_sync_run(EntityKind::Metrics).expect("orphan");

        let latest = db.latest_sync_run(EntityKind::Tasks).expect("latest").expect("present");
        assert_eq!(latest.status, SyncRunStatus::Succeeded);
        assert_eq!(latest.counts.inserted, 2);
        assert_eq!(latest.final_count, Some(3));

        assert_eq!(db.prune_sync_runs(EntityKind::Tasks, 1).expect("prune"), 2);
        assert_eq!(db.list_sync_runs(EntityKind::Tasks, 10).expect("list").len(), 1);

        assert_eq!(db.mark_orphan_sync_runs_failed().expect("orphans"), 1);
        let reloaded = db
            .latest_sync_run(EntityKind::Metrics)
            .expect("latest metrics")
            .expect("orphan present");
        assert_eq!(reloaded.id, orphan.id);
        assert_eq!(reloaded.status, SyncRunStatus::Failed);
        assert!(reloaded.finished_at.is_some());
    }

    #[test]
    fn stored_timestamps_are_millisecond_utc() {
        let value = Utc.with_ymd_and_hms(2024, 1, 1, 1, 0, 0).unwrap();
        assert_eq!(format_time(value), "2024-01-01T01:00:00.000Z");
    }
}
