use crate::adapters::analytics::normalize_rows;
use crate::adapters::clickup::normalize_task;
use crate::adapters::typeform::normalize_response;
use crate::adapters::{AnalyticsReport, UpstreamRecord};
use crate::db::Database;
use crate::errors::AppResult;
use crate::models::{
    EntityKind, FormResponse, FormSyncMode, Normalized, ReconcileCounts, ReconcileResult, RecordIssue, Task,
};
use chrono::NaiveDate;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

/// Per-call knobs that come from `SyncSettings` and the clock at the service edge.
#[derive(Debug, Clone)]
pub struct ReconcileOptions {
    pub flag_marker: String,
    pub form_sync_mode: FormSyncMode,
    pub as_of: NaiveDate,
}

/// Converges the local store to an upstream snapshot.
///
/// Malformed records never abort a batch; they come back as `RecordIssue`s. Store failures
/// abort the call, leaving whatever earlier batches already committed.
#[derive(Clone)]
pub struct Reconciler {
    db: Arc<Database>,
}

impl Reconciler {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    pub fn reconcile(
        &self,
        entity: EntityKind,
        snapshot: &[UpstreamRecord],
        options: &ReconcileOptions,
    ) -> AppResult<ReconcileResult> {
        match entity {
            EntityKind::Tasks => self.reconcile_tasks(snapshot),
            EntityKind::FormResponses => {
                self.reconcile_form_responses(snapshot, &options.flag_marker, options.form_sync_mode)
            }
            EntityKind::Metrics => self.reconcile_metrics(snapshot, options.as_of),
        }
    }

    /// Mirror-replace: delete local keys missing upstream, then upsert the whole snapshot.
    pub fn reconcile_tasks(&self, snapshot: &[UpstreamRecord]) -> AppResult<ReconcileResult> {
        let mut issues = Vec::new();
        let mut tasks = Vec::new();
        for record in snapshot {
            match record {
                UpstreamRecord::ClickupTask { payload } => {
                    collect_normalized(normalize_task(payload), &mut tasks, &mut issues);
                }
                other => issues.push(wrong_entity(EntityKind::Tasks, other)),
            }
        }
        let tasks = collapse_duplicates(tasks, |task: &Task| task.id.as_str(), &mut issues);

        let local = self.db.task_keys()?;
        let counts = mirror_replace(
            &local,
            &tasks,
            |task| task.id.as_str(),
            |keys| self.db.delete_tasks(keys),
            |batch| self.db.upsert_tasks(batch),
        )?;

        Ok(finish(EntityKind::Tasks, counts, issues))
    }

    pub fn reconcile_form_responses(
        &self,
        snapshot: &[UpstreamRecord],
        marker: &str,
        mode: FormSyncMode,
    ) -> AppResult<ReconcileResult> {
        let mut issues = Vec::new();
        let mut responses = Vec::new();
        for record in snapshot {
            match record {
                UpstreamRecord::TypeformResponse { payload } => {
                    collect_normalized(normalize_response(payload, marker), &mut responses, &mut issues);
                }
                other => issues.push(wrong_entity(EntityKind::FormResponses, other)),
            }
        }
        let responses = collapse_duplicates(responses, |response: &FormResponse| response.id.as_str(), &mut issues);

        let counts = match mode {
            FormSyncMode::Mirror => {
                let local = self.db.form_response_keys()?;
                mirror_replace(
                    &local,
                    &responses,
                    |response| response.id.as_str(),
                    |keys| self.db.delete_form_responses(keys),
                    |batch| self.db.upsert_form_responses(batch),
                )?
            }
            FormSyncMode::ClearAndReload => {
                let deleted = self.db.clear_form_responses()?;
                tracing::debug!(deleted, "cleared form responses before reload");
                let inserted = self.db.insert_form_responses(&responses)?;
                ReconcileCounts {
                    inserted,
                    updated: 0,
                    deleted,
                }
            }
        };

        Ok(finish(EntityKind::FormResponses, counts, issues))
    }

    /// Keyed upsert by calendar day. Days are never deleted.
    pub fn reconcile_metrics(&self, snapshot: &[UpstreamRecord], as_of: NaiveDate) -> AppResult<ReconcileResult> {
        let mut issues = Vec::new();
        let mut rows: Vec<(AnalyticsReport, &serde_json::Value)> = Vec::new();
        for record in snapshot {
            match record {
                UpstreamRecord::AnalyticsRow { report, payload } => rows.push((*report, payload)),
                other => issues.push(wrong_entity(EntityKind::Metrics, other)),
            }
        }

        let normalized = normalize_rows(rows, as_of);
        issues.extend(normalized.issues);

        let local = self.db.metric_day_keys()?;
        let updated = normalized
            .days
            .iter()
            .filter(|day| local.contains(&day.date))
            .count() as u64;
        let written = self.db.upsert_metric_days(&normalized.days)?;

        let counts = ReconcileCounts {
            inserted: written.saturating_sub(updated),
            updated,
            deleted: 0,
        };
        Ok(finish(EntityKind::Metrics, counts, issues))
    }
}

fn collect_normalized<T>(normalized: Normalized<T>, records: &mut Vec<T>, issues: &mut Vec<RecordIssue>) {
    issues.extend(normalized.issues);
    if let Some(record) = normalized.record {
        records.push(record);
    }
}

fn wrong_entity(expected: EntityKind, record: &UpstreamRecord) -> RecordIssue {
    RecordIssue::new(
        None,
        "provider",
        format!("{} record in a {} snapshot", record.entity(), expected),
    )
}

/// Keeps the last occurrence of every key, in first-seen order.
fn collapse_duplicates<T, K>(records: Vec<T>, key: K, issues: &mut Vec<RecordIssue>) -> Vec<T>
where
    K: Fn(&T) -> &str,
{
    let mut positions: HashMap<String, usize> = HashMap::new();
    let mut kept: Vec<T> = Vec::with_capacity(records.len());
    for record in records {
        let id = key(&record).to_string();
        match positions.get(&id) {
            Some(&index) => {
                issues.push(RecordIssue::new(
                    Some(&id),
                    "id",
                    "duplicate key in snapshot; last occurrence kept",
                ));
                kept[index] = record;
            }
            None => {
                positions.insert(id, kept.len());
                kept.push(record);
            }
        }
    }
    kept
}

fn mirror_replace<T, K, D, U>(
    local: &BTreeSet<String>,
    records: &[T],
    key: K,
    delete: D,
    upsert: U,
) -> AppResult<ReconcileCounts>
where
    K: Fn(&T) -> &str,
    D: FnOnce(&[String]) -> AppResult<u64>,
    U: FnOnce(&[T]) -> AppResult<u64>,
{
    let upstream: BTreeSet<&str> = records.iter().map(&key).collect();
    let stale: Vec<String> = local
        .iter()
        .filter(|existing| !upstream.contains(existing.as_str()))
        .cloned()
        .collect();
    let updated = records.iter().filter(|record| local.contains(key(*record))).count() as u64;

    let deleted = delete(&stale)?;
    let written = upsert(records)?;
    tracing::debug!(deleted, written, "mirror batches applied");

    Ok(ReconcileCounts {
        inserted: written.saturating_sub(updated),
        updated,
        deleted,
    })
}

fn finish(entity: EntityKind, counts: ReconcileCounts, errors: Vec<RecordIssue>) -> ReconcileResult {
    for issue in &errors {
        tracing::warn!(
            entity = %entity,
            record_id = issue.record_id.as_deref().unwrap_or("-"),
            field = %issue.field,
            "malformed record: {}",
            issue.message
        );
    }
    ReconcileResult {
        inserted: counts.inserted,
        updated: counts.updated,
        deleted: counts.deleted,
        errors,
    }
}
