use crate::adapters::{SnapshotWindow, SourceAdapter};
use crate::db::Database;
use crate::errors::{AppError, AppResult};
use crate::models::{
    EntityKind, ReconcileCounts, ReconcileResult, SyncOutcome, SyncReport, SyncRunStatus, SyncSettings,
};
use crate::reconciler::{ReconcileOptions, Reconciler};
use crate::redaction::Redactor;
use chrono::NaiveDate;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

/// Runs fetch, normalize and reconcile for each entity and records every attempt in the
/// sync-run log.
#[derive(Clone)]
pub struct SyncService {
    db: Arc<Database>,
    reconciler: Reconciler,
    sources: Arc<BTreeMap<EntityKind, Arc<dyn SourceAdapter>>>,
    redactor: Redactor,
}

impl SyncService {
    /// Later sources win when two claim the same entity.
    pub fn new(db: Arc<Database>, sources: Vec<Arc<dyn SourceAdapter>>) -> Self {
        let sources = sources
            .into_iter()
            .map(|source| (source.entity(), source))
            .collect::<BTreeMap<_, _>>();
        Self {
            reconciler: Reconciler::new(db.clone()),
            db,
            sources: Arc::new(sources),
            redactor: Redactor::new(),
        }
    }

    pub fn database(&self) -> &Arc<Database> {
        &self.db
    }

    /// Syncs all three entities concurrently. One entity failing never affects the others.
    pub async fn sync_all(&self, as_of: NaiveDate) -> SyncReport {
        let (tasks, forms, metrics) = tokio::join!(
            self.sync_entity(EntityKind::Tasks, as_of),
            self.sync_entity(EntityKind::FormResponses, as_of),
            self.sync_entity(EntityKind::Metrics, as_of),
        );
        let outcomes = vec![tasks, forms, metrics];
        SyncReport {
            success: outcomes.iter().all(|outcome| outcome.success),
            outcomes,
        }
    }

    pub async fn sync_entity(&self, entity: EntityKind, as_of: NaiveDate) -> SyncOutcome {
        let run_id = match self.db.insert_sync_run(entity) {
            Ok(run) => Some(run.id),
            Err(error) => {
                tracing::warn!(entity = %entity, error = %error, "failed to record sync run start");
                None
            }
        };
        tracing::info!(entity = %entity, run_id = run_id.as_deref().unwrap_or("-"), "sync started");

        let settings = self.db.get_settings().unwrap_or_else(|error| {
            tracing::warn!(error = %error, "failed to load sync settings; using defaults");
            SyncSettings::default()
        });

        let outcome = match self.run_pipeline(entity, as_of, &settings).await {
            Ok((result, final_count)) => {
                let counts = result.counts();
                tracing::info!(
                    entity = %entity,
                    inserted = counts.inserted,
                    updated = counts.updated,
                    deleted = counts.deleted,
                    issues = result.errors.len(),
                    final_count,
                    "sync finished"
                );
                SyncOutcome {
                    entity,
                    success: true,
                    message: success_message(entity, &result),
                    counts,
                    final_count: Some(final_count),
                    errors: result.errors,
                    error: None,
                    run_id: run_id.clone(),
                }
            }
            Err(error) => {
                let scrubbed = self.redactor.redact(&error.to_string()).content;
                tracing::warn!(entity = %entity, error = %scrubbed, "sync failed");
                SyncOutcome {
                    entity,
                    success: false,
                    message: format!("Failed to sync {}", entity),
                    counts: ReconcileCounts::default(),
                    final_count: None,
                    errors: Vec::new(),
                    error: Some(scrubbed),
                    run_id: run_id.clone(),
                }
            }
        };

        if let Some(run_id) = run_id.as_deref() {
            self.record_finish(run_id, &outcome, settings.sync_run_retention);
        }
        outcome
    }

    async fn run_pipeline(
        &self,
        entity: EntityKind,
        as_of: NaiveDate,
        settings: &SyncSettings,
    ) -> AppResult<(ReconcileResult, u64)> {
        let source = self
            .sources
            .get(&entity)
            .cloned()
            .ok_or_else(|| AppError::Config(format!("no source configured for {}", entity)))?;

        let window = SnapshotWindow::trailing(as_of, settings.window_days);
        let timeout = Duration::from_secs(settings.fetch_timeout_seconds);
        let snapshot = tokio::time::timeout(timeout, source.fetch_snapshot(window)).await??;
        tracing::debug!(entity = %entity, source = source.name(), records = snapshot.len(), "snapshot fetched");

        let reconciler = self.reconciler.clone();
        let db = self.db.clone();
        let options = ReconcileOptions {
            flag_marker: settings.flag_marker.clone(),
            form_sync_mode: settings.form_sync_mode,
            as_of,
        };
        tokio::task::spawn_blocking(move || -> AppResult<(ReconcileResult, u64)> {
            let result = reconciler.reconcile(entity, &snapshot, &options)?;
            let final_count = db.count_rows(entity)?.max(0) as u64;
            Ok((result, final_count))
        })
        .await
        .map_err(|error| AppError::Internal(format!("reconcile task failed: {}", error)))?
    }

    fn record_finish(&self, run_id: &str, outcome: &SyncOutcome, retention: u32) {
        let status = if outcome.success {
            SyncRunStatus::Succeeded
        } else {
            SyncRunStatus::Failed
        };
        if let Err(error) = self.db.finish_sync_run(
            run_id,
            status,
            outcome.counts,
            outcome.errors.len() as u64,
            outcome.final_count,
            outcome.error.as_deref(),
        ) {
            tracing::warn!(run_id, error = %error, "failed to record sync run result");
        }
        match self.db.prune_sync_runs(outcome.entity, retention) {
            Ok(0) => {}
            Ok(pruned) => tracing::debug!(entity = %outcome.entity, pruned, "pruned sync run log"),
            Err(error) => tracing::warn!(entity = %outcome.entity, error = %error, "sync run pruning failed"),
        }
    }
}

fn success_message(entity: EntityKind, result: &ReconcileResult) -> String {
    match entity {
        EntityKind::Metrics => format!("Synced {} {}", result.upserted(), entity.noun()),
        _ => format!(
            "Synced {} {}, deleted {} {}",
            result.upserted(),
            entity.noun(),
            result.deleted,
            entity.noun()
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::SyncService;
    use crate::adapters::fixture::FixtureSource;
    use crate::adapters::{AnalyticsReport, SourceAdapter, UpstreamRecord};
    use crate::db::Database;
    use crate::models::{EntityKind, SyncRunStatus};
    use chrono::NaiveDate;
    use std::sync::Arc;
    use std::time::Duration;

    fn as_of() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, 3).expect("date")
    }

    fn tasks(ids: &[&str]) -> Vec<UpstreamRecord> {
        ids.iter()
            .map(|id| UpstreamRecord::ClickupTask {
                payload: serde_json::json!({ "id": id, "name": id, "date_created": "1704067200000" }),
            })
            .collect()
    }

    fn service(sources: Vec<Arc<dyn SourceAdapter>>) -> (tempfile::TempDir, SyncService) {
        let dir = tempfile::tempdir().expect("tempdir");
        let db = Arc::new(Database::new(&dir.path().join("hub.db")).expect("db"));
        (dir, SyncService::new(db, sources))
    }

    #[tokio::test]
    async fn sync_entity_reports_counts_and_logs_the_run() {
        let (_dir, service) = service(vec![Arc::new(FixtureSource::inline(EntityKind::Tasks, tasks(&["a", "b"])))]);

        let outcome = service.sync_entity(EntityKind::Tasks, as_of()).await;
        assert!(outcome.success);
        assert_eq!(outcome.message, "Synced 2 tasks, deleted 0 tasks");
        assert_eq!(outcome.final_count, Some(2));

        let run = service
            .database()
            .latest_sync_run(EntityKind::Tasks)
            .expect("latest")
            .expect("run");
        assert_eq!(Some(run.id), outcome.run_id);
        assert_eq!(run.status, SyncRunStatus::Succeeded);
        assert_eq!(run.counts.inserted, 2);
        assert_eq!(run.final_count, Some(2));
    }

    #[tokio::test]
    async fn failing_source_only_fails_its_entity() {
        let metrics = FixtureSource::inline(
            EntityKind::Metrics,
            vec![UpstreamRecord::AnalyticsRow {
                report: AnalyticsReport::PageViews,
                payload: serde_json::json!({ "date": "20240102", "value": "7" }),
            }],
        );
        let (_dir, service) = service(vec![
            Arc::new(FixtureSource::inline(EntityKind::Tasks, tasks(&["a"]))),
            Arc::new(
                FixtureSource::inline(EntityKind::FormResponses, Vec::new())
                    .failing("401 Unauthorized token=tfp_secretsecretsecret"),
            ),
            Arc::new(metrics),
        ]);

        let report = service.sync_all(as_of()).await;
        assert!(!report.success);

        let forms = report.outcome(EntityKind::FormResponses).expect("forms outcome");
        assert!(!forms.success);
        let error = forms.error.as_deref().expect("error");
        assert!(error.starts_with("ADAPTER_FETCH"));
        assert!(!error.contains("tfp_secret"));

        assert!(report.outcome(EntityKind::Tasks).expect("tasks").success);
        let metrics = report.outcome(EntityKind::Metrics).expect("metrics");
        assert!(metrics.success);
        assert_eq!(metrics.message, "Synced 2 days of analytics data");

        let run = service
            .database()
            .latest_sync_run(EntityKind::FormResponses)
            .expect("latest")
            .expect("run");
        assert_eq!(run.status, SyncRunStatus::Failed);
        assert!(run.error_message.is_some_and(|message| !message.contains("tfp_secret")));
    }

    #[tokio::test]
    async fn slow_source_times_out() {
        let slow = FixtureSource::inline(EntityKind::Tasks, tasks(&["a"])).with_delay(Duration::from_secs(5));
        let (_dir, service) = service(vec![Arc::new(slow)]);
        service
            .database()
            .update_settings(serde_json::json!({ "fetchTimeoutSeconds": 1 }))
            .expect("settings");

        let outcome = service.sync_entity(EntityKind::Tasks, as_of()).await;
        assert!(!outcome.success);
        assert!(outcome.error.as_deref().is_some_and(|error| error.contains("timed out")));
        assert_eq!(service.database().count_rows(EntityKind::Tasks).expect("count"), 0);
    }

    #[tokio::test]
    async fn missing_source_is_a_config_failure() {
        let (_dir, service) = service(Vec::new());
        let outcome = service.sync_entity(EntityKind::Metrics, as_of()).await;
        assert!(!outcome.success);
        assert!(outcome.error.as_deref().is_some_and(|error| error.starts_with("CONFIG_INVALID")));
    }

    #[tokio::test]
    async fn sync_run_log_is_pruned_to_retention() {
        let (_dir, service) = service(vec![Arc::new(FixtureSource::inline(EntityKind::Tasks, tasks(&["a"])))]);
        service
            .database()
            .update_settings(serde_json::json!({ "syncRunRetention": 2 }))
            .expect("settings");

        for _ in 0..4 {
            service.sync_entity(EntityKind::Tasks, as_of()).await;
        }
        let runs = service.database().list_sync_runs(EntityKind::Tasks, 10).expect("runs");
        assert_eq!(runs.len(), 2);
    }
}
