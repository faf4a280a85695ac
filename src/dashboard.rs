use crate::aggregator::{Aggregator, DayWindow};
use crate::db::Database;
use crate::errors::AppResult;
use crate::models::{EntityKind, FormAggregate, HealthResponse, SyncStatusView, TaskAggregate, TrafficAggregate};
use chrono::NaiveDate;
use std::sync::Arc;

/// Read-only views for the dashboard. Callers pass `as_of`; nothing here reads the clock.
#[derive(Clone)]
pub struct DashboardQueryService {
    db: Arc<Database>,
    aggregator: Aggregator,
}

impl DashboardQueryService {
    pub fn new(db: Arc<Database>) -> Self {
        Self {
            aggregator: Aggregator::new(db.clone()),
            db,
        }
    }

    /// Configured window, used when a request does not name one.
    pub fn default_window_days(&self) -> AppResult<u32> {
        Ok(self.db.get_settings()?.window_days)
    }

    pub fn traffic(&self, window_days: u32, as_of: NaiveDate) -> AppResult<TrafficAggregate> {
        self.aggregator.traffic(DayWindow::new(as_of, window_days))
    }

    pub fn tasks(&self, window_days: u32, as_of: NaiveDate) -> AppResult<TaskAggregate> {
        self.aggregator.tasks(DayWindow::new(as_of, window_days))
    }

    pub fn forms(&self, window_days: u32, as_of: NaiveDate) -> AppResult<FormAggregate> {
        self.aggregator.forms(DayWindow::new(as_of, window_days))
    }

    pub fn sync_status(&self) -> AppResult<Vec<SyncStatusView>> {
        EntityKind::ALL
            .iter()
            .map(|&entity| {
                Ok(SyncStatusView {
                    entity,
                    last_run: self.db.latest_sync_run(entity)?,
                    row_count: self.db.count_rows(entity)?,
                })
            })
            .collect()
    }

    pub fn health(&self) -> HealthResponse {
        HealthResponse {
            status: "ok".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::DashboardQueryService;
    use crate::db::Database;
    use crate::models::{EntityKind, ReconcileCounts, SyncRunStatus};
    use chrono::NaiveDate;
    use std::sync::Arc;

    fn setup() -> (tempfile::TempDir, Arc<Database>, DashboardQueryService) {
        let dir = tempfile::tempdir().expect("tempdir");
        let db = Arc::new(Database::new(&dir.path().join("hub.db")).expect("db"));
        let service = DashboardQueryService::new(db.clone());
        (dir, db, service)
    }

    #[test]
    fn empty_store_reads_as_zeroes() {
        let (_dir, _db, service) = setup();
        let as_of = NaiveDate::from_ymd_opt(2024, 5, 1).expect("date");
        let window = service.default_window_days().expect("window");
        assert_eq!(window, 90);

        let tasks = service.tasks(window, as_of).expect("tasks");
        assert_eq!(tasks.data.len(), 91);
        assert_eq!((tasks.created, tasks.total_tasks, tasks.open_tasks), (0, 0, 0));
        let forms = service.forms(window, as_of).expect("forms");
        assert_eq!(forms.calendly_rate, 0.0);
        let traffic = service.traffic(7, as_of).expect("traffic");
        assert_eq!(traffic.data.len(), 8);
    }

    #[test]
    fn sync_status_lists_every_entity() {
        let (_dir, db, service) = setup();
        let run = db.insert_sync_run(EntityKind::Metrics).expect("run");
        db.finish_sync_run(&run.id, SyncRunStatus::Succeeded, ReconcileCounts::default(), 0, Some(0), None)
            .expect("finish");

        let status = service.sync_status().expect("status");
        assert_eq!(status.len(), 3);
        let metrics = status
            .iter()
            .find(|view| view.entity == EntityKind::Metrics)
            .expect("metrics view");
        assert_eq!(metrics.last_run.as_ref().map(|run| run.status), Some(SyncRunStatus::Succeeded));
        assert!(status
            .iter()
            .filter(|view| view.entity != EntityKind::Metrics)
            .all(|view| view.last_run.is_none()));
        assert_eq!(service.health().status, "ok");
    }
}
