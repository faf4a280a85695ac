use crate::models::SyncReport;
use crate::sync::SyncService;
use chrono::Utc;
use std::sync::Arc;
use tokio::sync::{Mutex, Notify};
use tokio::task::JoinHandle;
use tokio::time::{Duration, MissedTickBehavior};

/// Drives full syncs on a fixed cadence, plus on demand through `trigger`.
///
/// Syncs started by the loop never overlap each other; a trigger arriving mid-sync is
/// coalesced into one follow-up run.
#[derive(Clone)]
pub struct SyncScheduler {
    service: SyncService,
    notify: Arc<Notify>,
    handle: Arc<Mutex<Option<JoinHandle<()>>>>,
    last_report: Arc<Mutex<Option<SyncReport>>>,
}

impl SyncScheduler {
    pub fn new(service: SyncService) -> Self {
        Self {
            service,
            notify: Arc::new(Notify::new()),
            handle: Arc::new(Mutex::new(None)),
            last_report: Arc::new(Mutex::new(None)),
        }
    }

    /// Spawns the loop. Calling it while already started is a no-op.
    pub async fn start(&self) {
        let mut handle = self.handle.lock().await;
        if handle.as_ref().is_some_and(|task| !task.is_finished()) {
            return;
        }

        let period = match self.service.database().get_settings() {
            Ok(settings) => Duration::from_secs(settings.refresh_interval_seconds),
            Err(error) => {
                tracing::warn!(error = %error, "failed to load refresh interval; using 300s");
                Duration::from_secs(300)
            }
        };
        tracing::info!(period_seconds = period.as_secs(), "sync scheduler started");

        let scheduler = self.clone();
        *handle = Some(tokio::spawn(async move {
            scheduler.run_loop(period).await;
        }));
    }

    pub async fn stop(&self) {
        if let Some(task) = self.handle.lock().await.take() {
            task.abort();
            tracing::info!("sync scheduler stopped");
        }
    }

    pub fn trigger(&self) {
        self.notify.notify_one();
    }

    pub async fn last_report(&self) -> Option<SyncReport> {
        self.last_report.lock().await.clone()
    }

    /// One full sync against today's UTC date.
    pub async fn run_once(&self) -> SyncReport {
        let as_of = Utc::now().date_naive();
        let report = self.service.sync_all(as_of).await;
        if !report.success {
            let failed = report
                .outcomes
                .iter()
                .filter(|outcome| !outcome.success)
                .map(|outcome| outcome.entity.as_str())
                .collect::<Vec<_>>()
                .join(",");
            tracing::warn!(failed = %failed, "scheduled sync finished with failures");
        }
        *self.last_report.lock().await = Some(report.clone());
        report
    }

    async fn run_loop(self, period: Duration) {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = interval.tick() => {}
                _ = self.notify.notified() => {
                    tracing::debug!("manual sync trigger received");
                }
            }
            self.run_once().await;
        }
    }
}
