pub mod adapters;
pub mod aggregator;
pub mod api;
pub mod dashboard;
pub mod db;
pub mod errors;
pub mod models;
pub mod reconciler;
pub mod redaction;
pub mod scheduler;
pub mod sync;

use crate::adapters::fixture::FixtureSource;
use crate::adapters::SourceAdapter;
use crate::api::{Api, ApiResponse};
use crate::dashboard::DashboardQueryService;
use crate::db::Database;
use crate::errors::{AppError, AppResult};
use crate::models::EntityKind;
use crate::scheduler::SyncScheduler;
use crate::sync::SyncService;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_appender::non_blocking::WorkerGuard;

static LOG_GUARD: std::sync::OnceLock<WorkerGuard> = std::sync::OnceLock::new();

const DATA_DIR_ENV: &str = "METRICS_HUB_DATA_DIR";
const FIXTURES_ENV: &str = "METRICS_HUB_FIXTURES";

/// Process-level locations. Everything tunable at runtime lives in `SyncSettings` instead.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub data_dir: PathBuf,
    pub fixtures_dir: PathBuf,
}

impl AppConfig {
    pub fn from_env() -> Self {
        let data_dir = std::env::var_os(DATA_DIR_ENV)
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("data"));
        let fixtures_dir = std::env::var_os(FIXTURES_ENV)
            .map(PathBuf::from)
            .unwrap_or_else(|| data_dir.join("fixtures"));
        Self { data_dir, fixtures_dir }
    }

    pub fn database_path(&self) -> PathBuf {
        self.data_dir.join("metrics-hub.db")
    }

    pub fn fixture_path(&self, entity: EntityKind) -> PathBuf {
        let file = match entity {
            EntityKind::Tasks => "clickup_tasks.json",
            EntityKind::FormResponses => "typeform_responses.json",
            EntityKind::Metrics => "analytics_report.json",
        };
        self.fixtures_dir.join(file)
    }
}

/// The wired-up service graph. Built once on startup and dropped on shutdown.
#[derive(Clone)]
pub struct App {
    pub db: Arc<Database>,
    pub sync: SyncService,
    pub dashboard: DashboardQueryService,
    pub scheduler: SyncScheduler,
    pub api: Api,
}

impl App {
    pub fn open(config: &AppConfig) -> AppResult<Self> {
        let sources: Vec<Arc<dyn SourceAdapter>> = EntityKind::ALL
            .iter()
            .map(|&entity| Arc::new(FixtureSource::from_file(entity, config.fixture_path(entity))) as Arc<dyn SourceAdapter>)
            .collect();
        Self::with_sources(config, sources)
    }

    pub fn with_sources(config: &AppConfig, sources: Vec<Arc<dyn SourceAdapter>>) -> AppResult<Self> {
        std::fs::create_dir_all(&config.data_dir)?;
        let db = Arc::new(Database::new(&config.database_path())?);

        let interrupted = db.mark_orphan_sync_runs_failed()?;
        if interrupted > 0 {
            tracing::warn!(interrupted, "marked sync runs left running by a previous process as failed");
        }

        let sync = SyncService::new(db.clone(), sources);
        let dashboard = DashboardQueryService::new(db.clone());
        Ok(Self {
            scheduler: SyncScheduler::new(sync.clone()),
            api: Api::new(dashboard.clone(), sync.clone()),
            db,
            sync,
            dashboard,
        })
    }
}

/// Runs the sync scheduler until Ctrl-C.
pub async fn run(config: AppConfig) -> AppResult<()> {
    std::fs::create_dir_all(&config.data_dir)?;
    init_tracing(&config.data_dir)?;

    let app = App::open(&config)?;
    tracing::info!(
        data_dir = %config.data_dir.display(),
        fixtures_dir = %config.fixtures_dir.display(),
        "metrics hub started"
    );

    app.scheduler.start().await;
    tokio::signal::ctrl_c().await?;
    app.scheduler.stop().await;

    tracing::info!("metrics hub shutting down");
    Ok(())
}

/// One request against the endpoint table, for scripting and smoke checks.
pub async fn request(config: AppConfig, method: &str, target: &str) -> AppResult<ApiResponse> {
    let app = App::open(&config)?;
    Ok(app.api.handle(method, target).await)
}

pub fn init_tracing(data_dir: &Path) -> AppResult<()> {
    let log_dir = data_dir.join("logs");
    std::fs::create_dir_all(&log_dir)?;
    let file_appender = tracing_appender::rolling::daily(log_dir, "metrics-hub.log");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
    let _ = LOG_GUARD.set(guard);

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .json()
        .with_writer(non_blocking)
        .try_init()
        .map_err(|error| AppError::Internal(error.to_string()))
}

pub(crate) fn to_client_error(error: impl std::fmt::Display) -> String {
    error.to_string()
}
