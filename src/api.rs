use crate::dashboard::DashboardQueryService;
use crate::errors::{AppError, AppResult};
use crate::models::{EntityKind, SyncOutcome};
use crate::sync::SyncService;
use crate::to_client_error;
use chrono::{NaiveDate, Utc};
use serde::Serialize;
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
    Put,
    Patch,
    Delete,
    Head,
    Options,
}

impl Method {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Patch => "PATCH",
            Self::Delete => "DELETE",
            Self::Head => "HEAD",
            Self::Options => "OPTIONS",
        }
    }
}

impl FromStr for Method {
    type Err = AppError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_ascii_uppercase().as_str() {
            "GET" => Ok(Self::Get),
            "POST" => Ok(Self::Post),
            "PUT" => Ok(Self::Put),
            "PATCH" => Ok(Self::Patch),
            "DELETE" => Ok(Self::Delete),
            "HEAD" => Ok(Self::Head),
            "OPTIONS" => Ok(Self::Options),
            other => Err(AppError::MethodNotAllowed(format!("unknown method {}", other))),
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endpoint {
    Health,
    Traffic,
    Tasks,
    Forms,
    SyncStatus,
    SyncTasks,
    SyncForms,
    SyncMetrics,
    SyncAll,
}

impl Endpoint {
    pub const ALL: [Endpoint; 9] = [
        Self::Health,
        Self::Traffic,
        Self::Tasks,
        Self::Forms,
        Self::SyncStatus,
        Self::SyncTasks,
        Self::SyncForms,
        Self::SyncMetrics,
        Self::SyncAll,
    ];

    pub fn path(self) -> &'static str {
        match self {
            Self::Health => "/health",
            Self::Traffic => "/api/analytics/traffic",
            Self::Tasks => "/api/clickup-data",
            Self::Forms => "/api/typeform-data",
            Self::SyncStatus => "/api/sync-status",
            Self::SyncTasks => "/api/sync-clickup",
            Self::SyncForms => "/api/sync-typeform",
            Self::SyncMetrics => "/api/sync-analytics",
            Self::SyncAll => "/api/sync-all",
        }
    }

    pub fn method(self) -> Method {
        match self {
            Self::Health | Self::Traffic | Self::Tasks | Self::Forms | Self::SyncStatus => Method::Get,
            Self::SyncTasks | Self::SyncForms | Self::SyncMetrics | Self::SyncAll => Method::Post,
        }
    }

    pub fn from_path(path: &str) -> Option<Self> {
        let trimmed = path.trim_end_matches('/');
        let trimmed = if trimmed.is_empty() { "/" } else { trimmed };
        Self::ALL.into_iter().find(|endpoint| endpoint.path() == trimmed)
    }
}

/// Transport-neutral response: an HTTP status plus an optional JSON body.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ApiResponse {
    pub status: u16,
    pub body: Option<serde_json::Value>,
}

impl ApiResponse {
    fn ok(body: serde_json::Value) -> Self {
        Self {
            status: 200,
            body: Some(body),
        }
    }

    fn error(error: &AppError) -> Self {
        Self {
            status: error.status_code(),
            body: Some(serde_json::json!({
                "success": false,
                "error": to_client_error(error),
            })),
        }
    }
}

/// Method-gated endpoint table over the dashboard and sync services.
#[derive(Clone)]
pub struct Api {
    dashboard: DashboardQueryService,
    sync: SyncService,
}

impl Api {
    pub fn new(dashboard: DashboardQueryService, sync: SyncService) -> Self {
        Self { dashboard, sync }
    }

    pub async fn handle(&self, method: &str, target: &str) -> ApiResponse {
        self.handle_at(method, target, Utc::now().date_naive()).await
    }

    /// Dispatches `target` (path plus optional `?days=N`) as of a fixed day.
    pub async fn handle_at(&self, method: &str, target: &str, as_of: NaiveDate) -> ApiResponse {
        let (path, query) = target.split_once('?').unwrap_or((target, ""));
        let Some(endpoint) = Endpoint::from_path(path) else {
            return ApiResponse::error(&AppError::NotFound(format!("no endpoint at {}", path)));
        };

        let method = match method.parse::<Method>() {
            Ok(method) => method,
            Err(error) => return ApiResponse::error(&error),
        };
        if method == Method::Options {
            return ApiResponse { status: 200, body: None };
        }
        if method != endpoint.method() {
            return ApiResponse::error(&AppError::MethodNotAllowed(format!(
                "{} {} expects {}",
                method,
                endpoint.path(),
                endpoint.method()
            )));
        }

        match self.dispatch(endpoint, query, as_of).await {
            Ok(response) => response,
            Err(error) => {
                tracing::warn!(path = endpoint.path(), error = %error, "request failed");
                ApiResponse::error(&error)
            }
        }
    }

    async fn dispatch(&self, endpoint: Endpoint, query: &str, as_of: NaiveDate) -> AppResult<ApiResponse> {
        match endpoint {
            Endpoint::Health => success(&self.dashboard.health()),
            Endpoint::Traffic => success(&self.dashboard.traffic(self.window_days(query)?, as_of)?),
            Endpoint::Tasks => success(&self.dashboard.tasks(self.window_days(query)?, as_of)?),
            Endpoint::Forms => success(&self.dashboard.forms(self.window_days(query)?, as_of)?),
            Endpoint::SyncStatus => Ok(ApiResponse::ok(serde_json::json!({
                "success": true,
                "entities": self.dashboard.sync_status()?,
            }))),
            Endpoint::SyncTasks => sync_response(self.sync.sync_entity(EntityKind::Tasks, as_of).await),
            Endpoint::SyncForms => sync_response(self.sync.sync_entity(EntityKind::FormResponses, as_of).await),
            Endpoint::SyncMetrics => sync_response(self.sync.sync_entity(EntityKind::Metrics, as_of).await),
            Endpoint::SyncAll => {
                let report = self.sync.sync_all(as_of).await;
                let status = if report.success { 200 } else { 500 };
                Ok(ApiResponse {
                    status,
                    body: Some(serde_json::to_value(&report)?),
                })
            }
        }
    }

    fn window_days(&self, query: &str) -> AppResult<u32> {
        let requested = query
            .split('&')
            .filter_map(|pair| pair.split_once('='))
            .find(|(key, _)| *key == "days")
            .map(|(_, value)| value);
        match requested {
            None => self.dashboard.default_window_days(),
            Some(raw) => match raw.parse::<u32>() {
                Ok(days) if (1..=3650).contains(&days) => Ok(days),
                _ => Err(AppError::Config(format!("days must be between 1 and 3650, got '{}'", raw))),
            },
        }
    }
}

fn success<T: Serialize>(payload: &T) -> AppResult<ApiResponse> {
    let mut body = serde_json::to_value(payload)?;
    if let Some(object) = body.as_object_mut() {
        object.insert("success".to_string(), serde_json::Value::Bool(true));
    }
    Ok(ApiResponse::ok(body))
}

fn sync_response(outcome: SyncOutcome) -> AppResult<ApiResponse> {
    let status = if outcome.success { 200 } else { 500 };
    Ok(ApiResponse {
        status,
        body: Some(serde_json::to_value(&outcome)?),
    })
}
