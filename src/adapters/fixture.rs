use super::{SnapshotFuture, SnapshotWindow, SourceAdapter, UpstreamRecord};
use crate::errors::AppError;
use crate::models::EntityKind;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Debug, Clone)]
enum FixtureData {
    Inline(Arc<Mutex<Vec<UpstreamRecord>>>),
    File(PathBuf),
}

/// Snapshot source backed by in-memory records or a JSON file of tagged `UpstreamRecord`s.
///
/// The file is re-read on every fetch so edits show up on the next sync tick.
#[derive(Debug, Clone)]
pub struct FixtureSource {
    entity: EntityKind,
    name: String,
    data: FixtureData,
    failure: Option<String>,
    delay: Option<Duration>,
}

impl FixtureSource {
    pub fn inline(entity: EntityKind, records: Vec<UpstreamRecord>) -> Self {
        Self {
            entity,
            name: format!("fixture:{}", entity),
            data: FixtureData::Inline(Arc::new(Mutex::new(records))),
            failure: None,
            delay: None,
        }
    }

    pub fn from_file(entity: EntityKind, path: impl AsRef<Path>) -> Self {
        let path = path.as_ref().to_path_buf();
        Self {
            entity,
            name: format!("fixture:{}", path.display()),
            data: FixtureData::File(path),
            failure: None,
            delay: None,
        }
    }

    /// Every fetch fails with `message` instead of returning records.
    pub fn failing(mut self, message: impl Into<String>) -> Self {
        self.failure = Some(message.into());
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Swaps the inline snapshot. Clones share the same records, so callers can keep a handle
    /// while the sync service owns another.
    pub fn replace_records(&self, records: Vec<UpstreamRecord>) -> Result<(), AppError> {
        match &self.data {
            FixtureData::Inline(shared) => {
                let mut guard = shared
                    .lock()
                    .map_err(|_| AppError::Internal("fixture records lock poisoned".to_string()))?;
                *guard = records;
                Ok(())
            }
            FixtureData::File(path) => Err(AppError::Config(format!(
                "fixture {} is file backed; edit the file instead",
                path.display()
            ))),
        }
    }

    async fn load(&self) -> Result<Vec<UpstreamRecord>, AppError> {
        match &self.data {
            FixtureData::Inline(shared) => shared
                .lock()
                .map(|guard| guard.clone())
                .map_err(|_| AppError::Internal("fixture records lock poisoned".to_string())),
            FixtureData::File(path) => {
                let raw = tokio::fs::read_to_string(path).await.map_err(|error| {
                    AppError::AdapterFetch(format!("failed to read {}: {}", path.display(), error))
                })?;
                serde_json::from_str::<Vec<UpstreamRecord>>(&raw).map_err(|error| {
                    AppError::AdapterFetch(format!("failed to decode {}: {}", path.display(), error))
                })
            }
        }
    }
}

impl SourceAdapter for FixtureSource {
    fn entity(&self) -> EntityKind {
        self.entity
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn fetch_snapshot(&self, _window: SnapshotWindow) -> SnapshotFuture<'_> {
        Box::pin(async move {
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            if let Some(message) = &self.failure {
                return Err(AppError::AdapterFetch(message.clone()));
            }
            self.load().await
        })
    }
}

#[cfg(test)]
mod tests {
    use super::FixtureSource;
    use crate::adapters::{SnapshotWindow, SourceAdapter, UpstreamRecord};
    use crate::errors::AppError;
    use crate::models::EntityKind;
    use chrono::NaiveDate;

    fn window() -> SnapshotWindow {
        SnapshotWindow::trailing(NaiveDate::from_ymd_opt(2024, 1, 31).expect("date"), 30)
    }

    #[tokio::test]
    async fn reads_tagged_records_from_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("tasks.json");
        std::fs::write(
            &path,
            r#"[{ "provider": "clickup-task", "payload": { "id": "t1", "name": "one" } }]"#,
        )
        .expect("write fixture");

        let source = FixtureSource::from_file(EntityKind::Tasks, &path);
        let records = source.fetch_snapshot(window()).await.expect("fetch");
        assert_eq!(records.len(), 1);
        assert!(matches!(records[0], UpstreamRecord::ClickupTask { .. }));
    }

    #[tokio::test]
    async fn missing_file_is_an_adapter_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let source = FixtureSource::from_file(EntityKind::Tasks, dir.path().join("absent.json"));
        let err = source.fetch_snapshot(window()).await.expect_err("should fail");
        assert!(matches!(err, AppError::AdapterFetch(_)));
    }

    #[tokio::test]
    async fn inline_records_can_be_replaced_through_a_clone() {
        let source = FixtureSource::inline(EntityKind::FormResponses, Vec::new());
        let handle = source.clone();
        handle
            .replace_records(vec![UpstreamRecord::TypeformResponse {
                payload: serde_json::json!({ "response_id": "r1" }),
            }])
            .expect("replace");
        assert_eq!(source.fetch_snapshot(window()).await.expect("fetch").len(), 1);
    }

    #[tokio::test]
    async fn forced_failure_is_reported() {
        let source = FixtureSource::inline(EntityKind::Metrics, Vec::new()).failing("quota exceeded");
        let err = source.fetch_snapshot(window()).await.expect_err("should fail");
        assert_eq!(err.to_string(), "ADAPTER_FETCH: quota exceeded");
    }
}
