use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::Json,
    routing::{get, post},
    Router,
};
use serde::Deserialize;
use tracing::error;

use crate::service::{ServiceStatus, SyncNowReport, UploaderService};
use crate::storage::RunRecord;
use crate::utils::log_buffer::LogEntry;

const DEFAULT_LIMIT: usize = 50;
const MAX_LIMIT: usize = 1000;

pub fn routes() -> Router<UploaderService> {
    Router::new()
        .route("/status", get(get_status))
        .route("/start", post(start))
        .route("/stop", post(stop))
        .route("/sync", post(sync_now))
        .route("/logs", get(get_logs))
        .route("/history", get(get_history))
}

#[derive(Debug, Deserialize)]
pub struct LimitQuery {
    limit: Option<usize>,
}

impl LimitQuery {
    fn limit(&self) -> usize {
        self.limit.unwrap_or(DEFAULT_LIMIT).min(MAX_LIMIT)
    }
}

pub async fn get_status(State(service): State<UploaderService>) -> Json<ServiceStatus> {
    Json(service.status().await)
}

pub async fn start(State(service): State<UploaderService>) -> Json<ServiceStatus> {
    service.start();
    Json(service.status().await)
}

pub async fn stop(State(service): State<UploaderService>) -> Json<ServiceStatus> {
    service.stop().await;
    Json(service.status().await)
}

pub async fn sync_now(State(service): State<UploaderService>) -> Json<SyncNowReport> {
    Json(service.sync_now().await)
}

pub async fn get_logs(
    State(service): State<UploaderService>,
    Query(query): Query<LimitQuery>,
) -> Json<Vec<LogEntry>> {
    Json(service.get_logs(Some(query.limit())))
}

pub async fn get_history(
    State(service): State<UploaderService>,
    Query(query): Query<LimitQuery>,
) -> Result<Json<Vec<RunRecord>>, (StatusCode, String)> {
    service.storage().recent_runs(query.limit() as i64).await.map(Json).map_err(|e| {
        error!("Failed to load sync history: {}", e);
        (StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::Storage;
    use crate::sync::testing::ScriptedUploader;
    use crate::utils::config::Config;
    use axum::body::Body;
    use axum::http::Request;
    use std::sync::Arc;
    use tempfile::TempDir;
    use tower::ServiceExt;

    async fn app(dir: &TempDir) -> Router {
        let watch = dir.path().join("watch");
        std::fs::create_dir_all(&watch).unwrap();
        std::fs::write(watch.join("ride.fit"), b"ride").unwrap();
        let config = Config {
            watch_folder: watch,
            cache_folder: None,
            processed_file: dir.path().join("processed.txt"),
            database_url: "sqlite::memory:".to_string(),
            log_dir: None,
            ..Config::default()
        };
        let storage = Storage::new(&config.database_url).await.unwrap();
        storage.run_migrations().await.unwrap();
        let service = UploaderService::new(config, storage, Arc::new(ScriptedUploader::default()));
        Router::new().nest("/api", routes()).with_state(service)
    }

    async fn json(app: &Router, method: &str, uri: &str) -> (StatusCode, serde_json::Value) {
        let response = app
            .clone()
            .oneshot(Request::builder().method(method).uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn sync_endpoint_reports_summary() {
        let dir = TempDir::new().unwrap();
        let app = app(&dir).await;

        let (status, body) = json(&app, "POST", "/api/sync").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["summary"]["uploaded"], 1);
        assert_eq!(body["summary"]["last_uploaded"], "ride.fit");
        assert!(body["cache"].is_null());

        let (_, logs) = json(&app, "GET", "/api/logs?limit=1").await;
        assert_eq!(logs.as_array().unwrap().len(), 1);
    }

    #[test]
    fn limits_are_clamped() {
        assert_eq!(LimitQuery { limit: None }.limit(), DEFAULT_LIMIT);
        assert_eq!(LimitQuery { limit: Some(3) }.limit(), 3);
        assert_eq!(LimitQuery { limit: Some(usize::MAX) }.limit(), MAX_LIMIT);
    }

    #[tokio::test]
    async fn huge_history_limit_is_accepted() {
        let dir = TempDir::new().unwrap();
        let app = app(&dir).await;
        json(&app, "POST", "/api/sync").await;

        let uri = format!("/api/history?limit={}", usize::MAX);
        let (status, history) = json(&app, "GET", &uri).await;
        assert_eq!(status, StatusCode::OK);
        assert!(history.as_array().unwrap().len() <= 1);
    }

    #[tokio::test]
    async fn start_and_stop_toggle_auto_sync() {
        let dir = TempDir::new().unwrap();
        let app = app(&dir).await;

        let (status, body) = json(&app, "POST", "/api/start").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["running"], true);

        let (_, body) = json(&app, "POST", "/api/stop").await;
        assert_eq!(body["running"], false);

        let (_, body) = json(&app, "POST", "/api/start").await;
        assert_eq!(body["running"], true);
        let (_, body) = json(&app, "POST", "/api/stop").await;
        assert_eq!(body["running"], false);
    }

    #[tokio::test]
    async fn status_and_history_are_served() {
        let dir = TempDir::new().unwrap();
        let app = app(&dir).await;

        let (status, body) = json(&app, "GET", "/api/status").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["running"], false);
        assert!(body["last_sync"].is_null());

        let (status, history) = json(&app, "GET", "/api/history").await;
        assert_eq!(status, StatusCode::OK);
        assert!(history.as_array().unwrap().is_empty());
    }
}
