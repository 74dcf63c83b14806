//! JSON API over the idea store and sync pipeline.
//!
//! The sync trigger lives here: handlers own the [`SyncGuard`], so an HTTP
//! caller and the cron scheduler contend for the same in-flight flag and an
//! overlapping request gets a 409 instead of a queued run.

use std::sync::Arc;

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use ideaconnect_store::IdeaStore;
use ideaconnect_sync::{pipeline_from_config, SyncConfig, SyncGuard, SyncPipeline};
use serde_json::json;
use tokio::net::TcpListener;
use tracing::{info, warn};

pub const CRATE_NAME: &str = "ideaconnect-web";

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn IdeaStore>,
    pub pipeline: Arc<SyncPipeline>,
    pub guard: Arc<SyncGuard>,
}

impl AppState {
    pub fn new(store: Arc<dyn IdeaStore>, pipeline: Arc<SyncPipeline>) -> Self {
        Self {
            store,
            pipeline,
            guard: Arc::new(SyncGuard::new()),
        }
    }
}

pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/sync", post(sync_handler))
        .route("/sync/status", get(sync_status_handler))
        .route("/ideas/featured", get(featured_handler))
        .route("/admin/cleanup-duplicates", post(cleanup_handler))
        .with_state(Arc::new(state))
}

pub async fn serve_from_env() -> anyhow::Result<()> {
    let port: u16 = std::env::var("IDEACONNECT_WEB_PORT")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(8000);
    let config = SyncConfig::from_env();
    let scheduler_enabled = config.scheduler_enabled;
    let cron = config.sync_cron.clone();
    let pipeline = Arc::new(pipeline_from_config(config).await?);
    let state = AppState::new(pipeline.store(), pipeline.clone());

    if scheduler_enabled {
        let scheduler =
            ideaconnect_sync::build_scheduler(pipeline, state.guard.clone(), &cron).await?;
        scheduler.start().await?;
        info!(%cron, "sync scheduler started");
    }

    let listener = TcpListener::bind(("0.0.0.0", port)).await?;
    info!(port, "listening");
    axum::serve(listener, app(state)).await?;
    Ok(())
}

/// Manual sync trigger. Rejected with 409 while another sync is in flight;
/// the run happens inline so the caller gets the result summary back.
async fn sync_handler(State(state): State<Arc<AppState>>) -> Response {
    let Some(_permit) = state.guard.try_acquire() else {
        return (
            StatusCode::CONFLICT,
            Json(json!({ "error": "sync already running" })),
        )
            .into_response();
    };

    match state.pipeline.run_once().await {
        Ok(result) => Json(json!({ "success": true, "results": result })).into_response(),
        Err(err) => {
            warn!(%err, "sync failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "success": false, "error": err.to_string() })),
            )
                .into_response()
        }
    }
}

async fn sync_status_handler(State(state): State<Arc<AppState>>) -> Response {
    Json(json!({ "running": state.guard.is_running() })).into_response()
}

async fn featured_handler(State(state): State<Arc<AppState>>) -> Response {
    match state.store.featured().await {
        Ok(Some(idea)) => Json(idea).into_response(),
        Ok(None) => (
            StatusCode::NOT_FOUND,
            Json(json!({ "error": "no featured idea" })),
        )
            .into_response(),
        Err(err) => server_error(err.into()),
    }
}

async fn cleanup_handler(State(state): State<Arc<AppState>>) -> Response {
    match state.store.delete_duplicate_titles().await {
        Ok(deleted) => {
            info!(deleted, "duplicate cleanup requested over http");
            Json(json!({ "deleted": deleted })).into_response()
        }
        Err(err) => server_error(err.into()),
    }
}

fn server_error(err: anyhow::Error) -> Response {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({ "error": err.to_string() })),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use axum::body::Body;
    use chrono::Utc;
    use http_body_util::BodyExt;
    use ideaconnect_scraper::{FetchError, PageSource};
    use ideaconnect_store::{MemoryIdeaStore, NewIdea};
    use tower::ServiceExt;

    struct OneIdeaSource;

    #[async_trait]
    impl PageSource for OneIdeaSource {
        async fn fetch_page(&self, url: &str) -> Result<String, FetchError> {
            if url.ends_with("/idea-of-the-day") {
                Ok(r#"
                <html><body>
                <h1>AI Concierge For Independent Hotels</h1>
                <p>An AI concierge that answers guest questions, upsells late
                   checkout, and routes maintenance requests for hotels.</p>
                </body></html>
                "#
                .to_string())
            } else {
                Err(FetchError::Status {
                    status: 404,
                    url: url.to_string(),
                })
            }
        }
    }

    struct DeadSource;

    #[async_trait]
    impl PageSource for DeadSource {
        async fn fetch_page(&self, url: &str) -> Result<String, FetchError> {
            Err(FetchError::Status {
                status: 503,
                url: url.to_string(),
            })
        }
    }

    fn test_config() -> SyncConfig {
        SyncConfig {
            source_base_url: "https://source.test".to_string(),
            database_url: String::new(),
            user_agent: None,
            request_delay_ms: 0,
            http_timeout_secs: 1,
            scheduler_enabled: false,
            sync_cron: "0 15 7 * * *".to_string(),
            slug_patterns: vec![],
            skill_vocabulary: Default::default(),
        }
    }

    fn test_state(source: Arc<dyn PageSource>) -> AppState {
        let store = MemoryIdeaStore::shared();
        let pipeline = Arc::new(SyncPipeline::new(source, store.clone(), test_config()));
        AppState::new(store, pipeline)
    }

    async fn body_json(resp: Response) -> serde_json::Value {
        let bytes = resp.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn post_sync_runs_pipeline_and_reports_results() {
        let app = app(test_state(Arc::new(OneIdeaSource)));
        let resp = app
            .oneshot(
                axum::http::Request::builder()
                    .method("POST")
                    .uri("/sync")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let body = body_json(resp).await;
        assert_eq!(body["success"], true);
        assert_eq!(body["results"]["synced"], 1);
    }

    #[tokio::test]
    async fn post_sync_conflicts_while_running() {
        let state = test_state(Arc::new(OneIdeaSource));
        let guard = state.guard.clone();
        let app = app(state);

        let _permit = guard.try_acquire().unwrap();
        let resp = app
            .oneshot(
                axum::http::Request::builder()
                    .method("POST")
                    .uri("/sync")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::CONFLICT);
        let body = body_json(resp).await;
        assert_eq!(body["error"], "sync already running");
    }

    #[tokio::test]
    async fn post_sync_reports_unreachable_source_as_server_error() {
        let app = app(test_state(Arc::new(DeadSource)));
        let resp = app
            .oneshot(
                axum::http::Request::builder()
                    .method("POST")
                    .uri("/sync")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = body_json(resp).await;
        assert_eq!(body["success"], false);
    }

    #[tokio::test]
    async fn sync_status_reflects_guard() {
        let state = test_state(Arc::new(OneIdeaSource));
        let guard = state.guard.clone();
        let app = app(state);

        let resp = app
            .clone()
            .oneshot(
                axum::http::Request::builder()
                    .uri("/sync/status")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(body_json(resp).await["running"], false);

        let _permit = guard.try_acquire().unwrap();
        let resp = app
            .oneshot(
                axum::http::Request::builder()
                    .uri("/sync/status")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(body_json(resp).await["running"], true);
    }

    #[tokio::test]
    async fn featured_returns_404_then_idea_after_sync() {
        let state = test_state(Arc::new(OneIdeaSource));
        let app = app(state);

        let resp = app
            .clone()
            .oneshot(
                axum::http::Request::builder()
                    .uri("/ideas/featured")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);

        let sync = app
            .clone()
            .oneshot(
                axum::http::Request::builder()
                    .method("POST")
                    .uri("/sync")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(sync.status(), StatusCode::OK);

        let resp = app
            .oneshot(
                axum::http::Request::builder()
                    .uri("/ideas/featured")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let body = body_json(resp).await;
        assert_eq!(body["title"], "AI Concierge For Independent Hotels");
    }

    #[tokio::test]
    async fn cleanup_endpoint_deletes_duplicate_titles() {
        let store = MemoryIdeaStore::shared();
        for identifier in ["slug-a", "slug-b"] {
            store
                .insert(NewIdea {
                    source_identifier: Some(identifier.to_string()),
                    title: "Meal Planning Service For Busy Families".to_string(),
                    description: "Weekly plans generated from pantry contents and dietary goals for families."
                        .to_string(),
                    category: "Startup Idea".to_string(),
                    skills: vec![],
                    difficulty_level: None,
                    market_size: None,
                    source_url: None,
                    synced_at: Utc::now(),
                })
                .await
                .unwrap();
        }

        let pipeline = Arc::new(SyncPipeline::new(
            Arc::new(DeadSource),
            store.clone(),
            test_config(),
        ));
        let app = app(AppState::new(store.clone(), pipeline));

        let resp = app
            .oneshot(
                axum::http::Request::builder()
                    .method("POST")
                    .uri("/admin/cleanup-duplicates")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(body_json(resp).await["deleted"], 1);
        assert_eq!(store.all().await.len(), 1);
    }
}
