use axum::{
    http::StatusCode,
    middleware::from_fn_with_state,
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use config_manager::{ConfigurationError, SystemConfig};
use job_orchestrator::{JobOrchestrator, OrchestratorError};
use std::sync::Arc;
use std::time::Instant;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tracing::info;

mod handlers;
mod middleware;
mod types;

use handlers::*;
use types::*;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub config: SystemConfig,
    pub orchestrator: Arc<JobOrchestrator>,
    pub started_at: Instant,
}

/// Main application error type
#[derive(thiserror::Error, Debug)]
pub enum ApiError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigurationError),
    #[error("{0}")]
    Orchestrator(#[from] OrchestratorError),
    #[error("Unauthorized - Invalid or missing API key")]
    Unauthorized,
    #[error("Bad request: {0}")]
    BadRequest(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            ApiError::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::Orchestrator(e) if e.is_input_error() => StatusCode::BAD_REQUEST,
            ApiError::Orchestrator(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::Unauthorized => StatusCode::UNAUTHORIZED,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
        };

        let body = Json(ErrorResponse {
            error: self.to_string(),
            timestamp: chrono::Utc::now(),
        });

        (status, body).into_response()
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,api_server=debug,job_orchestrator=debug".into()),
        )
        .init();

    info!("Starting Wrapped Analyzer API Server...");

    let config = SystemConfig::load()?;
    config.api.validate()?;
    info!("Configuration loaded successfully");

    let orchestrator = Arc::new(JobOrchestrator::new(config.clone()).await?);
    info!("Job orchestrator initialized");

    let app_state = AppState {
        config: config.clone(),
        orchestrator,
        started_at: Instant::now(),
    };

    let app = create_router(app_state);

    info!("🎯 API Server ready");
    info!("📋 Available endpoints:");
    info!("   • POST /api/start-job - Start a wallet analysis (x-api-key required)");
    info!("   • GET /api/job-status/:job_id - Analysis status by address");
    info!("   • GET /api/job-status?jobId= - Analysis status by address");
    info!("   • GET /api/worker-health - Worker pool health");
    info!("   • GET /health - Health check");

    let bind_addr = format!("{}:{}", config.api.host, config.api.port);
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    info!("Server listening on {}", bind_addr);

    axum::serve(listener, app).await?;

    Ok(())
}

/// Create the main application router
fn create_router(state: AppState) -> Router {
    let protected = Router::new()
        .route("/api/start-job", post(start_job))
        .route_layer(from_fn_with_state(
            state.clone(),
            middleware::require_api_key,
        ));

    Router::new()
        .route("/health", get(health_check))
        .route("/api/worker-health", get(worker_health))
        .route("/api/job-status", get(job_status_by_query))
        .route("/api/job-status/:job_id", get(job_status_by_path))
        .merge(protected)
        .layer(ServiceBuilder::new().layer(CorsLayer::permissive()))
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use assistant_client::{AssistantError, AssistantProvider, RunObject};
    use async_trait::async_trait;
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use job_orchestrator::{
        AnalysisReport, OrchestratorComponents, OrchestratorSettings, PipelineSettings,
    };
    use persistence_layer::{write_json, CacheKeys, LocalAnalysisLock, MemoryBlobCache};
    use retry_utils::{PollConfig, RetryConfig};
    use serde_json::{json, Value};
    use std::time::Duration;
    use tower::ServiceExt;
    use zapper_client::{Transaction, TransactionSource, ZapperError};

    const ADDRESS: &str = "0x4bfb41d5b3570defd03c39a9a4d8de6bd8b8982e";
    const SECRET: &str = "route-secret";

    struct QuietSource;

    #[async_trait]
    impl TransactionSource for QuietSource {
        async fn fetch_transactions(&self, _address: &str) -> Result<Vec<Transaction>, ZapperError> {
            Ok(Vec::new())
        }
    }

    /// Only reached when a wallet has activity, which these tests avoid
    struct UnusedAssistant;

    #[async_trait]
    impl AssistantProvider for UnusedAssistant {
        async fn create_thread(&self) -> Result<String, AssistantError> {
            Err(AssistantError::Config("not wired".to_string()))
        }
        async fn add_message(&self, _thread_id: &str, _content: &str) -> Result<(), AssistantError> {
            Err(AssistantError::Config("not wired".to_string()))
        }
        async fn create_run(&self, _thread_id: &str) -> Result<String, AssistantError> {
            Err(AssistantError::Config("not wired".to_string()))
        }
        async fn get_run(&self, _thread_id: &str, _run_id: &str) -> Result<RunObject, AssistantError> {
            Err(AssistantError::Config("not wired".to_string()))
        }
        async fn latest_reply(&self, _thread_id: &str) -> Result<Option<String>, AssistantError> {
            Err(AssistantError::Config("not wired".to_string()))
        }
        async fn delete_thread(&self, _thread_id: &str) -> Result<(), AssistantError> {
            Ok(())
        }
    }

    fn test_state(cache: Arc<MemoryBlobCache>) -> AppState {
        let mut config = SystemConfig::default();
        config.api.route_secret = SECRET.to_string();

        let components = OrchestratorComponents {
            cache,
            keys: CacheKeys::default(),
            lock: Arc::new(LocalAnalysisLock::new()),
            source: Arc::new(QuietSource),
            assistant: Arc::new(UnusedAssistant),
            notifier: None,
        };
        let settings = OrchestratorSettings {
            pipeline: PipelineSettings {
                chunk_size: 200,
                max_concurrent_batches: None,
                fetch_timeout: Duration::from_secs(5),
            },
            retry: RetryConfig::default(),
            poll: PollConfig {
                interval: Duration::from_millis(10),
                max_wait: Duration::from_secs(1),
            },
            worker_count: 1,
            failed_job_retention: Duration::from_secs(3600),
        };

        AppState {
            config,
            orchestrator: Arc::new(JobOrchestrator::with_components(components, settings)),
            started_at: Instant::now(),
        }
    }

    fn start_request(key: Option<&str>, body: Value) -> Request<Body> {
        let mut builder = Request::builder()
            .method("POST")
            .uri("/api/start-job")
            .header("content-type", "application/json");
        if let Some(key) = key {
            builder = builder.header(middleware::API_KEY_HEADER, key);
        }
        builder.body(Body::from(body.to_string())).unwrap()
    }

    fn get_request(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    async fn send(app: Router, request: Request<Body>) -> (StatusCode, Value) {
        let response = app.oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn test_health_check() {
        let app = create_router(test_state(Arc::new(MemoryBlobCache::new())));
        let (status, body) = send(app, get_request("/health")).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["status"], "healthy");
    }

    #[tokio::test]
    async fn test_worker_health_reports_pool() {
        let app = create_router(test_state(Arc::new(MemoryBlobCache::new())));
        let (status, body) = send(app, get_request("/api/worker-health")).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["workers"]["workers"], 1);
        assert_eq!(body["data"]["pending"], 0);
    }

    #[tokio::test]
    async fn test_start_job_requires_api_key() {
        let state = test_state(Arc::new(MemoryBlobCache::new()));

        let (status, body) = send(
            create_router(state.clone()),
            start_request(None, json!({ "address": ADDRESS })),
        )
        .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert!(body["error"].as_str().unwrap().contains("API key"));

        let (status, _) = send(
            create_router(state),
            start_request(Some("wrong"), json!({ "address": ADDRESS })),
        )
        .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_start_job_rejects_missing_or_bad_address() {
        let state = test_state(Arc::new(MemoryBlobCache::new()));

        let (status, body) = send(
            create_router(state.clone()),
            start_request(Some(SECRET), json!({ "fid": 42 })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().unwrap().contains("Address is required"));

        let (status, _) = send(
            create_router(state),
            start_request(Some(SECRET), json!({ "address": "not-a-wallet" })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_start_job_serves_cached_analysis() {
        let cache = Arc::new(MemoryBlobCache::new());
        let keys = CacheKeys::default();
        write_json(
            cache.as_ref(),
            &keys.final_analysis(ADDRESS),
            &AnalysisReport::no_activity(),
        )
        .await
        .unwrap();

        let app = create_router(test_state(cache));
        let (status, body) = send(
            app,
            start_request(Some(SECRET), json!({ "address": ADDRESS.to_uppercase() })),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["jobId"], ADDRESS);
        assert_eq!(body["data"]["status"], "complete");
        assert_eq!(body["data"]["progress"]["step"], 3);
        assert_eq!(body["data"]["progress"]["totalSteps"], 3);
    }

    #[tokio::test]
    async fn test_job_runs_to_completion_and_status_reports_it() {
        let state = test_state(Arc::new(MemoryBlobCache::new()));

        let (status, body) = send(
            create_router(state.clone()),
            start_request(Some(SECRET), json!({ "address": ADDRESS, "fid": 7 })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["status"], "fetching");
        assert_eq!(body["data"]["progress"]["step"], 1);

        // `None` once the completed job has already left the registry
        state.orchestrator.wait_for_terminal(ADDRESS).await.unwrap();

        let uri = format!("/api/job-status/{}", ADDRESS);
        let (status, body) = send(create_router(state.clone()), get_request(&uri)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["status"], "complete");
        assert!(body["data"]["progress"]["result"]["otherStories"].is_array());

        let uri = format!("/api/job-status?jobId={}", ADDRESS);
        let (status, body) = send(create_router(state), get_request(&uri)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["status"], "complete");
    }

    #[tokio::test]
    async fn test_job_status_unknown_address_is_not_found() {
        let app = create_router(test_state(Arc::new(MemoryBlobCache::new())));
        let uri = format!("/api/job-status/{}", ADDRESS);
        let (status, body) = send(app, get_request(&uri)).await;

        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["data"]["status"], "not_found");
    }

    #[tokio::test]
    async fn test_job_status_query_requires_job_id() {
        let app = create_router(test_state(Arc::new(MemoryBlobCache::new())));
        let (status, body) = send(app, get_request("/api/job-status")).await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().unwrap().contains("jobId"));
    }
}
