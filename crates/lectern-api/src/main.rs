//! lectern-api - HTTP API server for the lectern job engine

mod config;
mod handlers;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    http::{header, Method, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use lectern_db::{Database, PoolConfig};
use lectern_inference::{ChatClient, LlmGenerator, LlmPlanner};
use lectern_jobs::{recover_orphaned_jobs, JobControl, JobPipeline, PipelineConfig};

use config::ServerConfig;

/// Application state shared across handlers.
#[derive(Clone)]
struct AppState {
    control: JobControl,
    /// Idle window before a progress stream sends a heartbeat.
    sse_heartbeat: Duration,
}

fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/v1/jobs", post(handlers::jobs::create_job))
        .route("/api/v1/jobs/:id", get(handlers::jobs::get_job))
        .route("/api/v1/jobs/:id/start", post(handlers::jobs::start_job))
        .route("/api/v1/jobs/:id/pause", post(handlers::jobs::pause_job))
        .route("/api/v1/jobs/:id/resume", post(handlers::jobs::resume_job))
        .route("/api/v1/jobs/:id/cancel", post(handlers::jobs::cancel_job))
        .route(
            "/api/v1/jobs/:id/progress",
            get(handlers::progress::job_progress),
        )
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
                .allow_headers([header::CONTENT_TYPE, header::ACCEPT]),
        )
        .with_state(state)
}

async fn health() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "healthy",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Initialize tracing with configurable output
    //
    // Environment variables:
    //   LOG_FORMAT  - "json" or "text" (default: "text")
    //   LOG_FILE    - path to log file (optional, enables file logging)
    //   LOG_ANSI    - "true"/"false" override ANSI colors (auto-detected by default)
    //   RUST_LOG    - standard env filter
    let log_format = std::env::var("LOG_FORMAT").unwrap_or_else(|_| "text".to_string());
    let log_file = std::env::var("LOG_FILE").ok();
    let log_ansi = std::env::var("LOG_ANSI")
        .ok()
        .map(|v| v == "true" || v == "1");

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "lectern_api=debug,lectern_jobs=debug,tower_http=debug".into());

    let registry = tracing_subscriber::registry().with(env_filter);

    let _file_guard = if let Some(ref path) = log_file {
        let file_dir = std::path::Path::new(path)
            .parent()
            .unwrap_or(std::path::Path::new("."));
        let file_name = std::path::Path::new(path)
            .file_name()
            .and_then(|f| f.to_str())
            .unwrap_or("lectern-api.log");
        let file_appender = tracing_appender::rolling::daily(file_dir, file_name);
        let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

        if log_format == "json" {
            registry
                .with(
                    tracing_subscriber::fmt::layer()
                        .json()
                        .with_writer(non_blocking),
                )
                .init();
        } else {
            let layer = tracing_subscriber::fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(log_ansi.unwrap_or(false)); // no ANSI in files by default
            registry.with(layer).init();
        }
        Some(guard)
    } else {
        if log_format == "json" {
            registry
                .with(tracing_subscriber::fmt::layer().json())
                .init();
        } else {
            let mut layer = tracing_subscriber::fmt::layer();
            if let Some(ansi) = log_ansi {
                layer = layer.with_ansi(ansi);
            }
            registry.with(layer).init();
        }
        None
    };

    info!(
        log_format = %log_format,
        log_file = log_file.as_deref().unwrap_or("(stdout)"),
        "Logging initialized"
    );

    let config = ServerConfig::from_env();

    // Connect to database
    info!("Connecting to database...");
    let db = Database::connect_with_config(&config.database_url, PoolConfig::from_env()).await?;
    info!("Database connected");

    info!("Running database migrations...");
    db.migrate().await?;
    info!("Database migrations complete");

    // Planner and generator share one chat client
    let client = ChatClient::from_env()?;
    let pipeline = JobPipeline::new(
        Arc::new(db.jobs.clone()),
        Arc::new(db.sources.clone()),
        Arc::new(LlmPlanner::new(client.clone())),
        Arc::new(LlmGenerator::new(client)),
        PipelineConfig::from_env(),
    );

    if config.recover_on_startup {
        match recover_orphaned_jobs(&pipeline).await {
            Ok(report) if !report.relaunched.is_empty() => {
                info!(relaunched = report.relaunched.len(), "Relaunched interrupted jobs");
            }
            Ok(_) => {}
            Err(e) => warn!(error = %e, "Job recovery failed; interrupted jobs need a manual start"),
        }
    }

    let state = AppState {
        control: JobControl::new(pipeline),
        sse_heartbeat: config.sse_heartbeat,
    };
    let app = router(state);

    // Start server
    let addr: SocketAddr = config.bind_address().parse()?;
    info!("Starting server on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

// =============================================================================
// ERROR HANDLING
// =============================================================================

#[derive(Debug)]
enum ApiError {
    Internal(lectern_core::Error),
    NotFound(String),
    BadRequest(String),
    Conflict(String),
}

impl From<lectern_core::Error> for ApiError {
    fn from(err: lectern_core::Error) -> Self {
        use lectern_core::Error;
        match err {
            Error::NotFound(_) | Error::JobNotFound(_) => ApiError::NotFound(err.to_string()),
            Error::InvalidTransition { .. } | Error::AlreadyRunning(_) => {
                ApiError::Conflict(err.to_string())
            }
            Error::InvalidInput(msg) => ApiError::BadRequest(msg),
            other => ApiError::Internal(other),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let (status, message) = match self {
            ApiError::Internal(err) => {
                tracing::error!(subsystem = "api", error = %err, "Request failed");
                (StatusCode::INTERNAL_SERVER_ERROR, err.to_string())
            }
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, msg),
        };

        let body = Json(serde_json::json!({
            "error": message,
        }));

        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use axum::body::Body;
    use axum::http::Request;
    use serde_json::{json, Value};
    use tower::ServiceExt;
    use uuid::Uuid;

    use lectern_core::{Chunk, Job, JobStatus, JobStore, JobUpdate, SourceUnit};
    use lectern_db::{MemoryJobStore, MemoryUnitCollector};
    use lectern_inference::{MockGenerator, MockPlanner};

    struct TestApp {
        state: AppState,
        store: MemoryJobStore,
        textbook: Uuid,
    }

    async fn test_app(generator: MockGenerator) -> TestApp {
        let store = MemoryJobStore::new();
        let collector = MemoryUnitCollector::new();
        let textbook = Uuid::now_v7();
        let units = (0..2)
            .map(|u| {
                let id = Uuid::now_v7();
                SourceUnit {
                    id,
                    label: format!("unit-{}.md", u + 1),
                    chunks: (0..2)
                        .map(|c| Chunk {
                            id: Chunk::make_id(id, c),
                            index: c,
                            heading: None,
                            text: format!("Unit {} passage {}.", u + 1, c + 1),
                            start_offset: 0,
                            end_offset: 18,
                        })
                        .collect(),
                }
            })
            .collect();
        collector.set_units(textbook, units).await;

        let pipeline = JobPipeline::new(
            Arc::new(store.clone()),
            Arc::new(collector),
            Arc::new(MockPlanner::new()),
            Arc::new(generator),
            PipelineConfig::default().with_generator_retry_delay(Duration::from_millis(1)),
        );
        TestApp {
            state: AppState {
                control: JobControl::new(pipeline),
                sse_heartbeat: Duration::from_millis(100),
            },
            store,
            textbook,
        }
    }

    async fn seed_job(app: &TestApp) -> Uuid {
        let id = Uuid::now_v7();
        app.store.create_job(id, app.textbook, 0).await.unwrap();
        id
    }

    async fn send(app: &TestApp, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let request = Request::builder()
            .method(method)
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(match body {
                Some(v) => Body::from(v.to_string()),
                None => Body::empty(),
            })
            .unwrap();
        let response = router(app.state.clone()).oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let json = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, json)
    }

    async fn spawn_test_server(app: &TestApp) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let router = router(app.state.clone());
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{}", addr)
    }

    async fn wait_for_status(store: &MemoryJobStore, id: Uuid, status: JobStatus) -> Job {
        for _ in 0..500 {
            let job = store.get_job(id).await.unwrap().unwrap();
            if job.status == status {
                return job;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("job {} never reached {}", id, status);
    }

    /// Parse an SSE body into `(event, data)` pairs.
    fn parse_events(body: &str) -> Vec<(String, Value)> {
        body.split("\n\n")
            .filter_map(|block| {
                let mut event = None;
                let mut data = None;
                for line in block.lines() {
                    if let Some(name) = line.strip_prefix("event:") {
                        event = Some(name.trim().to_string());
                    } else if let Some(payload) = line.strip_prefix("data:") {
                        data = serde_json::from_str(payload.trim()).ok();
                    }
                }
                Some((event?, data?))
            })
            .collect()
    }

    // -- Control routes --

    #[tokio::test]
    async fn test_health() {
        let app = test_app(MockGenerator::new()).await;
        let (status, body) = send(&app, "GET", "/health", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "healthy");
    }

    #[tokio::test]
    async fn test_create_job_without_start() {
        let app = test_app(MockGenerator::new()).await;
        let (status, body) = send(
            &app,
            "POST",
            "/api/v1/jobs",
            Some(json!({ "textbook_id": app.textbook, "start": false })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["status"], "PENDING");
        assert_eq!(body["progress"], 0.0);
        assert_eq!(body["has_plan"], false);

        let id = body["id"].as_str().unwrap();
        let (status, body) = send(&app, "GET", &format!("/api/v1/jobs/{}", id), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["textbook_id"], app.textbook.to_string());
    }

    #[tokio::test]
    async fn test_create_job_starts_by_default() {
        let app = test_app(MockGenerator::new()).await;
        let (status, body) = send(
            &app,
            "POST",
            "/api/v1/jobs",
            Some(json!({ "textbook_id": app.textbook })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);

        let id: Uuid = body["id"].as_str().unwrap().parse().unwrap();
        let done = wait_for_status(&app.store, id, JobStatus::Completed).await;
        assert_eq!(done.progress, 1.0);
        assert_eq!(app.store.count_items(id).await, 8);
    }

    #[tokio::test]
    async fn test_unknown_job_is_404() {
        let app = test_app(MockGenerator::new()).await;
        let missing = Uuid::now_v7();
        for uri in [
            format!("/api/v1/jobs/{}", missing),
            format!("/api/v1/jobs/{}/progress", missing),
        ] {
            let (status, body) = send(&app, "GET", &uri, None).await;
            assert_eq!(status, StatusCode::NOT_FOUND);
            assert!(body["error"].as_str().unwrap().contains("Job not found"));
        }
        let (status, _) = send(&app, "POST", &format!("/api/v1/jobs/{}/pause", missing), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_control_transitions() {
        let app = test_app(MockGenerator::new()).await;
        let id = seed_job(&app).await;

        let (status, body) = send(&app, "POST", &format!("/api/v1/jobs/{}/pause", id), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], true);
        assert_eq!(body["job_id"], id.to_string());
        assert_eq!(body["status"], "PAUSED");

        let (status, body) = send(&app, "POST", &format!("/api/v1/jobs/{}/pause", id), None).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["error"], "Cannot pause job in status PAUSED");

        let (status, body) = send(&app, "POST", &format!("/api/v1/jobs/{}/cancel", id), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "CANCELLED");

        let (status, _) = send(&app, "POST", &format!("/api/v1/jobs/{}/resume", id), None).await;
        assert_eq!(status, StatusCode::CONFLICT);
        let (status, _) = send(&app, "POST", &format!("/api/v1/jobs/{}/start", id), None).await;
        assert_eq!(status, StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn test_start_running_job_is_conflict() {
        let app = test_app(MockGenerator::new().with_latency(Duration::from_millis(50))).await;
        let id = seed_job(&app).await;

        let (status, body) = send(&app, "POST", &format!("/api/v1/jobs/{}/start", id), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "PLANNING");

        let (status, body) = send(&app, "POST", &format!("/api/v1/jobs/{}/start", id), None).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert!(body["error"].as_str().unwrap().contains("already running"));

        send(&app, "POST", &format!("/api/v1/jobs/{}/cancel", id), None).await;
        wait_for_status(&app.store, id, JobStatus::Cancelled).await;
    }

    #[tokio::test]
    async fn test_invalid_job_id_is_rejected() {
        let app = test_app(MockGenerator::new()).await;
        let (status, _) = send(&app, "GET", "/api/v1/jobs/not-a-uuid", None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    // -- Progress stream --

    #[tokio::test]
    async fn test_stream_of_finished_job_sends_only_connected() {
        let app = test_app(MockGenerator::new()).await;
        let id = seed_job(&app).await;
        app.store
            .update_job(id, JobUpdate::completed())
            .await
            .unwrap();
        let base_url = spawn_test_server(&app).await;

        let body = tokio::time::timeout(
            Duration::from_secs(5),
            reqwest::get(format!("{}/api/v1/jobs/{}/progress", base_url, id))
                .await
                .unwrap()
                .text(),
        )
        .await
        .expect("stream should end after a terminal message")
        .unwrap();

        let events = parse_events(&body);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].0, "connected");
        assert_eq!(events[0].1["status"], "COMPLETED");
        assert_eq!(events[0].1["percentage"], 100.0);
    }

    #[tokio::test]
    async fn test_stream_follows_job_to_completion() {
        let app = test_app(MockGenerator::new().with_latency(Duration::from_millis(10))).await;
        let id = seed_job(&app).await;
        let base_url = spawn_test_server(&app).await;

        // Headers arrive once the handler has subscribed.
        let response = reqwest::get(format!("{}/api/v1/jobs/{}/progress", base_url, id))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers()[header::CONTENT_TYPE]
            .to_str()
            .unwrap()
            .starts_with("text/event-stream"));

        let client = reqwest::Client::new();
        client
            .post(format!("{}/api/v1/jobs/{}/start", base_url, id))
            .send()
            .await
            .unwrap();

        let body = tokio::time::timeout(Duration::from_secs(5), response.text())
            .await
            .expect("stream should end after completion")
            .unwrap();
        let events = parse_events(&body);

        assert_eq!(events[0].0, "connected");
        assert_eq!(events[0].1["status"], "PENDING");
        let progress: Vec<&Value> = events
            .iter()
            .filter(|(name, _)| name == "progress")
            .map(|(_, data)| data)
            .collect();
        assert_eq!(progress.len(), 4);
        let last = progress.last().unwrap();
        assert_eq!(last["status"], "COMPLETED");
        assert_eq!(last["progress"], 1.0);
        assert_eq!(last["percentage"], 100.0);
        assert_eq!(last["total_units"], 2);
        assert!(last["timestamp"].as_str().unwrap().ends_with('Z'));
    }

    #[tokio::test]
    async fn test_idle_stream_sends_heartbeat() {
        let app = test_app(MockGenerator::new()).await;
        let id = seed_job(&app).await;
        app.store
            .update_job(
                id,
                JobUpdate::status(JobStatus::Paused)
                    .with_progress(0.5)
                    .with_total_units(2),
            )
            .await
            .unwrap();
        let base_url = spawn_test_server(&app).await;

        let mut response = reqwest::get(format!("{}/api/v1/jobs/{}/progress", base_url, id))
            .await
            .unwrap();
        let mut body = String::new();
        while !body.contains("event: heartbeat") {
            let chunk = tokio::time::timeout(Duration::from_secs(5), response.chunk())
                .await
                .expect("heartbeat within the idle window")
                .unwrap()
                .expect("stream still open");
            body.push_str(&String::from_utf8_lossy(&chunk));
        }

        let events = parse_events(&body);
        let (_, beat) = events
            .iter()
            .find(|(name, _)| name == "heartbeat")
            .unwrap();
        assert_eq!(beat["status"], "PAUSED");
        assert_eq!(beat["progress"], 0.5);
        assert_eq!(beat["percentage"], 50.0);
        assert_eq!(beat["message"], "heartbeat");
    }

    #[tokio::test]
    async fn test_stream_replays_cached_snapshot() {
        let app = test_app(MockGenerator::new()).await;
        let id = seed_job(&app).await;
        // Pausing publishes a snapshot the hub keeps.
        send(&app, "POST", &format!("/api/v1/jobs/{}/pause", id), None).await;
        let base_url = spawn_test_server(&app).await;

        let mut response = reqwest::get(format!("{}/api/v1/jobs/{}/progress", base_url, id))
            .await
            .unwrap();
        let mut body = String::new();
        while parse_events(&body).len() < 2 {
            let chunk = tokio::time::timeout(Duration::from_secs(5), response.chunk())
                .await
                .unwrap()
                .unwrap()
                .unwrap();
            body.push_str(&String::from_utf8_lossy(&chunk));
        }
        let events = parse_events(&body);
        assert_eq!(events[0].0, "connected");
        assert_eq!(events[1].0, "progress");
        assert_eq!(events[1].1["status"], "PAUSED");
        assert_eq!(events[1].1["message"], "Job paused");
    }
}
