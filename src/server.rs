//! HTTP server.
//!
//! Exposes the chat orchestrator, index statistics and on-demand repository
//! sync as a small JSON API for the LEAP website's chat widget.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `POST` | `/api/chat` | Ask a question (JSON or multipart with an image) |
//! | `GET`  | `/api/rag-stats` | Index statistics |
//! | `POST` | `/api/sync` | Run one repository sync cycle now |
//! | `GET`  | `/health` | Backend liveness plus index, admission and sync status |
//!
//! `/health` answers `503` with `"status": "degraded"` while the chat
//! backend fails its probe, and `/api/chat` is refused with
//! `backend_unavailable` until the probe succeeds again.
//!
//! # Chat Request
//!
//! JSON: `{ "message": "...", "image": "<base64 or data URL>", "history": [...] }`
//! (`text` is accepted as an alias for `message`).
//!
//! Multipart: a `text` (or `message`) field, an optional `image` file and an
//! optional `history` field holding the JSON history array.
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "busy", "message": "server busy, try again later" } }
//! ```
//!
//! Error codes: `bad_request` (400), `busy` (503), `backend_unavailable`
//! (503), `timeout` (504), `backend_error` (502).
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted so the website can call
//! the API from the browser.

use anyhow::Context;
use axum::{
    extract::{DefaultBodyLimit, FromRequest, Multipart, Request, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use base64::Engine;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::watch;
use tower_http::cors::{Any, CorsLayer};

use crate::admission::{AdmissionController, AdmissionStats};
use crate::chat::{ChatAnswer, ChatRequest, ChatService};
use crate::config::Config;
use crate::embedding::{Embedder, OllamaEmbedder};
use crate::error::ChatError;
use crate::health::{BackendHealth, BackendStatus};
use crate::index::{self, IndexHandle};
use crate::llm::{ChatMessage, OllamaChat};
use crate::prompt::SystemPrompt;
use crate::sync::{GitCli, RepoSync, RepoSyncState, SyncOutcome};

/// Uploaded images may be a few megabytes once base64-encoded.
const MAX_BODY_BYTES: usize = 10 * 1024 * 1024;

/// Shared application state passed to all route handlers via Axum's `State` extractor.
#[derive(Clone)]
pub struct AppState {
    chat: Arc<ChatService>,
    index: IndexHandle,
    /// `None` when repository sync is disabled.
    sync: Option<Arc<RepoSync>>,
    health: Option<Arc<BackendHealth>>,
}

impl AppState {
    pub fn new(chat: Arc<ChatService>, index: IndexHandle, sync: Option<Arc<RepoSync>>) -> Self {
        Self {
            chat,
            index,
            sync,
            health: None,
        }
    }

    /// Gate chats on the backend probe and report it from `/health`.
    pub fn with_health(mut self, health: Arc<BackendHealth>) -> Self {
        self.health = Some(health);
        self
    }
}

/// Build the router. Separate from [`run_server`] so tests can drive it
/// without binding a socket.
pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/api/chat", post(handle_chat))
        .route("/api/rag-stats", get(handle_rag_stats))
        .route("/api/sync", post(handle_sync))
        .route("/health", get(handle_health))
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .layer(cors)
        .with_state(state)
}

/// Starts the HTTP server.
///
/// Loads the persisted index, wires the Ollama clients, starts periodic
/// repository sync when enabled, and serves until Ctrl-C.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let index = IndexHandle::new(index::load(&config.index.path));
    let embedder: Arc<dyn Embedder> = Arc::new(OllamaEmbedder::new(&config.embedding)?);
    let backend = Arc::new(OllamaChat::new(&config.backend)?);
    let admission = Arc::new(AdmissionController::from_config(&config.admission));
    let system = SystemPrompt::load(config.prompt.features_path.as_deref());

    let chat = Arc::new(ChatService::new(
        index.clone(),
        embedder.clone(),
        backend,
        admission,
        system,
        config.backend.clone(),
        config.retrieval.clone(),
    ));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let health = Arc::new(BackendHealth::from_config(&config.health, &config.backend)?);
    tokio::spawn(health.clone().run_periodic(
        std::time::Duration::from_secs(config.health.interval_secs),
        shutdown_rx.clone(),
    ));

    let sync = if config.sync.enabled {
        let sync = Arc::new(RepoSync::new(
            Arc::new(GitCli::from_config(&config.sync)),
            embedder,
            index.clone(),
            config.index.clone(),
            config.companion.clone(),
        ));
        let interval = std::time::Duration::from_secs(config.sync.interval_secs);
        tokio::spawn(sync.clone().run_periodic(interval, shutdown_rx));
        Some(sync)
    } else {
        None
    };

    let app = router(AppState::new(chat, index.clone(), sync).with_health(health.clone()));

    let listener = tokio::net::TcpListener::bind(&config.server.bind)
        .await
        .with_context(|| format!("Failed to bind {}", config.server.bind))?;

    tracing::info!(
        bind = %config.server.bind,
        chunks = index.current().len(),
        general = %config.backend.general_model,
        code = %config.backend.code_model,
        vision = %config.backend.vision_model,
        sync = config.sync.enabled,
        health_url = %health.url(),
        "server listening"
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("shutting down");
            let _ = shutdown_tx.send(true);
        })
        .await?;

    Ok(())
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    /// Machine-readable error code (e.g., `"busy"`, `"timeout"`).
    code: String,
    message: String,
}

/// Internal error type that converts into an Axum HTTP response.
struct AppError {
    status: StatusCode,
    code: String,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code,
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        code: "bad_request".to_string(),
        message: message.into(),
    }
}

fn backend_unavailable(status: &BackendStatus) -> AppError {
    AppError {
        status: StatusCode::SERVICE_UNAVAILABLE,
        code: "backend_unavailable".to_string(),
        message: format!(
            "chat backend is unavailable: {}",
            status.last_error.as_deref().unwrap_or("unknown error")
        ),
    }
}

impl From<ChatError> for AppError {
    fn from(err: ChatError) -> Self {
        let status = match err {
            ChatError::EmptyMessage => StatusCode::BAD_REQUEST,
            ChatError::Busy => StatusCode::SERVICE_UNAVAILABLE,
            ChatError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            ChatError::Backend(_) => StatusCode::BAD_GATEWAY,
        };
        AppError {
            status,
            code: err.code().to_string(),
            message: err.to_string(),
        }
    }
}

// ============ POST /api/chat ============

#[derive(Deserialize)]
struct ChatBody {
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    image: Option<String>,
    #[serde(default)]
    history: Vec<ChatMessage>,
}

impl From<ChatBody> for ChatRequest {
    fn from(body: ChatBody) -> Self {
        ChatRequest {
            message: body.message.or(body.text).unwrap_or_default(),
            image: body.image.filter(|i| !i.is_empty()),
            history: body.history,
        }
    }
}

async fn handle_chat(
    State(state): State<AppState>,
    request: Request,
) -> Result<Json<ChatAnswer>, AppError> {
    if let Some(health) = &state.health {
        let status = health.status();
        if !status.healthy {
            return Err(backend_unavailable(&status));
        }
    }

    let is_multipart = request
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|ct| ct.starts_with("multipart/form-data"));

    let chat_request = if is_multipart {
        let multipart = Multipart::from_request(request, &state)
            .await
            .map_err(|e| bad_request(e.body_text()))?;
        read_multipart(multipart).await?
    } else {
        let Json(body) = Json::<ChatBody>::from_request(request, &state)
            .await
            .map_err(|e| bad_request(e.body_text()))?;
        body.into()
    };

    let answer = state.chat.handle(chat_request).await?;
    Ok(Json(answer))
}

async fn read_multipart(mut multipart: Multipart) -> Result<ChatRequest, AppError> {
    let mut request = ChatRequest::default();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| bad_request(e.body_text()))?
    {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "text" | "message" => {
                request.message = field.text().await.map_err(|e| bad_request(e.body_text()))?;
            }
            "image" => {
                let bytes = field.bytes().await.map_err(|e| bad_request(e.body_text()))?;
                if !bytes.is_empty() {
                    request.image = Some(base64::engine::general_purpose::STANDARD.encode(&bytes));
                }
            }
            "history" => {
                let raw = field.text().await.map_err(|e| bad_request(e.body_text()))?;
                if !raw.trim().is_empty() {
                    request.history = serde_json::from_str(&raw)
                        .map_err(|e| bad_request(format!("invalid history: {}", e)))?;
                }
            }
            other => tracing::debug!(field = other, "ignoring unknown multipart field"),
        }
    }

    Ok(request)
}

// ============ GET /api/rag-stats ============

#[derive(Serialize)]
struct IndexSummary {
    chunks: usize,
    files: usize,
    updated: DateTime<Utc>,
}

fn index_summary(index: &IndexHandle) -> IndexSummary {
    let current = index.current();
    IndexSummary {
        chunks: current.len(),
        files: current.file_count(),
        updated: current.updated,
    }
}

async fn handle_rag_stats(State(state): State<AppState>) -> Json<IndexSummary> {
    Json(index_summary(&state.index))
}

// ============ POST /api/sync ============

async fn handle_sync(State(state): State<AppState>) -> Result<Json<SyncOutcome>, AppError> {
    let sync = state
        .sync
        .as_ref()
        .ok_or_else(|| bad_request("repository sync is disabled"))?;
    Ok(Json(sync.sync().await))
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    /// `"ok"`, or `"degraded"` while the chat backend is down.
    status: String,
    version: String,
    /// `None` when no backend probe is configured.
    backend: Option<BackendStatus>,
    index: IndexSummary,
    admission: AdmissionStats,
    sync: Option<RepoSyncState>,
}

async fn handle_health(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    let backend = match &state.health {
        Some(health) => Some(health.check().await),
        None => None,
    };
    let healthy = backend.as_ref().map_or(true, |b| b.healthy);

    let (code, status) = if healthy {
        (StatusCode::OK, "ok")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "degraded")
    };

    (
        code,
        Json(HealthResponse {
            status: status.to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            backend,
            index: index_summary(&state.index),
            admission: state.chat.admission().stats(),
            sync: state.sync.as_ref().map(|s| s.state()),
        }),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{BackendConfig, CompanionConfig, IndexConfig, RetrievalConfig};
    use crate::llm::ChatBackend;
    use crate::models::{Index, IndexedChunk};
    use crate::sync::Vcs;
    use anyhow::Result;
    use async_trait::async_trait;
    use axum::body::Body;
    use http_body_util::BodyExt;
    use std::sync::Mutex;
    use std::time::Duration;
    use tower::ServiceExt;

    struct UnitEmbedder;

    #[async_trait]
    impl Embedder for UnitEmbedder {
        fn model_name(&self) -> &str {
            "unit"
        }
        async fn embed(&self, _text: &str) -> Option<Vec<f32>> {
            Some(vec![1.0, 0.0])
        }
    }

    /// Answers with the route's model name; hangs for the text "hang".
    struct EchoBackend {
        seen: Mutex<Vec<ChatMessage>>,
    }

    #[async_trait]
    impl ChatBackend for EchoBackend {
        async fn chat(&self, model: &str, messages: &[ChatMessage]) -> Result<String> {
            let last = messages.last().cloned().unwrap();
            self.seen.lock().unwrap().push(last.clone());
            if last.content == "hang" {
                std::future::pending::<()>().await;
            }
            Ok(format!("answered by {}", model))
        }
    }

    struct StillVcs;

    #[async_trait]
    impl Vcs for StillVcs {
        async fn head(&self) -> Result<String> {
            Ok("cafe0000".to_string())
        }
        async fn fetch(&self) -> Result<()> {
            Ok(())
        }
        async fn pull_ff_only(&self) -> Result<()> {
            Ok(())
        }
    }

    fn sample_index() -> Index {
        let mut index = Index::empty();
        index.items = vec![
            IndexedChunk {
                id: "1".into(),
                text: "falls (x > 5) { a = 1; } sonst { a = 2; }".into(),
                embedding: vec![1.0, 0.0],
                file: "examples/falls.leap".into(),
                context_label: "falls".into(),
                lines: 1,
            },
            IndexedChunk {
                id: "2".into(),
                text: "solange (i < 3) { i = i + 1; }".into(),
                embedding: vec![0.5, 0.5],
                file: "examples/loop.leap".into(),
                context_label: "solange".into(),
                lines: 1,
            },
        ];
        index
    }

    fn state_with(timeout: Duration, with_sync: bool) -> (AppState, Arc<EchoBackend>) {
        let index = IndexHandle::new(sample_index());
        let backend = Arc::new(EchoBackend {
            seen: Mutex::new(Vec::new()),
        });
        let chat = Arc::new(ChatService::new(
            index.clone(),
            Arc::new(UnitEmbedder),
            backend.clone(),
            Arc::new(AdmissionController::new(1, 0, timeout)),
            SystemPrompt::from_features(None),
            BackendConfig::default(),
            RetrievalConfig::default(),
        ));
        let sync = with_sync.then(|| {
            Arc::new(RepoSync::new(
                Arc::new(StillVcs),
                Arc::new(UnitEmbedder),
                index.clone(),
                IndexConfig::default(),
                CompanionConfig::default(),
            ))
        });
        (AppState::new(chat, index, sync), backend)
    }

    fn app_with(timeout: Duration, with_sync: bool) -> (Router, Arc<EchoBackend>) {
        let (state, backend) = state_with(timeout, with_sync);
        (router(state), backend)
    }

    fn app_with_health(health: Arc<BackendHealth>) -> (Router, Arc<EchoBackend>) {
        let (state, backend) = state_with(Duration::from_secs(30), false);
        (router(state.with_health(health)), backend)
    }

    fn get_request(uri: &str) -> axum::http::Request<Body> {
        axum::http::Request::builder()
            .uri(uri)
            .body(Body::empty())
            .unwrap()
    }

    fn app() -> (Router, Arc<EchoBackend>) {
        app_with(Duration::from_secs(30), false)
    }

    fn json_request(method: &str, uri: &str, body: serde_json::Value) -> axum::http::Request<Body> {
        axum::http::Request::builder()
            .method(method)
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn send(app: Router, req: axum::http::Request<Body>) -> (StatusCode, serde_json::Value) {
        let response = app.oneshot(req).await.unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let json = serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null);
        (status, json)
    }

    #[tokio::test]
    async fn test_chat_json_returns_answer_and_sources() {
        let (app, _) = app();
        let (status, json) = send(
            app,
            json_request("POST", "/api/chat", serde_json::json!({ "message": "Wie geht falls?" })),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["route"], "general");
        assert_eq!(json["answer"], format!("answered by {}", BackendConfig::default().general_model));
        assert_eq!(json["doc_refs"][0]["path"], "examples/falls.leap");
        assert_eq!(json["doc_refs"][0]["title"], "falls.leap");
    }

    #[tokio::test]
    async fn test_chat_accepts_text_alias() {
        let (app, backend) = app();
        let (status, _) = send(
            app,
            json_request("POST", "/api/chat", serde_json::json!({ "text": "Hallo" })),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(backend.seen.lock().unwrap()[0].content, "Hallo");
    }

    #[tokio::test]
    async fn test_chat_empty_message_is_bad_request() {
        let (app, _) = app();
        let (status, json) = send(
            app,
            json_request("POST", "/api/chat", serde_json::json!({ "message": "  " })),
        )
        .await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(json["error"]["code"], "bad_request");
    }

    #[tokio::test]
    async fn test_chat_malformed_json_is_bad_request() {
        let (app, _) = app();
        let req = axum::http::Request::builder()
            .method("POST")
            .uri("/api/chat")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from("{ nope"))
            .unwrap();
        let (status, json) = send(app, req).await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(json["error"]["code"], "bad_request");
    }

    #[tokio::test]
    async fn test_chat_timeout_maps_to_gateway_timeout() {
        let (app, _) = app_with(Duration::from_millis(20), false);
        let (status, json) = send(
            app,
            json_request("POST", "/api/chat", serde_json::json!({ "message": "hang" })),
        )
        .await;

        assert_eq!(status, StatusCode::GATEWAY_TIMEOUT);
        assert_eq!(json["error"]["code"], "timeout");
    }

    #[tokio::test]
    async fn test_chat_multipart_with_image_routes_to_vision() {
        let (app, backend) = app();
        let boundary = "leapboundary";
        let body = format!(
            "--{b}\r\nContent-Disposition: form-data; name=\"text\"\r\n\r\nWas zeigt das Bild?\r\n\
             --{b}\r\nContent-Disposition: form-data; name=\"image\"; filename=\"shot.png\"\r\n\
             Content-Type: image/png\r\n\r\nhello\r\n--{b}--\r\n",
            b = boundary
        );
        let req = axum::http::Request::builder()
            .method("POST")
            .uri("/api/chat")
            .header(
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={}", boundary),
            )
            .body(Body::from(body))
            .unwrap();

        let (status, json) = send(app, req).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["route"], "vision");
        assert_eq!(json["doc_refs"], serde_json::json!([]));
        let seen = backend.seen.lock().unwrap();
        assert_eq!(seen[0].content, "Was zeigt das Bild?");
        assert_eq!(seen[0].images, vec!["aGVsbG8=".to_string()]);
    }

    #[test]
    fn test_chat_errors_map_to_status_codes() {
        let cases = [
            (ChatError::EmptyMessage, StatusCode::BAD_REQUEST, "bad_request"),
            (ChatError::Busy, StatusCode::SERVICE_UNAVAILABLE, "busy"),
            (
                ChatError::Timeout(Duration::from_secs(1)),
                StatusCode::GATEWAY_TIMEOUT,
                "timeout",
            ),
            (
                ChatError::Backend("down".into()),
                StatusCode::BAD_GATEWAY,
                "backend_error",
            ),
        ];
        for (err, status, code) in cases {
            let app_err = AppError::from(err);
            assert_eq!(app_err.status, status);
            assert_eq!(app_err.code, code);
        }
    }

    #[tokio::test]
    async fn test_health_reports_index_and_admission() {
        let (app, _) = app();
        let req = axum::http::Request::builder()
            .uri("/health")
            .body(Body::empty())
            .unwrap();
        let (status, json) = send(app, req).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["status"], "ok");
        assert!(json["backend"].is_null());
        assert_eq!(json["version"], env!("CARGO_PKG_VERSION"));
        assert_eq!(json["index"]["chunks"], 2);
        assert_eq!(json["admission"]["max_concurrency"], 1);
        assert_eq!(json["admission"]["running"], 0);
        assert!(json["sync"].is_null());
    }

    #[tokio::test]
    async fn test_rag_stats() {
        let (app, _) = app();
        let req = axum::http::Request::builder()
            .uri("/api/rag-stats")
            .body(Body::empty())
            .unwrap();
        let (status, json) = send(app, req).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["chunks"], 2);
        assert_eq!(json["files"], 2);
    }

    #[tokio::test]
    async fn test_sync_disabled_is_bad_request() {
        let (app, _) = app();
        let req = axum::http::Request::builder()
            .method("POST")
            .uri("/api/sync")
            .body(Body::empty())
            .unwrap();
        let (status, json) = send(app, req).await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(json["error"]["code"], "bad_request");
    }

    #[tokio::test]
    async fn test_sync_endpoint_runs_one_cycle() {
        let (app, _) = app_with(Duration::from_secs(30), true);
        let req = axum::http::Request::builder()
            .method("POST")
            .uri("/api/sync")
            .body(Body::empty())
            .unwrap();
        let (status, json) = send(app, req).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(
            json,
            serde_json::json!({ "outcome": "unchanged", "commit": "cafe0000" })
        );
    }

    async fn spawn_tags_backend(status: StatusCode) -> String {
        let app = Router::new().route("/api/tags", get(move || async move { status }));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}/api/tags", addr)
    }

    #[tokio::test]
    async fn test_health_ok_when_backend_answers() {
        let url = spawn_tags_backend(StatusCode::OK).await;
        let health = Arc::new(BackendHealth::new(url, Duration::from_secs(5)).unwrap());
        let (app, _) = app_with_health(health);

        let (status, json) = send(app.clone(), get_request("/health")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["status"], "ok");
        assert_eq!(json["backend"]["healthy"], true);
        assert_eq!(json["backend"]["consecutive_failures"], 0);

        let (status, _) = send(
            app,
            json_request("POST", "/api/chat", serde_json::json!({ "message": "Hallo" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_health_degraded_when_backend_fails() {
        let url = spawn_tags_backend(StatusCode::INTERNAL_SERVER_ERROR).await;
        let health = Arc::new(BackendHealth::new(url, Duration::from_secs(5)).unwrap());
        let (app, _) = app_with_health(health);

        send(app.clone(), get_request("/health")).await;
        let (status, json) = send(app, get_request("/health")).await;

        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(json["status"], "degraded");
        assert_eq!(json["backend"]["healthy"], false);
        assert_eq!(json["backend"]["consecutive_failures"], 2);
        assert!(json["backend"]["last_error"].as_str().unwrap().contains("500"));
        assert_eq!(json["index"]["chunks"], 2);
    }

    #[tokio::test]
    async fn test_chat_refused_while_backend_is_down() {
        let health = Arc::new(
            BackendHealth::new("http://127.0.0.1:1/api/tags", Duration::from_secs(1)).unwrap(),
        );
        let (app, backend) = app_with_health(health.clone());

        let (status, json) = send(app.clone(), get_request("/health")).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(json["backend"]["consecutive_failures"], 1);

        let (status, json) = send(
            app,
            json_request("POST", "/api/chat", serde_json::json!({ "message": "Hallo" })),
        )
        .await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(json["error"]["code"], "backend_unavailable");
        assert!(json["error"]["message"]
            .as_str()
            .unwrap()
            .contains("backend unreachable"));
        assert!(backend.seen.lock().unwrap().is_empty());
    }
}
