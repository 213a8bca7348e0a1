//! HTTP surface for the editor UI.
//!
//! Every route answers with a JSON object carrying a `success` flag. Failures
//! from the stores and the AI gateway are rendered by [`ApiError`] with a
//! status code chosen from the error kind.

use crate::ai::AiGateway;
use crate::config::{AppPaths, ConfigMap, ConfigStore};
use crate::db::Database;
use crate::errors::{AppError, AppResult};
use crate::logs::{LogInspector, DEFAULT_SEARCH_RESULTS, DEFAULT_TAIL_LINES};
use crate::models::{
    ChatPayload, LogSearchPayload, LogTailQuery, LogTargetPayload, RenderPayload, SaveDocumentPayload,
    TestConnectionPayload,
};
use crate::render::render_markdown;
use crate::version::load_version_info;
use axum::{
    extract::{
        rejection::{JsonRejection, PathRejection, QueryRejection},
        DefaultBodyLimit, Multipart, Path, Query, State,
    },
    http::{Method, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tower_http::cors::{Any, CorsLayer};
use tower_http::services::{ServeDir, ServeFile};
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};
use uuid::Uuid;

const MAX_UPLOAD_BYTES: usize = 16 * 1024 * 1024;

/// Long-lived services shared by every request. Built once at startup.
#[derive(Debug)]
pub struct Services {
    pub paths: AppPaths,
    pub db: Database,
    pub config: ConfigStore,
    pub ai: AiGateway,
    pub logs: LogInspector,
}

impl Services {
    pub fn open(paths: AppPaths) -> AppResult<Self> {
        let config = ConfigStore::open(&paths)?;
        let db = Database::new(&paths.database_path())?;
        let logs = LogInspector::new(paths.log_dir())?;
        info!(base_dir = %paths.base_dir().display(), "services initialized");
        Ok(Self {
            paths,
            db,
            config,
            ai: AiGateway::new(),
            logs,
        })
    }
}

#[derive(Clone)]
struct ServerState {
    services: Arc<Services>,
    shutdown: mpsc::Sender<()>,
}

pub struct ApiError(AppError);

impl From<AppError> for ApiError {
    fn from(value: AppError) -> Self {
        Self(value)
    }
}

impl From<std::io::Error> for ApiError {
    fn from(value: std::io::Error) -> Self {
        Self(AppError::from(value))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Validation(_) | AppError::ConfigIncomplete(_) => StatusCode::BAD_REQUEST,
            AppError::Upstream(_) | AppError::Network(_) => StatusCode::BAD_GATEWAY,
            AppError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            AppError::Storage(_) | AppError::Io(_) | AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            error!(error = %self.0, "request failed");
        } else {
            warn!(error = %self.0, "request rejected");
        }

        let body = Json(json!({
            "success": false,
            "error": self.0.to_string(),
            "kind": self.0.kind(),
        }));
        (status, body).into_response()
    }
}

type ApiResult = Result<Json<Value>, ApiError>;

/// Runs store and filesystem work off the async worker threads.
async fn blocking<T, F>(state: &ServerState, task: F) -> Result<T, ApiError>
where
    T: Send + 'static,
    F: FnOnce(&Services) -> AppResult<T> + Send + 'static,
{
    let services = Arc::clone(&state.services);
    tokio::task::spawn_blocking(move || task(&services))
        .await
        .map_err(|error| AppError::Internal(format!("blocking task failed: {}", error)))?
        .map_err(ApiError::from)
}

fn json_body<T>(payload: Result<Json<T>, JsonRejection>) -> Result<T, ApiError> {
    payload
        .map(|Json(value)| value)
        .map_err(|rejection| ApiError(AppError::Validation(rejection.body_text())))
}

fn document_id(path: Result<Path<i64>, PathRejection>) -> Result<i64, ApiError> {
    path.map(|Path(id)| id)
        .map_err(|rejection| ApiError(AppError::Validation(rejection.body_text())))
}

/// Serializes `value` as an object and marks it successful.
fn envelope(value: impl Serialize) -> ApiResult {
    let mut body = match serde_json::to_value(value).map_err(AppError::from)? {
        Value::Object(map) => map,
        other => {
            let mut map = ConfigMap::new();
            map.insert("data".to_string(), other);
            map
        }
    };
    body.insert("success".to_string(), Value::Bool(true));
    Ok(Json(Value::Object(body)))
}

async fn list_documents(State(state): State<ServerState>) -> ApiResult {
    let documents = blocking(&state, |services| services.db.list_documents()).await?;
    info!(count = documents.len(), "listed documents");
    Ok(Json(json!({ "success": true, "documents": documents })))
}

async fn get_document(State(state): State<ServerState>, path: Result<Path<i64>, PathRejection>) -> ApiResult {
    let id = document_id(path)?;
    let document = blocking(&state, move |services| services.db.get_document(id))
        .await?
        .ok_or_else(|| AppError::NotFound(format!("document {} does not exist", id)))?;
    Ok(Json(json!({ "success": true, "document": document })))
}

async fn save_document(
    State(state): State<ServerState>,
    payload: Result<Json<SaveDocumentPayload>, JsonRejection>,
) -> ApiResult {
    let payload = json_body(payload)?;
    let id = blocking(&state, move |services| {
        services
            .db
            .save_document(payload.title_or_default(), payload.content_or_default(), payload.id)
    })
    .await?;
    Ok(Json(json!({ "success": true, "id": id })))
}

async fn update_document(
    State(state): State<ServerState>,
    path: Result<Path<i64>, PathRejection>,
    payload: Result<Json<SaveDocumentPayload>, JsonRejection>,
) -> ApiResult {
    let id = document_id(path)?;
    let payload = json_body(payload)?;
    let document = blocking(&state, move |services| {
        services
            .db
            .update_document(id, payload.title_or_default(), payload.content_or_default())
    })
    .await?;
    Ok(Json(json!({ "success": true, "id": document.id, "document": document })))
}

async fn delete_document(State(state): State<ServerState>, path: Result<Path<i64>, PathRejection>) -> ApiResult {
    let id = document_id(path)?;
    if !blocking(&state, move |services| services.db.delete_document(id)).await? {
        return Err(AppError::NotFound(format!("document {} does not exist", id)).into());
    }
    Ok(Json(json!({ "success": true, "deleted": true })))
}

async fn document_history(State(state): State<ServerState>, path: Result<Path<i64>, PathRejection>) -> ApiResult {
    let id = document_id(path)?;
    let history = blocking(&state, move |services| services.db.document_history(id)).await?;
    Ok(Json(json!({ "success": true, "history": history })))
}

async fn get_ai_config(State(state): State<ServerState>) -> ApiResult {
    Ok(Json(json!({ "success": true, "config": state.services.config.get_ai_config() })))
}

async fn save_ai_config(
    State(state): State<ServerState>,
    payload: Result<Json<ConfigMap>, JsonRejection>,
) -> ApiResult {
    let config = json_body(payload)?;
    blocking(&state, move |services| services.config.save_ai_config(&config)).await?;
    Ok(Json(json!({ "success": true })))
}

async fn get_app_config(State(state): State<ServerState>) -> ApiResult {
    Ok(Json(json!({ "success": true, "config": state.services.config.get_app_config() })))
}

async fn save_app_config(
    State(state): State<ServerState>,
    payload: Result<Json<ConfigMap>, JsonRejection>,
) -> ApiResult {
    let config = json_body(payload)?;
    blocking(&state, move |services| services.config.save_app_config(&config)).await?;
    Ok(Json(json!({ "success": true })))
}

async fn get_settings(State(state): State<ServerState>) -> ApiResult {
    Ok(Json(json!({ "success": true, "settings": state.services.config.merged_settings() })))
}

async fn save_settings(
    State(state): State<ServerState>,
    payload: Result<Json<ConfigMap>, JsonRejection>,
) -> ApiResult {
    let settings = json_body(payload)?;
    blocking(&state, move |services| services.config.save_settings(settings)).await?;
    Ok(Json(json!({ "success": true })))
}

async fn test_connection(
    State(state): State<ServerState>,
    payload: Result<Json<TestConnectionPayload>, JsonRejection>,
) -> ApiResult {
    let payload = json_body(payload)?;
    state
        .services
        .ai
        .test_connection(&payload.api_key, &payload.base_url, &payload.model)
        .await?;
    info!("ai connection test succeeded");
    Ok(Json(json!({ "success": true, "message": "connection succeeded" })))
}

async fn chat(State(state): State<ServerState>, payload: Result<Json<ChatPayload>, JsonRejection>) -> ApiResult {
    run_assistant(&state, json_body(payload)?, "chat").await
}

async fn edit(State(state): State<ServerState>, payload: Result<Json<ChatPayload>, JsonRejection>) -> ApiResult {
    run_assistant(&state, json_body(payload)?, "edit").await
}

async fn run_assistant(state: &ServerState, payload: ChatPayload, mode: &'static str) -> ApiResult {
    if payload.message.trim().is_empty() {
        return Err(AppError::Validation("message must not be empty".to_string()).into());
    }
    let config = state.services.config.get_ai_config();
    let response = state
        .services
        .ai
        .chat(&config, &payload.message, payload.context.as_deref())
        .await?;
    info!(mode, "assistant request completed");
    Ok(Json(json!({ "success": true, "response": response })))
}

async fn render(payload: Result<Json<RenderPayload>, JsonRejection>) -> ApiResult {
    let payload = json_body(payload)?;
    let html = render_markdown(&payload.content);
    Ok(Json(json!({ "success": true, "html": html })))
}

async fn upload_image(
    State(state): State<ServerState>,
    multipart: Result<Multipart, axum::extract::multipart::MultipartRejection>,
) -> ApiResult {
    let mut multipart = multipart.map_err(|rejection| AppError::Validation(rejection.body_text()))?;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|error| AppError::Validation(format!("multipart error: {}", error)))?
    {
        if field.name() != Some("image") {
            continue;
        }

        let file_name = field.file_name().unwrap_or_default().to_string();
        if file_name.is_empty() {
            return Err(AppError::Validation("no file selected".to_string()).into());
        }
        let content_type = field.content_type().unwrap_or_default().to_string();
        if !content_type.starts_with("image/") {
            return Err(AppError::Validation(format!("unsupported file type: {}", content_type)).into());
        }

        let data = field
            .bytes()
            .await
            .map_err(|error| AppError::Validation(format!("read error: {}", error)))?;

        let extension = std::path::Path::new(&file_name)
            .extension()
            .and_then(|ext| ext.to_str())
            .filter(|ext| ext.chars().all(|c| c.is_ascii_alphanumeric()))
            .map(|ext| format!(".{}", ext))
            .unwrap_or_default();
        let stored_name = format!("{}{}", Uuid::new_v4(), extension);

        let upload_dir = state.services.paths.upload_dir();
        tokio::fs::create_dir_all(&upload_dir).await?;
        tokio::fs::write(upload_dir.join(&stored_name), &data).await?;

        let url = format!("/static/uploads/{}", stored_name);
        info!(url = %url, bytes = data.len(), "image uploaded");
        return Ok(Json(json!({ "success": true, "url": url })));
    }

    Err(AppError::Validation("no image file in request".to_string()).into())
}

async fn list_logs(State(state): State<ServerState>) -> ApiResult {
    let log_files = blocking(&state, |services| services.logs.list()).await?;
    Ok(Json(json!({ "success": true, "log_files": log_files })))
}

async fn tail_log(
    State(state): State<ServerState>,
    file_name: Result<Path<String>, PathRejection>,
    query: Result<Query<LogTailQuery>, QueryRejection>,
) -> ApiResult {
    let Path(file_name) = file_name.map_err(|rejection| AppError::Validation(rejection.body_text()))?;
    let Query(query) = query.map_err(|rejection| AppError::Validation(rejection.body_text()))?;
    let lines = query.lines.unwrap_or(DEFAULT_TAIL_LINES);
    let tail = blocking(&state, move |services| services.logs.tail(&file_name, lines)).await?;
    envelope(tail)
}

async fn search_logs(
    State(state): State<ServerState>,
    payload: Result<Json<LogSearchPayload>, JsonRejection>,
) -> ApiResult {
    let payload = json_body(payload)?;
    let found = blocking(&state, move |services| {
        services.logs.search(
            &payload.keyword,
            payload.file_name.as_deref(),
            payload.max_results.unwrap_or(DEFAULT_SEARCH_RESULTS),
        )
    })
    .await?;
    info!(total = found.total, "log search completed");
    envelope(found)
}

async fn clear_logs(
    State(state): State<ServerState>,
    payload: Result<Json<LogTargetPayload>, JsonRejection>,
) -> ApiResult {
    let payload = json_body(payload)?;
    let outcome = blocking(&state, move |services| services.logs.clear(payload.file_name.as_deref())).await?;
    info!(cleared = outcome.affected.len(), failed = outcome.failed.len(), "logs cleared");
    envelope(outcome)
}

async fn delete_logs(
    State(state): State<ServerState>,
    payload: Result<Json<LogTargetPayload>, JsonRejection>,
) -> ApiResult {
    let payload = json_body(payload)?;
    let outcome = blocking(&state, move |services| services.logs.delete(payload.file_name.as_deref())).await?;
    info!(deleted = outcome.affected.len(), failed = outcome.failed.len(), "logs deleted");
    envelope(outcome)
}

async fn pack_logs(State(state): State<ServerState>) -> ApiResult {
    let packed = blocking(&state, |services| services.logs.pack(&services.paths.data_dir())).await?;
    envelope(packed)
}

async fn version(State(state): State<ServerState>) -> ApiResult {
    let version_info = blocking(&state, |services| load_version_info(&services.paths.version_path())).await?;
    Ok(Json(json!({ "success": true, "version_info": version_info })))
}

async fn shutdown(State(state): State<ServerState>) -> ApiResult {
    info!("shutdown requested over http");
    // A full channel means a stop is already pending.
    let _ = state.shutdown.try_send(());
    Ok(Json(json!({ "success": true, "message": "server is shutting down" })))
}

fn create_router(services: Arc<Services>, shutdown_tx: mpsc::Sender<()>) -> Router {
    let static_dir = services.paths.static_dir().to_path_buf();
    let public_dir = services.paths.public_dir();
    let state = ServerState {
        services,
        shutdown: shutdown_tx,
    };

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_headers(Any)
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE, Method::OPTIONS]);

    Router::new()
        .route_service("/", ServeFile::new(static_dir.join("index.html")))
        .nest_service("/static", ServeDir::new(static_dir).fallback(ServeDir::new(public_dir)))
        .route("/api/documents", get(list_documents).post(save_document))
        .route(
            "/api/documents/:id",
            get(get_document).put(update_document).delete(delete_document),
        )
        .route("/api/documents/:id/history", get(document_history))
        .route("/api/config", get(get_ai_config).post(save_ai_config))
        .route("/api/app-config", get(get_app_config).post(save_app_config))
        .route("/api/settings", get(get_settings).post(save_settings))
        .route("/api/test-connection", post(test_connection))
        .route("/api/chat", post(chat))
        .route("/api/edit", post(edit))
        .route("/api/render", post(render))
        .route(
            "/api/upload/image",
            post(upload_image).layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES)),
        )
        .route("/api/logs", get(list_logs))
        .route("/api/logs/search", post(search_logs))
        .route("/api/logs/clear", post(clear_logs))
        .route("/api/logs/delete", post(delete_logs))
        .route("/api/logs/pack", post(pack_logs))
        .route("/api/logs/:file_name", get(tail_log))
        .route("/api/version", get(version))
        .route("/shutdown", post(shutdown))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// A running HTTP surface and the means to stop it.
pub struct ServerHandle {
    url: String,
    shutdown: mpsc::Sender<()>,
    task: JoinHandle<AppResult<()>>,
}

impl ServerHandle {
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Sending on this has the same effect as `POST /shutdown`.
    pub fn shutdown_sender(&self) -> mpsc::Sender<()> {
        self.shutdown.clone()
    }

    /// Resolves once the server has exited, whether stopped by [`ServerHandle::stop`]
    /// or by `POST /shutdown`.
    pub async fn wait(self) -> AppResult<()> {
        self.task
            .await
            .map_err(|error| AppError::Internal(format!("http server task failed: {}", error)))?
    }

    /// Signals shutdown and waits at most `grace`. Returns `false` when the
    /// server task was still running at the deadline.
    pub async fn stop(self, grace: Duration) -> bool {
        let _ = self.shutdown.try_send(());
        match tokio::time::timeout(grace, self.task).await {
            Ok(Ok(Ok(()))) => true,
            Ok(Ok(Err(error))) => {
                warn!(error = %error, "http server exited with an error");
                true
            }
            Ok(Err(error)) => {
                warn!(error = %error, "http server task panicked");
                true
            }
            Err(_) => {
                warn!(grace_ms = (grace.as_millis() as u64), "http server did not stop in time");
                false
            }
        }
    }
}

/// Binds `addr` (port 0 picks a free port) and serves in a background task.
pub async fn start_server(services: Arc<Services>, addr: &str) -> AppResult<ServerHandle> {
    let listener = TcpListener::bind(addr).await?;
    let local_addr = listener.local_addr()?;
    let url = format!("http://{}", local_addr);

    let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);
    let app = create_router(services, shutdown_tx.clone());

    info!(url = %url, "starting http server");
    let task = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown_rx.recv().await;
            })
            .await?;
        info!("http server stopped");
        Ok::<(), AppError>(())
    });

    Ok(ServerHandle {
        url,
        shutdown: shutdown_tx,
        task,
    })
}
