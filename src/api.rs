use axum::{
    body::Bytes,
    extract::{Query, Request, State},
    http::{header, Method, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, MethodRouter},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::net::SocketAddr;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use crate::error::{StoreError, ViewError};
use crate::service::{TopViewed, ViewCounter};

/// Start the REST API server and run until Ctrl+C
pub async fn start_server(counter: ViewCounter, host: &str, port: u16) -> anyhow::Result<()> {
    let backend = counter.backend();
    let app = create_router(ApiState { counter });

    let addr: SocketAddr = format!("{}:{}", host, port).parse()?;

    info!("🌐 View counter listening on http://{} ({} store)", addr, backend);
    eprintln!("\x1b[32m✓\x1b[0m Server listening on \x1b[1mhttp://{}\x1b[0m", addr);
    eprintln!("\x1b[36m  • Health check:\x1b[0m http://{}/health", addr);
    eprintln!("\x1b[36m  • Track view:\x1b[0m   http://{}/track-view", addr);
    eprintln!("\x1b[33m💡 Press Ctrl+C to stop the server\x1b[0m\n");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for Ctrl+C: {}", e);
    }
}

/// Shared application state accessible to all API handlers
#[derive(Clone)]
pub struct ApiState {
    pub counter: ViewCounter,
}

/// Query string of `GET /track-view`
#[derive(Debug, Default, Deserialize)]
pub struct ViewQuery {
    #[serde(rename = "type")]
    pub content_type: Option<String>,
    pub id: Option<String>,
}

/// Body of a successful `POST /track-view`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackViewResponse {
    pub success: bool,
    pub views: u64,
}

/// Body of a successful view lookup
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ViewsResponse {
    pub views: u64,
}

/// Response for API errors
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

impl IntoResponse for ViewError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            ViewError::InvalidArgument => (StatusCode::BAD_REQUEST, self.to_string()),
            ViewError::MethodNotAllowed => (StatusCode::METHOD_NOT_ALLOWED, self.to_string()),
            ViewError::Storage(e) => {
                error!("View storage failure: {}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Failed to record view".to_string(),
                )
            }
        };

        (status, Json(ErrorResponse { error: message })).into_response()
    }
}

/// Create the API router with all routes
pub fn create_router(state: ApiState) -> Router {
    // OPTIONS never reaches these routers: the CORS layer answers it
    let track_view: MethodRouter<ApiState> = get(track_view_get)
        .post(track_view_post)
        .fallback(method_not_allowed);

    // Paths used by the site's front end
    let get_views: MethodRouter<ApiState> = get(track_view_get).fallback(method_not_allowed);

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE]);

    Router::new()
        .route("/health", get(health_check))
        .route("/track-view", track_view.clone())
        .route("/api/track-view", track_view)
        .route("/api/get-views", get_views)
        .layer(cors)
        .layer(middleware::from_fn(preflight_no_content))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Health check endpoint
async fn health_check(State(state): State<ApiState>) -> Json<Value> {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "backend": state.counter.backend(),
    }))
}

async fn method_not_allowed() -> ViewError {
    ViewError::MethodNotAllowed
}

/// The CORS layer answers preflight requests itself; report them as 204 No Content
async fn preflight_no_content(request: Request, next: Next) -> Response {
    let is_options = request.method() == Method::OPTIONS;
    let mut response = next.run(request).await;
    if is_options && response.status() == StatusCode::OK {
        *response.status_mut() = StatusCode::NO_CONTENT;
    }
    response
}

/// Views for one item, or the leaderboard when no `type` is given
async fn track_view_get(
    State(state): State<ApiState>,
    query: Result<Query<ViewQuery>, axum::extract::rejection::QueryRejection>,
) -> Result<Response, ViewError> {
    let Query(query) = query.map_err(|_| ViewError::InvalidArgument)?;

    match (query.content_type, query.id) {
        (None, _) => {
            let counter = state.counter.clone();
            let top: TopViewed = run_blocking(move || Ok(counter.top_viewed())).await?;
            Ok(Json(top).into_response())
        }
        (Some(content_type), Some(id)) => {
            let counter = state.counter.clone();
            let views = run_blocking(move || counter.get_views(&content_type, &id)).await?;
            Ok(Json(ViewsResponse { views }).into_response())
        }
        (Some(_), None) => Err(ViewError::InvalidArgument),
    }
}

/// Record one view. The body is read as JSON whatever its Content-Type.
async fn track_view_post(
    State(state): State<ApiState>,
    body: Bytes,
) -> Result<Json<TrackViewResponse>, ViewError> {
    let (content_type, id) = parse_track_request(&body).ok_or(ViewError::InvalidArgument)?;

    let counter = state.counter.clone();
    let views = run_blocking(move || counter.record_view(&content_type, &id)).await?;

    Ok(Json(TrackViewResponse {
        success: true,
        views,
    }))
}

/// Extract `type` and `id` from a JSON object; each may be a string or a number
fn parse_track_request(body: &[u8]) -> Option<(String, String)> {
    let request: Value = serde_json::from_slice(body).ok()?;
    let fields = request.as_object()?;
    Some((field_text(fields.get("type")?)?, field_text(fields.get("id")?)?))
}

fn field_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Run a store operation on the blocking pool
async fn run_blocking<T, F>(f: F) -> Result<T, ViewError>
where
    F: FnOnce() -> Result<T, ViewError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| ViewError::Storage(StoreError::Interrupted(e.to_string())))?
}
