//! HTTP API and invalidation WebSocket for the dashboard.

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{
        Path, Query, State,
        rejection::JsonRejection,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    http::{HeaderMap, StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, post, put},
};
use chrono::{DateTime, Utc};
use secrecy::ExposeSecret;
use serde::Deserialize;
use serde_json::json;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tracing::{debug, info, warn};

use super::Dashboard;
use super::cache::DashboardEvent;
use crate::config::StoreConfig;
use crate::error::{ConfigError, Error, ErrorKind, ValidationError};
use crate::records::{Metric, Queue, ReviewAction, WindowParams};

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub dashboard: Arc<Dashboard>,
}

/// Build the Axum router with every dashboard route.
pub fn dashboard_routes(dashboard: Arc<Dashboard>) -> Router {
    let state = AppState { dashboard };

    Router::new()
        .route("/ws", get(ws_handler))
        .route("/health", get(health))
        .route("/api/auth/login", post(login))
        .route("/api/auth/logout", post(logout))
        .route("/api/auth/session", get(session))
        .route(
            "/api/config",
            get(get_config).put(put_config).delete(delete_config),
        )
        .route("/api/queues/{queue}/records", get(list_records))
        .route("/api/queues/{queue}/records/{id}/actions", post(apply_action))
        .route("/api/metrics", get(metrics))
        .route("/api/metrics/compare", get(compare))
        .route("/api/overview", get(overview))
        .route("/api/realtime", put(set_realtime))
        .layer(ServiceBuilder::new().layer(CorsLayer::permissive()))
        .with_state(state)
}

// ── Errors ──────────────────────────────────────────────────────────────

/// JSON error response carrying the failure kind.
pub struct ApiError(Error);

impl<E: Into<Error>> From<E> for ApiError {
    fn from(e: E) -> Self {
        Self(e.into())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let kind = self.0.kind();
        let status = match kind {
            ErrorKind::NotConfigured => StatusCode::CONFLICT,
            ErrorKind::FetchFailed => StatusCode::BAD_GATEWAY,
            ErrorKind::Validation => StatusCode::UNPROCESSABLE_ENTITY,
            ErrorKind::Unauthorized => StatusCode::UNAUTHORIZED,
            ErrorKind::NotFound => StatusCode::NOT_FOUND,
        };

        let mut body = json!({
            "error": self.0.to_string(),
            "kind": kind.as_str(),
        });
        match &self.0 {
            Error::Validation(v) => {
                if let Some(field) = v.field() {
                    body["field"] = json!(field);
                }
            }
            Error::Config(ConfigError::InvalidValue { key, .. }) => {
                body["field"] = json!(key);
            }
            _ => {}
        }
        if kind == ErrorKind::FetchFailed {
            body["retryable"] = json!(true);
            warn!(error = %self.0, "Store request failed");
        }

        (status, Json(body)).into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

fn bearer(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
}

async fn require_session(state: &AppState, headers: &HeaderMap) -> ApiResult<()> {
    state.dashboard.authorize(bearer(headers)).await?;
    Ok(())
}

fn parse_queue(name: &str) -> ApiResult<Queue> {
    Ok(name.parse::<Queue>()?)
}

/// Unwrap a JSON body, reporting a malformed one as a validation error.
fn json_body<T>(payload: Result<Json<T>, JsonRejection>) -> ApiResult<T> {
    match payload {
        Ok(Json(body)) => Ok(body),
        Err(rejection) => Err(ValidationError::MalformedBody(rejection.body_text()).into()),
    }
}

// ── Health ──────────────────────────────────────────────────────────────

async fn health() -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "service": "sendguard"
    }))
}

// ── Session ─────────────────────────────────────────────────────────────

#[derive(Deserialize)]
struct LoginRequest {
    email: String,
    password: String,
}

async fn login(
    State(state): State<AppState>,
    payload: Result<Json<LoginRequest>, JsonRejection>,
) -> ApiResult<impl IntoResponse> {
    let body = json_body(payload)?;
    let session = state.dashboard.sign_in(&body.email, &body.password).await?;
    Ok(Json(json!({
        "access_token": session.access_token.expose_secret(),
        "user_email": session.user_email,
        "expires_at": session.expires_at,
    })))
}

async fn logout(State(state): State<AppState>, headers: HeaderMap) -> ApiResult<impl IntoResponse> {
    require_session(&state, &headers).await?;
    state.dashboard.sign_out().await;
    Ok(Json(json!({"status": "signed_out"})))
}

async fn session(State(state): State<AppState>, headers: HeaderMap) -> ApiResult<impl IntoResponse> {
    let info = state.dashboard.authorize(bearer(&headers)).await?;
    Ok(Json(info))
}

// ── Store configuration ─────────────────────────────────────────────────

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ConfigRequest {
    url: String,
    key: String,
    table_name: String,
}

async fn get_config(State(state): State<AppState>, headers: HeaderMap) -> ApiResult<impl IntoResponse> {
    require_session(&state, &headers).await?;
    let view = state.dashboard.config_view().await;
    Ok(Json(json!({
        "configured": view.is_some(),
        "config": view,
    })))
}

async fn put_config(
    State(state): State<AppState>,
    headers: HeaderMap,
    payload: Result<Json<ConfigRequest>, JsonRejection>,
) -> ApiResult<impl IntoResponse> {
    require_session(&state, &headers).await?;
    let body = json_body(payload)?;
    let config = StoreConfig::new(body.url, body.key, body.table_name)?;
    let view = state.dashboard.configure(config).await?;
    Ok(Json(json!({
        "configured": true,
        "config": view,
    })))
}

async fn delete_config(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> ApiResult<impl IntoResponse> {
    require_session(&state, &headers).await?;
    state.dashboard.disconnect().await?;
    Ok(Json(json!({"configured": false, "config": null})))
}

// ── Queues ──────────────────────────────────────────────────────────────

async fn list_records(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(queue): Path<String>,
    Query(params): Query<WindowParams>,
) -> ApiResult<impl IntoResponse> {
    require_session(&state, &headers).await?;
    let queue = parse_queue(&queue)?;
    let window = params.resolve(Utc::now())?;

    let records = state.dashboard.records(Some(queue), window.as_ref()).await?;
    debug!(queue = %queue, count = records.len(), "Listed records");
    Ok(Json(json!({
        "queue": queue,
        "title": queue.title(),
        "actions": queue.permitted_actions(),
        "window": window,
        "count": records.len(),
        "records": records,
    })))
}

async fn apply_action(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path((queue, id)): Path<(String, i64)>,
    payload: Result<Json<ReviewAction>, JsonRejection>,
) -> ApiResult<impl IntoResponse> {
    require_session(&state, &headers).await?;
    let action = json_body(payload)?;
    let queue = parse_queue(&queue)?;
    let outcome = state.dashboard.apply(queue, id, &action).await?;
    Ok(Json(outcome))
}

// ── Metrics ─────────────────────────────────────────────────────────────

async fn metrics(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(params): Query<WindowParams>,
) -> ApiResult<impl IntoResponse> {
    require_session(&state, &headers).await?;
    let window = params.resolve_or_default(Utc::now())?;
    Ok(Json(state.dashboard.metrics(&window).await?))
}

#[derive(Deserialize)]
struct CompareParams {
    #[serde(default)]
    metric: Option<String>,
    #[serde(default)]
    preset: Option<String>,
    #[serde(default)]
    start: Option<DateTime<Utc>>,
    #[serde(default)]
    end: Option<DateTime<Utc>>,
}

async fn compare(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(params): Query<CompareParams>,
) -> ApiResult<impl IntoResponse> {
    require_session(&state, &headers).await?;
    let metric: Metric = params.metric.as_deref().unwrap_or("total").parse()?;
    let window = WindowParams {
        preset: params.preset,
        start: params.start,
        end: params.end,
    }
    .resolve_or_default(Utc::now())?;
    Ok(Json(state.dashboard.compare(metric, &window).await?))
}

async fn overview(State(state): State<AppState>, headers: HeaderMap) -> ApiResult<impl IntoResponse> {
    require_session(&state, &headers).await?;
    Ok(Json(state.dashboard.overview().await?))
}

// ── Live updates ────────────────────────────────────────────────────────

#[derive(Deserialize)]
struct RealtimeRequest {
    enabled: bool,
}

async fn set_realtime(
    State(state): State<AppState>,
    headers: HeaderMap,
    payload: Result<Json<RealtimeRequest>, JsonRejection>,
) -> ApiResult<impl IntoResponse> {
    require_session(&state, &headers).await?;
    let body = json_body(payload)?;
    Ok(Json(state.dashboard.set_realtime(body.enabled).await))
}

#[derive(Deserialize)]
struct WsParams {
    #[serde(default)]
    token: Option<String>,
}

/// Browsers cannot set headers on a WebSocket upgrade, so the token may also
/// come as `?token=`.
async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(params): Query<WsParams>,
) -> Response {
    let token = bearer(&headers).or(params.token.as_deref());
    if let Err(e) = state.dashboard.authorize(token).await {
        return ApiError::from(e).into_response();
    }
    info!("WebSocket client connecting");
    ws.on_upgrade(|socket| handle_socket(socket, state.dashboard))
}

async fn send_event(socket: &mut WebSocket, event: &DashboardEvent) -> bool {
    match serde_json::to_string(event) {
        Ok(json) => socket.send(Message::Text(json.into())).await.is_ok(),
        Err(_) => true,
    }
}

async fn handle_socket(mut socket: WebSocket, dashboard: Arc<Dashboard>) {
    info!("WebSocket client connected");

    // Subscribe before the greeting so no invalidation slips between them
    let mut rx = dashboard.cache().subscribe();
    if !send_event(&mut socket, &dashboard.hello().await).await {
        warn!("Failed to send greeting, client disconnected");
        return;
    }

    loop {
        tokio::select! {
            result = rx.recv() => {
                match result {
                    Ok(event) => {
                        if !send_event(&mut socket, &event).await {
                            debug!("Client disconnected during send");
                            break;
                        }
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                        warn!(missed = n, "WS client lagged behind broadcast");
                        // A fresh hello tells the client to re-fetch everything
                        if !send_event(&mut socket, &dashboard.hello().await).await {
                            break;
                        }
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => {
                        debug!("Broadcast channel closed");
                        break;
                    }
                }
            }

            result = socket.recv() => {
                match result {
                    Some(Ok(Message::Ping(data))) => {
                        if socket.send(Message::Pong(data)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        info!("WebSocket client disconnected");
                        break;
                    }
                    Some(Err(e)) => {
                        warn!(error = %e, "WebSocket error");
                        break;
                    }
                    _ => {}
                }
            }
        }
    }

    info!("WebSocket connection closed");
}
