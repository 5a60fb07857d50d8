use std::net::SocketAddr;

use anyhow::Result;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json};
use axum::routing::{get, post};
use axum::Router;
use serde::{Deserialize, Serialize};
use tower_http::trace::TraceLayer;

use crate::chat::ChatService;
use crate::config::AppConfig;
use crate::models::{
    ChatRequest, ChatResponse, SessionRequest, SessionResponse, SessionSummary, StoredMessage,
};

#[derive(Clone)]
struct AppState {
    chat: ChatService,
}

#[derive(Debug, Deserialize)]
struct CountQuery {
    area: Option<String>,
}

#[derive(Debug, Serialize)]
struct CountResponse {
    area: Option<String>,
    count: i64,
}

pub fn router(chat: ChatService) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/chat", post(chat_handler))
        .route("/api/session", post(create_session))
        .route("/api/sessions", get(list_sessions))
        .route("/api/chat/:session_id/messages", get(session_messages))
        .route("/api/properties/count", get(property_count))
        .layer(TraceLayer::new_for_http())
        .with_state(AppState { chat })
}

pub async fn run_server(config: AppConfig, chat: ChatService) -> Result<()> {
    let app = router(chat);

    let addr: SocketAddr = config.bind_addr.parse()?;
    tracing::info!("listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "healthy" }))
}

async fn chat_handler(
    State(state): State<AppState>,
    Json(request): Json<ChatRequest>,
) -> Result<Json<ChatResponse>, ApiError> {
    if request.message.trim().is_empty() {
        return Err(ApiError::bad_request("message must not be empty".to_string()));
    }
    let answer = state.chat.answer(request).await?;
    Ok(Json(answer))
}

async fn create_session(
    State(state): State<AppState>,
    Json(request): Json<SessionRequest>,
) -> Result<Json<SessionResponse>, ApiError> {
    let session_id = state.chat.open_session(request).await?;
    Ok(Json(SessionResponse { session_id }))
}

async fn list_sessions(
    State(state): State<AppState>,
) -> Result<Json<Vec<SessionSummary>>, ApiError> {
    Ok(Json(state.chat.sessions().await?))
}

async fn session_messages(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Result<Json<Vec<StoredMessage>>, ApiError> {
    Ok(Json(state.chat.messages(&session_id).await?))
}

async fn property_count(
    State(state): State<AppState>,
    Query(query): Query<CountQuery>,
) -> Json<CountResponse> {
    let count = state.chat.property_count(query.area.as_deref()).await;
    Json(CountResponse {
        area: query.area,
        count,
    })
}

#[derive(Debug)]
struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn bad_request(message: String) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message,
        }
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(value: anyhow::Error) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: value.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let body = serde_json::json!({ "error": self.message });
        (self.status, Json(body)).into_response()
    }
}
