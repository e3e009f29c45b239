//! REST handlers. Thin adapters: extract, call the service, shape the
//! response. All business rules live in `guia-session`.

use axum::extract::{Path, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};

use guia_assistant::{AssistantReply, ChatMessage, ProcedureSummary};
use guia_core::{SessionId, DEFAULT_AREA_ID, DEFAULT_PRO_ID};
use guia_session::{ServiceError, StartRequest, StartedSession, UpdateAck, UpdateRequest};

use crate::server::AppState;

/// Error payloads mirror the wire contract: a small `{"error": ...}` object,
/// never a crash. Storage faults log the detail and return a generic 500.
#[derive(Debug)]
pub enum ApiError {
    NotFound,
    Validation(String),
    Internal(String),
}

impl From<ServiceError> for ApiError {
    fn from(e: ServiceError) -> Self {
        match e {
            ServiceError::NotFound => Self::NotFound,
            ServiceError::Validation(msg) => Self::Validation(msg),
            ServiceError::Store(e) => Self::Internal(e.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            Self::NotFound => {
                (StatusCode::NOT_FOUND, Json(json!({"error": "not found"}))).into_response()
            }
            Self::Validation(msg) => {
                (StatusCode::BAD_REQUEST, Json(json!({"error": msg}))).into_response()
            }
            Self::Internal(detail) => {
                tracing::error!(error = %detail, "request failed");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(json!({"error": "internal error"})),
                )
                    .into_response()
            }
        }
    }
}

// ── Catalog ──

pub async fn areas(State(state): State<AppState>) -> Json<Value> {
    Json(state.catalog.document().as_ref().clone())
}

pub async fn pro_nodos(
    State(state): State<AppState>,
    Path(pro_id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    state
        .catalog
        .step_graph(&pro_id)
        .map(|graph| Json(graph.as_ref().clone()))
        .ok_or(ApiError::NotFound)
}

/// Backward-compatible alias from the single-procedure era.
pub async fn legacy_nodos(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    state
        .catalog
        .step_graph(DEFAULT_PRO_ID)
        .map(|graph| Json(graph.as_ref().clone()))
        .ok_or(ApiError::NotFound)
}

pub async fn reload_catalog(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    state
        .catalog
        .reload()
        .map_err(|e| ApiError::Internal(e.to_string()))?;
    Ok(Json(json!({"ok": true})))
}

// ── Assistant ──

#[derive(Debug, Default, Deserialize)]
pub struct ChatRequest {
    #[serde(default)]
    pub messages: Vec<ChatMessage>,
    pub pro_id: Option<String>,
    pub area_id: Option<String>,
}

pub async fn ai_chat(
    State(state): State<AppState>,
    payload: Option<Json<ChatRequest>>,
) -> Json<AssistantReply> {
    let req = payload.map(|Json(r)| r).unwrap_or_default();

    let summary = req
        .pro_id
        .as_deref()
        .and_then(|pro_id| state.catalog.resolve(pro_id))
        .map(|p| ProcedureSummary {
            pro_id: p.pro_id.clone(),
            nombre: p.nombre.clone(),
            pasos: p.step_titles.clone(),
        });
    let area_id = req.area_id.as_deref().unwrap_or(DEFAULT_AREA_ID);

    let reply = state
        .assistant
        .ask(summary.as_ref(), area_id, &req.messages)
        .await;
    Json(reply)
}

// ── Sessions ──

pub async fn create_session(
    State(state): State<AppState>,
    payload: Option<Json<StartRequest>>,
) -> Result<Json<StartedSession>, ApiError> {
    let req = payload.map(|Json(r)| r).unwrap_or_default();
    let started = state.service.start_session(req)?;
    Ok(Json(started))
}

pub async fn get_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Response, ApiError> {
    let view = state.service.get_session_view(&SessionId::from_raw(id))?;
    Ok(Json(view).into_response())
}

pub async fn update_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<UpdateRequest>,
) -> Result<Json<UpdateAck>, ApiError> {
    let ack = state
        .service
        .apply_update(&SessionId::from_raw(id), req)?;
    Ok(Json(ack))
}

#[derive(Debug, Deserialize)]
pub struct AppendRequest {
    pub entry: Value,
}

pub async fn append_history(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<AppendRequest>,
) -> Result<Json<UpdateAck>, ApiError> {
    let ack = state
        .service
        .append_history(&SessionId::from_raw(id), req.entry)?;
    Ok(Json(ack))
}

pub async fn append_decision(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<AppendRequest>,
) -> Result<Json<UpdateAck>, ApiError> {
    let ack = state
        .service
        .append_decision(&SessionId::from_raw(id), req.entry)?;
    Ok(Json(ack))
}

pub async fn append_blocker(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<AppendRequest>,
) -> Result<Json<UpdateAck>, ApiError> {
    let ack = state
        .service
        .append_blocker(&SessionId::from_raw(id), req.entry)?;
    Ok(Json(ack))
}

pub async fn append_log(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<AppendRequest>,
) -> Result<Json<UpdateAck>, ApiError> {
    let ack = state
        .service
        .append_log(&SessionId::from_raw(id), req.entry)?;
    Ok(Json(ack))
}

pub async fn set_input(
    State(state): State<AppState>,
    Path((id, key)): Path<(String, String)>,
    Json(value): Json<Value>,
) -> Result<Json<UpdateAck>, ApiError> {
    let ack = state
        .service
        .set_input(&SessionId::from_raw(id), &key, value)?;
    Ok(Json(ack))
}

pub async fn export_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Response, ApiError> {
    let export = state.service.export_session(&SessionId::from_raw(id))?;
    let body = serde_json::to_string_pretty(&export)
        .map_err(|e| ApiError::Internal(e.to_string()))?;

    Ok((
        [
            (header::CONTENT_TYPE, "application/json".to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename={}", export.filename()),
            ),
        ],
        body,
    )
        .into_response())
}

// ── Health ──

pub async fn health(State(state): State<AppState>) -> Response {
    let db_ok = state.service.ping();
    let status = if db_ok { "healthy" } else { "degraded" };
    let code = if db_ok {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        code,
        Json(json!({
            "status": status,
            "components": {
                "database": if db_ok { "ok" } else { "error" },
                "assistant": if state.assistant.is_configured() { "configured" } else { "fallback" },
            },
        })),
    )
        .into_response()
}
