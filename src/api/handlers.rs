use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response as HttpResponse},
    Json,
};
use serde::Deserialize;
use serde_json::{Map, Value};

use super::AppState;
use crate::backend::{Operation, Request, Response, Secret};
use crate::errors::BackendError;

#[derive(Debug, Default, Deserialize)]
pub struct ReadParams {
    #[serde(default)]
    pub list: bool,
}

fn respond(resp: Option<Response>) -> HttpResponse {
    match resp {
        Some(resp) => Json(resp).into_response(),
        None => StatusCode::NO_CONTENT.into_response(),
    }
}

fn parse_body(body: &Bytes) -> Result<Map<String, Value>, BackendError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(Map::new());
    }
    match serde_json::from_slice(body) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(_) => Err(BackendError::validation("request body must be a JSON object")),
        Err(e) => Err(BackendError::validation(format!("invalid JSON body: {}", e))),
    }
}

// ── Backend paths ───────────────────────────────────────────

pub async fn read_path(
    State(state): State<Arc<AppState>>,
    Path(path): Path<String>,
    Query(params): Query<ReadParams>,
) -> Result<HttpResponse, BackendError> {
    let operation = if params.list { Operation::List } else { Operation::Read };
    match state.backend.handle_request(Request::new(operation, path.clone())).await? {
        Some(resp) => Ok(Json(resp).into_response()),
        None => Err(BackendError::NotFound(format!("no record at '{}'", path))),
    }
}

pub async fn write_path(
    State(state): State<Arc<AppState>>,
    Path(path): Path<String>,
    body: Bytes,
) -> Result<HttpResponse, BackendError> {
    let data = parse_body(&body)?;
    let operation = if state.backend.existence_check(&path).await? {
        Operation::Update
    } else {
        Operation::Create
    };

    let mut req = Request::new(operation, path);
    req.data = data;
    Ok(respond(state.backend.handle_request(req).await?))
}

pub async fn delete_path(
    State(state): State<Arc<AppState>>,
    Path(path): Path<String>,
) -> Result<HttpResponse, BackendError> {
    let req = Request::new(Operation::Delete, path);
    Ok(respond(state.backend.handle_request(req).await?))
}

// ── Leases ──────────────────────────────────────────────────

pub async fn renew_lease(
    State(state): State<Arc<AppState>>,
    Json(secret): Json<Secret>,
) -> Result<Json<Secret>, BackendError> {
    Ok(Json(state.backend.renew(&secret).await?))
}

pub async fn revoke_lease(
    State(state): State<Arc<AppState>>,
    Json(secret): Json<Secret>,
) -> Result<StatusCode, BackendError> {
    state.backend.revoke(&secret).await?;
    Ok(StatusCode::NO_CONTENT)
}
