use std::time::Duration;

use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, error};

use crate::{
    error::{VaultError, MAX_TTL},
    AppState,
};

// ── Errors ────────────────────────────────────────────────────────────────────

impl IntoResponse for VaultError {
    fn into_response(self) -> Response {
        let status = match &self {
            VaultError::NotFound => StatusCode::NOT_FOUND,
            e if e.is_client_fault() => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };

        match &self {
            VaultError::Store { source, .. } => {
                error!(error = %self, cause = %format!("{source:#}"), "store failure");
            }
            VaultError::Encryption(detail)
            | VaultError::DecryptionFailed(detail)
            | VaultError::IdGeneration(detail) => {
                error!(error = %self, detail = %detail, "crypto failure");
            }
            _ if status.is_server_error() => error!(error = %self, "internal error"),
            _ => debug!(error = %self, "rejected request"),
        }

        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

fn bad_body(rejection: JsonRejection) -> Response {
    debug!(error = %rejection, "invalid request body");
    (
        StatusCode::BAD_REQUEST,
        Json(json!({"error": "invalid request body"})),
    )
        .into_response()
}

// ── Health ────────────────────────────────────────────────────────────────────

pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    Json(json!({"status": "ok", "service": &*state.service}))
}

// ── Create ────────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct CreateRequest {
    #[serde(default)]
    pub text: String,
    /// Lifetime in seconds; absent or zero keeps the entry until it is read.
    pub ttl: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct CreateResponse {
    pub id: String,
}

fn ttl_from_secs(ttl: Option<i64>) -> Result<Option<Duration>, VaultError> {
    match ttl {
        None | Some(0) => Ok(None),
        Some(secs) if secs < 0 => Err(VaultError::InvalidTtl(secs)),
        Some(secs) if secs as u64 > MAX_TTL.as_secs() => {
            Err(VaultError::TtlTooLong(secs as u64))
        }
        Some(secs) => Ok(Some(Duration::from_secs(secs as u64))),
    }
}

pub async fn create_text(
    State(state): State<AppState>,
    body: Result<Json<CreateRequest>, JsonRejection>,
) -> Response {
    let Json(body) = match body {
        Ok(body) => body,
        Err(rejection) => return bad_body(rejection),
    };

    let ttl = match ttl_from_secs(body.ttl) {
        Ok(ttl) => ttl,
        Err(e) => return e.into_response(),
    };

    match state.vault.create(&body.text, ttl).await {
        Ok(id) => (StatusCode::CREATED, Json(CreateResponse { id })).into_response(),
        Err(e) => e.into_response(),
    }
}

// ── Get ───────────────────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
pub struct TextResponse {
    pub id: String,
    pub value: String,
}

pub async fn get_text(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    match state.vault.take(&id).await {
        Ok(value) => Json(TextResponse { id, value }).into_response(),
        Err(e) => e.into_response(),
    }
}

/// `GET /text/` with no id segment.
pub async fn missing_id() -> Response {
    VaultError::MissingId.into_response()
}
