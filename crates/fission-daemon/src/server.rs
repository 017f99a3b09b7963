//! HTTP surface.
//!
//! Every non-data response carries the `{"status", "message"}` envelope.
//! Successes read `{"status": "ok", "message": "succeed."}`; failures carry
//! `error=<detail>!` in the message.

use std::sync::Arc;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};

use crate::handlers::{accrual, history, intake};
use crate::AppState;

/// Message for bodies that are not valid JSON of the expected shape.
pub const INVALID_PAYLOAD: &str = "Invalid Request Payload";

/// Message for intake on a uid that already has a record.
pub const UID_EXISTS: &str = "UID Exists";

/// Response envelope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    pub status: String,
    pub message: String,
}

impl Envelope {
    pub fn ok() -> Self {
        Self {
            status: "ok".to_string(),
            message: "succeed.".to_string(),
        }
    }

    pub fn error(detail: impl std::fmt::Display) -> Self {
        Self {
            status: "error".to_string(),
            message: format!("error={detail}!"),
        }
    }
}

/// Errors surfaced to HTTP callers.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{0}")]
    Unauthenticated(String),

    #[error("{0}")]
    InvalidPayload(String),

    #[error("{0}")]
    AlreadyExists(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Internal(String),
}

impl ApiError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Unauthenticated(_) => StatusCode::UNAUTHORIZED,
            Self::InvalidPayload(_) => StatusCode::BAD_REQUEST,
            Self::AlreadyExists(_) => StatusCode::CONFLICT,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status_code(), Json(Envelope::error(&self))).into_response()
    }
}

/// Build the HTTP router.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/referral", post(intake::create_referral))
        .route("/triggers/referral_records", post(accrual::on_referral_change))
        .route("/bonus_history/{uid}", get(history::get_bonus_history))
        .route("/healthz", get(healthz))
        .with_state(state)
}

async fn healthz() -> Json<Envelope> {
    Json(Envelope::ok())
}
