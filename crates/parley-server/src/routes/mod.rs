// Export route modules
pub mod chat;
pub mod health;
pub mod reply;
pub mod threads;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json, Router,
};
use parley::errors::{RunError, StoreError};
use serde_json::json;

use crate::state::AppState;

// Function to configure all routes
pub fn configure(state: AppState) -> Router {
    Router::new()
        .merge(reply::routes(state.clone()))
        .merge(threads::routes(state.clone()))
        .merge(chat::routes(state))
        .merge(health::routes())
}

/// A failed agent call rendered as `{"error": ...}` with a matching status
#[derive(Debug)]
pub struct ApiError(pub RunError);

impl From<RunError> for ApiError {
    fn from(err: RunError) -> Self {
        Self(err)
    }
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match &self.0 {
            RunError::NoPendingInterrupt(_)
            | RunError::InterruptPending(_)
            | RunError::ThreadBusy(_) => StatusCode::CONFLICT,
            RunError::Store(StoreError::InvalidThreadId(_)) => StatusCode::BAD_REQUEST,
            RunError::Model(_) | RunError::Knowledge(_) => StatusCode::BAD_GATEWAY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!("Request failed: {}", self.0);
        }
        (status, Json(json!({ "error": self.0.to_string() }))).into_response()
    }
}
