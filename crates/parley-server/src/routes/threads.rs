use crate::routes::ApiError;
use crate::state::AppState;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use parley::models::thread::ThreadSummary;
use serde_json::json;

async fn list_threads(State(state): State<AppState>) -> Result<Json<Vec<ThreadSummary>>, ApiError> {
    Ok(Json(state.agent.threads().await?))
}

fn not_found(thread_id: &str) -> Response {
    (
        StatusCode::NOT_FOUND,
        Json(json!({ "error": format!("Thread {} not found", thread_id) })),
    )
        .into_response()
}

async fn get_thread(
    State(state): State<AppState>,
    Path(thread_id): Path<String>,
) -> Result<Response, ApiError> {
    Ok(match state.agent.thread(&thread_id).await? {
        Some(thread) => Json(thread).into_response(),
        None => not_found(&thread_id),
    })
}

/// Drops the thread along with any pending interrupt
async fn cancel_thread(
    State(state): State<AppState>,
    Path(thread_id): Path<String>,
) -> Result<Response, ApiError> {
    Ok(if state.agent.cancel(&thread_id).await? {
        StatusCode::NO_CONTENT.into_response()
    } else {
        not_found(&thread_id)
    })
}

pub fn routes(state: AppState) -> Router {
    Router::new()
        .route("/threads", get(list_threads))
        .route("/threads/:id", get(get_thread).delete(cancel_thread))
        .with_state(state)
}
