//! Catch-all handler: axum request -> dispatcher request, run on its own task.

use crate::dispatch::DispatchRequest;
use crate::error::AppError;
use crate::state::AppState;
use axum::{
    body::Bytes,
    extract::{Query, State},
    http::{HeaderMap, Method, Uri},
    response::{IntoResponse, Response},
};
use tokio_util::sync::CancellationToken;

/// The dispatch task outlives a disconnected client; dropping this future cancels its
/// token so no write is issued after the client is gone.
pub async fn dispatch(
    State(state): State<AppState>,
    method: Method,
    uri: Uri,
    Query(query): Query<Vec<(String, String)>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let cancel = CancellationToken::new();
    let guard = cancel.clone().drop_guard();
    let req = DispatchRequest {
        method,
        path: uri.path().to_string(),
        query,
        headers,
        body,
        cancel,
    };
    let dispatcher = state.dispatcher.clone();
    let result = tokio::spawn(async move { dispatcher.dispatch(req).await }).await;
    guard.disarm();
    match result {
        Ok(response) => response.into_response(),
        Err(e) => AppError::Internal(format!("dispatch task failed: {}", e)).into_response(),
    }
}
