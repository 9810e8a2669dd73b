use axum::extract::State;
use axum::response::{IntoResponse, Response};
use axum::Json;
use http::StatusCode;

use crate::ServiceState;

/// The process is up and its ledger answers reads
#[tracing::instrument(skip(state))]
pub async fn handler(State(state): State<ServiceState>) -> Response {
    let msg = serde_json::json!({
        "status": "ok",
        "streams": state.ledger().len(),
    });
    (StatusCode::OK, Json(msg)).into_response()
}
