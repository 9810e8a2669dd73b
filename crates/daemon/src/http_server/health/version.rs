use axum::response::{IntoResponse, Response};
use axum::Json;
use http::StatusCode;

use common::build_info;

#[tracing::instrument]
pub async fn handler() -> Response {
    (StatusCode::OK, Json(build_info!())).into_response()
}
