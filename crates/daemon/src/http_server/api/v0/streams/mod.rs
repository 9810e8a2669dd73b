//! Stream records of the signaling ledger
//!
//! One route per contract method. The calling account travels in the
//!  `x-account-id` header; contract rejections answer `409 Conflict` with the
//!  reason as the body.

use axum::extract::FromRequestParts;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::Router;
use http::request::Parts;
use http::StatusCode;
use url::Url;

use common::ledger::{LedgerError, MemoryLedgerError};

pub mod answer;
pub mod offer;
pub mod read;
pub mod take_answer;

use crate::ServiceState;

/// Header naming the account a ledger call is made as
pub const ACCOUNT_HEADER: &str = "x-account-id";

pub fn router(state: ServiceState) -> Router<ServiceState> {
    Router::new()
        .route("/:key", get(read::handler))
        .route("/:key/offer", post(offer::handler))
        .route("/:key/answer", post(answer::handler))
        .route("/:key/take_answer", post(take_answer::handler))
        .with_state(state)
}

/// `/api/v0/streams/<key>[/<action>]`, with the key percent-encoded
pub(crate) fn stream_url(base_url: &Url, key: &str, action: Option<&str>) -> Url {
    let mut url = base_url.clone();
    url.set_query(None);
    if let Ok(mut segments) = url.path_segments_mut() {
        segments.clear().extend(["api", "v0", "streams"]).push(key);
        if let Some(action) = action {
            segments.push(action);
        }
    }
    url
}

/// The account a request acts as
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Caller(pub String);

#[axum::async_trait]
impl<S> FromRequestParts<S> for Caller
where
    S: Send + Sync,
{
    type Rejection = StreamsError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .headers
            .get(ACCOUNT_HEADER)
            .and_then(|value| value.to_str().ok())
            .filter(|account| !account.is_empty())
            .map(|account| Caller(account.to_string()))
            .ok_or(StreamsError::MissingCaller)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StreamsError {
    #[error("missing {ACCOUNT_HEADER} header")]
    MissingCaller,
    #[error("contract rejected call: {0}")]
    Rejected(String),
    #[error("ledger error: {0}")]
    Ledger(String),
}

impl From<LedgerError<MemoryLedgerError>> for StreamsError {
    fn from(e: LedgerError<MemoryLedgerError>) -> Self {
        match e {
            LedgerError::Rejected(reason) => StreamsError::Rejected(reason),
            LedgerError::Provider(e) => StreamsError::Ledger(e.to_string()),
        }
    }
}

impl IntoResponse for StreamsError {
    fn into_response(self) -> Response {
        match self {
            StreamsError::MissingCaller => {
                (StatusCode::BAD_REQUEST, self.to_string()).into_response()
            }
            StreamsError::Rejected(reason) => {
                tracing::debug!(reason = %reason, "contract rejected call");
                (StatusCode::CONFLICT, reason).into_response()
            }
            StreamsError::Ledger(msg) => {
                tracing::error!("ledger error: {}", msg);
                (StatusCode::INTERNAL_SERVER_ERROR, msg).into_response()
            }
        }
    }
}
