use axum::extract::{Json, Path, State};
use reqwest::{Client, RequestBuilder, Url};
use serde::{Deserialize, Serialize};

use common::ledger::{AnswerSubmission, Ledger};

use super::{stream_url, Caller, StreamsError, ACCOUNT_HEADER};
use crate::http_server::api::client::ApiRequest;
use crate::ServiceState;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnswerRequest {
    #[serde(skip)]
    pub key: String,
    #[serde(skip)]
    pub caller: String,
    pub submission: AnswerSubmission,
    /// Claim an empty slot rather than refresh our own answer
    pub is_new: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AnswerResponse {}

pub async fn handler(
    State(state): State<ServiceState>,
    Path(key): Path<String>,
    Caller(caller): Caller,
    Json(req): Json<AnswerRequest>,
) -> Result<Json<AnswerResponse>, StreamsError> {
    let generation = req.submission.generation;
    state
        .ledger()
        .answer(&caller, &key, req.submission, req.is_new)
        .await?;
    tracing::info!(
        stream_key = %key,
        caller = %caller,
        generation,
        is_new = req.is_new,
        "answer written"
    );
    Ok(Json(AnswerResponse::default()))
}

impl ApiRequest for AnswerRequest {
    type Response = AnswerResponse;

    fn build_request(self, base_url: &Url, client: &Client) -> RequestBuilder {
        client
            .post(stream_url(base_url, &self.key, Some("answer")))
            .header(ACCOUNT_HEADER, self.caller.as_str())
            .json(&self)
    }
}
