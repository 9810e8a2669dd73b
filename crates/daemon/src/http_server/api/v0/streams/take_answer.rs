use axum::extract::{Json, Path, State};
use reqwest::{Client, RequestBuilder, Url};
use serde::{Deserialize, Serialize};

use common::ledger::{AnswerEntry, Ledger};

use super::{stream_url, Caller, StreamsError, ACCOUNT_HEADER};
use crate::http_server::api::client::ApiRequest;
use crate::ServiceState;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TakeAnswerRequest {
    #[serde(skip)]
    pub key: String,
    #[serde(skip)]
    pub caller: String,
    /// Exactly the answer found in the slot
    pub answer: AnswerEntry,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TakeAnswerResponse {}

pub async fn handler(
    State(state): State<ServiceState>,
    Path(key): Path<String>,
    Caller(caller): Caller,
    Json(req): Json<TakeAnswerRequest>,
) -> Result<Json<TakeAnswerResponse>, StreamsError> {
    let viewer = req.answer.account_id.clone();
    state.ledger().take_answer(&caller, &key, req.answer).await?;
    tracing::info!(stream_key = %key, viewer = %viewer, "answer taken");
    Ok(Json(TakeAnswerResponse::default()))
}

impl ApiRequest for TakeAnswerRequest {
    type Response = TakeAnswerResponse;

    fn build_request(self, base_url: &Url, client: &Client) -> RequestBuilder {
        client
            .post(stream_url(base_url, &self.key, Some("take_answer")))
            .header(ACCOUNT_HEADER, self.caller.as_str())
            .json(&self)
    }
}
