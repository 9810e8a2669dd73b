use axum::extract::{Json, Path, State};
use reqwest::{Client, RequestBuilder, Url};
use serde::{Deserialize, Serialize};

use common::crypto::EncryptedBlob;
use common::ledger::Ledger;

use super::{stream_url, Caller, StreamsError, ACCOUNT_HEADER};
use crate::http_server::api::client::ApiRequest;
use crate::ServiceState;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OfferRequest {
    #[serde(skip)]
    pub key: String,
    #[serde(skip)]
    pub caller: String,
    /// The sealed offer, or `None` to stop streaming
    pub offer: Option<EncryptedBlob>,
    pub is_new: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OfferResponse {
    /// The record generation after the write
    pub generation: u64,
}

pub async fn handler(
    State(state): State<ServiceState>,
    Path(key): Path<String>,
    Caller(caller): Caller,
    Json(req): Json<OfferRequest>,
) -> Result<Json<OfferResponse>, StreamsError> {
    let withdraw = req.offer.is_none();
    let generation = state
        .ledger()
        .offer(&caller, &key, req.offer, req.is_new)
        .await?;
    tracing::info!(
        stream_key = %key,
        caller = %caller,
        generation,
        withdraw,
        "offer written"
    );
    Ok(Json(OfferResponse { generation }))
}

impl ApiRequest for OfferRequest {
    type Response = OfferResponse;

    fn build_request(self, base_url: &Url, client: &Client) -> RequestBuilder {
        client
            .post(stream_url(base_url, &self.key, Some("offer")))
            .header(ACCOUNT_HEADER, self.caller.as_str())
            .json(&self)
    }
}
