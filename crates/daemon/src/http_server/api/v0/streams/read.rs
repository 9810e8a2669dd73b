use axum::extract::{Json, Path, State};
use reqwest::{Client, RequestBuilder, Url};
use serde::{Deserialize, Serialize};

use common::ledger::{Ledger, SignalingRecord};

use super::{stream_url, StreamsError};
use crate::http_server::api::client::ApiRequest;
use crate::ServiceState;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetRequest {
    pub key: String,
}

/// `null` when no record exists under the key
pub type GetResponse = Option<SignalingRecord>;

pub async fn handler(
    State(state): State<ServiceState>,
    Path(key): Path<String>,
) -> Result<Json<GetResponse>, StreamsError> {
    let record = state.ledger().get(&key).await?;
    Ok(Json(record))
}

impl ApiRequest for GetRequest {
    type Response = GetResponse;

    fn build_request(self, base_url: &Url, client: &Client) -> RequestBuilder {
        client.get(stream_url(base_url, &self.key, None))
    }
}
