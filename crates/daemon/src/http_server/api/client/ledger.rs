use async_trait::async_trait;

use common::crypto::EncryptedBlob;
use common::ledger::{AnswerEntry, AnswerSubmission, Ledger, LedgerError, SignalingRecord};

use super::{ApiClient, ApiError};
use crate::http_server::api::v0::streams::answer::AnswerRequest;
use crate::http_server::api::v0::streams::offer::OfferRequest;
use crate::http_server::api::v0::streams::read::GetRequest;
use crate::http_server::api::v0::streams::take_answer::TakeAnswerRequest;

/// A `Ledger` reached over the ledger service's HTTP API
///
/// `409 Conflict` maps to `LedgerError::Rejected`; every other failure is a
///  provider error, which the signaling loops treat as a network failure and
///  retry.
#[derive(Debug, Clone)]
pub struct HttpLedger {
    client: ApiClient,
}

impl HttpLedger {
    pub fn new(client: ApiClient) -> Self {
        Self { client }
    }

    pub fn client(&self) -> &ApiClient {
        &self.client
    }
}

fn convert(e: ApiError) -> LedgerError<ApiError> {
    match e {
        ApiError::HttpStatus(status, reason) if status == reqwest::StatusCode::CONFLICT => {
            LedgerError::Rejected(reason)
        }
        e => LedgerError::Provider(e),
    }
}

#[async_trait]
impl Ledger for HttpLedger {
    type Error = ApiError;

    async fn get(&self, key: &str) -> Result<Option<SignalingRecord>, LedgerError<Self::Error>> {
        self.client
            .call(GetRequest {
                key: key.to_string(),
            })
            .await
            .map_err(convert)
    }

    async fn offer(
        &self,
        caller: &str,
        key: &str,
        offer: Option<EncryptedBlob>,
        is_new: bool,
    ) -> Result<u64, LedgerError<Self::Error>> {
        let response = self
            .client
            .call(OfferRequest {
                key: key.to_string(),
                caller: caller.to_string(),
                offer,
                is_new,
            })
            .await
            .map_err(convert)?;
        Ok(response.generation)
    }

    async fn answer(
        &self,
        caller: &str,
        key: &str,
        submission: AnswerSubmission,
        is_new: bool,
    ) -> Result<(), LedgerError<Self::Error>> {
        self.client
            .call(AnswerRequest {
                key: key.to_string(),
                caller: caller.to_string(),
                submission,
                is_new,
            })
            .await
            .map(|_| ())
            .map_err(convert)
    }

    async fn take_answer(
        &self,
        caller: &str,
        key: &str,
        answer: AnswerEntry,
    ) -> Result<(), LedgerError<Self::Error>> {
        self.client
            .call(TakeAnswerRequest {
                key: key.to_string(),
                caller: caller.to_string(),
                answer,
            })
            .await
            .map(|_| ())
            .map_err(convert)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_conflicts_are_rejections() {
        let rejected = convert(ApiError::HttpStatus(
            reqwest::StatusCode::CONFLICT,
            "slot taken".to_string(),
        ));
        assert!(matches!(rejected, LedgerError::Rejected(reason) if reason == "slot taken"));

        let failed = convert(ApiError::HttpStatus(
            reqwest::StatusCode::BAD_GATEWAY,
            String::new(),
        ));
        assert!(matches!(failed, LedgerError::Provider(_)));
    }
}
