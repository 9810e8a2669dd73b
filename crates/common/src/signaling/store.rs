use crate::crypto::EncryptedBlob;
use crate::ledger::{AccountId, AnswerEntry, AnswerSubmission, Ledger, LedgerError, SignalingRecord};

use super::SignalingError;

/// Typed access to stream records on the ledger, acting as one account
///
/// Every call is a single attempt. Retry policy belongs to the publishers and
///  the poller.
#[derive(Debug, Clone)]
pub struct SignalingStore<L: Ledger> {
    ledger: L,
    account: AccountId,
}

fn convert<E: std::fmt::Display>(e: LedgerError<E>) -> SignalingError {
    match e {
        LedgerError::Rejected(reason) => SignalingError::ContractRejected(reason),
        LedgerError::Provider(e) => SignalingError::NetworkFailure(e.to_string()),
    }
}

impl<L: Ledger> SignalingStore<L> {
    pub fn new(ledger: L, account: impl Into<AccountId>) -> Self {
        Self {
            ledger,
            account: account.into(),
        }
    }

    /// The account this store writes as
    pub fn account(&self) -> &str {
        &self.account
    }

    pub fn ledger(&self) -> &L {
        &self.ledger
    }

    pub async fn read(&self, stream_key: &str) -> Result<Option<SignalingRecord>, SignalingError> {
        self.ledger.get(stream_key).await.map_err(convert)
    }

    /// Write our sealed offer, returning the record generation it landed at
    pub async fn publish_offer(
        &self,
        stream_key: &str,
        offer: EncryptedBlob,
        is_new: bool,
    ) -> Result<u64, SignalingError> {
        self.ledger
            .offer(&self.account, stream_key, Some(offer), is_new)
            .await
            .map_err(convert)
    }

    /// Withdraw our offer and reset the record so the mailbox is free
    pub async fn clear_offer(&self, stream_key: &str) -> Result<u64, SignalingError> {
        self.ledger
            .offer(&self.account, stream_key, None, true)
            .await
            .map_err(convert)
    }

    pub async fn publish_answer(
        &self,
        stream_key: &str,
        submission: AnswerSubmission,
        is_new: bool,
    ) -> Result<(), SignalingError> {
        self.ledger
            .answer(&self.account, stream_key, submission, is_new)
            .await
            .map_err(convert)
    }

    /// Acknowledge an accepted answer and clear the slot
    pub async fn consume_answer(
        &self,
        stream_key: &str,
        answer: &AnswerEntry,
    ) -> Result<(), SignalingError> {
        self.ledger
            .take_answer(&self.account, stream_key, answer.clone())
            .await
            .map_err(convert)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::ledger::MemoryLedger;

    #[tokio::test]
    async fn test_rejections_surface_as_contract_rejected() {
        let ledger = MemoryLedger::new();
        let alice = SignalingStore::new(ledger.clone(), "alice");
        let mallory = SignalingStore::new(ledger, "mallory");

        alice
            .publish_offer("key", EncryptedBlob::from("o".to_string()), true)
            .await
            .unwrap();
        let result = mallory
            .publish_offer("key", EncryptedBlob::from("x".to_string()), true)
            .await;
        assert!(matches!(result, Err(SignalingError::ContractRejected(_))));
    }

    #[tokio::test]
    async fn test_clear_offer_frees_the_mailbox() {
        let store = SignalingStore::new(MemoryLedger::new(), "alice");
        store
            .publish_offer("key", EncryptedBlob::from("o".to_string()), true)
            .await
            .unwrap();
        store.clear_offer("key").await.unwrap();

        let record = store.read("key").await.unwrap().unwrap();
        assert!(record.offer.is_none());
        assert!(record.answer.is_none());
    }
}
