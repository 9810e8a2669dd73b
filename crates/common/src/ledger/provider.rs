use std::fmt::{Debug, Display};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::crypto::EncryptedBlob;

/// Identity of a ledger account, as reported by the ledger for each caller
pub type AccountId = String;

/// A viewer's answer sitting in a stream's single answer slot
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnswerEntry {
    pub account_id: AccountId,
    /// The sealed session answer
    pub stream: EncryptedBlob,
    /// Echo of the sealed offer this answer responds to
    pub offer: EncryptedBlob,
    /// Echo of the record generation this answer responds to
    pub generation: u64,
    /// The viewer's own stream secret, sealed for the broadcaster
    pub restream_key: EncryptedBlob,
}

/// What a viewer submits through `answer`; the ledger stamps the caller
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnswerSubmission {
    pub stream: EncryptedBlob,
    pub offer: EncryptedBlob,
    pub generation: u64,
    pub restream_key: EncryptedBlob,
}

impl AnswerSubmission {
    pub fn into_entry(self, account_id: AccountId) -> AnswerEntry {
        AnswerEntry {
            account_id,
            stream: self.stream,
            offer: self.offer,
            generation: self.generation,
            restream_key: self.restream_key,
        }
    }
}

/// The ledger record of one stream, addressed by the stream's public key
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignalingRecord {
    pub owner_id: AccountId,
    pub offer: Option<EncryptedBlob>,
    /// Bumped by the ledger on every offer write and every consumed answer
    pub generation: u64,
    pub answer: Option<AnswerEntry>,
    /// Restream keys of every answer the owner has consumed
    #[serde(default)]
    pub restreams: Vec<EncryptedBlob>,
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum LedgerError<T> {
    /// The ledger could not be reached or failed internally
    #[error("unhandled ledger provider error: {0}")]
    Provider(#[from] T),
    /// A contract precondition failed; the call had no effect
    #[error("contract rejected call: {0}")]
    Rejected(String),
}

/// The contract surface of the signaling ledger
///
/// One view method and three change methods over records keyed by a stream
///  key. Change methods are atomic: either every precondition holds and the
///  write lands, or the call fails with `LedgerError::Rejected` and nothing
///  changes.
#[async_trait]
pub trait Ledger: Send + Sync + Debug + Clone + 'static {
    type Error: Display + Debug + Send + Sync + 'static;

    /// Read a stream's record
    ///
    /// # Returns
    /// * `Ok(None)` - No record exists under `key`
    async fn get(&self, key: &str) -> Result<Option<SignalingRecord>, LedgerError<Self::Error>>;

    /// Write (or withdraw, with `None`) the owner's offer
    ///
    /// # Arguments
    /// * `caller` - The account making the call
    /// * `key` - The stream key
    /// * `offer` - The sealed offer, or `None` to stop streaming
    /// * `is_new` - Replace the whole record instead of just the offer
    ///
    /// Should fail with `Rejected` when the record belongs to another
    ///  account, or when `is_new` is false and no record exists.
    ///
    /// # Returns
    /// * `Ok(u64)` - The record generation after the write
    async fn offer(
        &self,
        caller: &str,
        key: &str,
        offer: Option<EncryptedBlob>,
        is_new: bool,
    ) -> Result<u64, LedgerError<Self::Error>>;

    /// Claim (or refresh) the answer slot
    ///
    /// Should fail with `Rejected` when the echoed offer or generation is not
    ///  current, when `is_new` is true and the slot is taken, when `is_new`
    ///  is false and the slot holds another account's answer, or when the
    ///  owner answers its own offer.
    async fn answer(
        &self,
        caller: &str,
        key: &str,
        submission: AnswerSubmission,
        is_new: bool,
    ) -> Result<(), LedgerError<Self::Error>>;

    /// Consume the answer in the slot, freeing it for the next viewer
    ///
    /// Owner only. Should fail with `Rejected` when the slot no longer holds
    ///  exactly `answer`.
    async fn take_answer(
        &self,
        caller: &str,
        key: &str,
        answer: AnswerEntry,
    ) -> Result<(), LedgerError<Self::Error>>;
}
