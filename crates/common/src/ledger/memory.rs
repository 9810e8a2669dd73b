use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use super::provider::{AnswerEntry, AnswerSubmission, Ledger, LedgerError, SignalingRecord};
use crate::crypto::EncryptedBlob;

/// In-memory ledger enforcing the signaling contract
#[derive(Debug, Clone)]
pub struct MemoryLedger {
    inner: Arc<RwLock<MemoryLedgerInner>>,
}

#[derive(Debug, Default)]
struct MemoryLedgerInner {
    /// stream key -> record
    streams: HashMap<String, SignalingRecord>,
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum MemoryLedgerError {
    #[error("memory ledger error: {0}")]
    Internal(String),
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RwLock::new(MemoryLedgerInner::default())),
        }
    }

    /// Number of stream records held
    pub fn len(&self) -> usize {
        self.inner.read().map(|inner| inner.streams.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for MemoryLedger {
    fn default() -> Self {
        Self::new()
    }
}

fn rejected(reason: &str) -> LedgerError<MemoryLedgerError> {
    LedgerError::Rejected(reason.to_string())
}

fn lock_error(e: impl std::fmt::Display) -> LedgerError<MemoryLedgerError> {
    LedgerError::Provider(MemoryLedgerError::Internal(format!(
        "failed to acquire lock: {}",
        e
    )))
}

#[async_trait]
impl Ledger for MemoryLedger {
    type Error = MemoryLedgerError;

    async fn get(&self, key: &str) -> Result<Option<SignalingRecord>, LedgerError<Self::Error>> {
        let inner = self.inner.read().map_err(lock_error)?;
        Ok(inner.streams.get(key).cloned())
    }

    async fn offer(
        &self,
        caller: &str,
        key: &str,
        offer: Option<EncryptedBlob>,
        is_new: bool,
    ) -> Result<u64, LedgerError<Self::Error>> {
        let mut inner = self.inner.write().map_err(lock_error)?;

        if is_new {
            let generation = match inner.streams.get(key) {
                Some(prev) if prev.owner_id != caller => {
                    return Err(rejected("This streaming key is owned by another account"));
                }
                Some(prev) => prev.generation + 1,
                None => 1,
            };
            inner.streams.insert(
                key.to_string(),
                SignalingRecord {
                    owner_id: caller.to_string(),
                    offer,
                    generation,
                    answer: None,
                    restreams: vec![],
                },
            );
            return Ok(generation);
        }

        let record = inner
            .streams
            .get_mut(key)
            .ok_or_else(|| rejected("Stream not found"))?;
        if record.owner_id != caller {
            return Err(rejected("This streaming key is owned by another account"));
        }
        record.offer = offer;
        record.generation += 1;
        Ok(record.generation)
    }

    async fn answer(
        &self,
        caller: &str,
        key: &str,
        submission: AnswerSubmission,
        is_new: bool,
    ) -> Result<(), LedgerError<Self::Error>> {
        let mut inner = self.inner.write().map_err(lock_error)?;
        let record = inner
            .streams
            .get_mut(key)
            .ok_or_else(|| rejected("Stream not found"))?;

        if record.offer.as_ref() != Some(&submission.offer) {
            return Err(rejected("Current offer is different"));
        }
        if record.generation != submission.generation {
            return Err(rejected("Offer generation is stale"));
        }
        if is_new {
            if record.answer.is_some() {
                return Err(rejected("Answer already present"));
            }
        } else {
            let old_answer = record
                .answer
                .as_ref()
                .ok_or_else(|| rejected("Expected old answer"))?;
            if old_answer.account_id != caller {
                return Err(rejected("Old answer is from the different owner"));
            }
        }
        if record.owner_id == caller {
            return Err(rejected("Can't answer your own offer"));
        }

        record.answer = Some(submission.into_entry(caller.to_string()));
        Ok(())
    }

    async fn take_answer(
        &self,
        caller: &str,
        key: &str,
        answer: AnswerEntry,
    ) -> Result<(), LedgerError<Self::Error>> {
        let mut inner = self.inner.write().map_err(lock_error)?;
        let record = inner
            .streams
            .get_mut(key)
            .ok_or_else(|| rejected("Stream not found"))?;

        if record.owner_id != caller {
            return Err(rejected("This streaming key is owned by another account"));
        }
        if record.answer.as_ref() != Some(&answer) {
            return Err(rejected("The answer has changed"));
        }

        record.restreams.push(answer.restream_key);
        record.answer = None;
        record.offer = None;
        record.generation += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn blob(text: &str) -> EncryptedBlob {
        EncryptedBlob::from(text.to_string())
    }

    fn submission(offer: &str, generation: u64) -> AnswerSubmission {
        AnswerSubmission {
            stream: blob("answer"),
            offer: blob(offer),
            generation,
            restream_key: blob("restream"),
        }
    }

    #[tokio::test]
    async fn test_new_offer_creates_record() {
        let ledger = MemoryLedger::new();
        let generation = ledger
            .offer("alice", "key", Some(blob("offer-1")), true)
            .await
            .unwrap();
        assert_eq!(generation, 1);

        let record = ledger.get("key").await.unwrap().unwrap();
        assert_eq!(record.owner_id, "alice");
        assert_eq!(record.offer, Some(blob("offer-1")));
        assert!(record.answer.is_none());
        assert!(ledger.get("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_offer_owned_by_another_account() {
        let ledger = MemoryLedger::new();
        ledger
            .offer("alice", "key", Some(blob("offer-1")), true)
            .await
            .unwrap();

        let result = ledger.offer("mallory", "key", Some(blob("x")), true).await;
        assert!(matches!(result, Err(LedgerError::Rejected(_))));
        let result = ledger.offer("mallory", "key", Some(blob("x")), false).await;
        assert!(matches!(result, Err(LedgerError::Rejected(_))));

        // untouched
        let record = ledger.get("key").await.unwrap().unwrap();
        assert_eq!(record.offer, Some(blob("offer-1")));
    }

    #[tokio::test]
    async fn test_update_offer_requires_record() {
        let ledger = MemoryLedger::new();
        let result = ledger.offer("alice", "key", Some(blob("o")), false).await;
        assert!(matches!(result, Err(LedgerError::Rejected(_))));
    }

    #[tokio::test]
    async fn test_every_offer_write_bumps_generation() {
        let ledger = MemoryLedger::new();
        ledger.offer("alice", "key", Some(blob("a")), true).await.unwrap();
        let second = ledger
            .offer("alice", "key", Some(blob("b")), false)
            .await
            .unwrap();
        let third = ledger.offer("alice", "key", None, true).await.unwrap();
        assert_eq!(second, 2);
        assert_eq!(third, 3);
        assert!(ledger.get("key").await.unwrap().unwrap().offer.is_none());
    }

    #[tokio::test]
    async fn test_first_answer_wins() {
        let ledger = MemoryLedger::new();
        ledger.offer("alice", "key", Some(blob("o")), true).await.unwrap();

        ledger
            .answer("bob", "key", submission("o", 1), true)
            .await
            .unwrap();
        let result = ledger.answer("carol", "key", submission("o", 1), true).await;
        assert_eq!(result, Err(rejected("Answer already present")));

        // carol cannot pretend to refresh bob's answer either
        let result = ledger.answer("carol", "key", submission("o", 1), false).await;
        assert!(matches!(result, Err(LedgerError::Rejected(_))));

        // bob can refresh his own
        ledger
            .answer("bob", "key", submission("o", 1), false)
            .await
            .unwrap();
        let record = ledger.get("key").await.unwrap().unwrap();
        assert_eq!(record.answer.unwrap().account_id, "bob");
    }

    #[tokio::test]
    async fn test_answer_must_echo_current_offer() {
        let ledger = MemoryLedger::new();
        ledger.offer("alice", "key", Some(blob("o")), true).await.unwrap();

        let result = ledger.answer("bob", "key", submission("stale", 1), true).await;
        assert_eq!(result, Err(rejected("Current offer is different")));
        let result = ledger.answer("bob", "key", submission("o", 7), true).await;
        assert_eq!(result, Err(rejected("Offer generation is stale")));
        let result = ledger.answer("alice", "key", submission("o", 1), true).await;
        assert_eq!(result, Err(rejected("Can't answer your own offer")));
    }

    #[tokio::test]
    async fn test_take_answer_frees_slot() {
        let ledger = MemoryLedger::new();
        ledger.offer("alice", "key", Some(blob("o")), true).await.unwrap();
        ledger
            .answer("bob", "key", submission("o", 1), true)
            .await
            .unwrap();
        let answer = ledger.get("key").await.unwrap().unwrap().answer.unwrap();

        let result = ledger.take_answer("bob", "key", answer.clone()).await;
        assert!(matches!(result, Err(LedgerError::Rejected(_))));

        let mut changed = answer.clone();
        changed.stream = blob("other");
        let result = ledger.take_answer("alice", "key", changed).await;
        assert_eq!(result, Err(rejected("The answer has changed")));

        ledger.take_answer("alice", "key", answer).await.unwrap();
        let record = ledger.get("key").await.unwrap().unwrap();
        assert!(record.answer.is_none());
        assert!(record.offer.is_none());
        assert_eq!(record.restreams, vec![blob("restream")]);
        assert_eq!(record.generation, 2);
    }
}
