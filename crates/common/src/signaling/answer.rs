use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::crypto::{EncryptedBlob, KeyPair, SealedBox};
use crate::ledger::{AnswerSubmission, Ledger};
use crate::transport::SessionDescription;

use super::generation::Ticket;
use super::store::SignalingStore;
use super::SignalingError;

/// Handshake flags shared by every answer loop for one remote offer
#[derive(Debug, Default)]
pub struct AnswerState {
    /// At least one of our answers has landed for this offer
    published: AtomicBool,
    /// We lost the slot or the offer moved on; the handshake is over
    bad_offer: AtomicBool,
    /// Media is flowing; no further answers are needed
    playing: AtomicBool,
}

impl AnswerState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn published(&self) -> bool {
        self.published.load(Ordering::SeqCst)
    }

    pub fn is_bad_offer(&self) -> bool {
        self.bad_offer.load(Ordering::SeqCst)
    }

    pub fn is_playing(&self) -> bool {
        self.playing.load(Ordering::SeqCst)
    }

    pub fn mark_published(&self) {
        self.published.store(true, Ordering::SeqCst);
    }

    pub fn mark_bad_offer(&self) {
        self.bad_offer.store(true, Ordering::SeqCst);
    }

    pub fn mark_playing(&self) {
        self.playing.store(true, Ordering::SeqCst);
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AnswerOutcome {
    /// Our answer landed
    Published,
    /// A newer local answer took over
    Superseded,
    /// Media is already flowing, or the handshake was already abandoned
    Stopped,
    /// Another viewer holds the slot or the offer changed. Terminal for this
    ///  handshake: the caller must close the connection and not retry.
    BadOffer(String),
}

/// Viewer-side loop writing the sealed answer into a broadcaster's record
#[derive(Debug, Clone)]
pub struct AnswerPublisher<L: Ledger> {
    store: SignalingStore<L>,
    sealed: SealedBox,
    stream_key: String,
    /// The sealed offer exactly as read from the record
    offer: EncryptedBlob,
    offer_generation: u64,
    /// Our own stream secret, handed to the broadcaster for chaining
    restream_secret: String,
    state: Arc<AnswerState>,
    settle_delay: Duration,
    write_lock: Arc<tokio::sync::Mutex<()>>,
}

impl<L: Ledger> AnswerPublisher<L> {
    /// # Arguments
    /// * `remote` - The broadcaster's stream key pair, from its share URL
    /// * `offer` / `offer_generation` - The offer being answered, as read
    /// * `own` - Our own stream identity, offered for restreaming
    pub fn new(
        store: SignalingStore<L>,
        remote: &KeyPair,
        offer: EncryptedBlob,
        offer_generation: u64,
        own: &KeyPair,
        state: Arc<AnswerState>,
        settle_delay: Duration,
    ) -> Self {
        Self {
            store,
            sealed: SealedBox::for_stream(remote),
            stream_key: remote.stream_key(),
            offer,
            offer_generation,
            restream_secret: own.secret_to_base64(),
            state,
            settle_delay,
            write_lock: Arc::new(tokio::sync::Mutex::new(())),
        }
    }

    pub fn state(&self) -> &Arc<AnswerState> {
        &self.state
    }

    fn abort(&self, reason: String) -> AnswerOutcome {
        tracing::info!(stream_key = %self.stream_key, "bad offer: {}", reason);
        self.state.mark_bad_offer();
        AnswerOutcome::BadOffer(reason)
    }

    /// Check the slot before writing
    ///
    /// An answer already in the slot is only acceptable if it is ours, for
    ///  this exact offer, and we have published before.
    async fn check_slot(&self) -> Result<Option<AnswerOutcome>, SignalingError> {
        let Some(record) = self.store.read(&self.stream_key).await? else {
            return Ok(Some(self.abort("stream record is gone".to_string())));
        };
        if let Some(existing) = &record.answer {
            if existing.account_id != self.store.account() {
                return Ok(Some(self.abort(format!(
                    "slot taken by {}",
                    existing.account_id
                ))));
            }
            if existing.offer != self.offer || existing.generation != self.offer_generation {
                return Ok(Some(self.abort("answer echoes another offer".to_string())));
            }
            if !self.state.published() {
                return Ok(Some(self.abort(
                    "slot holds an answer we never published".to_string(),
                )));
            }
        }
        Ok(None)
    }

    fn submission(&self, answer: &SessionDescription) -> Result<AnswerSubmission, SignalingError> {
        Ok(AnswerSubmission {
            stream: self.sealed.seal_json(answer)?,
            offer: self.offer.clone(),
            generation: self.offer_generation,
            restream_key: self.sealed.seal(self.restream_secret.as_bytes())?,
        })
    }

    /// Publish `answer` until it lands, `ticket` goes stale, media starts
    ///  flowing, or the offer turns out to be lost
    pub async fn publish(&self, ticket: &Ticket, answer: &SessionDescription) -> AnswerOutcome {
        loop {
            tokio::time::sleep(self.settle_delay).await;
            let _guard = self.write_lock.lock().await;

            if !ticket.is_current() {
                tracing::debug!(stream_key = %self.stream_key, "answer superseded");
                return AnswerOutcome::Superseded;
            }
            if self.state.is_bad_offer() || self.state.is_playing() {
                return AnswerOutcome::Stopped;
            }

            match self.check_slot().await {
                Ok(Some(outcome)) => return outcome,
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!(stream_key = %self.stream_key, "failed to read record, retrying: {}", e);
                    continue;
                }
            }

            let submission = match self.submission(answer) {
                Ok(submission) => submission,
                Err(e) => {
                    tracing::warn!("failed to seal answer: {}", e);
                    continue;
                }
            };
            let is_new = !self.state.published();
            tracing::debug!(stream_key = %self.stream_key, is_new, "publishing answer");

            match self
                .store
                .publish_answer(&self.stream_key, submission, is_new)
                .await
            {
                Ok(()) => {
                    self.state.mark_published();
                    tracing::info!(stream_key = %self.stream_key, "answer published");
                    return AnswerOutcome::Published;
                }
                Err(SignalingError::ContractRejected(reason)) => {
                    if self.state.is_playing() {
                        return AnswerOutcome::Stopped;
                    }
                    return self.abort(reason);
                }
                Err(e) => {
                    tracing::warn!(
                        stream_key = %self.stream_key,
                        "failed to publish answer, retrying: {}",
                        e
                    );
                }
            }
        }
    }
}
