use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use crate::crypto::{KeyPair, SealedBox};
use crate::ledger::{AccountId, Ledger};
use crate::transport::{PeerConnection, SessionDescription};

use super::generation::Ticket;
use super::store::SignalingStore;
use super::SignalingError;

/// The broadcaster's list of accepted viewers, in order of arrival
#[derive(Debug, Clone, Default)]
pub struct Viewers {
    inner: Arc<Mutex<Vec<AccountId>>>,
}

impl Viewers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn list(&self) -> Vec<AccountId> {
        self.inner.lock().clone()
    }

    pub fn contains(&self, account: &str) -> bool {
        self.inner.lock().iter().any(|viewer| viewer == account)
    }

    /// Add `account` if it is not listed yet, returning the list as it was
    ///  before so the addition can be rolled back
    pub fn add(&self, account: &str) -> Vec<AccountId> {
        let mut viewers = self.inner.lock();
        let before = viewers.clone();
        if !viewers.iter().any(|viewer| viewer == account) {
            viewers.push(account.to_string());
        }
        before
    }

    pub fn restore(&self, snapshot: Vec<AccountId>) {
        *self.inner.lock() = snapshot;
    }

    pub fn clear(&self) {
        self.inner.lock().clear();
    }
}

/// A viewer whose answer was applied and consumed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AcceptedAnswer {
    pub viewer: AccountId,
    /// The viewer's own stream identity, if its restream key could be opened
    pub restream: Option<KeyPair>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome {
    Accepted(AcceptedAnswer),
    /// The offer this poll was waiting on was superseded or withdrawn
    Cancelled,
}

/// Broadcaster-side loop waiting for a viewer's answer
#[derive(Debug, Clone)]
pub struct AnswerPoller<L: Ledger> {
    store: SignalingStore<L>,
    sealed: SealedBox,
    stream_key: String,
    interval: Duration,
    viewers: Viewers,
}

impl<L: Ledger> AnswerPoller<L> {
    pub fn new(
        store: SignalingStore<L>,
        stream: &KeyPair,
        interval: Duration,
        viewers: Viewers,
    ) -> Self {
        Self {
            store,
            sealed: SealedBox::for_stream(stream),
            stream_key: stream.stream_key(),
            interval,
            viewers,
        }
    }

    pub fn viewers(&self) -> &Viewers {
        &self.viewers
    }

    /// Poll until an answer is accepted on `connection` or `ticket` goes stale
    pub async fn run(&self, ticket: &Ticket, connection: &Arc<dyn PeerConnection>) -> PollOutcome {
        loop {
            if !ticket.is_current() {
                tracing::debug!(stream_key = %self.stream_key, "answer poll cancelled");
                return PollOutcome::Cancelled;
            }
            match self.tick(ticket, connection).await {
                Ok(Some(accepted)) => return PollOutcome::Accepted(accepted),
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!(stream_key = %self.stream_key, "failed to take answer: {}", e);
                }
            }
            tokio::time::sleep(self.interval).await;
        }
    }

    /// One poll: read, apply, consume
    ///
    /// The viewer is listed provisionally while the answer is applied and
    ///  consumed; any failure restores the list as it was before the tick.
    pub async fn tick(
        &self,
        ticket: &Ticket,
        connection: &Arc<dyn PeerConnection>,
    ) -> Result<Option<AcceptedAnswer>, SignalingError> {
        let Some(record) = self.store.read(&self.stream_key).await? else {
            return Ok(None);
        };
        let Some(answer) = record.answer else {
            return Ok(None);
        };
        if !ticket.is_current() {
            return Ok(None);
        }

        tracing::debug!(
            stream_key = %self.stream_key,
            viewer = %answer.account_id,
            "got answer"
        );
        let before = self.viewers.add(&answer.account_id);
        let applied = async {
            let description: SessionDescription = self.sealed.open_json(&answer.stream)?;
            connection.accept_answer(description).await?;
            self.store.consume_answer(&self.stream_key, &answer).await
        }
        .await;
        if let Err(e) = applied {
            self.viewers.restore(before);
            return Err(e);
        }

        tracing::info!(
            stream_key = %self.stream_key,
            viewer = %answer.account_id,
            "answer accepted"
        );
        Ok(Some(AcceptedAnswer {
            restream: self.open_restream_key(&answer.restream_key),
            viewer: answer.account_id,
        }))
    }

    fn open_restream_key(&self, blob: &crate::crypto::EncryptedBlob) -> Option<KeyPair> {
        let opened = self
            .sealed
            .open(blob)
            .map_err(SignalingError::from)
            .and_then(|bytes| {
                String::from_utf8(bytes).map_err(|e| SignalingError::Payload(e.to_string()))
            })
            .and_then(|encoded| KeyPair::from_base64(&encoded).map_err(SignalingError::from));
        match opened {
            Ok(pair) => Some(pair),
            Err(e) => {
                tracing::warn!(stream_key = %self.stream_key, "unusable restream key: {}", e);
                None
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::ledger::{AnswerSubmission, MemoryLedger};
    use crate::signaling::Generation;
    use crate::testkit::{FaultyLedger, LedgerCall, MockNetwork};
    use crate::transport::PeerEvent;

    struct Fixture<L: Ledger> {
        broadcaster: SignalingStore<L>,
        stream: KeyPair,
        viewer_stream: KeyPair,
        connection: Arc<dyn PeerConnection>,
    }

    /// An offering connection and the answer a viewer produced for it
    async fn negotiated() -> (Arc<dyn PeerConnection>, SessionDescription) {
        let network = MockNetwork::new();
        let offerer = network.connect_peer();
        let answerer = network.connect_peer();
        offerer.connection.create_offer().await.unwrap();
        let PeerEvent::LocalDescription(offer) = offerer.events.recv_async().await.unwrap() else {
            panic!("expected an offer");
        };
        answerer.connection.create_answer(offer).await.unwrap();
        let PeerEvent::LocalDescription(answer) = answerer.events.recv_async().await.unwrap()
        else {
            panic!("expected an answer");
        };
        (offerer.connection, answer)
    }

    async fn answered<L: Ledger>(ledger: L) -> Fixture<L> {
        let stream = KeyPair::generate().unwrap();
        let viewer_stream = KeyPair::generate().unwrap();
        let sealed = SealedBox::for_stream(&stream);
        let broadcaster = SignalingStore::new(ledger.clone(), "alice");
        let (connection, answer) = negotiated().await;

        let offer = sealed.seal(b"offer").unwrap();
        let generation = broadcaster
            .publish_offer(&stream.stream_key(), offer.clone(), true)
            .await
            .unwrap();
        SignalingStore::new(ledger, "bob")
            .publish_answer(
                &stream.stream_key(),
                AnswerSubmission {
                    stream: sealed.seal_json(&answer).unwrap(),
                    offer,
                    generation,
                    restream_key: sealed
                        .seal(viewer_stream.secret_to_base64().as_bytes())
                        .unwrap(),
                },
                true,
            )
            .await
            .unwrap();
        Fixture {
            broadcaster,
            stream,
            viewer_stream,
            connection,
        }
    }

    #[tokio::test]
    async fn test_tick_accepts_and_consumes() {
        let fixture = answered(MemoryLedger::new()).await;
        let poller = AnswerPoller::new(
            fixture.broadcaster.clone(),
            &fixture.stream,
            Duration::from_secs(1),
            Viewers::new(),
        );

        let ticket = Generation::new().advance();
        let accepted = poller
            .tick(&ticket, &fixture.connection)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(accepted.viewer, "bob");
        assert_eq!(accepted.restream, Some(fixture.viewer_stream.clone()));
        assert_eq!(poller.viewers().list(), vec!["bob".to_string()]);

        let record = fixture
            .broadcaster
            .read(&fixture.stream.stream_key())
            .await
            .unwrap()
            .unwrap();
        assert!(record.answer.is_none());
        assert_eq!(record.restreams.len(), 1);

        // nothing left to take
        assert!(poller
            .tick(&ticket, &fixture.connection)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_failed_consume_leaves_no_phantom_viewer() {
        let ledger = FaultyLedger::new(MemoryLedger::new());
        let fixture = answered(ledger.clone()).await;
        let viewers = Viewers::new();
        viewers.add("earlier");
        let poller = AnswerPoller::new(
            fixture.broadcaster.clone(),
            &fixture.stream,
            Duration::from_secs(1),
            viewers.clone(),
        );

        ledger.fail_next(LedgerCall::TakeAnswer, 1);
        let ticket = Generation::new().advance();
        let result = poller.tick(&ticket, &fixture.connection).await;
        assert!(matches!(result, Err(SignalingError::NetworkFailure(_))));
        assert_eq!(viewers.list(), vec!["earlier".to_string()]);

        // the next tick goes through
        let accepted = poller
            .tick(&ticket, &fixture.connection)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(accepted.viewer, "bob");
        assert_eq!(
            viewers.list(),
            vec!["earlier".to_string(), "bob".to_string()]
        );
    }

    #[tokio::test]
    async fn test_undecryptable_answer_is_skipped() {
        let fixture = answered(MemoryLedger::new()).await;
        let poller = AnswerPoller::new(
            fixture.broadcaster.clone(),
            &KeyPair::generate().unwrap(),
            Duration::from_secs(1),
            Viewers::new(),
        );
        // an empty record
        let ticket = Generation::new().advance();
        assert!(poller
            .tick(&ticket, &fixture.connection)
            .await
            .unwrap()
            .is_none());

        // the right record opened with the wrong key
        let poller = AnswerPoller {
            stream_key: fixture.stream.stream_key(),
            ..poller
        };
        let result = poller.tick(&ticket, &fixture.connection).await;
        assert!(matches!(result, Err(SignalingError::DecryptionFailed)));
        assert!(poller.viewers().list().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_stops_when_cancelled() {
        let stream = KeyPair::generate().unwrap();
        let poller = AnswerPoller::new(
            SignalingStore::new(MemoryLedger::new(), "alice"),
            &stream,
            Duration::from_secs(1),
            Viewers::new(),
        );
        let generation = Generation::new();
        let ticket = generation.advance();
        let (connection, _) = negotiated().await;

        let handle = tokio::spawn({
            let poller = poller.clone();
            async move { poller.run(&ticket, &connection).await }
        });
        tokio::time::sleep(Duration::from_secs(5)).await;
        generation.invalidate();
        assert_eq!(handle.await.unwrap(), PollOutcome::Cancelled);
    }
}
