use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use crate::crypto::{KeyPair, SealedBox};
use crate::ledger::Ledger;
use crate::transport::SessionDescription;

use super::generation::Ticket;
use super::store::SignalingStore;

/// Where the most recent offer stands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OfferPhase {
    Idle,
    Publishing,
    Published,
    Superseded,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OfferOutcome {
    /// The offer landed at this record generation
    Published { generation: u64 },
    /// A newer offer (or a stop) took over; nothing was written after that
    Superseded,
}

/// Broadcaster-side loop writing the sealed offer to the stream record
///
/// Each local description gets its own `publish` call holding its own ticket.
///  Writes are serialized, and the ticket is re-checked under the write lock,
///  so a superseded description can never land after its replacement.
#[derive(Debug, Clone)]
pub struct OfferPublisher<L: Ledger> {
    store: SignalingStore<L>,
    sealed: SealedBox,
    stream_key: String,
    settle_delay: Duration,
    write_lock: Arc<tokio::sync::Mutex<()>>,
    /// (ticket value, phase) of the newest offer seen
    phase: Arc<Mutex<(u64, OfferPhase)>>,
}

impl<L: Ledger> OfferPublisher<L> {
    pub fn new(store: SignalingStore<L>, stream: &KeyPair, settle_delay: Duration) -> Self {
        Self {
            store,
            sealed: SealedBox::for_stream(stream),
            stream_key: stream.stream_key(),
            settle_delay,
            write_lock: Arc::new(tokio::sync::Mutex::new(())),
            phase: Arc::new(Mutex::new((0, OfferPhase::Idle))),
        }
    }

    pub fn phase(&self) -> OfferPhase {
        self.phase.lock().1
    }

    /// Back to `Idle` once streaming stops
    pub fn reset(&self) {
        let mut phase = self.phase.lock();
        phase.1 = OfferPhase::Idle;
    }

    fn set_phase(&self, ticket: &Ticket, next: OfferPhase) {
        let mut phase = self.phase.lock();
        if ticket.value() >= phase.0 {
            *phase = (ticket.value(), next);
        }
    }

    /// Publish `offer` until it lands or `ticket` goes stale
    ///
    /// Every attempt waits the settle delay first, so a description still
    ///  churning through ICE gathering is replaced before it is written.
    ///  Failed writes, rejections included, are retried: the broadcaster
    ///  always owns its own slot.
    pub async fn publish(
        &self,
        ticket: &Ticket,
        offer: &SessionDescription,
        is_new: bool,
    ) -> OfferOutcome {
        self.set_phase(ticket, OfferPhase::Publishing);
        let mut attempt: u32 = 0;

        loop {
            tokio::time::sleep(self.settle_delay).await;
            let _guard = self.write_lock.lock().await;

            if !ticket.is_current() {
                tracing::debug!(
                    stream_key = %self.stream_key,
                    ticket = ticket.value(),
                    "offer superseded, not publishing"
                );
                self.set_phase(ticket, OfferPhase::Superseded);
                return OfferOutcome::Superseded;
            }

            attempt += 1;
            let blob = match self.sealed.seal_json(offer) {
                Ok(blob) => blob,
                Err(e) => {
                    tracing::warn!("failed to seal offer: {}", e);
                    continue;
                }
            };

            tracing::debug!(
                stream_key = %self.stream_key,
                attempt,
                is_new,
                "publishing offer"
            );
            match self.store.publish_offer(&self.stream_key, blob, is_new).await {
                Ok(generation) => {
                    tracing::info!(
                        stream_key = %self.stream_key,
                        generation,
                        "offer published"
                    );
                    self.set_phase(ticket, OfferPhase::Published);
                    return OfferOutcome::Published { generation };
                }
                Err(e) => {
                    tracing::warn!(
                        stream_key = %self.stream_key,
                        attempt,
                        "failed to publish offer, retrying: {}",
                        e
                    );
                }
            }
        }
    }

    /// Clear our offer so the mailbox is free, retrying until the write
    ///  lands or `ticket` goes stale
    ///
    /// The first attempt goes out immediately. Writes share the publish lock,
    ///  so no offer that lost its ticket can land after the clear.
    pub async fn withdraw(&self, ticket: &Ticket) -> OfferOutcome {
        loop {
            {
                let _guard = self.write_lock.lock().await;
                if !ticket.is_current() {
                    tracing::debug!(stream_key = %self.stream_key, "withdraw superseded");
                    return OfferOutcome::Superseded;
                }
                match self.store.clear_offer(&self.stream_key).await {
                    Ok(generation) => {
                        tracing::info!(stream_key = %self.stream_key, generation, "offer withdrawn");
                        self.reset();
                        return OfferOutcome::Published { generation };
                    }
                    Err(e) => {
                        tracing::warn!(
                            stream_key = %self.stream_key,
                            "failed to withdraw offer, retrying: {}",
                            e
                        );
                    }
                }
            }
            tokio::time::sleep(self.settle_delay).await;
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::ledger::MemoryLedger;
    use crate::signaling::Generation;
    use crate::testkit::{FaultyLedger, LedgerCall};

    fn offer(sdp: &str) -> SessionDescription {
        SessionDescription(serde_json::json!({ "type": "offer", "sdp": sdp }))
    }

    #[tokio::test(start_paused = true)]
    async fn test_publish_lands_and_is_readable() {
        let stream = KeyPair::generate().unwrap();
        let store = SignalingStore::new(MemoryLedger::new(), "alice");
        let publisher = OfferPublisher::new(store.clone(), &stream, Duration::from_secs(1));
        let generation = Generation::new();
        let ticket = generation.advance();

        let outcome = publisher.publish(&ticket, &offer("v=0"), true).await;
        assert_eq!(outcome, OfferOutcome::Published { generation: 1 });
        assert_eq!(publisher.phase(), OfferPhase::Published);

        let record = store.read(&stream.stream_key()).await.unwrap().unwrap();
        let opened: SessionDescription = SealedBox::for_stream(&stream)
            .open_json(record.offer.as_ref().unwrap())
            .unwrap();
        assert_eq!(opened, offer("v=0"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_ticket_never_writes() {
        let stream = KeyPair::generate().unwrap();
        let store = SignalingStore::new(MemoryLedger::new(), "alice");
        let publisher = OfferPublisher::new(store.clone(), &stream, Duration::from_secs(1));
        let generation = Generation::new();
        let ticket = generation.advance();
        generation.invalidate();

        let outcome = publisher.publish(&ticket, &offer("v=0"), true).await;
        assert_eq!(outcome, OfferOutcome::Superseded);
        assert!(store.read(&stream.stream_key()).await.unwrap().is_none());

        publisher.reset();
        assert_eq!(publisher.phase(), OfferPhase::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rejected_offer_retries_until_superseded() {
        let stream = KeyPair::generate().unwrap();
        let ledger = FaultyLedger::new(MemoryLedger::new());
        ledger.reject_next(LedgerCall::Offer, 1, "This streaming key is owned by another account");
        let store = SignalingStore::new(ledger.clone(), "alice");
        let publisher = OfferPublisher::new(store.clone(), &stream, Duration::from_secs(1));
        let generation = Generation::new();

        let first = generation.advance();
        let outcome = publisher.publish(&first, &offer("first"), true).await;
        assert_eq!(outcome, OfferOutcome::Published { generation: 1 });
        assert_eq!(ledger.count(LedgerCall::Offer), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_withdraw_clears_the_offer() {
        let stream = KeyPair::generate().unwrap();
        let store = SignalingStore::new(MemoryLedger::new(), "alice");
        let publisher = OfferPublisher::new(store.clone(), &stream, Duration::from_secs(1));
        let generation = Generation::new();

        publisher.publish(&generation.advance(), &offer("v=0"), true).await;
        let outcome = publisher.withdraw(&generation.advance()).await;
        assert_eq!(outcome, OfferOutcome::Published { generation: 2 });
        assert_eq!(publisher.phase(), OfferPhase::Idle);

        let record = store.read(&stream.stream_key()).await.unwrap().unwrap();
        assert!(record.offer.is_none());
    }
}
