//! Concurrent viewers and superseded writes

mod common;

use std::time::Duration;

use ::common::crypto::{KeyPair, SealedBox};
use ::common::ledger::{Ledger, MemoryLedger};
use ::common::session::SessionState;
use ::common::signaling::{Generation, OfferOutcome, OfferPublisher, SignalingStore};
use ::common::testkit::{FaultyLedger, LedgerCall, MockNetwork};
use ::common::transport::SessionDescription;

// =============================================================================
// SCENARIO: Two viewers answer the same offer at the same moment
// =============================================================================

/// Only one answer write is accepted for an offer generation. The other
/// viewer finds the slot taken, abandons its handshake and never goes live.
#[tokio::test(start_paused = true)]
async fn test_second_viewer_backs_off() {
    common::init_tracing();
    let ledger = MemoryLedger::new();
    let network = MockNetwork::new();

    let alice = common::live_broadcaster(&ledger, &network, "alice").await;
    let url = alice.share_url(&common::base_url());
    let bob = common::session(&ledger, &network, "bob");
    let carol = common::session(&ledger, &network, "carol");

    // both read the same offer before either answers
    bob.watch_url(&url).await.unwrap();
    carol.watch_url(&url).await.unwrap();

    common::wait_until(|| {
        let states = [bob.state(), carol.state()];
        let receiving = states.iter().filter(|state| state.is_watching()).count();
        let idle = states
            .iter()
            .filter(|state| **state == SessionState::Idle)
            .count();
        receiving == 1 && idle == 1 && !alice.viewers().is_empty()
    })
    .await;

    let (winner, loser) = if bob.state().is_watching() {
        (&bob, &carol)
    } else {
        (&carol, &bob)
    };
    assert_eq!(alice.viewers(), vec![winner.account().to_string()]);
    common::wait_for_state(winner, |state| {
        matches!(state, SessionState::Restreaming { .. })
    })
    .await;

    // the loser never restreamed anything
    assert!(ledger.get(&loser.stream_key()).await.unwrap().is_none());
    assert_eq!(loser.state(), SessionState::Idle);
}

// =============================================================================
// SCENARIO: A rejected offer write is superseded before its retry
// =============================================================================

/// After a rejected write for offer N, requesting offer N+1 means offer N is
/// never written; the record ends up holding offer N+1.
#[tokio::test(start_paused = true)]
async fn test_superseded_offer_is_never_written() {
    common::init_tracing();
    let stream = KeyPair::generate().unwrap();
    let ledger = FaultyLedger::new(MemoryLedger::new());
    ledger.reject_next(LedgerCall::Offer, 1, "This streaming key is owned by another account");
    let publisher = OfferPublisher::new(
        SignalingStore::new(ledger.clone(), "alice"),
        &stream,
        Duration::from_millis(100),
    );
    let generation = Generation::new();

    let first = generation.advance();
    let first_task = tokio::spawn({
        let publisher = publisher.clone();
        async move {
            let offer = SessionDescription(serde_json::json!({ "type": "offer", "sdp": "n" }));
            publisher.publish(&first, &offer, true).await
        }
    });

    // the first attempt (t=100ms) is rejected; request a new offer before the retry
    tokio::time::sleep(Duration::from_millis(150)).await;
    assert_eq!(ledger.count(LedgerCall::Offer), 1);
    let second = generation.advance();
    let newer = SessionDescription(serde_json::json!({ "type": "offer", "sdp": "n+1" }));
    let outcome = publisher.publish(&second, &newer, true).await;

    assert_eq!(outcome, OfferOutcome::Published { generation: 1 });
    assert_eq!(first_task.await.unwrap(), OfferOutcome::Superseded);
    assert_eq!(ledger.count(LedgerCall::Offer), 2);

    let record = ledger.get(&stream.stream_key()).await.unwrap().unwrap();
    let opened: SessionDescription = SealedBox::for_stream(&stream)
        .open_json(record.offer.as_ref().unwrap())
        .unwrap();
    assert_eq!(opened, newer);
}

/// Several local descriptions in quick succession: only the last one lands.
#[tokio::test(start_paused = true)]
async fn test_only_the_settled_description_is_published() {
    common::init_tracing();
    let ledger = FaultyLedger::new(MemoryLedger::new());
    let network = MockNetwork::with_snapshots(3);

    let alice = common::live_broadcaster(&ledger, &network, "alice").await;
    let record = ledger.get(&alice.stream_key()).await.unwrap().unwrap();
    let alice_pair =
        ::common::session::parse_share_url(&alice.share_url(&common::base_url()))
            .unwrap()
            .unwrap();
    let opened: SessionDescription = SealedBox::for_stream(&alice_pair)
        .open_json(record.offer.as_ref().unwrap())
        .unwrap();
    assert_eq!(opened.0["candidates"], 2);
    assert_eq!(ledger.count(LedgerCall::Offer), 1);
}

/// The broadcaster retries through ledger outages until its offer lands.
#[tokio::test(start_paused = true)]
async fn test_offer_survives_network_failures() {
    common::init_tracing();
    let ledger = FaultyLedger::new(MemoryLedger::new());
    let network = MockNetwork::new();
    ledger.fail_next(LedgerCall::Offer, 3);

    let alice = common::live_broadcaster(&ledger, &network, "alice").await;
    assert_eq!(ledger.count(LedgerCall::Offer), 4);
    assert!(ledger
        .get(&alice.stream_key())
        .await
        .unwrap()
        .unwrap()
        .offer
        .is_some());
}
