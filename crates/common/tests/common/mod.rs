//! Shared test utilities for signaling integration tests
#![allow(dead_code)]

use std::time::Duration;

use common::crypto::KeyPair;
use common::ledger::{Ledger, SignalingRecord};
use common::session::{Session, SessionState};
use common::signaling::SignalingConfig;
use common::testkit::{MockConnector, MockNetwork};
use common::transport::MediaStreamId;
use url::Url;

/// How long a scenario may take before it counts as stuck (virtual time)
pub const SCENARIO_TIMEOUT: Duration = Duration::from_secs(60);

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn fast_config() -> SignalingConfig {
    SignalingConfig {
        settle_delay: Duration::from_millis(100),
        poll_interval: Duration::from_millis(100),
    }
}

pub fn base_url() -> Url {
    Url::parse("https://live.example/watch").unwrap()
}

pub fn camera() -> MediaStreamId {
    MediaStreamId("camera".to_string())
}

pub fn session<L: Ledger>(
    ledger: &L,
    network: &MockNetwork,
    account: &str,
) -> Session<L, MockConnector> {
    Session::new(
        ledger.clone(),
        account,
        KeyPair::generate().unwrap(),
        network.connector(),
        fast_config(),
    )
}

/// A session that is live with local video
pub async fn live_broadcaster<L: Ledger>(
    ledger: &L,
    network: &MockNetwork,
    account: &str,
) -> Session<L, MockConnector> {
    let broadcaster = session(ledger, network, account);
    broadcaster.init_video(camera()).unwrap();
    broadcaster.start_stream(true).await.unwrap();
    wait_for_state(&broadcaster, |state| matches!(state, SessionState::Live { .. })).await;
    broadcaster
}

pub async fn wait_for_state<L: Ledger>(
    session: &Session<L, MockConnector>,
    predicate: impl Fn(&SessionState) -> bool,
) {
    let mut status = session.subscribe();
    tokio::time::timeout(SCENARIO_TIMEOUT, status.wait_for(|state| predicate(state)))
        .await
        .expect("timed out waiting for session state")
        .expect("session dropped");
}

/// Poll `condition` until it holds
pub async fn wait_until(mut condition: impl FnMut() -> bool) {
    tokio::time::timeout(SCENARIO_TIMEOUT, async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("timed out waiting for condition");
}

/// Read `key` until its record satisfies `predicate`, returning that record
pub async fn wait_for_record<L: Ledger>(
    ledger: &L,
    key: &str,
    predicate: impl Fn(&SignalingRecord) -> bool,
) -> SignalingRecord {
    tokio::time::timeout(SCENARIO_TIMEOUT, async {
        loop {
            if let Some(record) = ledger.get(key).await.unwrap() {
                if predicate(&record) {
                    return record;
                }
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("timed out waiting for record")
}
