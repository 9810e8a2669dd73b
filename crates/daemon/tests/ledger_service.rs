//! The ledger service over real HTTP, driven through `HttpLedger`

use std::net::SocketAddr;
use std::time::Duration;

use url::Url;

use common::crypto::{EncryptedBlob, KeyPair};
use common::ledger::{Ledger, LedgerError};
use common::session::{Session, SessionState};
use common::signaling::SignalingConfig;
use common::testkit::{MockConnector, MockNetwork};
use common::transport::MediaStreamId;
use webrtc_live_daemon::{start_service, ApiClient, HttpLedger, ServiceConfig, ShutdownHandle};

const TIMEOUT: Duration = Duration::from_secs(20);

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

async fn ledger_service() -> (ShutdownHandle, HttpLedger) {
    init_tracing();
    let config = ServiceConfig {
        listen_addr: SocketAddr::from(([127, 0, 0, 1], 0)),
        log_level: tracing::Level::DEBUG,
        log_dir: None,
    };
    let (_, handle) = start_service(&config).await.unwrap();
    let remote = Url::parse(&format!("http://{}", handle.local_addr())).unwrap();
    let ledger = HttpLedger::new(ApiClient::new(&remote).unwrap());
    (handle, ledger)
}

fn session(ledger: &HttpLedger, network: &MockNetwork, account: &str) -> Session<HttpLedger, MockConnector> {
    Session::new(
        ledger.clone(),
        account,
        KeyPair::generate().unwrap(),
        network.connector(),
        SignalingConfig {
            settle_delay: Duration::from_millis(50),
            poll_interval: Duration::from_millis(50),
        },
    )
}

async fn wait_for_state(
    session: &Session<HttpLedger, MockConnector>,
    predicate: impl Fn(&SessionState) -> bool,
) {
    let mut status = session.subscribe();
    tokio::time::timeout(TIMEOUT, status.wait_for(|state| predicate(state)))
        .await
        .expect("timed out waiting for session state")
        .expect("session dropped");
}

#[tokio::test]
async fn test_contract_rejections_cross_the_wire() {
    let (handle, ledger) = ledger_service().await;
    let key = KeyPair::generate().unwrap().stream_key();

    assert_eq!(ledger.get(&key).await.unwrap(), None);

    let offer = EncryptedBlob::from("sealed-offer".to_string());
    let generation = ledger
        .offer("alice", &key, Some(offer.clone()), true)
        .await
        .unwrap();
    let record = ledger.get(&key).await.unwrap().unwrap();
    assert_eq!(record.owner_id, "alice");
    assert_eq!(record.offer, Some(offer));
    assert_eq!(record.generation, generation);

    let result = ledger
        .offer("mallory", &key, Some(EncryptedBlob::from("x".to_string())), true)
        .await;
    assert!(matches!(result, Err(LedgerError::Rejected(_))));

    handle.shutdown();
    tokio::time::timeout(TIMEOUT, handle.wait()).await.unwrap();
}

#[tokio::test]
async fn test_unreachable_ledger_is_a_provider_error() {
    let (handle, ledger) = ledger_service().await;
    handle.shutdown();
    tokio::time::timeout(TIMEOUT, handle.wait()).await.unwrap();

    let result = ledger.get("anything").await;
    assert!(matches!(result, Err(LedgerError::Provider(_))));
}

#[tokio::test]
async fn test_livez() {
    let (handle, ledger) = ledger_service().await;
    let client = ledger.client();
    let url = client.base_url().join("/_status/livez").unwrap();
    let response = client.http_client().get(url).send().await.unwrap();
    assert!(response.status().is_success());

    let url = client.base_url().join("/no/such/route").unwrap();
    let response = client.http_client().get(url).send().await.unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::NOT_FOUND);

    handle.shutdown();
}

#[tokio::test]
async fn test_handshake_over_http() {
    let (handle, ledger) = ledger_service().await;
    let network = MockNetwork::new();
    let camera = MediaStreamId("camera".to_string());

    let alice = session(&ledger, &network, "alice");
    alice.init_video(camera.clone()).unwrap();
    alice.start_stream(true).await.unwrap();
    wait_for_state(&alice, |state| matches!(state, SessionState::Live { .. })).await;

    let bob = session(&ledger, &network, "bob");
    let url = alice.share_url(&Url::parse("https://live.example/watch").unwrap());
    bob.watch_url(&url).await.unwrap();
    wait_for_state(&bob, |state| matches!(state, SessionState::Restreaming { .. })).await;

    assert_eq!(bob.state().media(), Some(&camera));
    assert_eq!(alice.viewers(), vec!["bob".to_string()]);

    bob.shutdown().await.unwrap();
    alice.shutdown().await.unwrap();
    assert!(network.open_connections().is_empty());

    handle.shutdown();
    tokio::time::timeout(TIMEOUT, handle.wait()).await.unwrap();
}
