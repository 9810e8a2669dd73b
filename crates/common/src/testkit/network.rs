use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::transport::{
    MediaStreamId, PeerConnection, PeerConnector, PeerEvent, PeerHandle, SessionDescription,
    TransportError,
};

/// An in-process stand-in for the media transport
///
/// Offers and answers are small json documents naming the connection that
///  produced them, so accepting an answer can find the answering side and
///  start "playing" media there. Every connection created through the network
///  stays registered, which lets tests check what was closed.
#[derive(Debug, Clone, Default)]
pub struct MockNetwork {
    inner: Arc<Mutex<NetworkInner>>,
    next_id: Arc<AtomicU64>,
}

#[derive(Debug, Default)]
struct NetworkInner {
    /// Local description snapshots emitted per create_offer/create_answer
    snapshots: usize,
    /// Upcoming create_offer calls that fail
    offer_failures: usize,
    peers: HashMap<String, PeerEntry>,
}

#[derive(Debug, Clone)]
struct PeerEntry {
    events: flume::Sender<PeerEvent>,
    closed: Arc<AtomicBool>,
    streams: Arc<Mutex<Vec<MediaStreamId>>>,
    /// For answering connections, the connection whose offer was answered
    offerer: Arc<Mutex<Option<String>>>,
}

/// One side of a mock peer connection
#[derive(Debug)]
pub struct MockPeerConnection {
    id: String,
    network: MockNetwork,
    entry: PeerEntry,
}

/// `PeerConnector` handing out connections on a [`MockNetwork`]
#[derive(Debug, Clone)]
pub struct MockConnector {
    network: MockNetwork,
}

impl MockNetwork {
    pub fn new() -> Self {
        Self::with_snapshots(1)
    }

    /// A network whose connections emit `snapshots` local descriptions per
    ///  negotiation, the way ICE gathering refreshes them
    pub fn with_snapshots(snapshots: usize) -> Self {
        let network = Self::default();
        network.inner.lock().snapshots = snapshots.max(1);
        network
    }

    pub fn connector(&self) -> MockConnector {
        MockConnector {
            network: self.clone(),
        }
    }

    pub fn connect_peer(&self) -> PeerHandle {
        let id = format!("peer-{}", self.next_id.fetch_add(1, Ordering::SeqCst) + 1);
        let (events, receiver) = flume::unbounded();
        let entry = PeerEntry {
            events,
            closed: Arc::new(AtomicBool::new(false)),
            streams: Arc::new(Mutex::new(Vec::new())),
            offerer: Arc::new(Mutex::new(None)),
        };
        self.inner.lock().peers.insert(id.clone(), entry.clone());
        PeerHandle {
            connection: Arc::new(MockPeerConnection {
                id,
                network: self.clone(),
                entry,
            }),
            events: receiver,
        }
    }

    /// Fail the next `times` create_offer calls on any connection
    pub fn fail_next_offers(&self, times: usize) {
        self.inner.lock().offer_failures += times;
    }

    /// Number of connections ever created
    pub fn created(&self) -> usize {
        self.inner.lock().peers.len()
    }

    /// Ids of connections not closed yet
    pub fn open_connections(&self) -> Vec<String> {
        let mut open: Vec<String> = self
            .inner
            .lock()
            .peers
            .iter()
            .filter(|(_, entry)| !entry.closed.load(Ordering::SeqCst))
            .map(|(id, _)| id.clone())
            .collect();
        open.sort();
        open
    }

    pub fn is_closed(&self, id: &str) -> bool {
        self.inner
            .lock()
            .peers
            .get(id)
            .map(|entry| entry.closed.load(Ordering::SeqCst))
            .unwrap_or(false)
    }

    fn take_offer_failure(&self) -> bool {
        let mut inner = self.inner.lock();
        if inner.offer_failures == 0 {
            return false;
        }
        inner.offer_failures -= 1;
        true
    }

    fn snapshots(&self) -> usize {
        self.inner.lock().snapshots
    }

    fn peer(&self, id: &str) -> Option<PeerEntry> {
        self.inner.lock().peers.get(id).cloned()
    }
}

impl PeerConnector for MockConnector {
    fn connect(&self) -> Result<PeerHandle, TransportError> {
        Ok(self.network.connect_peer())
    }
}

impl MockPeerConnection {
    pub fn id(&self) -> &str {
        &self.id
    }

    fn ensure_open(&self) -> Result<(), TransportError> {
        if self.entry.closed.load(Ordering::SeqCst) {
            return Err(TransportError::Closed);
        }
        Ok(())
    }

    fn emit_descriptions(&self, kind: &str) {
        for candidates in 0..self.network.snapshots() {
            let description = SessionDescription(serde_json::json!({
                "type": kind,
                "peer": self.id,
                "candidates": candidates,
            }));
            let _ = self.entry.events.send(PeerEvent::LocalDescription(description));
        }
    }
}

fn peer_field(description: &SessionDescription) -> Result<String, TransportError> {
    description
        .0
        .get("peer")
        .and_then(|peer| peer.as_str())
        .map(str::to_string)
        .ok_or_else(|| TransportError::Negotiation("description names no peer".to_string()))
}

#[async_trait]
impl PeerConnection for MockPeerConnection {
    async fn add_stream(&self, stream: &MediaStreamId) -> Result<(), TransportError> {
        self.ensure_open()?;
        self.entry.streams.lock().push(stream.clone());
        Ok(())
    }

    async fn create_offer(&self) -> Result<(), TransportError> {
        self.ensure_open()?;
        if self.network.take_offer_failure() {
            return Err(TransportError::Negotiation("injected offer failure".to_string()));
        }
        self.emit_descriptions("offer");
        Ok(())
    }

    async fn create_answer(&self, offer: SessionDescription) -> Result<(), TransportError> {
        self.ensure_open()?;
        if offer.kind() != Some("offer") {
            return Err(TransportError::Negotiation("expected an offer".to_string()));
        }
        *self.entry.offerer.lock() = Some(peer_field(&offer)?);
        self.emit_descriptions("answer");
        Ok(())
    }

    async fn accept_answer(&self, answer: SessionDescription) -> Result<(), TransportError> {
        self.ensure_open()?;
        if answer.kind() != Some("answer") {
            return Err(TransportError::Negotiation("expected an answer".to_string()));
        }
        let answerer_id = peer_field(&answer)?;
        let answerer = self
            .network
            .peer(&answerer_id)
            .ok_or_else(|| TransportError::Negotiation(format!("unknown peer {}", answerer_id)))?;
        if answerer.offerer.lock().as_deref() != Some(self.id.as_str()) {
            return Err(TransportError::Negotiation(
                "answer belongs to another offer".to_string(),
            ));
        }
        if answerer.closed.load(Ordering::SeqCst) {
            return Err(TransportError::Negotiation("remote peer is gone".to_string()));
        }

        let media = self
            .entry
            .streams
            .lock()
            .first()
            .cloned()
            .unwrap_or_else(|| MediaStreamId(format!("{}-media", self.id)));
        let _ = answerer.events.send(PeerEvent::Track(media));
        let _ = answerer.events.send(PeerEvent::Playing);
        Ok(())
    }

    async fn close(&self) {
        self.entry.closed.store(true, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[tokio::test]
    async fn test_offer_answer_starts_media() {
        let network = MockNetwork::new();
        let offerer = network.connect_peer();
        let answerer = network.connect_peer();

        offerer
            .connection
            .add_stream(&MediaStreamId("camera".to_string()))
            .await
            .unwrap();
        offerer.connection.create_offer().await.unwrap();
        let PeerEvent::LocalDescription(offer) = offerer.events.recv_async().await.unwrap() else {
            panic!("expected a local description");
        };

        answerer.connection.create_answer(offer).await.unwrap();
        let PeerEvent::LocalDescription(answer) = answerer.events.recv_async().await.unwrap()
        else {
            panic!("expected a local description");
        };

        offerer.connection.accept_answer(answer).await.unwrap();
        assert_eq!(
            answerer.events.recv_async().await.unwrap(),
            PeerEvent::Track(MediaStreamId("camera".to_string()))
        );
        assert_eq!(answerer.events.recv_async().await.unwrap(), PeerEvent::Playing);
    }

    #[tokio::test]
    async fn test_closed_connection_refuses_work() {
        let network = MockNetwork::new();
        let handle = network.connect_peer();
        handle.connection.close().await;
        assert!(matches!(
            handle.connection.create_offer().await,
            Err(TransportError::Closed)
        ));
        assert!(network.open_connections().is_empty());
    }

    #[tokio::test]
    async fn test_injected_offer_failure() {
        let network = MockNetwork::new();
        network.fail_next_offers(1);
        let handle = network.connect_peer();
        assert!(matches!(
            handle.connection.create_offer().await,
            Err(TransportError::Negotiation(_))
        ));
        handle.connection.create_offer().await.unwrap();
    }

    #[tokio::test]
    async fn test_snapshots_are_emitted_in_order() {
        let network = MockNetwork::with_snapshots(3);
        let handle = network.connect_peer();
        handle.connection.create_offer().await.unwrap();
        let candidates: Vec<u64> = handle
            .events
            .drain()
            .filter_map(|event| match event {
                PeerEvent::LocalDescription(description) => description.0["candidates"].as_u64(),
                _ => None,
            })
            .collect();
        assert_eq!(candidates, vec![0, 1, 2]);
    }
}
