//! The peer-connection collaborator
//!
//! Media transport (ICE, codecs, tracks) lives behind these traits. The
//! signaling core only moves session descriptions around: it seals them,
//! writes them, reads them back and hands them over unmodified.

use std::fmt::Debug;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// An opaque offer or answer description, as produced by the transport
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionDescription(pub serde_json::Value);

impl SessionDescription {
    /// The description's `type` field, when the transport sets one
    pub fn kind(&self) -> Option<&str> {
        self.0.get("type").and_then(|kind| kind.as_str())
    }
}

/// Handle to a media stream owned by the transport layer (local capture or
///  a received remote stream)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MediaStreamId(pub String);

/// Events a peer connection reports while it negotiates and plays
#[derive(Debug, Clone, PartialEq)]
pub enum PeerEvent {
    /// A new snapshot of the local description, emitted on creation and
    ///  again as ICE candidates are gathered
    LocalDescription(SessionDescription),
    /// A remote media stream arrived
    Track(MediaStreamId),
    /// Remote media started playing
    Playing,
}

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("peer connection is closed")]
    Closed,
    #[error("negotiation failed: {0}")]
    Negotiation(String),
    #[error("transport error: {0}")]
    Default(#[from] anyhow::Error),
}

/// One peer connection
#[async_trait]
pub trait PeerConnection: Send + Sync + Debug {
    /// Attach local media before creating an offer
    async fn add_stream(&self, stream: &MediaStreamId) -> Result<(), TransportError>;

    /// Start offering; local descriptions arrive as `PeerEvent::LocalDescription`
    async fn create_offer(&self) -> Result<(), TransportError>;

    /// Apply a remote offer and start answering; local descriptions arrive
    ///  as `PeerEvent::LocalDescription`
    async fn create_answer(&self, offer: SessionDescription) -> Result<(), TransportError>;

    /// Apply the remote answer to a connection that offered
    async fn accept_answer(&self, answer: SessionDescription) -> Result<(), TransportError>;

    async fn close(&self);
}

/// A fresh connection together with its event feed
pub struct PeerHandle {
    pub connection: Arc<dyn PeerConnection>,
    pub events: flume::Receiver<PeerEvent>,
}

/// Factory for peer connections
pub trait PeerConnector: Send + Sync + 'static {
    fn connect(&self) -> Result<PeerHandle, TransportError>;
}
