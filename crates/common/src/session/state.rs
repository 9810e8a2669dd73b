use crate::ledger::AccountId;
use crate::transport::MediaStreamId;

use super::SessionError;

/// Coarse session status, one variant per thing a user can see
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    /// Local capture is on, nothing is being sent
    LocalVideoReady { media: MediaStreamId },
    /// An offer for our own stream key is being written
    Publishing { media: MediaStreamId },
    /// Our offer is on the ledger and viewers can connect
    Live { media: MediaStreamId },
    /// Answering a remote broadcaster's offer
    ConnectingToRemote { from: AccountId },
    /// Remote media is playing
    Receiving { from: AccountId, media: MediaStreamId },
    /// Remote media is playing and being re-offered under our own key
    Restreaming { from: AccountId, media: MediaStreamId },
}

/// Everything that can move a [`SessionState`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
    VideoReady { media: MediaStreamId },
    VideoStopped,
    StreamStarted,
    OfferPublished,
    StreamStopped,
    RemoteOfferFound { from: AccountId },
    MediaFlowing { media: MediaStreamId },
    HandshakeAborted,
    Left,
}

impl SessionState {
    pub fn name(&self) -> &'static str {
        match self {
            SessionState::Idle => "idle",
            SessionState::LocalVideoReady { .. } => "local-video-ready",
            SessionState::Publishing { .. } => "publishing",
            SessionState::Live { .. } => "live",
            SessionState::ConnectingToRemote { .. } => "connecting-to-remote",
            SessionState::Receiving { .. } => "receiving",
            SessionState::Restreaming { .. } => "restreaming",
        }
    }

    /// The media we are sending, or would send
    pub fn media(&self) -> Option<&MediaStreamId> {
        match self {
            SessionState::Idle | SessionState::ConnectingToRemote { .. } => None,
            SessionState::LocalVideoReady { media }
            | SessionState::Publishing { media }
            | SessionState::Live { media }
            | SessionState::Receiving { media, .. }
            | SessionState::Restreaming { media, .. } => Some(media),
        }
    }

    /// Whether an offer of ours is supposed to be on the ledger
    pub fn is_streaming(&self) -> bool {
        matches!(
            self,
            SessionState::Publishing { .. }
                | SessionState::Live { .. }
                | SessionState::Restreaming { .. }
        )
    }

    /// Whether we are on the viewer side of a remote stream
    pub fn is_watching(&self) -> bool {
        matches!(
            self,
            SessionState::ConnectingToRemote { .. }
                | SessionState::Receiving { .. }
                | SessionState::Restreaming { .. }
        )
    }

    /// The state after `transition`, or `InvalidTransition`
    pub fn apply(&self, transition: Transition) -> Result<SessionState, SessionError> {
        use SessionState::*;

        let next = match (self, &transition) {
            (Idle, Transition::VideoReady { media }) => LocalVideoReady {
                media: media.clone(),
            },
            (LocalVideoReady { .. }, Transition::VideoStopped) => Idle,

            (LocalVideoReady { media }, Transition::StreamStarted)
            | (Publishing { media }, Transition::StreamStarted) => Publishing {
                media: media.clone(),
            },
            // a re-offer after serving a viewer keeps us live
            (Live { media }, Transition::StreamStarted) => Live {
                media: media.clone(),
            },
            (Publishing { media }, Transition::OfferPublished)
            | (Live { media }, Transition::OfferPublished) => Live {
                media: media.clone(),
            },
            (Publishing { media }, Transition::StreamStopped)
            | (Live { media }, Transition::StreamStopped) => LocalVideoReady {
                media: media.clone(),
            },

            (Idle, Transition::RemoteOfferFound { from })
            | (LocalVideoReady { .. }, Transition::RemoteOfferFound { from }) => {
                ConnectingToRemote { from: from.clone() }
            }
            (ConnectingToRemote { from }, Transition::MediaFlowing { media }) => Receiving {
                from: from.clone(),
                media: media.clone(),
            },
            (ConnectingToRemote { .. }, Transition::HandshakeAborted) => Idle,

            (Receiving { from, media }, Transition::StreamStarted)
            | (Restreaming { from, media }, Transition::StreamStarted)
            | (Restreaming { from, media }, Transition::OfferPublished) => Restreaming {
                from: from.clone(),
                media: media.clone(),
            },
            (Restreaming { from, media }, Transition::StreamStopped) => Receiving {
                from: from.clone(),
                media: media.clone(),
            },
            (ConnectingToRemote { .. }, Transition::Left)
            | (Receiving { .. }, Transition::Left)
            | (Restreaming { .. }, Transition::Left) => Idle,

            _ => {
                return Err(SessionError::InvalidTransition {
                    state: self.name(),
                    transition: transition.name(),
                })
            }
        };
        Ok(next)
    }
}

impl Transition {
    pub fn name(&self) -> &'static str {
        match self {
            Transition::VideoReady { .. } => "video-ready",
            Transition::VideoStopped => "video-stopped",
            Transition::StreamStarted => "stream-started",
            Transition::OfferPublished => "offer-published",
            Transition::StreamStopped => "stream-stopped",
            Transition::RemoteOfferFound { .. } => "remote-offer-found",
            Transition::MediaFlowing { .. } => "media-flowing",
            Transition::HandshakeAborted => "handshake-aborted",
            Transition::Left => "left",
        }
    }
}
