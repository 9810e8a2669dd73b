//! The stream session controller
//!
//! A [`Session`] owns one client's peer connections and drives the signaling
//! loops against them. As a broadcaster it offers local media under its own
//! stream key, accepts one viewer per offer and immediately re-offers for the
//! next. As a viewer it answers a remote broadcaster's offer, and once media
//! flows it re-offers the received stream under its own key, so the viewer
//! becomes the next hop of a restream chain.
//!
//! Every background loop holds a [`Ticket`] and re-checks it before acting.
//! Starting or stopping a stream advances the counters, which is the only
//! way a loop is cancelled.

use std::sync::Arc;

use futures::future::{BoxFuture, FutureExt};
use parking_lot::Mutex;
use tokio::sync::watch;
use url::Url;

mod share;
mod state;

pub use share::{parse_share_url, share_url, SHARE_QUERY_KEY};
pub use state::{SessionState, Transition};

use crate::crypto::{KeyError, KeyPair, SealedBox};
use crate::ledger::{AccountId, Ledger};
use crate::signaling::{
    AcceptedAnswer, AnswerOutcome, AnswerPoller, AnswerPublisher, AnswerState, Generation,
    OfferOutcome, OfferPublisher, PollOutcome, SignalingConfig, SignalingError, SignalingStore,
    Ticket, Viewers,
};
use crate::transport::{
    MediaStreamId, PeerConnection, PeerConnector, PeerEvent, SessionDescription, TransportError,
};

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("cannot apply {transition} while {state}")]
    InvalidTransition {
        state: &'static str,
        transition: &'static str,
    },
    #[error("stream has no offer to answer")]
    NoOffer,
    #[error("url carries no stream key")]
    NoShareKey,
    #[error("key error: {0}")]
    Key(#[from] KeyError),
    #[error("signaling error: {0}")]
    Signaling(#[from] SignalingError),
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),
}

/// Our offering connection for the current stream generation
struct Outgoing {
    connection: Arc<dyn PeerConnection>,
}

/// Our answering connection to a remote broadcaster
struct Incoming {
    connection: Arc<dyn PeerConnection>,
    state: Arc<AnswerState>,
}

struct Shared {
    state: SessionState,
    status: watch::Sender<SessionState>,
    outgoing: Option<Outgoing>,
    /// Superseded offering connections nobody answered; closed once the
    ///  replacement offer is on the ledger
    retiring: Vec<Arc<dyn PeerConnection>>,
    /// Connections carrying media to accepted viewers; closed on stop
    serving: Vec<Arc<dyn PeerConnection>>,
    incoming: Option<Incoming>,
    /// Stream ticket whose answer poll has been started
    polling: Option<u64>,
    /// Stream keys of accepted viewers, for chaining
    relays: Vec<String>,
}

impl Shared {
    fn apply(&mut self, transition: Transition) -> Result<(), SessionError> {
        let next = self.state.apply(transition)?;
        tracing::debug!(from = self.state.name(), to = next.name(), "session transition");
        self.state = next.clone();
        self.status.send_replace(next);
        Ok(())
    }

    fn is_current_incoming(&self, state: &Arc<AnswerState>) -> bool {
        self.incoming
            .as_ref()
            .is_some_and(|incoming| Arc::ptr_eq(&incoming.state, state))
    }
}

struct SessionInner<L: Ledger, C: PeerConnector> {
    store: SignalingStore<L>,
    connector: C,
    identity: KeyPair,
    config: SignalingConfig,
    offers: OfferPublisher<L>,
    poller: AnswerPoller<L>,
    /// Advanced per started stream; polls and offer pumps hold its tickets
    streams: Generation,
    /// Advanced per local offer description and on withdraw
    offer_descriptions: Generation,
    /// Advanced per local answer description
    answer_descriptions: Generation,
    shared: Mutex<Shared>,
}

/// One client's broadcaster and viewer roles
pub struct Session<L: Ledger, C: PeerConnector> {
    inner: Arc<SessionInner<L, C>>,
}

impl<L: Ledger, C: PeerConnector> Clone for Session<L, C> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

async fn close_all(connections: Vec<Arc<dyn PeerConnection>>) {
    for connection in connections {
        connection.close().await;
    }
}

impl<L: Ledger, C: PeerConnector> Session<L, C> {
    /// # Arguments
    /// * `ledger` - The signaling ledger
    /// * `account` - The account our ledger calls are made as
    /// * `identity` - Our own stream key pair
    /// * `connector` - Factory for peer connections
    pub fn new(
        ledger: L,
        account: impl Into<AccountId>,
        identity: KeyPair,
        connector: C,
        config: SignalingConfig,
    ) -> Self {
        let store = SignalingStore::new(ledger, account);
        let offers = OfferPublisher::new(store.clone(), &identity, config.settle_delay);
        let poller = AnswerPoller::new(
            store.clone(),
            &identity,
            config.poll_interval,
            Viewers::new(),
        );
        let (status, _) = watch::channel(SessionState::Idle);
        Self {
            inner: Arc::new(SessionInner {
                store,
                connector,
                identity,
                config,
                offers,
                poller,
                streams: Generation::new(),
                offer_descriptions: Generation::new(),
                answer_descriptions: Generation::new(),
                shared: Mutex::new(Shared {
                    state: SessionState::Idle,
                    status,
                    outgoing: None,
                    retiring: Vec::new(),
                    serving: Vec::new(),
                    incoming: None,
                    polling: None,
                    relays: Vec::new(),
                }),
            }),
        }
    }

    pub fn state(&self) -> SessionState {
        self.inner.shared.lock().state.clone()
    }

    /// A feed of state changes, starting from the current state
    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.inner.shared.lock().status.subscribe()
    }

    pub fn account(&self) -> &str {
        self.inner.store.account()
    }

    /// The ledger key of our own stream record
    pub fn stream_key(&self) -> String {
        self.inner.identity.stream_key()
    }

    /// Accounts whose answers we have accepted
    pub fn viewers(&self) -> Vec<AccountId> {
        self.inner.poller.viewers().list()
    }

    /// Stream keys our accepted viewers re-offer under
    pub fn relays(&self) -> Vec<String> {
        self.inner.shared.lock().relays.clone()
    }

    /// The URL a viewer opens to watch our stream
    pub fn share_url(&self, base: &Url) -> Url {
        share_url(base, &self.inner.identity)
    }

    /// Local capture is available
    pub fn init_video(&self, media: MediaStreamId) -> Result<(), SessionError> {
        self.inner
            .shared
            .lock()
            .apply(Transition::VideoReady { media })
    }

    /// Drop local capture, stopping our stream first if one is running
    pub async fn stop_video(&self) -> Result<(), SessionError> {
        if self.state().is_streaming() {
            self.stop_stream().await?;
        }
        self.inner.shared.lock().apply(Transition::VideoStopped)
    }

    /// Start offering our media under our own stream key
    ///
    /// Any previous offering connection is retired, and closed once the new
    ///  offer is on the ledger. `is_new` resets the whole record (first start
    ///  or restream) instead of replacing only the offer.
    pub async fn start_stream(&self, is_new: bool) -> Result<(), SessionError> {
        self.start_offering(is_new, None).await
    }

    /// Start a stream, or with `continuing` set, re-offer within that stream
    ///
    /// A re-offer whose stream was stopped in the meantime does nothing. The
    ///  check shares the lock that moves the state, so a concurrent stop
    ///  cannot be undone by it.
    async fn start_offering(
        &self,
        is_new: bool,
        continuing: Option<&Ticket>,
    ) -> Result<(), SessionError> {
        let handle = self.inner.connector.connect()?;
        let connection = handle.connection.clone();

        let prepared = {
            let mut shared = self.inner.shared.lock();
            if continuing.is_some_and(|stream| !stream.is_current()) {
                Ok(None)
            } else {
                shared.apply(Transition::StreamStarted).map(|()| {
                    let ticket = self.inner.streams.advance();
                    self.inner.offer_descriptions.invalidate();
                    if let Some(previous) = shared.outgoing.take() {
                        shared.retiring.push(previous.connection);
                    }
                    shared.outgoing = Some(Outgoing {
                        connection: connection.clone(),
                    });
                    let media = shared.state.media().cloned();
                    Some((ticket, media))
                })
            }
        };
        let (ticket, media) = match prepared {
            Ok(Some(prepared)) => prepared,
            Ok(None) => {
                tracing::debug!(stream_key = %self.stream_key(), "stream stopped, not re-offering");
                connection.close().await;
                return Ok(());
            }
            Err(e) => {
                connection.close().await;
                return Err(e);
            }
        };

        tracing::info!(
            stream_key = %self.stream_key(),
            stream = ticket.value(),
            is_new,
            "starting stream"
        );
        let offered = self
            .offer_on(&connection, handle.events, &ticket, media.as_ref(), is_new)
            .await;
        if let Err(e) = offered {
            tracing::warn!(stream_key = %self.stream_key(), "failed to create offer: {}", e);
            self.abandon_stream(&ticket, connection).await;
            return Err(e);
        }
        Ok(())
    }

    async fn offer_on(
        &self,
        connection: &Arc<dyn PeerConnection>,
        events: flume::Receiver<PeerEvent>,
        stream: &Ticket,
        media: Option<&MediaStreamId>,
        is_new: bool,
    ) -> Result<(), SessionError> {
        if let Some(media) = media {
            connection.add_stream(media).await?;
        }
        self.spawn_offer_pump(connection.clone(), events, stream.clone(), is_new);
        connection.create_offer().await?;
        Ok(())
    }

    /// Undo a stream whose offer could not be created
    async fn abandon_stream(&self, stream: &Ticket, connection: Arc<dyn PeerConnection>) {
        let halted = {
            let mut shared = self.inner.shared.lock();
            if stream.is_current() {
                match self.halt_stream(&mut shared) {
                    Ok(connections) => Some(connections),
                    Err(e) => {
                        tracing::warn!("{}", e);
                        None
                    }
                }
            } else {
                None
            }
        };
        connection.close().await;
        if let Some(connections) = halted {
            self.finish_stop(connections).await;
        }
    }

    /// Stop offering, close every connection we offered on, and clear our
    ///  offer so the mailbox is free
    ///
    /// Waits until the clear lands, retrying on failure, unless a new stream
    ///  is started meanwhile.
    pub async fn stop_stream(&self) -> Result<(), SessionError> {
        let connections = {
            let mut shared = self.inner.shared.lock();
            if !shared.state.is_streaming() {
                return Ok(());
            }
            self.halt_stream(&mut shared)?
        };
        self.finish_stop(connections).await;
        Ok(())
    }

    /// Leave the streaming state, handing back every connection to close
    fn halt_stream(
        &self,
        shared: &mut Shared,
    ) -> Result<Vec<Arc<dyn PeerConnection>>, SessionError> {
        shared.apply(Transition::StreamStopped)?;
        self.inner.streams.invalidate();
        shared.polling = None;
        let mut connections: Vec<Arc<dyn PeerConnection>> = Vec::new();
        connections.extend(shared.outgoing.take().map(|outgoing| outgoing.connection));
        connections.append(&mut shared.retiring);
        connections.append(&mut shared.serving);
        Ok(connections)
    }

    async fn finish_stop(&self, connections: Vec<Arc<dyn PeerConnection>>) {
        tracing::info!(stream_key = %self.stream_key(), "stopping stream");
        close_all(connections).await;

        let ticket = self.inner.offer_descriptions.advance();
        self.inner.offers.withdraw(&ticket).await;
    }

    /// Answer the stream behind a share URL
    pub async fn watch_url(&self, url: &Url) -> Result<(), SessionError> {
        let remote = parse_share_url(url)?.ok_or(SessionError::NoShareKey)?;
        self.watch(remote).await
    }

    /// Answer the offer currently on `remote`'s stream record
    ///
    /// Fails with `NoOffer` if the broadcaster is not streaming. Once the
    ///  answer is in, media playback moves the session to `Receiving` and
    ///  from there straight into restreaming under our own key.
    pub async fn watch(&self, remote: KeyPair) -> Result<(), SessionError> {
        let stream_key = remote.stream_key();
        let record = self
            .inner
            .store
            .read(&stream_key)
            .await?
            .ok_or(SessionError::NoOffer)?;
        let offer_blob = record.offer.clone().ok_or(SessionError::NoOffer)?;
        let offer: SessionDescription = SealedBox::for_stream(&remote)
            .open_json(&offer_blob)
            .map_err(SignalingError::from)?;

        let handle = self.inner.connector.connect()?;
        let connection = handle.connection.clone();
        let answer_state = Arc::new(AnswerState::new());
        let publisher = AnswerPublisher::new(
            self.inner.store.clone(),
            &remote,
            offer_blob,
            record.generation,
            &self.inner.identity,
            answer_state.clone(),
            self.inner.config.settle_delay,
        );

        let prepared = {
            let mut shared = self.inner.shared.lock();
            shared
                .apply(Transition::RemoteOfferFound {
                    from: record.owner_id.clone(),
                })
                .map(|()| {
                    self.inner.answer_descriptions.invalidate();
                    shared.incoming = Some(Incoming {
                        connection: connection.clone(),
                        state: answer_state,
                    });
                })
        };
        if let Err(e) = prepared {
            connection.close().await;
            return Err(e);
        }

        tracing::info!(stream_key = %stream_key, from = %record.owner_id, "answering remote offer");
        self.spawn_answer_pump(handle.events, publisher);
        connection.create_answer(offer).await?;
        Ok(())
    }

    /// Stop watching a remote stream, ending any restream of it
    pub async fn leave(&self) -> Result<(), SessionError> {
        if matches!(self.state(), SessionState::Restreaming { .. }) {
            self.stop_stream().await?;
        }
        let connection = {
            let mut shared = self.inner.shared.lock();
            shared.apply(Transition::Left)?;
            self.inner.answer_descriptions.invalidate();
            shared.incoming.take().map(|incoming| incoming.connection)
        };
        if let Some(connection) = connection {
            connection.close().await;
        }
        Ok(())
    }

    /// Stop everything this session runs
    pub async fn shutdown(&self) -> Result<(), SessionError> {
        let state = self.state();
        if state.is_watching() {
            self.leave().await?;
        } else if state.is_streaming() {
            self.stop_stream().await?;
        }
        if matches!(self.state(), SessionState::LocalVideoReady { .. }) {
            self.stop_video().await?;
        }
        Ok(())
    }

    fn spawn_offer_pump(
        &self,
        connection: Arc<dyn PeerConnection>,
        events: flume::Receiver<PeerEvent>,
        stream: Ticket,
        is_new: bool,
    ) {
        let session = self.clone();
        tokio::spawn(async move {
            while let Ok(event) = events.recv_async().await {
                if !stream.is_current() {
                    break;
                }
                if let PeerEvent::LocalDescription(description) = event {
                    session.spawn_offer_publish(
                        connection.clone(),
                        stream.clone(),
                        description,
                        is_new,
                    );
                }
            }
        });
    }

    fn spawn_offer_publish(
        &self,
        connection: Arc<dyn PeerConnection>,
        stream: Ticket,
        description: SessionDescription,
        is_new: bool,
    ) {
        let ticket = self.inner.offer_descriptions.advance();
        let session = self.clone();
        tokio::spawn(async move {
            let outcome = session
                .inner
                .offers
                .publish(&ticket, &description, is_new)
                .await;
            if let OfferOutcome::Published { .. } = outcome {
                session.on_offer_published(stream, connection);
            }
        });
    }

    fn on_offer_published(&self, stream: Ticket, connection: Arc<dyn PeerConnection>) {
        let (retired, start_polling) = {
            let mut shared = self.inner.shared.lock();
            if !stream.is_current() {
                return;
            }
            if let Err(e) = shared.apply(Transition::OfferPublished) {
                tracing::warn!("offer published in unexpected state: {}", e);
                return;
            }
            let retired = std::mem::take(&mut shared.retiring);
            let start_polling = shared.polling != Some(stream.value());
            if start_polling {
                shared.polling = Some(stream.value());
            }
            (retired, start_polling)
        };
        if !retired.is_empty() {
            tracing::debug!(count = retired.len(), "closing retired connections");
            tokio::spawn(close_all(retired));
        }
        if start_polling {
            self.spawn_poller(stream, connection);
        }
    }

    fn spawn_poller(&self, stream: Ticket, connection: Arc<dyn PeerConnection>) {
        let session = self.clone();
        tokio::spawn(async move {
            if let PollOutcome::Accepted(accepted) =
                session.inner.poller.run(&stream, &connection).await
            {
                session
                    .on_answer_accepted(stream, connection, accepted)
                    .await;
            }
        });
    }

    /// Keep serving the accepted viewer and re-offer for the next one
    fn on_answer_accepted(
        &self,
        stream: Ticket,
        connection: Arc<dyn PeerConnection>,
        accepted: AcceptedAnswer,
    ) -> BoxFuture<'static, ()> {
        let session = self.clone();
        async move {
            let restart = {
                let mut shared = session.inner.shared.lock();
                if let Some(relay) = &accepted.restream {
                    let key = relay.stream_key();
                    if !shared.relays.contains(&key) {
                        shared.relays.push(key);
                    }
                }
                let is_outgoing = shared
                    .outgoing
                    .as_ref()
                    .is_some_and(|outgoing| Arc::ptr_eq(&outgoing.connection, &connection));
                if is_outgoing {
                    shared.outgoing = None;
                }
                shared.serving.push(connection);
                stream.is_current()
            };
            tracing::info!(viewer = %accepted.viewer, "serving viewer");
            if restart {
                if let Err(e) = session.start_offering(false, Some(&stream)).await {
                    tracing::warn!("failed to re-offer after accepting a viewer: {}", e);
                }
            }
        }
        .boxed()
    }

    fn spawn_answer_pump(&self, events: flume::Receiver<PeerEvent>, publisher: AnswerPublisher<L>) {
        let session = self.clone();
        tokio::spawn(async move {
            let mut media = None;
            while let Ok(event) = events.recv_async().await {
                let state = publisher.state();
                if state.is_bad_offer() || !session.inner.shared.lock().is_current_incoming(state) {
                    break;
                }
                match event {
                    PeerEvent::LocalDescription(description) => {
                        session.spawn_answer_publish(publisher.clone(), description);
                    }
                    PeerEvent::Track(stream) => media = Some(stream),
                    PeerEvent::Playing => {
                        let stream = media
                            .clone()
                            .unwrap_or_else(|| MediaStreamId("remote".to_string()));
                        session.on_playing(state, stream).await;
                    }
                }
            }
        });
    }

    fn spawn_answer_publish(&self, publisher: AnswerPublisher<L>, description: SessionDescription) {
        let ticket = self.inner.answer_descriptions.advance();
        let session = self.clone();
        tokio::spawn(async move {
            if let AnswerOutcome::BadOffer(reason) = publisher.publish(&ticket, &description).await {
                tracing::info!("abandoning handshake: {}", reason);
                session.stop_answering(publisher.state()).await;
            }
        });
    }

    /// Abort a lost handshake: close its connection and forget it
    async fn stop_answering(&self, state: &Arc<AnswerState>) {
        let connection = {
            let mut shared = self.inner.shared.lock();
            if !shared.is_current_incoming(state) {
                return;
            }
            self.inner.answer_descriptions.invalidate();
            if matches!(shared.state, SessionState::ConnectingToRemote { .. }) {
                if let Err(e) = shared.apply(Transition::HandshakeAborted) {
                    tracing::warn!("{}", e);
                }
            }
            shared.incoming.take().map(|incoming| incoming.connection)
        };
        if let Some(connection) = connection {
            connection.close().await;
        }
    }

    async fn on_playing(&self, state: &Arc<AnswerState>, media: MediaStreamId) {
        let restream = {
            let mut shared = self.inner.shared.lock();
            if !shared.is_current_incoming(state) {
                return;
            }
            state.mark_playing();
            if state.is_bad_offer() {
                false
            } else {
                match shared.apply(Transition::MediaFlowing { media }) {
                    Ok(()) => true,
                    Err(e) => {
                        tracing::warn!("{}", e);
                        false
                    }
                }
            }
        };
        if restream {
            tracing::info!(stream_key = %self.stream_key(), "media flowing, restreaming");
            if let Err(e) = self.start_stream(true).await {
                tracing::warn!("failed to start restream: {}", e);
            }
        }
    }
}
