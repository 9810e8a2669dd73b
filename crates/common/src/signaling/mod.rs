//! The signaling protocol over a single-slot ledger mailbox
//!
//! A broadcaster owns the `offer` field of its stream record; viewers race for
//! the single `answer` field. The pieces:
//!
//! - [`SignalingStore`]: typed calls against the ledger, no retries
//! - [`Generation`]: monotonic counters that make every retry loop notice
//!   when it has been superseded
//! - [`OfferPublisher`]: broadcaster side, writes the sealed offer until it lands
//! - [`AnswerPublisher`]: viewer side, writes the sealed answer and backs off
//!   for good once another viewer has won the slot
//! - [`AnswerPoller`]: broadcaster side, waits for an answer, applies it and
//!   frees the slot
//!
//! Ledger and network errors stop at these loops, where they turn into a
//! retry or an abort; nothing here propagates them as a crash.

use std::time::Duration;

mod answer;
mod generation;
mod offer;
mod poller;
mod store;

pub use answer::{AnswerOutcome, AnswerPublisher, AnswerState};
pub use generation::{Generation, Ticket};
pub use offer::{OfferOutcome, OfferPhase, OfferPublisher};
pub use poller::{AcceptedAnswer, AnswerPoller, PollOutcome, Viewers};
pub use store::SignalingStore;

use crate::crypto::{CryptoError, KeyError};
use crate::transport::TransportError;

/// Delay before publishing a fresh local description, letting ICE gathering settle
pub const DEFAULT_SETTLE_DELAY: Duration = Duration::from_millis(1000);
/// Interval between reads while waiting for an answer
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(1000);

/// Timing of the publish and poll loops
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SignalingConfig {
    /// Wait before every publish attempt, including retries
    pub settle_delay: Duration,
    /// Wait between answer polls
    pub poll_interval: Duration,
}

impl Default for SignalingConfig {
    fn default() -> Self {
        Self {
            settle_delay: DEFAULT_SETTLE_DELAY,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }
}

/// Errors surfaced by the signaling layer
#[derive(Debug, thiserror::Error)]
pub enum SignalingError {
    /// Bad key material. The only fatal error.
    #[error("key error: {0}")]
    Key(#[from] KeyError),
    /// A payload could not be opened; treated as "no usable message"
    #[error("decryption failed")]
    DecryptionFailed,
    #[error("payload error: {0}")]
    Payload(String),
    /// A ledger precondition failed
    #[error("contract rejected call: {0}")]
    ContractRejected(String),
    /// The ledger could not be reached
    #[error("network failure: {0}")]
    NetworkFailure(String),
    /// Another viewer won the answer slot, or the offer moved on
    #[error("bad offer: {0}")]
    BadOffer(String),
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),
}

impl SignalingError {
    /// Only broken key configuration stops a session for good
    pub fn is_fatal(&self) -> bool {
        matches!(self, SignalingError::Key(KeyError::InvalidKeyLength { .. }))
    }
}

impl From<CryptoError> for SignalingError {
    fn from(e: CryptoError) -> Self {
        match e {
            CryptoError::DecryptionFailed => SignalingError::DecryptionFailed,
            CryptoError::EncryptionFailed(msg) => SignalingError::Payload(msg),
            CryptoError::Payload(e) => SignalingError::Payload(e.to_string()),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_only_key_length_is_fatal() {
        let fatal = SignalingError::Key(KeyError::InvalidKeyLength {
            expected: 32,
            actual: 3,
        });
        assert!(fatal.is_fatal());
        assert!(!SignalingError::DecryptionFailed.is_fatal());
        assert!(!SignalingError::ContractRejected("x".into()).is_fatal());
        assert!(!SignalingError::NetworkFailure("x".into()).is_fatal());
        assert!(!SignalingError::BadOffer("x".into()).is_fatal());
    }

    #[test]
    fn test_decryption_errors_map_to_no_message() {
        let e: SignalingError = CryptoError::DecryptionFailed.into();
        assert!(matches!(e, SignalingError::DecryptionFailed));
    }
}
