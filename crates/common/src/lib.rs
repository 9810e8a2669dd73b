/**
 * Stream identities and sealed payloads.
 *  - X25519 key pairs and their persistence seam
 *  - Authenticated encryption of signaling payloads
 */
pub mod crypto;
/**
 * The ledger contract surface: one view method,
 *  three change methods, and an in-memory
 *  implementation that enforces the contract.
 */
pub mod ledger;
/**
 * The session controller and its state machine.
 *  Orchestrates the signaling loops against
 *  peer connections.
 */
pub mod session;
/**
 * Retrying offer/answer loops over the
 *  single-slot ledger mailbox.
 */
pub mod signaling;
/**
 * In-process fakes for integration tests.
 */
pub mod testkit;
/**
 * The peer-connection collaborator interface.
 */
pub mod transport;
/**
 * Helper for reporting build version information.
 */
pub mod version;

pub mod prelude {
    pub use crate::crypto::{EncryptedBlob, KeyPair, PublicKey, SealedBox};
    pub use crate::ledger::{Ledger, LedgerError, MemoryLedger, SignalingRecord};
    pub use crate::session::{Session, SessionError, SessionState};
    pub use crate::signaling::{SignalingConfig, SignalingError};
    pub use crate::transport::{MediaStreamId, PeerConnection, PeerConnector, SessionDescription};
    pub use crate::version::build_info;
}
