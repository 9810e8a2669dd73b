/// In-process fakes for signaling integration tests
///
/// [`MockNetwork`] stands in for the media transport and [`FaultyLedger`]
/// wraps any ledger to inject scripted failures.
///
/// # Example
///
/// ```rust,ignore
/// use common::ledger::MemoryLedger;
/// use common::testkit::{FaultyLedger, LedgerCall, MockNetwork};
///
/// #[tokio::test]
/// async fn test_offer_survives_a_flaky_ledger() {
///     let network = MockNetwork::new();
///     let ledger = FaultyLedger::new(MemoryLedger::new());
///
///     // the first two offer writes never reach the ledger
///     ledger.fail_next(LedgerCall::Offer, 2);
///
///     // ... drive a session over `ledger` and `network.connector()`
/// }
/// ```
mod ledger;
mod network;

pub use ledger::{FaultyLedger, FaultyLedgerError, LedgerCall};
pub use network::{MockConnector, MockNetwork, MockPeerConnection};
