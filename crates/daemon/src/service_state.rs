use common::ledger::MemoryLedger;

/// Shared state of the ledger service
#[derive(Debug, Clone, Default)]
pub struct State {
    ledger: MemoryLedger,
}

impl State {
    pub fn new(ledger: MemoryLedger) -> Self {
        Self { ledger }
    }

    pub fn ledger(&self) -> &MemoryLedger {
        &self.ledger
    }
}
