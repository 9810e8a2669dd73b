mod memory;
mod provider;

pub use memory::{MemoryLedger, MemoryLedgerError};
pub use provider::{AccountId, AnswerEntry, AnswerSubmission, Ledger, LedgerError, SignalingRecord};
