use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::crypto::EncryptedBlob;
use crate::ledger::{AnswerEntry, AnswerSubmission, Ledger, LedgerError, SignalingRecord};

/// The ledger methods a fault can be scripted for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LedgerCall {
    Get,
    Offer,
    Answer,
    TakeAnswer,
}

#[derive(Debug, Clone)]
enum Fault {
    Network,
    Reject(String),
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum FaultyLedgerError {
    #[error("injected network failure")]
    Injected,
    #[error("inner ledger error: {0}")]
    Inner(String),
}

/// A ledger wrapper that fails scripted calls and records every call made
///
/// Scripted faults are consumed in order; once a call's queue is empty,
///  calls pass through to the wrapped ledger.
#[derive(Debug, Clone)]
pub struct FaultyLedger<L: Ledger> {
    inner: L,
    state: Arc<Mutex<FaultState>>,
}

#[derive(Debug, Default)]
struct FaultState {
    faults: HashMap<LedgerCall, VecDeque<Fault>>,
    calls: Vec<(LedgerCall, String)>,
}

impl<L: Ledger> FaultyLedger<L> {
    pub fn new(inner: L) -> Self {
        Self {
            inner,
            state: Arc::new(Mutex::new(FaultState::default())),
        }
    }

    pub fn inner(&self) -> &L {
        &self.inner
    }

    /// Fail the next `times` calls of `call` as unreachable
    pub fn fail_next(&self, call: LedgerCall, times: usize) {
        let mut state = self.state.lock();
        let queue = state.faults.entry(call).or_default();
        queue.extend(std::iter::repeat(Fault::Network).take(times));
    }

    /// Reject the next `times` calls of `call` as a contract precondition failure
    pub fn reject_next(&self, call: LedgerCall, times: usize, reason: &str) {
        let mut state = self.state.lock();
        let queue = state.faults.entry(call).or_default();
        queue.extend(std::iter::repeat(Fault::Reject(reason.to_string())).take(times));
    }

    /// Every call made so far, with the calling account (`""` for reads)
    pub fn calls(&self) -> Vec<(LedgerCall, String)> {
        self.state.lock().calls.clone()
    }

    pub fn count(&self, call: LedgerCall) -> usize {
        self.state
            .lock()
            .calls
            .iter()
            .filter(|(made, _)| *made == call)
            .count()
    }

    fn enter(&self, call: LedgerCall, caller: &str) -> Result<(), LedgerError<FaultyLedgerError>> {
        let mut state = self.state.lock();
        state.calls.push((call, caller.to_string()));
        match state.faults.get_mut(&call).and_then(|queue| queue.pop_front()) {
            Some(Fault::Network) => Err(LedgerError::Provider(FaultyLedgerError::Injected)),
            Some(Fault::Reject(reason)) => Err(LedgerError::Rejected(reason)),
            None => Ok(()),
        }
    }
}

fn wrap<E: std::fmt::Display>(e: LedgerError<E>) -> LedgerError<FaultyLedgerError> {
    match e {
        LedgerError::Provider(e) => LedgerError::Provider(FaultyLedgerError::Inner(e.to_string())),
        LedgerError::Rejected(reason) => LedgerError::Rejected(reason),
    }
}

#[async_trait]
impl<L: Ledger> Ledger for FaultyLedger<L> {
    type Error = FaultyLedgerError;

    async fn get(&self, key: &str) -> Result<Option<SignalingRecord>, LedgerError<Self::Error>> {
        self.enter(LedgerCall::Get, "")?;
        self.inner.get(key).await.map_err(wrap)
    }

    async fn offer(
        &self,
        caller: &str,
        key: &str,
        offer: Option<EncryptedBlob>,
        is_new: bool,
    ) -> Result<u64, LedgerError<Self::Error>> {
        self.enter(LedgerCall::Offer, caller)?;
        self.inner.offer(caller, key, offer, is_new).await.map_err(wrap)
    }

    async fn answer(
        &self,
        caller: &str,
        key: &str,
        submission: AnswerSubmission,
        is_new: bool,
    ) -> Result<(), LedgerError<Self::Error>> {
        self.enter(LedgerCall::Answer, caller)?;
        self.inner
            .answer(caller, key, submission, is_new)
            .await
            .map_err(wrap)
    }

    async fn take_answer(
        &self,
        caller: &str,
        key: &str,
        answer: AnswerEntry,
    ) -> Result<(), LedgerError<Self::Error>> {
        self.enter(LedgerCall::TakeAnswer, caller)?;
        self.inner.take_answer(caller, key, answer).await.map_err(wrap)
    }
}
