use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// A monotonic counter shared by everything that can supersede a loop
///
/// Each retry loop holds a [`Ticket`] taken when it started and checks it
///  before every side-effecting action. Advancing the counter is the only
///  cancellation signal: a loop whose ticket is stale exits without writing.
#[derive(Debug, Clone, Default)]
pub struct Generation {
    counter: Arc<AtomicU64>,
}

/// One loop's claim on a [`Generation`]
#[derive(Debug, Clone)]
pub struct Ticket {
    counter: Arc<AtomicU64>,
    value: u64,
}

impl Generation {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a new generation, superseding every outstanding ticket
    pub fn advance(&self) -> Ticket {
        let value = self.counter.fetch_add(1, Ordering::SeqCst) + 1;
        Ticket {
            counter: self.counter.clone(),
            value,
        }
    }

    /// Supersede every outstanding ticket without starting anything new
    pub fn invalidate(&self) {
        self.counter.fetch_add(1, Ordering::SeqCst);
    }

    pub fn current(&self) -> u64 {
        self.counter.load(Ordering::SeqCst)
    }
}

impl Ticket {
    pub fn is_current(&self) -> bool {
        self.counter.load(Ordering::SeqCst) == self.value
    }

    pub fn value(&self) -> u64 {
        self.value
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_advance_supersedes_previous_ticket() {
        let generation = Generation::new();
        let first = generation.advance();
        assert!(first.is_current());

        let second = generation.advance();
        assert!(!first.is_current());
        assert!(second.is_current());
        assert!(second.value() > first.value());
    }

    #[test]
    fn test_invalidate_cancels_everything() {
        let generation = Generation::new();
        let ticket = generation.advance();
        let clone = ticket.clone();
        generation.invalidate();
        assert!(!ticket.is_current());
        assert!(!clone.is_current());
        assert_eq!(generation.current(), 2);
    }
}
