//! The seam between the scheduler and the local/remote execution backends.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::task::{Task, TaskResult};

/// A cooperatively-checked cancellation flag shared between the daemon,
/// the scheduler, and the executors. Once cancelled it never resets.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    flag: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// Whether two handles share the same underlying flag.
    pub fn same(&self, other: &CancellationToken) -> bool {
        Arc::ptr_eq(&self.flag, &other.flag)
    }
}

/// Executes one task to completion.
///
/// Implementations block (process wait, RPC stream) and must never be
/// called while holding scheduler state; the scheduler guarantees that.
/// Executors observe `cancel` at their suspension points and return a
/// FAILED result with a `CANCELLED` error when it trips mid-flight.
pub trait TaskExecutor: Send + Sync {
    fn execute(&self, task: &Task, cancel: &CancellationToken) -> TaskResult;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_trips_once() {
        let token = CancellationToken::new();
        assert!(!token.is_cancelled());
        let clone = token.clone();
        clone.cancel();
        assert!(token.is_cancelled());
    }
}
