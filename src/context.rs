//! Request context carrying cancellation and deadline
//!
//! Every entry point of the engine takes a [`RequestContext`]. Blocking steps
//! (database round-trips, paymail and broadcaster calls) call [`RequestContext::check`]
//! before they start, so a cancelled request aborts before anything is persisted.

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::{Duration, Instant};

use crate::errors::{WalletError, WalletResult};

/// Cancellation flag plus optional deadline shared by one request
#[derive(Debug, Clone)]
pub struct RequestContext {
    cancelled: Arc<AtomicBool>,
    deadline: Option<Instant>,
}

impl RequestContext {
    /// Context without a deadline
    pub fn new() -> Self {
        Self {
            cancelled: Arc::new(AtomicBool::new(false)),
            deadline: None,
        }
    }

    /// Context that expires after `timeout`
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            cancelled: Arc::new(AtomicBool::new(false)),
            deadline: Some(Instant::now() + timeout),
        }
    }

    /// Create a pair of (context, handle) where the handle can cancel the request
    pub fn create_pair() -> (Self, CancellationHandle) {
        let ctx = Self::new();
        let handle = CancellationHandle {
            cancelled: ctx.cancelled.clone(),
        };
        (ctx, handle)
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Relaxed)
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Relaxed);
    }

    /// Time left until the deadline, `None` when there is no deadline
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|deadline| deadline.saturating_duration_since(Instant::now()))
    }

    /// Fail with `RequestCancelled` if the request was cancelled or timed out
    pub fn check(&self, step: &str) -> WalletResult<()> {
        if self.is_cancelled() {
            return Err(WalletError::RequestCancelled(format!(
                "cancelled before {step}"
            )));
        }
        if let Some(deadline) = self.deadline {
            if Instant::now() >= deadline {
                return Err(WalletError::RequestCancelled(format!(
                    "deadline exceeded before {step}"
                )));
            }
        }
        Ok(())
    }

    /// Shorten `timeout` to whatever is left of the deadline
    pub fn bounded(&self, timeout: Duration) -> Duration {
        match self.remaining() {
            Some(remaining) => remaining.min(timeout),
            None => timeout,
        }
    }
}

impl Default for RequestContext {
    fn default() -> Self {
        Self::new()
    }
}

/// Handle for cancelling a request from another task
#[derive(Debug, Clone)]
pub struct CancellationHandle {
    cancelled: Arc<AtomicBool>,
}

impl CancellationHandle {
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Relaxed)
    }
}
