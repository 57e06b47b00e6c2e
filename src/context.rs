//! Per-request deadline and cancellation.
//!
//! A [`RequestContext`] travels with every engine, extractor and storage call
//! made on behalf of one request. Cancelling it (or letting its deadline pass)
//! stops the work started for that request only; clones share the flag, fresh
//! contexts do not.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use crate::error::{SearchError, SearchResult};

#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    deadline: Option<Instant>,
    cancelled: Arc<AtomicBool>,
}

impl RequestContext {
    /// Context without deadline, used by the reindexer and CLI commands.
    pub fn background() -> Self {
        Self::default()
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            deadline: Some(Instant::now() + timeout),
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Time left before the deadline, `None` when unbounded.
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|d| d.saturating_duration_since(Instant::now()))
    }

    /// Caps a configured timeout by the time left on this context.
    pub fn clamp_timeout(&self, configured: Duration) -> Duration {
        match self.remaining() {
            Some(left) => configured.min(left),
            None => configured,
        }
    }

    /// Fails with [`SearchError::Cancelled`] once cancelled or past deadline.
    pub fn check(&self) -> SearchResult<()> {
        if self.is_cancelled() {
            return Err(SearchError::Cancelled("context cancelled".into()));
        }
        if let Some(left) = self.remaining()
            && left.is_zero()
        {
            return Err(SearchError::Cancelled("deadline exceeded".into()));
        }
        Ok(())
    }
}
