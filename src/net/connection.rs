//! Stream lifecycle tracking.
//!
//! # Responsibilities
//! - Generate unique stream IDs for tracing
//! - Count open streams for the admin API and graceful shutdown

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Only uniqueness is needed, so relaxed ordering suffices.
static STREAM_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StreamId(u64);

impl StreamId {
    pub fn new() -> Self {
        Self(STREAM_ID_COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl Default for StreamId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for StreamId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "stream-{}", self.0)
    }
}

/// Counts open streams. Cheap to clone; clones share the count.
#[derive(Debug, Clone, Default)]
pub struct StreamTracker {
    active: Arc<AtomicU64>,
}

impl StreamTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a new stream. The count drops when the guard does.
    pub fn track(&self) -> StreamGuard {
        self.active.fetch_add(1, Ordering::SeqCst);
        StreamGuard {
            active: Arc::clone(&self.active),
            id: StreamId::new(),
        }
    }

    pub fn active_count(&self) -> u64 {
        self.active.load(Ordering::SeqCst)
    }

    /// Wait until every stream has finished or `timeout` elapses.
    /// Returns true if all streams drained.
    pub async fn wait_for_drain(&self, timeout: Duration) -> bool {
        let drained = async {
            while self.active_count() > 0 {
                tokio::time::sleep(Duration::from_millis(50)).await;
            }
        };
        tokio::time::timeout(timeout, drained).await.is_ok()
    }
}

#[derive(Debug)]
pub struct StreamGuard {
    active: Arc<AtomicU64>,
    id: StreamId,
}

impl StreamGuard {
    pub fn id(&self) -> StreamId {
        self.id
    }
}

impl Drop for StreamGuard {
    fn drop(&mut self) {
        self.active.fetch_sub(1, Ordering::SeqCst);
        tracing::trace!(stream_id = %self.id, "Stream closed");
    }
}
