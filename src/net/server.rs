//! Accept loop for the processing transport.
//!
//! # Responsibilities
//! - Accept connections from the bounded listener
//! - Run one [`StreamProcessor`] stream per connection on its own task
//! - Stop accepting on shutdown; open streams see the same signal as a cancellation

use std::sync::Arc;

use crate::extproc::processor::StreamProcessor;
use crate::lifecycle::Shutdown;
use crate::net::codec::{JsonLinesStream, DEFAULT_MAX_FRAME_BYTES};
use crate::net::connection::StreamTracker;
use crate::net::listener::{Listener, ListenerError};

pub struct ProcessingServer {
    processor: Arc<StreamProcessor>,
    tracker: StreamTracker,
    max_frame_bytes: usize,
}

impl ProcessingServer {
    pub fn new(processor: StreamProcessor) -> Self {
        Self {
            processor: Arc::new(processor),
            tracker: StreamTracker::new(),
            max_frame_bytes: DEFAULT_MAX_FRAME_BYTES,
        }
    }

    pub fn with_max_frame_bytes(mut self, max_frame_bytes: usize) -> Self {
        self.max_frame_bytes = max_frame_bytes;
        self
    }

    pub fn with_tracker(mut self, tracker: StreamTracker) -> Self {
        self.tracker = tracker;
        self
    }

    pub fn tracker(&self) -> &StreamTracker {
        &self.tracker
    }

    /// Serve until `shutdown` fires.
    pub async fn run(&self, listener: Listener, shutdown: &Shutdown) -> Result<(), ListenerError> {
        let mut stop = shutdown.subscribe();
        if shutdown.is_triggered() {
            return Ok(());
        }

        loop {
            let accepted = tokio::select! {
                biased;
                _ = stop.recv() => {
                    tracing::info!("Stopped accepting streams");
                    return Ok(());
                }
                accepted = listener.accept() => accepted,
            };

            let (socket, peer, permit) = match accepted {
                Ok(conn) => conn,
                Err(ListenerError::Accept(e)) => {
                    tracing::warn!(error = %e, "Accept failed");
                    continue;
                }
                Err(e) => return Err(e),
            };

            if let Err(e) = socket.set_nodelay(true) {
                tracing::debug!(peer_addr = %peer, error = %e, "Failed to set TCP_NODELAY");
            }

            // Subscribe before checking the flag so a concurrent trigger is
            // seen by one or the other.
            let cancel = shutdown.subscribe();
            if shutdown.is_triggered() {
                tracing::info!(peer_addr = %peer, "Stopped accepting streams, dropping connection");
                return Ok(());
            }

            let processor = Arc::clone(&self.processor);
            let guard = self.tracker.track();
            let max_frame_bytes = self.max_frame_bytes;

            tokio::spawn(async move {
                let _permit = permit;
                let stream_id = guard.id();
                let mut stream = JsonLinesStream::new(socket)
                    .with_max_frame_bytes(max_frame_bytes)
                    .with_shutdown(cancel);

                tracing::debug!(stream_id = %stream_id, peer_addr = %peer, "Stream opened");
                match processor.process(&mut stream).await {
                    Ok(()) => tracing::debug!(stream_id = %stream_id, "Stream finished"),
                    Err(e) => tracing::warn!(stream_id = %stream_id, peer_addr = %peer, error = %e, "Stream failed"),
                }
                drop(guard);
            });
        }
    }
}
