//! Stream transport seam.
//!
//! [`ProcessingStream`] is what the [`StreamProcessor`](super::processor::StreamProcessor)
//! reads events from and writes responses to. The TCP adapter lives in
//! `net::codec`; [`ChannelStream`] is an in-process implementation used by
//! embedders and tests.

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::{broadcast, mpsc};

use crate::extproc::types::{ProcessingEvent, ProcessingResponse};

#[derive(Debug, Error)]
pub enum TransportError {
    /// The peer ended the stream.
    #[error("stream closed by peer")]
    Closed,

    /// The stream was cancelled locally (shutdown).
    #[error("stream cancelled")]
    Cancelled,

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed frame: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("frame exceeds {limit} bytes")]
    FrameTooLarge { limit: usize },
}

impl TransportError {
    /// Clean terminations are normal stream ends, not failures.
    pub fn is_clean(&self) -> bool {
        matches!(self, TransportError::Closed | TransportError::Cancelled)
    }
}

/// One bidirectional stream of phase events and responses.
#[async_trait]
pub trait ProcessingStream: Send {
    async fn recv(&mut self) -> Result<ProcessingEvent, TransportError>;

    async fn send(&mut self, response: ProcessingResponse) -> Result<(), TransportError>;

    /// Report a fatal protocol error to the peer before the stream ends.
    async fn fail(&mut self, _reason: &str) {}
}

/// Message observed by the peer of a [`ChannelStream`].
#[derive(Debug, Clone, PartialEq)]
pub enum Outbound {
    Response(ProcessingResponse),
    Error(String),
}

/// In-process stream backed by tokio channels.
pub struct ChannelStream {
    events: mpsc::Receiver<ProcessingEvent>,
    responses: mpsc::Sender<Outbound>,
    shutdown: Option<broadcast::Receiver<()>>,
}

/// The transport side of a [`ChannelStream`].
pub struct StreamPeer {
    events: mpsc::Sender<ProcessingEvent>,
    responses: mpsc::Receiver<Outbound>,
}

impl ChannelStream {
    /// Create a connected stream/peer pair.
    pub fn pair(buffer: usize) -> (ChannelStream, StreamPeer) {
        let (event_tx, event_rx) = mpsc::channel(buffer);
        let (response_tx, response_rx) = mpsc::channel(buffer);
        (
            ChannelStream {
                events: event_rx,
                responses: response_tx,
                shutdown: None,
            },
            StreamPeer {
                events: event_tx,
                responses: response_rx,
            },
        )
    }

    /// Treat a shutdown broadcast as cancellation.
    pub fn with_shutdown(mut self, shutdown: broadcast::Receiver<()>) -> Self {
        self.shutdown = Some(shutdown);
        self
    }
}

#[async_trait]
impl ProcessingStream for ChannelStream {
    async fn recv(&mut self) -> Result<ProcessingEvent, TransportError> {
        tokio::select! {
            _ = cancelled(&mut self.shutdown) => Err(TransportError::Cancelled),
            event = self.events.recv() => event.ok_or(TransportError::Closed),
        }
    }

    async fn send(&mut self, response: ProcessingResponse) -> Result<(), TransportError> {
        self.responses
            .send(Outbound::Response(response))
            .await
            .map_err(|_| TransportError::Closed)
    }

    async fn fail(&mut self, reason: &str) {
        let _ = self.responses.send(Outbound::Error(reason.to_string())).await;
    }
}

impl StreamPeer {
    /// Send an event to the processor. False if the processor has gone away.
    pub async fn send(&self, event: ProcessingEvent) -> bool {
        self.events.send(event).await.is_ok()
    }

    /// Next outbound message, `None` once the processor has finished.
    pub async fn next(&mut self) -> Option<Outbound> {
        self.responses.recv().await
    }

    /// Next response. `None` if the processor finished or reported an error.
    pub async fn response(&mut self) -> Option<ProcessingResponse> {
        match self.next().await? {
            Outbound::Response(response) => Some(response),
            Outbound::Error(_) => None,
        }
    }

    /// End the stream from the transport side.
    pub fn close(self) -> mpsc::Receiver<Outbound> {
        self.responses
    }

    /// The raw event sender and response receiver.
    pub fn into_parts(self) -> (mpsc::Sender<ProcessingEvent>, mpsc::Receiver<Outbound>) {
        (self.events, self.responses)
    }
}

/// Resolves when the shutdown signal fires; never resolves without one.
pub(crate) async fn cancelled(shutdown: &mut Option<broadcast::Receiver<()>>) {
    match shutdown {
        Some(rx) => {
            let _ = rx.recv().await;
        }
        None => std::future::pending().await,
    }
}
