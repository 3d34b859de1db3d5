//! JSON-lines framing of the processing protocol.
//!
//! Each inbound line is one [`ProcessingEvent`], each outbound line one
//! [`ProcessingResponse`]. A protocol failure is reported with a single
//! `{"error": {...}}` line before the connection closes.
//!
//! Inbound lines are capped at `max_frame_bytes`; a longer line fails the
//! stream before it is buffered in full.

use async_trait::async_trait;
use serde::Serialize;
use tokio::io::{
    AsyncBufRead, AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader, ReadHalf,
    WriteHalf,
};
use tokio::sync::broadcast;

use crate::extproc::transport::{cancelled, ProcessingStream, TransportError};
use crate::extproc::types::{ProcessingEvent, ProcessingResponse};

pub const DEFAULT_MAX_FRAME_BYTES: usize = 4 * 1024 * 1024;

/// Error frame written on protocol failure.
#[derive(Debug, Serialize)]
struct ErrorFrame<'a> {
    error: ErrorBody<'a>,
}

#[derive(Debug, Serialize)]
struct ErrorBody<'a> {
    code: &'static str,
    message: &'a str,
}

pub struct JsonLinesStream<S> {
    reader: BufReader<ReadHalf<S>>,
    writer: WriteHalf<S>,
    line: Vec<u8>,
    max_frame_bytes: usize,
    shutdown: Option<broadcast::Receiver<()>>,
}

impl<S> JsonLinesStream<S>
where
    S: AsyncRead + AsyncWrite + Send,
{
    pub fn new(io: S) -> Self {
        let (reader, writer) = tokio::io::split(io);
        Self {
            reader: BufReader::new(reader),
            writer,
            line: Vec::new(),
            max_frame_bytes: DEFAULT_MAX_FRAME_BYTES,
            shutdown: None,
        }
    }

    /// Treat a shutdown broadcast as cancellation of the stream.
    pub fn with_shutdown(mut self, shutdown: broadcast::Receiver<()>) -> Self {
        self.shutdown = Some(shutdown);
        self
    }

    pub fn with_max_frame_bytes(mut self, max_frame_bytes: usize) -> Self {
        self.max_frame_bytes = max_frame_bytes;
        self
    }

    async fn write_line<T: Serialize>(&mut self, value: &T) -> Result<(), TransportError> {
        let mut line = serde_json::to_vec(value)?;
        line.push(b'\n');
        self.writer.write_all(&line).await?;
        self.writer.flush().await?;
        Ok(())
    }
}

/// Read one line into `line`, reading at most one byte past `limit`.
/// Returns the number of bytes read; zero means end of stream.
async fn read_line_bounded<R>(reader: &mut R, line: &mut Vec<u8>, limit: usize) -> Result<usize, TransportError>
where
    R: AsyncBufRead + Unpin,
{
    let read = reader.take(limit as u64 + 1).read_until(b'\n', line).await?;
    let content = line.len() - usize::from(line.ends_with(b"\n"));
    if content > limit {
        return Err(TransportError::FrameTooLarge { limit });
    }
    Ok(read)
}

#[async_trait]
impl<S> ProcessingStream for JsonLinesStream<S>
where
    S: AsyncRead + AsyncWrite + Send,
{
    async fn recv(&mut self) -> Result<ProcessingEvent, TransportError> {
        loop {
            self.line.clear();
            let limit = self.max_frame_bytes;
            let read = tokio::select! {
                _ = cancelled(&mut self.shutdown) => return Err(TransportError::Cancelled),
                read = read_line_bounded(&mut self.reader, &mut self.line, limit) => read?,
            };

            if read == 0 {
                return Err(TransportError::Closed);
            }
            if self.line.iter().all(u8::is_ascii_whitespace) {
                continue;
            }
            return Ok(serde_json::from_slice(&self.line)?);
        }
    }

    async fn send(&mut self, response: ProcessingResponse) -> Result<(), TransportError> {
        self.write_line(&response).await
    }

    async fn fail(&mut self, reason: &str) {
        let frame = ErrorFrame {
            error: ErrorBody {
                code: "protocol_error",
                message: reason,
            },
        };
        if let Err(e) = self.write_line(&frame).await {
            tracing::debug!(error = %e, "Failed to write error frame");
        }
    }
}
