//! Per-stream protocol state machine.
//!
//! # Responsibilities
//! - Receive phase events, dispatch them, send exactly one response per event
//! - Resolve the route's chain on request headers and bind it to the stream
//! - Distinguish clean stream ends from transport failures
//!
//! # Data Flow
//! ```text
//! INIT → REQUEST_HEADERS → [REQUEST_BODY]? → RESPONSE_HEADERS → [RESPONSE_BODY]? → DONE
//!
//! request headers:
//!     RouteMetadata::from_attributes → RouteTable::get(route name)
//!     → None: skip-all response
//!     → Some(chain): ExecutionContext::new(chain) stored in the stream's slot
//! later events → the slot's ExecutionContext
//! ```
//!
//! # Design Decisions
//! - The ExecutionContext lives in an `Option` local to `process`; nothing is shared across streams
//! - Per-request failures are answered inside the ExecutionContext and never end the stream
//! - Only protocol errors and transport send/receive failures end a stream with an error

use std::sync::Arc;

use thiserror::Error;

use crate::engine::context::ExecutionContext;
use crate::engine::executor::{ChainExecutor, SequentialExecutor};
use crate::engine::metadata::{self, RouteMetadata};
use crate::engine::translator::{ActionTranslator, DefaultTranslator};
use crate::extproc::transport::{ProcessingStream, TransportError};
use crate::extproc::types::{
    Attributes, BodySendMode, HeaderSendMode, HttpHeaders, Phase, PhaseResponse, ProcessingEvent, ProcessingMode,
    ProcessingRequest, ProcessingResponse,
};
use crate::observability::metrics;
use crate::routing::RouteTable;
use crate::value::Map;

#[derive(Debug, Error)]
pub enum StreamError {
    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("failed to receive event: {0}")]
    Receive(#[source] TransportError),

    #[error("failed to send response: {0}")]
    Send(#[source] TransportError),
}

/// Drives streams against the shared [`RouteTable`].
///
/// One processor serves every stream; all per-stream state lives in the
/// `process` call.
#[derive(Clone)]
pub struct StreamProcessor {
    routes: Arc<RouteTable>,
    executor: Arc<dyn ChainExecutor>,
    translator: Arc<dyn ActionTranslator>,
}

impl StreamProcessor {
    /// Processor with the bundled [`SequentialExecutor`] and [`DefaultTranslator`].
    pub fn new(routes: Arc<RouteTable>) -> Self {
        Self {
            routes,
            executor: Arc::new(SequentialExecutor::new()),
            translator: Arc::new(DefaultTranslator),
        }
    }

    pub fn with_executor(mut self, executor: Arc<dyn ChainExecutor>) -> Self {
        self.executor = executor;
        self
    }

    pub fn with_translator(mut self, translator: Arc<dyn ActionTranslator>) -> Self {
        self.translator = translator;
        self
    }

    pub fn routes(&self) -> &Arc<RouteTable> {
        &self.routes
    }

    /// Run one stream to completion.
    pub async fn process<S>(&self, stream: &mut S) -> Result<(), StreamError>
    where
        S: ProcessingStream + ?Sized,
    {
        metrics::stream_opened();
        let mut slot: Option<ExecutionContext> = None;

        let result = loop {
            let event = match stream.recv().await {
                Ok(event) => event,
                Err(e) if e.is_clean() => {
                    tracing::debug!(reason = %e, "Stream ended");
                    break Ok(());
                }
                Err(e) => break Err(StreamError::Receive(e)),
            };

            let response = match self.handle_event(&mut slot, event) {
                Ok(response) => response,
                Err(e) => {
                    stream.fail(&e.to_string()).await;
                    break Err(e);
                }
            };

            if let Err(e) = stream.send(response).await {
                break Err(StreamError::Send(e));
            }
        };

        let outcome = match &result {
            Ok(()) => "ok",
            Err(StreamError::Protocol(_)) => "protocol_error",
            Err(_) => "transport_error",
        };
        metrics::stream_closed(outcome);

        if let Err(e) = &result {
            let request_id = slot.as_ref().map(|ctx| ctx.request_id().to_string()).unwrap_or_default();
            tracing::warn!(request_id = %request_id, error = %e, "Stream terminated with error");
        }

        result
    }

    /// Dispatch a single event against the stream's slot.
    pub fn handle_event(
        &self,
        slot: &mut Option<ExecutionContext>,
        event: ProcessingEvent,
    ) -> Result<ProcessingResponse, StreamError> {
        let ProcessingEvent { request, attributes } = event;

        match request {
            Some(ProcessingRequest::RequestHeaders(headers)) => Ok(self.on_request_headers(slot, &headers, &attributes)),
            Some(ProcessingRequest::RequestBody(body)) => Ok(match slot.as_mut() {
                Some(ctx) => ctx.handle_request_body(&body, self.executor.as_ref(), self.translator.as_ref()),
                None => {
                    tracing::warn!("Request body received without request headers");
                    ProcessingResponse::new(PhaseResponse::pass_through(Phase::RequestBody))
                }
            }),
            Some(ProcessingRequest::ResponseHeaders(headers)) => Ok(match slot.as_mut() {
                Some(ctx) => ctx.handle_response_headers(&headers, self.executor.as_ref(), self.translator.as_ref()),
                None => {
                    tracing::debug!("Response headers on a stream without policies");
                    ProcessingResponse::new(PhaseResponse::pass_through(Phase::ResponseHeaders))
                }
            }),
            Some(ProcessingRequest::ResponseBody(body)) => Ok(match slot.as_mut() {
                Some(ctx) => ctx.handle_response_body(&body, self.executor.as_ref(), self.translator.as_ref()),
                None => {
                    tracing::warn!("Response body received without request headers");
                    ProcessingResponse::new(PhaseResponse::pass_through(Phase::ResponseBody))
                }
            }),
            Some(ProcessingRequest::Unknown) => Err(StreamError::Protocol("unsupported event kind".to_string())),
            None => Err(StreamError::Protocol("event carries no phase".to_string())),
        }
    }

    fn on_request_headers(
        &self,
        slot: &mut Option<ExecutionContext>,
        headers: &HttpHeaders,
        attributes: &Attributes,
    ) -> ProcessingResponse {
        let route = RouteMetadata::from_attributes(attributes);

        let Some(chain) = self.routes.get(&route.route_name) else {
            tracing::debug!(route_key = %route.route_name, "No policies for route");
            metrics::record_route_miss();
            *slot = None;
            return skip_all(&route);
        };

        if slot.is_some() {
            tracing::warn!(route_key = %route.route_name, "Request headers received twice, restarting stream state");
        }

        let ctx = slot.insert(ExecutionContext::new(chain));
        ctx.handle_request_headers(headers, &route, self.executor.as_ref(), self.translator.as_ref())
    }
}

/// Mode that stops the transport from sending anything further.
pub fn skip_all_mode() -> ProcessingMode {
    ProcessingMode {
        request_header_mode: HeaderSendMode::Default,
        response_header_mode: HeaderSendMode::Skip,
        request_body_mode: BodySendMode::None,
        response_body_mode: BodySendMode::None,
        request_trailer_mode: HeaderSendMode::Skip,
        response_trailer_mode: HeaderSendMode::Skip,
    }
}

fn skip_all(route: &RouteMetadata) -> ProcessingResponse {
    ProcessingResponse::new(PhaseResponse::pass_through(Phase::RequestHeaders))
        .with_dynamic_metadata(metadata::dynamic_metadata(&route.analytics(), &Map::new()))
        .with_mode_override(skip_all_mode())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::metadata::{ANALYTICS_NAMESPACE, EXT_PROC_FILTER, ROUTE_NAME_ATTRIBUTE};
    use crate::extproc::types::{HeaderEntry, HttpBody};
    use crate::value::Value;

    fn attributes(route: &str) -> Attributes {
        let mut filter = Map::new();
        filter.insert(ROUTE_NAME_ATTRIBUTE.into(), Value::from(route));
        let mut attrs = Attributes::new();
        attrs.insert(EXT_PROC_FILTER.into(), Value::Map(filter));
        attrs
    }

    fn request_headers(route: &str) -> ProcessingEvent {
        ProcessingEvent::new(ProcessingRequest::RequestHeaders(HttpHeaders {
            headers: vec![HeaderEntry::new(":path", "/")],
            end_of_stream: false,
        }))
        .with_attributes(attributes(route))
    }

    #[test]
    fn test_unknown_route_skips_all() {
        let processor = StreamProcessor::new(Arc::new(RouteTable::new()));
        let mut slot = None;

        let response = processor.handle_event(&mut slot, request_headers("unknown")).unwrap();

        assert!(slot.is_none());
        assert_eq!(response.response, PhaseResponse::pass_through(Phase::RequestHeaders));
        assert_eq!(response.mode_override, Some(skip_all_mode()));
        let analytics = response.dynamic_metadata.unwrap();
        assert_eq!(
            analytics[ANALYTICS_NAMESPACE].as_map().unwrap()["route_name"],
            Value::from("unknown")
        );
    }

    #[test]
    fn test_orphan_body_is_benign() {
        let processor = StreamProcessor::new(Arc::new(RouteTable::new()));
        let mut slot = None;

        let response = processor
            .handle_event(
                &mut slot,
                ProcessingEvent::new(ProcessingRequest::RequestBody(HttpBody {
                    body: b"x".to_vec(),
                    end_of_stream: true,
                })),
            )
            .unwrap();
        assert_eq!(response, ProcessingResponse::new(PhaseResponse::pass_through(Phase::RequestBody)));
    }

    #[test]
    fn test_unknown_kind_is_protocol_error() {
        let processor = StreamProcessor::new(Arc::new(RouteTable::new()));
        let mut slot = None;

        let err = processor
            .handle_event(&mut slot, ProcessingEvent::new(ProcessingRequest::Unknown))
            .unwrap_err();
        assert!(matches!(err, StreamError::Protocol(_)));

        let err = processor.handle_event(&mut slot, ProcessingEvent::default()).unwrap_err();
        assert!(matches!(err, StreamError::Protocol(_)));
    }
}
