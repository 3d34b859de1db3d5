//! Wire protocol model.
//!
//! The transport sends one [`ProcessingEvent`] per phase of a proxied HTTP
//! exchange and expects exactly one [`ProcessingResponse`] back for each.
//! Every type serializes with serde so that transports can frame it however
//! they like (the bundled TCP adapter uses JSON lines).

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::value::{Map, Value};

/// A single header as carried on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct HeaderEntry {
    pub key: String,
    pub value: String,
}

impl HeaderEntry {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct HttpHeaders {
    #[serde(default)]
    pub headers: Vec<HeaderEntry>,
    #[serde(default)]
    pub end_of_stream: bool,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct HttpBody {
    #[serde(default)]
    pub body: Vec<u8>,
    #[serde(default)]
    pub end_of_stream: bool,
}

/// The phase payload of an inbound event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ProcessingRequest {
    RequestHeaders(HttpHeaders),
    RequestBody(HttpBody),
    ResponseHeaders(HttpHeaders),
    ResponseBody(HttpBody),
    /// Any event kind this kernel does not process (trailers, future kinds).
    #[serde(other)]
    Unknown,
}

/// Per-filter attribute blobs sent alongside an event.
pub type Attributes = BTreeMap<String, Value>;

/// One inbound message of a stream.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ProcessingEvent {
    #[serde(default)]
    pub request: Option<ProcessingRequest>,
    #[serde(default)]
    pub attributes: Attributes,
}

impl ProcessingEvent {
    pub fn new(request: ProcessingRequest) -> Self {
        Self {
            request: Some(request),
            attributes: Attributes::new(),
        }
    }

    pub fn with_attributes(mut self, attributes: Attributes) -> Self {
        self.attributes = attributes;
        self
    }
}

/// The four phases of a stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    RequestHeaders,
    RequestBody,
    ResponseHeaders,
    ResponseBody,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::RequestHeaders => "request_headers",
            Phase::RequestBody => "request_body",
            Phase::ResponseHeaders => "response_headers",
            Phase::ResponseBody => "response_body",
        }
    }

    pub fn is_request(&self) -> bool {
        matches!(self, Phase::RequestHeaders | Phase::RequestBody)
    }

    pub fn is_headers(&self) -> bool {
        matches!(self, Phase::RequestHeaders | Phase::ResponseHeaders)
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How the transport should continue after a phase response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseStatus {
    #[default]
    Continue,
    /// Apply the mutations and treat the message as replaced.
    ContinueAndReplace,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct HeaderMutation {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub set_headers: Vec<HeaderEntry>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub remove_headers: Vec<String>,
}

impl HeaderMutation {
    pub fn is_empty(&self) -> bool {
        self.set_headers.is_empty() && self.remove_headers.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BodyMutation {
    Body(Vec<u8>),
    ClearBody,
}

/// Continue (optionally with mutations) for the current phase.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CommonResponse {
    #[serde(default)]
    pub status: ResponseStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub header_mutation: Option<HeaderMutation>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body_mutation: Option<BodyMutation>,
    #[serde(default)]
    pub clear_route_cache: bool,
}

/// Short-circuit: answer the client directly.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ImmediateResponse {
    pub status: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub headers: Option<HeaderMutation>,
    #[serde(default)]
    pub body: Vec<u8>,
    #[serde(default)]
    pub details: String,
}

/// Phase-specific part of a response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PhaseResponse {
    RequestHeaders(CommonResponse),
    RequestBody(CommonResponse),
    ResponseHeaders(CommonResponse),
    ResponseBody(CommonResponse),
    ImmediateResponse(ImmediateResponse),
}

impl PhaseResponse {
    /// An unmodified continue for `phase`.
    pub fn pass_through(phase: Phase) -> Self {
        Self::common(phase, CommonResponse::default())
    }

    pub fn common(phase: Phase, response: CommonResponse) -> Self {
        match phase {
            Phase::RequestHeaders => PhaseResponse::RequestHeaders(response),
            Phase::RequestBody => PhaseResponse::RequestBody(response),
            Phase::ResponseHeaders => PhaseResponse::ResponseHeaders(response),
            Phase::ResponseBody => PhaseResponse::ResponseBody(response),
        }
    }

    pub fn is_immediate(&self) -> bool {
        matches!(self, PhaseResponse::ImmediateResponse(_))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HeaderSendMode {
    #[default]
    Default,
    Send,
    Skip,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BodySendMode {
    #[default]
    None,
    Streamed,
    Buffered,
    BufferedPartial,
}

/// Instruction to the transport on what to send for the remaining phases.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ProcessingMode {
    pub request_header_mode: HeaderSendMode,
    pub response_header_mode: HeaderSendMode,
    pub request_body_mode: BodySendMode,
    pub response_body_mode: BodySendMode,
    pub request_trailer_mode: HeaderSendMode,
    pub response_trailer_mode: HeaderSendMode,
}

/// One outbound message of a stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessingResponse {
    pub response: PhaseResponse,
    /// Namespaced metadata for downstream consumers (analytics, logging).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dynamic_metadata: Option<Map>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode_override: Option<ProcessingMode>,
}

impl ProcessingResponse {
    pub fn new(response: PhaseResponse) -> Self {
        Self {
            response,
            dynamic_metadata: None,
            mode_override: None,
        }
    }

    pub fn with_dynamic_metadata(mut self, metadata: Option<Map>) -> Self {
        self.dynamic_metadata = metadata;
        self
    }

    pub fn with_mode_override(mut self, mode: ProcessingMode) -> Self {
        self.mode_override = Some(mode);
        self
    }
}
