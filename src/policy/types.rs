//! Policy capability contract.

use std::collections::BTreeMap;

use thiserror::Error;

use crate::engine::context::{RequestContext, ResponseContext};
use crate::value::{AnalyticsValue, Map, Value};

/// Parameters handed to a policy on every execution.
pub type Params = Map;

/// How a policy wants a body delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BodyMode {
    /// The policy never looks at the body.
    #[default]
    Skip,
    /// The full body must be buffered before the policy runs.
    Buffered,
    /// The policy consumes the body as it streams.
    Streamed,
}

impl BodyMode {
    /// True if the transport has to deliver body content for this mode.
    pub fn needs_body(self) -> bool {
        matches!(self, BodyMode::Buffered | BodyMode::Streamed)
    }
}

/// Whether a policy wants response headers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HeaderMode {
    #[default]
    Process,
    Skip,
}

/// Processing requirements declared by a policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PolicyMode {
    pub request_body: BodyMode,
    pub response_body: BodyMode,
    pub response_headers: HeaderMode,
}

/// A canned response returned instead of contacting the upstream.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ImmediateReply {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

/// Changes a policy asks to apply to the message in flight.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Modification {
    pub set_headers: Vec<(String, String)>,
    pub remove_headers: Vec<String>,
    /// Replacement body, if any.
    pub body: Option<Vec<u8>>,
    pub analytics: BTreeMap<String, AnalyticsValue>,
    pub dynamic_metadata: BTreeMap<String, Value>,
}

impl Modification {
    pub fn is_empty(&self) -> bool {
        self.set_headers.is_empty()
            && self.remove_headers.is_empty()
            && self.body.is_none()
            && self.analytics.is_empty()
            && self.dynamic_metadata.is_empty()
    }
}

/// Outcome of a single policy execution.
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    Continue,
    Modify(Modification),
    ShortCircuit(ImmediateReply),
}

/// Failure raised by a policy, either at construction or at execution.
#[derive(Debug, Error)]
pub enum PolicyError {
    #[error("invalid parameter '{name}': {reason}")]
    InvalidParameter { name: String, reason: String },

    #[error("{0}")]
    Failed(String),
}

/// A compiled, executable policy.
///
/// Implementations are shared by every stream routed to the same chain, so
/// they must not keep per-request state.
pub trait Policy: Send + Sync {
    /// Processing requirements, consulted once when the chain is built.
    fn mode(&self) -> PolicyMode;

    fn on_request(&self, _ctx: &mut RequestContext, _params: &Params) -> Result<Action, PolicyError> {
        Ok(Action::Continue)
    }

    fn on_response(&self, _ctx: &mut ResponseContext, _params: &Params) -> Result<Action, PolicyError> {
        Ok(Action::Continue)
    }
}
