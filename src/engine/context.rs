//! Per-stream execution state.
//!
//! # Lifecycle
//! ```text
//! request headers  → ExecutionContext::new(chain) + build_request_context
//! request body     → attach body to RequestContext, execute
//! response headers → build_response_context (takes RequestContext, keeps its SharedContext)
//! response body    → attach body to ResponseContext, execute
//! stream end       → dropped
//! ```
//!
//! The chain is bound when the context is created and never re-resolved, so
//! a config reload cannot change the policies applied to an in-flight stream.
//!
//! Any execution failure is masked here: the caller receives a generic
//! message and a correlation id, the details only go to the server log.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use uuid::Uuid;

use crate::engine::executor::{ChainExecutor, ExecutionError};
use crate::engine::headers::{first_value, Headers};
use crate::engine::metadata::{self, RouteMetadata, PROVIDER_NAME_KEY, TEMPLATE_HANDLE_KEY};
use crate::engine::translator::ActionTranslator;
use crate::extproc::types::{
    BodySendMode, HeaderEntry, HeaderMutation, HeaderSendMode, HttpBody, HttpHeaders, ImmediateResponse, Phase,
    PhaseResponse, ProcessingMode, ProcessingResponse,
};
use crate::observability::metrics;
use crate::policy::chain::PolicyChain;
use crate::value::{AnalyticsValue, Map, Value};

pub const REQUEST_ID_HEADER: &str = "x-request-id";
pub const CORRELATION_ID_HEADER: &str = "x-correlation-id";

/// The only failure text that ever reaches the caller.
pub const GENERIC_ERROR_MESSAGE: &str = "Internal server error";

/// Identifiers and metadata that are identical for the request and response
/// phases of a stream.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SharedContext {
    pub request_id: String,
    pub project_id: Option<String>,
    pub api_id: String,
    pub api_name: String,
    pub api_version: String,
    pub api_kind: String,
    pub api_context: String,
    pub operation_path: String,
    /// Free-form metadata. Request-phase policies may write here for
    /// response-phase policies to read.
    pub metadata: Map,
}

impl SharedContext {
    pub fn new(request_id: impl Into<String>) -> Self {
        Self {
            request_id: request_id.into(),
            ..Default::default()
        }
    }

    fn from_route(request_id: String, route: &RouteMetadata) -> Self {
        let mut metadata = Map::new();
        if let Some(handle) = &route.template_handle {
            metadata.insert(TEMPLATE_HANDLE_KEY.to_string(), Value::from(handle.as_str()));
        }
        if let Some(provider) = &route.provider_name {
            metadata.insert(PROVIDER_NAME_KEY.to_string(), Value::from(provider.as_str()));
        }
        Self {
            request_id,
            project_id: route.project_id.clone(),
            api_id: route.api_id.clone(),
            api_name: route.api_name.clone(),
            api_version: route.api_version.clone(),
            api_kind: route.api_kind.clone(),
            api_context: route.api_context.clone(),
            operation_path: route.operation_path.clone(),
            metadata,
        }
    }
}

/// Body state for one direction.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Body {
    pub content: Vec<u8>,
    pub end_of_stream: bool,
    /// False when the direction is known to carry no body at all.
    pub present: bool,
}

impl Body {
    pub fn new(content: Vec<u8>, end_of_stream: bool) -> Self {
        Self {
            content,
            end_of_stream,
            present: true,
        }
    }

    /// No body will follow for this direction.
    pub fn absent() -> Self {
        Self {
            content: Vec::new(),
            end_of_stream: true,
            present: false,
        }
    }
}

/// Request-direction view handed to policies.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RequestContext {
    pub shared: SharedContext,
    pub headers: Headers,
    pub path: String,
    pub method: String,
    pub authority: String,
    pub scheme: String,
    pub body: Option<Body>,
}

impl RequestContext {
    pub fn new(shared: SharedContext) -> Self {
        Self {
            shared,
            ..Default::default()
        }
    }
}

/// Response-direction view handed to policies.
///
/// Owns the request context of the same stream, including its
/// [`SharedContext`], so request-phase writes stay visible.
#[derive(Debug, Clone, PartialEq)]
pub struct ResponseContext {
    request: RequestContext,
    pub headers: Headers,
    pub status: u16,
    pub body: Option<Body>,
}

impl ResponseContext {
    pub fn new(request: RequestContext) -> Self {
        Self {
            request,
            headers: Headers::new(),
            status: 0,
            body: None,
        }
    }

    pub fn request(&self) -> &RequestContext {
        &self.request
    }

    pub fn shared(&self) -> &SharedContext {
        &self.request.shared
    }

    pub fn shared_mut(&mut self) -> &mut SharedContext {
        &mut self.request.shared
    }
}

/// Mutable state of one stream.
pub struct ExecutionContext {
    chain: Arc<PolicyChain>,
    route_key: String,
    request_id: String,
    request: Option<RequestContext>,
    response: Option<ResponseContext>,
    analytics_metadata: BTreeMap<String, AnalyticsValue>,
    dynamic_metadata: Map,
}

impl ExecutionContext {
    pub fn new(chain: Arc<PolicyChain>) -> Self {
        Self {
            route_key: chain.route_key().to_string(),
            chain,
            request_id: String::new(),
            request: None,
            response: None,
            analytics_metadata: BTreeMap::new(),
            dynamic_metadata: Map::new(),
        }
    }

    pub fn chain(&self) -> &Arc<PolicyChain> {
        &self.chain
    }

    pub fn route_key(&self) -> &str {
        &self.route_key
    }

    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    pub fn request_context(&self) -> Option<&RequestContext> {
        self.request.as_ref()
    }

    pub fn response_context(&self) -> Option<&ResponseContext> {
        self.response.as_ref()
    }

    pub fn analytics_metadata(&self) -> &BTreeMap<String, AnalyticsValue> {
        &self.analytics_metadata
    }

    /// Parse request headers into a fresh [`RequestContext`].
    pub fn build_request_context(&mut self, headers: &HttpHeaders, route: &RouteMetadata) {
        // Only the first occurrence counts. An empty one is treated as absent.
        let request_id = match first_value(&headers.headers, REQUEST_ID_HEADER) {
            Some(id) if !id.is_empty() => id.to_string(),
            _ => Uuid::new_v4().to_string(),
        };

        let mut ctx = RequestContext::new(SharedContext::from_route(request_id.clone(), route));
        ctx.headers = Headers::from_entries(&headers.headers);
        ctx.path = pseudo(&headers.headers, ":path");
        ctx.method = pseudo(&headers.headers, ":method");
        ctx.authority = pseudo(&headers.headers, ":authority");
        ctx.scheme = pseudo(&headers.headers, ":scheme");
        if headers.end_of_stream {
            ctx.body = Some(Body::absent());
        }

        self.analytics_metadata.extend(route.analytics());
        self.request_id = request_id;
        self.request = Some(ctx);
    }

    /// Build the [`ResponseContext`], moving the request context into it.
    ///
    /// Returns false when there is no request context to continue from.
    pub fn build_response_context(&mut self, headers: &HttpHeaders) -> bool {
        let Some(request) = self.request.take() else {
            return false;
        };

        let mut ctx = ResponseContext::new(request);
        ctx.headers = Headers::from_entries(&headers.headers);
        ctx.status = match first_value(&headers.headers, ":status") {
            Some(raw) => raw.trim().parse().unwrap_or_else(|_| {
                tracing::warn!(
                    route_key = %self.route_key,
                    request_id = %self.request_id,
                    status = %raw,
                    "Unparsable response status"
                );
                0
            }),
            None => 0,
        };
        if headers.end_of_stream {
            ctx.body = Some(Body::absent());
        }

        self.response = Some(ctx);
        true
    }

    /// Body modes advertised to the transport. Pure function of the chain.
    pub fn mode_override(&self) -> ProcessingMode {
        ProcessingMode {
            request_header_mode: HeaderSendMode::Default,
            // Always sent for now. Skipping response headers when no policy
            // declares a need for them is a known future improvement.
            response_header_mode: HeaderSendMode::Send,
            request_body_mode: body_mode(self.chain.requires_request_body()),
            response_body_mode: body_mode(self.chain.requires_response_body()),
            request_trailer_mode: HeaderSendMode::Skip,
            response_trailer_mode: HeaderSendMode::Skip,
        }
    }

    pub fn handle_request_headers(
        &mut self,
        headers: &HttpHeaders,
        route: &RouteMetadata,
        executor: &dyn ChainExecutor,
        translator: &dyn ActionTranslator,
    ) -> ProcessingResponse {
        self.build_request_context(headers, route);

        if self.chain.requires_request_body() && !headers.end_of_stream {
            tracing::debug!(
                route_key = %self.route_key,
                request_id = %self.request_id,
                "Deferring request policies to body phase"
            );
            return self
                .respond(PhaseResponse::pass_through(Phase::RequestHeaders))
                .with_mode_override(self.mode_override());
        }

        let response = self.execute(Phase::RequestHeaders, executor, translator);
        if response.response.is_immediate() {
            response
        } else {
            response.with_mode_override(self.mode_override())
        }
    }

    pub fn handle_request_body(
        &mut self,
        body: &HttpBody,
        executor: &dyn ChainExecutor,
        translator: &dyn ActionTranslator,
    ) -> ProcessingResponse {
        let Some(ctx) = self.request.as_mut() else {
            tracing::warn!(
                route_key = %self.route_key,
                request_id = %self.request_id,
                "Request body without request context"
            );
            return ProcessingResponse::new(PhaseResponse::pass_through(Phase::RequestBody));
        };
        ctx.body = Some(Body::new(body.body.clone(), body.end_of_stream));
        self.execute(Phase::RequestBody, executor, translator)
    }

    pub fn handle_response_headers(
        &mut self,
        headers: &HttpHeaders,
        executor: &dyn ChainExecutor,
        translator: &dyn ActionTranslator,
    ) -> ProcessingResponse {
        if !self.build_response_context(headers) {
            tracing::warn!(
                route_key = %self.route_key,
                request_id = %self.request_id,
                "Response headers without request context"
            );
            return ProcessingResponse::new(PhaseResponse::pass_through(Phase::ResponseHeaders));
        }

        if self.chain.requires_response_body() && !headers.end_of_stream {
            tracing::debug!(
                route_key = %self.route_key,
                request_id = %self.request_id,
                "Deferring response policies to body phase"
            );
            return self.respond(PhaseResponse::pass_through(Phase::ResponseHeaders));
        }

        self.execute(Phase::ResponseHeaders, executor, translator)
    }

    pub fn handle_response_body(
        &mut self,
        body: &HttpBody,
        executor: &dyn ChainExecutor,
        translator: &dyn ActionTranslator,
    ) -> ProcessingResponse {
        let Some(ctx) = self.response.as_mut() else {
            tracing::warn!(
                route_key = %self.route_key,
                request_id = %self.request_id,
                "Response body without response context"
            );
            return ProcessingResponse::new(PhaseResponse::pass_through(Phase::ResponseBody));
        };
        ctx.body = Some(Body::new(body.body.clone(), body.end_of_stream));
        self.execute(Phase::ResponseBody, executor, translator)
    }

    fn execute(
        &mut self,
        phase: Phase,
        executor: &dyn ChainExecutor,
        translator: &dyn ActionTranslator,
    ) -> ProcessingResponse {
        let chain = Arc::clone(&self.chain);
        let started = Instant::now();

        let outcome = if phase.is_request() {
            self.request.as_mut().map(|ctx| {
                executor.execute_request(chain.policies(), chain.specs(), ctx, chain.has_execution_conditions())
            })
        } else {
            self.response.as_mut().map(|ctx| {
                executor.execute_response(chain.policies(), chain.specs(), ctx, chain.has_execution_conditions())
            })
        };

        match outcome {
            None => ProcessingResponse::new(PhaseResponse::pass_through(phase)),
            Some(Ok(mut result)) => {
                metrics::record_phase(phase, if result.is_short_circuit() { "short_circuit" } else { "ok" }, started);
                self.analytics_metadata
                    .extend(std::mem::take(&mut result.analytics));
                self.dynamic_metadata
                    .extend(std::mem::take(&mut result.dynamic_metadata));
                let response = translator.translate(phase, result);
                self.respond(response)
            }
            Some(Err(err)) => {
                metrics::record_phase(phase, "error", started);
                self.masked_error(phase, &err)
            }
        }
    }

    fn respond(&self, response: PhaseResponse) -> ProcessingResponse {
        ProcessingResponse::new(response)
            .with_dynamic_metadata(metadata::dynamic_metadata(&self.analytics_metadata, &self.dynamic_metadata))
    }

    /// Log the failure in full and return a generic response to the caller.
    fn masked_error(&self, phase: Phase, err: &ExecutionError) -> ProcessingResponse {
        let correlation_id = Uuid::new_v4().to_string();
        tracing::error!(
            route_key = %self.route_key,
            phase = %phase,
            request_id = %self.request_id,
            correlation_id = %correlation_id,
            error = %err,
            "Policy execution failed"
        );
        metrics::record_policy_error(phase);

        let body = serde_json::json!({
            "error": GENERIC_ERROR_MESSAGE,
            "correlation_id": correlation_id,
        });

        ProcessingResponse::new(PhaseResponse::ImmediateResponse(ImmediateResponse {
            status: 500,
            headers: Some(HeaderMutation {
                set_headers: vec![
                    HeaderEntry::new("content-type", "application/json"),
                    HeaderEntry::new(CORRELATION_ID_HEADER, correlation_id),
                ],
                remove_headers: Vec::new(),
            }),
            body: body.to_string().into_bytes(),
            details: "policy_execution_failed".to_string(),
        }))
    }
}

fn pseudo(entries: &[HeaderEntry], name: &str) -> String {
    first_value(entries, name).unwrap_or_default().to_string()
}

fn body_mode(required: bool) -> BodySendMode {
    if required {
        BodySendMode::Buffered
    } else {
        BodySendMode::None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::executor::SequentialExecutor;
    use crate::engine::translator::DefaultTranslator;
    use crate::policy::chain::{PolicyChainBuilder, PolicySpec};
    use crate::policy::registry::{PolicyDefinition, PolicyMetadata, PolicyRegistry};
    use crate::policy::types::{Action, BodyMode, Params, Policy, PolicyError, PolicyMode};

    struct Recorder;

    impl Policy for Recorder {
        fn mode(&self) -> PolicyMode {
            PolicyMode::default()
        }

        fn on_request(&self, ctx: &mut RequestContext, _: &Params) -> Result<Action, PolicyError> {
            ctx.shared.metadata.insert("seen_path".into(), Value::from(ctx.path.as_str()));
            Ok(Action::Continue)
        }

        fn on_response(&self, ctx: &mut ResponseContext, _: &Params) -> Result<Action, PolicyError> {
            let seen = ctx.shared().metadata.get("seen_path").cloned().unwrap_or_default();
            ctx.shared_mut().metadata.insert("echo".into(), seen);
            Ok(Action::Continue)
        }
    }

    struct Exploding;

    impl Policy for Exploding {
        fn mode(&self) -> PolicyMode {
            PolicyMode {
                request_body: BodyMode::Buffered,
                ..Default::default()
            }
        }

        fn on_request(&self, _: &mut RequestContext, _: &Params) -> Result<Action, PolicyError> {
            Err(PolicyError::Failed("secret upstream token abc123".into()))
        }
    }

    fn chain(name: &str) -> Arc<PolicyChain> {
        let mut registry = PolicyRegistry::new();
        registry.register(
            PolicyDefinition::new("recorder", "v1"),
            |_: &PolicyMetadata, _: &Params| -> Result<Arc<dyn Policy>, PolicyError> { Ok(Arc::new(Recorder)) },
        );
        registry.register(
            PolicyDefinition::new("exploding", "v1"),
            |_: &PolicyMetadata, _: &Params| -> Result<Arc<dyn Policy>, PolicyError> { Ok(Arc::new(Exploding)) },
        );
        Arc::new(
            PolicyChainBuilder::new(&registry)
                .build("r1", vec![PolicySpec::new(name, "v1")])
                .unwrap(),
        )
    }

    fn headers(entries: &[(&str, &str)], end_of_stream: bool) -> HttpHeaders {
        HttpHeaders {
            headers: entries.iter().map(|(k, v)| HeaderEntry::new(*k, *v)).collect(),
            end_of_stream,
        }
    }

    #[test]
    fn test_request_context_fields() {
        let mut ctx = ExecutionContext::new(chain("recorder"));
        let route = RouteMetadata {
            route_name: "r1".into(),
            api_name: "orders".into(),
            template_handle: Some("chat".into()),
            ..Default::default()
        };
        ctx.build_request_context(
            &headers(
                &[
                    (":path", "/orders/1"),
                    (":method", "GET"),
                    (":authority", "api.local"),
                    (":scheme", "https"),
                    ("x-request-id", "abc"),
                    ("x-request-id", "def"),
                ],
                true,
            ),
            &route,
        );

        let req = ctx.request_context().unwrap();
        assert_eq!(req.path, "/orders/1");
        assert_eq!(req.method, "GET");
        assert_eq!(req.authority, "api.local");
        assert_eq!(req.scheme, "https");
        assert_eq!(req.shared.request_id, "abc");
        assert_eq!(req.shared.api_name, "orders");
        assert_eq!(req.shared.metadata[TEMPLATE_HANDLE_KEY], Value::from("chat"));
        assert_eq!(req.body, Some(Body::absent()));
        assert_eq!(ctx.request_id(), "abc");
    }

    #[test]
    fn test_generated_request_id() {
        let mut ctx = ExecutionContext::new(chain("recorder"));
        ctx.build_request_context(&headers(&[(":path", "/")], false), &RouteMetadata::default());
        assert_eq!(ctx.request_id().len(), 36);
        assert!(Uuid::parse_str(ctx.request_id()).is_ok());
        assert_eq!(ctx.request_context().unwrap().body, None);
    }

    #[test]
    fn test_empty_first_request_id_is_replaced() {
        let mut ctx = ExecutionContext::new(chain("recorder"));
        ctx.build_request_context(
            &headers(&[("x-request-id", ""), ("x-request-id", "later")], true),
            &RouteMetadata::default(),
        );
        assert_ne!(ctx.request_id(), "later");
        assert!(Uuid::parse_str(ctx.request_id()).is_ok());
    }

    #[test]
    fn test_response_reuses_shared_context() {
        let mut ctx = ExecutionContext::new(chain("recorder"));
        let executor = SequentialExecutor::new();

        ctx.handle_request_headers(
            &headers(&[(":path", "/p"), ("x-request-id", "rid")], true),
            &RouteMetadata::default(),
            &executor,
            &DefaultTranslator,
        );
        ctx.handle_response_headers(&headers(&[(":status", "200")], true), &executor, &DefaultTranslator);

        let resp = ctx.response_context().unwrap();
        assert_eq!(resp.status, 200);
        assert_eq!(resp.shared().request_id, "rid");
        assert_eq!(resp.shared().metadata["echo"], Value::from("/p"));
        assert!(ctx.request_context().is_none());
    }

    #[test]
    fn test_unparsable_status_is_zero() {
        let mut ctx = ExecutionContext::new(chain("recorder"));
        ctx.build_request_context(&headers(&[], true), &RouteMetadata::default());
        assert!(ctx.build_response_context(&headers(&[(":status", "OK")], false)));
        assert_eq!(ctx.response_context().unwrap().status, 0);
    }

    #[test]
    fn test_mode_override_follows_chain() {
        let ctx = ExecutionContext::new(chain("recorder"));
        let mode = ctx.mode_override();
        assert_eq!(mode.request_body_mode, BodySendMode::None);
        assert_eq!(mode.response_body_mode, BodySendMode::None);
        assert_eq!(mode.response_header_mode, HeaderSendMode::Send);
        assert_eq!(mode.request_trailer_mode, HeaderSendMode::Skip);
        assert_eq!(mode.response_trailer_mode, HeaderSendMode::Skip);

        let ctx = ExecutionContext::new(chain("exploding"));
        assert_eq!(ctx.mode_override().request_body_mode, BodySendMode::Buffered);
        assert_eq!(ctx.mode_override().response_body_mode, BodySendMode::None);
    }

    #[test]
    fn test_errors_are_masked() {
        let mut ctx = ExecutionContext::new(chain("exploding"));
        let executor = SequentialExecutor::new();

        let deferred = ctx.handle_request_headers(
            &headers(&[(":path", "/")], false),
            &RouteMetadata::default(),
            &executor,
            &DefaultTranslator,
        );
        assert_eq!(deferred.response, PhaseResponse::pass_through(Phase::RequestHeaders));

        let response = ctx.handle_request_body(
            &HttpBody {
                body: b"{}".to_vec(),
                end_of_stream: true,
            },
            &executor,
            &DefaultTranslator,
        );
        let PhaseResponse::ImmediateResponse(immediate) = response.response else {
            panic!("expected immediate response");
        };
        assert_eq!(immediate.status, 500);
        let body = String::from_utf8(immediate.body).unwrap();
        assert!(body.contains(GENERIC_ERROR_MESSAGE));
        assert!(!body.contains("abc123"));
        assert!(!body.contains("exploding"));

        let parsed: serde_json::Value = serde_json::from_str(&body).unwrap();
        let correlation_id = parsed["correlation_id"].as_str().unwrap();
        assert_eq!(correlation_id.len(), 36);
        assert_ne!(correlation_id, ctx.request_id());
    }

    #[test]
    fn test_response_body_without_response_context() {
        let mut ctx = ExecutionContext::new(chain("recorder"));
        let response = ctx.handle_response_body(
            &HttpBody::default(),
            &SequentialExecutor::new(),
            &DefaultTranslator,
        );
        assert_eq!(response.response, PhaseResponse::pass_through(Phase::ResponseBody));
    }
}
