//! Shared policies, registries and event builders for integration tests.
#![allow(dead_code)]

use std::sync::Arc;

use tokio::task::JoinHandle;

use policy_kernel::config::{PolicyConfig, RouteConfig};
use policy_kernel::engine::context::{RequestContext, ResponseContext};
use policy_kernel::engine::metadata::{EXT_PROC_FILTER, ROUTE_METADATA_ATTRIBUTE, ROUTE_NAME_ATTRIBUTE};
use policy_kernel::extproc::processor::StreamError;
use policy_kernel::extproc::transport::{ChannelStream, StreamPeer};
use policy_kernel::extproc::types::{
    Attributes, CommonResponse, HeaderEntry, HttpBody, HttpHeaders, PhaseResponse, ProcessingEvent,
    ProcessingRequest, ProcessingResponse,
};
use policy_kernel::policy::builtin::register_builtins;
use policy_kernel::policy::{
    Action, BodyMode, ImmediateReply, Modification, Params, Policy, PolicyDefinition, PolicyError,
    PolicyMetadata, PolicyMode, PolicyRegistry,
};
use policy_kernel::value::{AnalyticsValue, Map, Value};
use policy_kernel::Kernel;

/// Tags the request with its `tag` parameter and reports it again on the
/// response, together with what the request phase left in shared metadata.
pub struct TagPolicy;

impl Policy for TagPolicy {
    fn mode(&self) -> PolicyMode {
        PolicyMode::default()
    }

    fn on_request(&self, ctx: &mut RequestContext, params: &Params) -> Result<Action, PolicyError> {
        let tag = params.get("tag").and_then(Value::as_str).unwrap_or("none").to_string();
        ctx.shared.metadata.insert("tag".into(), Value::from(tag.as_str()));
        Ok(Action::Modify(Modification {
            set_headers: vec![("x-tag".into(), tag)],
            ..Default::default()
        }))
    }

    fn on_response(&self, ctx: &mut ResponseContext, params: &Params) -> Result<Action, PolicyError> {
        let shared = ctx.shared();
        let seen = shared
            .metadata
            .get("tag")
            .and_then(Value::as_str)
            .unwrap_or("missing")
            .to_string();
        let tag = params.get("tag").and_then(Value::as_str).unwrap_or("none").to_string();
        Ok(Action::Modify(Modification {
            set_headers: vec![
                ("x-request-id".into(), shared.request_id.clone()),
                ("x-tag-seen".into(), seen),
                ("x-tag-response".into(), tag),
            ],
            ..Default::default()
        }))
    }
}

/// Needs the buffered request body. Rejects bodies containing "forbidden".
pub struct BodyGuard;

impl Policy for BodyGuard {
    fn mode(&self) -> PolicyMode {
        PolicyMode {
            request_body: BodyMode::Buffered,
            ..Default::default()
        }
    }

    fn on_request(&self, ctx: &mut RequestContext, _params: &Params) -> Result<Action, PolicyError> {
        let Some(body) = ctx.body.as_ref().filter(|b| b.present) else {
            return Ok(Action::Continue);
        };
        if String::from_utf8_lossy(&body.content).contains("forbidden") {
            return Ok(Action::ShortCircuit(ImmediateReply {
                status: 403,
                headers: vec![("content-type".into(), "text/plain".into())],
                body: b"blocked".to_vec(),
            }));
        }
        let mut modification = Modification {
            set_headers: vec![("x-body-length".into(), body.content.len().to_string())],
            ..Default::default()
        };
        modification
            .analytics
            .insert("body_length".into(), AnalyticsValue::from(Value::Number(body.content.len() as f64)));
        Ok(Action::Modify(modification))
    }
}

/// Needs the buffered response body. Reports its length and rejects empty
/// upstream bodies with a 502.
pub struct ResponseGuard;

impl Policy for ResponseGuard {
    fn mode(&self) -> PolicyMode {
        PolicyMode {
            response_body: BodyMode::Buffered,
            ..Default::default()
        }
    }

    fn on_response(&self, ctx: &mut ResponseContext, _params: &Params) -> Result<Action, PolicyError> {
        let length = ctx.body.as_ref().filter(|b| b.present).map(|b| b.content.len()).unwrap_or(0);
        if length == 0 {
            return Ok(Action::ShortCircuit(ImmediateReply {
                status: 502,
                ..Default::default()
            }));
        }
        Ok(Action::Modify(Modification {
            set_headers: vec![
                ("x-len".into(), length.to_string()),
                ("x-status".into(), ctx.status.to_string()),
            ],
            ..Default::default()
        }))
    }
}

/// Always fails with a message that must never reach the caller.
pub struct FailingPolicy;

pub const FAILING_SECRET: &str = "db password is hunter2";

impl Policy for FailingPolicy {
    fn mode(&self) -> PolicyMode {
        PolicyMode::default()
    }

    fn on_request(&self, _ctx: &mut RequestContext, _params: &Params) -> Result<Action, PolicyError> {
        Err(PolicyError::Failed(FAILING_SECRET.to_string()))
    }
}

pub fn registry() -> PolicyRegistry {
    let mut registry = PolicyRegistry::new();
    register_builtins(&mut registry);

    let mut defaults = Params::new();
    defaults.insert("tag".into(), Value::from("default"));
    registry.register(
        PolicyDefinition::new("tag", "v1").with_init_parameters(defaults),
        |_: &PolicyMetadata, _: &Params| -> Result<Arc<dyn Policy>, PolicyError> { Ok(Arc::new(TagPolicy)) },
    );
    registry.register(
        PolicyDefinition::new("body-guard", "v1"),
        |_: &PolicyMetadata, _: &Params| -> Result<Arc<dyn Policy>, PolicyError> { Ok(Arc::new(BodyGuard)) },
    );
    registry.register(
        PolicyDefinition::new("response-guard", "v1"),
        |_: &PolicyMetadata, _: &Params| -> Result<Arc<dyn Policy>, PolicyError> { Ok(Arc::new(ResponseGuard)) },
    );
    registry.register(
        PolicyDefinition::new("failing", "v1"),
        |_: &PolicyMetadata, _: &Params| -> Result<Arc<dyn Policy>, PolicyError> { Ok(Arc::new(FailingPolicy)) },
    );
    registry
}

pub fn kernel() -> Arc<Kernel> {
    Arc::new(Kernel::new(registry()))
}

pub fn policy(name: &str) -> PolicyConfig {
    PolicyConfig {
        name: name.to_string(),
        version: "v1".to_string(),
        ..Default::default()
    }
}

pub fn tag_policy(tag: &str) -> PolicyConfig {
    let mut parameters = Map::new();
    parameters.insert("tag".into(), Value::from(tag));
    PolicyConfig {
        parameters,
        ..policy("tag")
    }
}

pub fn route(key: &str, policies: Vec<PolicyConfig>) -> RouteConfig {
    RouteConfig {
        route_key: key.to_string(),
        api: None,
        policies,
    }
}

pub fn attributes(route: &str) -> Attributes {
    let mut filter = Map::new();
    filter.insert(ROUTE_NAME_ATTRIBUTE.into(), Value::from(route));
    filter.insert(
        ROUTE_METADATA_ATTRIBUTE.into(),
        Value::from(r#"{"api_id":"api-1","api_name":"orders","api_version":"v1"}"#),
    );
    let mut attrs = Attributes::new();
    attrs.insert(EXT_PROC_FILTER.into(), Value::Map(filter));
    attrs
}

fn header_list(headers: &[(&str, &str)]) -> Vec<HeaderEntry> {
    headers.iter().map(|(k, v)| HeaderEntry::new(*k, *v)).collect()
}

pub fn request_headers(route: &str, headers: &[(&str, &str)], end_of_stream: bool) -> ProcessingEvent {
    ProcessingEvent::new(ProcessingRequest::RequestHeaders(HttpHeaders {
        headers: header_list(headers),
        end_of_stream,
    }))
    .with_attributes(attributes(route))
}

pub fn request_body(body: &[u8], end_of_stream: bool) -> ProcessingEvent {
    ProcessingEvent::new(ProcessingRequest::RequestBody(HttpBody {
        body: body.to_vec(),
        end_of_stream,
    }))
}

pub fn response_headers(headers: &[(&str, &str)], end_of_stream: bool) -> ProcessingEvent {
    ProcessingEvent::new(ProcessingRequest::ResponseHeaders(HttpHeaders {
        headers: header_list(headers),
        end_of_stream,
    }))
}

pub fn response_body(body: &[u8], end_of_stream: bool) -> ProcessingEvent {
    ProcessingEvent::new(ProcessingRequest::ResponseBody(HttpBody {
        body: body.to_vec(),
        end_of_stream,
    }))
}

/// The continue part of a response, whatever its phase.
pub fn common(response: &ProcessingResponse) -> &CommonResponse {
    match &response.response {
        PhaseResponse::RequestHeaders(c)
        | PhaseResponse::RequestBody(c)
        | PhaseResponse::ResponseHeaders(c)
        | PhaseResponse::ResponseBody(c) => c,
        PhaseResponse::ImmediateResponse(i) => panic!("unexpected immediate response: {:?}", i),
    }
}

pub fn set_header(response: &ProcessingResponse, name: &str) -> Option<String> {
    common(response)
        .header_mutation
        .as_ref()?
        .set_headers
        .iter()
        .find(|h| h.key == name)
        .map(|h| h.value.clone())
}

/// Run one stream against `kernel` on a background task.
pub fn spawn_stream(kernel: &Arc<Kernel>) -> (StreamPeer, JoinHandle<Result<(), StreamError>>) {
    let (mut stream, peer) = ChannelStream::pair(8);
    let kernel = Arc::clone(kernel);
    let handle = tokio::spawn(async move { kernel.process(&mut stream).await });
    (peer, handle)
}

/// Send one event and wait for its response.
pub async fn exchange(peer: &mut StreamPeer, event: ProcessingEvent) -> ProcessingResponse {
    assert!(peer.send(event).await, "stream closed before send");
    peer.response().await.expect("stream ended without a response")
}
