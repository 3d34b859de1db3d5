//! Reference policies shipped with the kernel.
//!
//! - `set-headers` v1: sets or removes headers in either direction.
//!   Parameters: `request` / `response` (header name → value maps) and
//!   `remove_request` / `remove_response` (lists of header names).
//! - `respond` v1: answers the request directly. Parameters: `status`
//!   (default 200), `body` (string), `headers` (name → value map).

use std::sync::Arc;

use crate::engine::context::{RequestContext, ResponseContext};
use crate::policy::registry::{PolicyDefinition, PolicyMetadata, PolicyRegistry};
use crate::policy::types::{Action, ImmediateReply, Modification, Params, Policy, PolicyError, PolicyMode};
use crate::value::Value;

pub const SET_HEADERS: &str = "set-headers";
pub const RESPOND: &str = "respond";
pub const VERSION: &str = "v1";

/// Register every builtin with `registry`.
pub fn register_builtins(registry: &mut PolicyRegistry) {
    registry.register(
        PolicyDefinition::new(SET_HEADERS, VERSION).with_description("Set or remove request and response headers"),
        |_: &PolicyMetadata, params: &Params| -> Result<Arc<dyn Policy>, PolicyError> {
            SetHeaders::validate(params)?;
            Ok(Arc::new(SetHeaders))
        },
    );
    registry.register(
        PolicyDefinition::new(RESPOND, VERSION).with_description("Answer the request without contacting the upstream"),
        |_: &PolicyMetadata, params: &Params| -> Result<Arc<dyn Policy>, PolicyError> {
            Respond::status(params)?;
            Ok(Arc::new(Respond))
        },
    );
}

struct SetHeaders;

impl SetHeaders {
    fn validate(params: &Params) -> Result<(), PolicyError> {
        for key in ["request", "response"] {
            header_pairs(params, key)?;
        }
        for key in ["remove_request", "remove_response"] {
            header_names(params, key)?;
        }
        Ok(())
    }

    fn modification(params: &Params, set: &str, remove: &str) -> Result<Action, PolicyError> {
        let modification = Modification {
            set_headers: header_pairs(params, set)?,
            remove_headers: header_names(params, remove)?,
            ..Default::default()
        };
        if modification.is_empty() {
            Ok(Action::Continue)
        } else {
            Ok(Action::Modify(modification))
        }
    }
}

impl Policy for SetHeaders {
    fn mode(&self) -> PolicyMode {
        PolicyMode::default()
    }

    fn on_request(&self, _ctx: &mut RequestContext, params: &Params) -> Result<Action, PolicyError> {
        Self::modification(params, "request", "remove_request")
    }

    fn on_response(&self, _ctx: &mut ResponseContext, params: &Params) -> Result<Action, PolicyError> {
        Self::modification(params, "response", "remove_response")
    }
}

struct Respond;

impl Respond {
    fn status(params: &Params) -> Result<u16, PolicyError> {
        match params.get("status") {
            None | Some(Value::Null) => Ok(200),
            Some(Value::Number(n)) if (100.0..=599.0).contains(n) && n.fract() == 0.0 => Ok(*n as u16),
            Some(other) => Err(PolicyError::InvalidParameter {
                name: "status".to_string(),
                reason: format!("expected an HTTP status code, got {}", other),
            }),
        }
    }
}

impl Policy for Respond {
    fn mode(&self) -> PolicyMode {
        PolicyMode::default()
    }

    fn on_request(&self, _ctx: &mut RequestContext, params: &Params) -> Result<Action, PolicyError> {
        Ok(Action::ShortCircuit(ImmediateReply {
            status: Self::status(params)?,
            headers: header_pairs(params, "headers")?,
            body: params
                .get("body")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .as_bytes()
                .to_vec(),
        }))
    }
}

fn header_pairs(params: &Params, key: &str) -> Result<Vec<(String, String)>, PolicyError> {
    let Some(value) = params.get(key) else {
        return Ok(Vec::new());
    };
    let map = value.as_map().ok_or_else(|| invalid(key, "expected a table of header values"))?;
    map.iter()
        .map(|(name, v)| match v.as_str() {
            Some(s) => Ok((name.to_ascii_lowercase(), s.to_string())),
            None => Err(invalid(key, &format!("value for '{}' must be a string", name))),
        })
        .collect()
}

fn header_names(params: &Params, key: &str) -> Result<Vec<String>, PolicyError> {
    let Some(value) = params.get(key) else {
        return Ok(Vec::new());
    };
    let list = value.as_list().ok_or_else(|| invalid(key, "expected a list of header names"))?;
    list.iter()
        .map(|v| {
            v.as_str()
                .map(str::to_ascii_lowercase)
                .ok_or_else(|| invalid(key, "header names must be strings"))
        })
        .collect()
}

fn invalid(name: &str, reason: &str) -> PolicyError {
    PolicyError::InvalidParameter {
        name: name.to_string(),
        reason: reason.to_string(),
    }
}
