//! Chain execution.
//!
//! [`ChainExecutor`] is the seam between the kernel and whatever runs an
//! ordered list of policies. The kernel hands it the chain's policies, their
//! specs, the live phase context and the chain's condition flag, and gets
//! back an [`ExecutionResult`] to translate.
//!
//! [`SequentialExecutor`] is the bundled implementation.

use std::collections::BTreeMap;
use std::sync::Arc;

use thiserror::Error;

use crate::engine::context::{Body, RequestContext, ResponseContext, SharedContext};
use crate::engine::headers::Headers;
use crate::policy::chain::PolicySpec;
use crate::policy::types::{Action, ImmediateReply, Modification, Params, Policy, PolicyError};
use crate::value::{AnalyticsValue, Map};

/// What happened to one policy during a phase.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PolicyOutcome {
    pub name: String,
    pub version: String,
    pub skipped: bool,
}

/// Aggregated outcome of running a chain for one phase.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExecutionResult {
    /// Set when a policy answered the request itself.
    pub short_circuit: Option<ImmediateReply>,
    pub set_headers: Vec<(String, String)>,
    pub remove_headers: Vec<String>,
    pub body: Option<Vec<u8>>,
    pub analytics: BTreeMap<String, AnalyticsValue>,
    pub dynamic_metadata: Map,
    pub outcomes: Vec<PolicyOutcome>,
}

impl ExecutionResult {
    /// Fold a policy's modification into the result.
    pub fn merge(&mut self, modification: Modification) {
        for (name, value) in modification.set_headers {
            self.remove_headers.retain(|h| !h.eq_ignore_ascii_case(&name));
            self.set_headers.retain(|(h, _)| !h.eq_ignore_ascii_case(&name));
            self.set_headers.push((name, value));
        }
        for name in modification.remove_headers {
            self.set_headers.retain(|(h, _)| !h.eq_ignore_ascii_case(&name));
            if !self.remove_headers.iter().any(|h| h.eq_ignore_ascii_case(&name)) {
                self.remove_headers.push(name);
            }
        }
        if modification.body.is_some() {
            self.body = modification.body;
        }
        self.analytics.extend(modification.analytics);
        self.dynamic_metadata.extend(modification.dynamic_metadata);
    }

    pub fn is_short_circuit(&self) -> bool {
        self.short_circuit.is_some()
    }
}

#[derive(Debug, Error)]
pub enum ExecutionError {
    #[error("policy {name} {version} failed: {source}")]
    Policy {
        name: String,
        version: String,
        #[source]
        source: PolicyError,
    },

    #[error("condition for policy {name} {version} could not be evaluated: {source}")]
    Condition {
        name: String,
        version: String,
        #[source]
        source: PolicyError,
    },

    #[error("chain is inconsistent: {policies} policies but {specs} specs")]
    Inconsistent { policies: usize, specs: usize },
}

/// Runs a compiled chain against a phase context.
pub trait ChainExecutor: Send + Sync {
    fn execute_request(
        &self,
        policies: &[Arc<dyn Policy>],
        specs: &[PolicySpec],
        ctx: &mut RequestContext,
        has_execution_conditions: bool,
    ) -> Result<ExecutionResult, ExecutionError>;

    fn execute_response(
        &self,
        policies: &[Arc<dyn Policy>],
        specs: &[PolicySpec],
        ctx: &mut ResponseContext,
        has_execution_conditions: bool,
    ) -> Result<ExecutionResult, ExecutionError>;
}

/// Decides whether a conditional policy runs.
pub trait ConditionEvaluator: Send + Sync {
    fn evaluate(&self, expression: &str, shared: &SharedContext, headers: &Headers) -> Result<bool, PolicyError>;
}

/// Runs enabled policies in order, stopping at the first short-circuit.
///
/// Each modification is applied to the live context before the next policy
/// runs, so later policies see earlier changes.
#[derive(Default)]
pub struct SequentialExecutor {
    conditions: Option<Arc<dyn ConditionEvaluator>>,
}

impl SequentialExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_condition_evaluator(mut self, evaluator: Arc<dyn ConditionEvaluator>) -> Self {
        self.conditions = Some(evaluator);
        self
    }

    fn run<C: PhaseTarget>(
        &self,
        policies: &[Arc<dyn Policy>],
        specs: &[PolicySpec],
        ctx: &mut C,
        has_execution_conditions: bool,
    ) -> Result<ExecutionResult, ExecutionError> {
        if policies.len() != specs.len() {
            return Err(ExecutionError::Inconsistent {
                policies: policies.len(),
                specs: specs.len(),
            });
        }

        let mut result = ExecutionResult::default();
        for (policy, spec) in policies.iter().zip(specs) {
            let run = spec.enabled
                && (!has_execution_conditions || self.condition_holds(spec, ctx)?);

            result.outcomes.push(PolicyOutcome {
                name: spec.name.clone(),
                version: spec.version.clone(),
                skipped: !run,
            });
            if !run {
                continue;
            }

            let action = ctx
                .invoke(policy.as_ref(), &spec.parameters)
                .map_err(|source| ExecutionError::Policy {
                    name: spec.name.clone(),
                    version: spec.version.clone(),
                    source,
                })?;

            match action {
                Action::Continue => {}
                Action::Modify(modification) => {
                    ctx.apply(&modification);
                    result.merge(modification);
                }
                Action::ShortCircuit(reply) => {
                    tracing::debug!(policy = %spec.name, status = reply.status, "Policy short-circuited chain");
                    result.short_circuit = Some(reply);
                    break;
                }
            }
        }
        Ok(result)
    }

    fn condition_holds<C: PhaseTarget>(&self, spec: &PolicySpec, ctx: &C) -> Result<bool, ExecutionError> {
        let Some(expression) = spec.execution_condition.as_deref().filter(|_| spec.has_condition()) else {
            return Ok(true);
        };
        match &self.conditions {
            Some(evaluator) => evaluator
                .evaluate(expression, ctx.shared(), ctx.headers())
                .map_err(|source| ExecutionError::Condition {
                    name: spec.name.clone(),
                    version: spec.version.clone(),
                    source,
                }),
            None => {
                tracing::debug!(policy = %spec.name, "No condition evaluator configured, running policy");
                Ok(true)
            }
        }
    }
}

impl ChainExecutor for SequentialExecutor {
    fn execute_request(
        &self,
        policies: &[Arc<dyn Policy>],
        specs: &[PolicySpec],
        ctx: &mut RequestContext,
        has_execution_conditions: bool,
    ) -> Result<ExecutionResult, ExecutionError> {
        self.run(policies, specs, ctx, has_execution_conditions)
    }

    fn execute_response(
        &self,
        policies: &[Arc<dyn Policy>],
        specs: &[PolicySpec],
        ctx: &mut ResponseContext,
        has_execution_conditions: bool,
    ) -> Result<ExecutionResult, ExecutionError> {
        self.run(policies, specs, ctx, has_execution_conditions)
    }
}

/// The per-direction bits the sequential loop needs.
trait PhaseTarget {
    fn invoke(&mut self, policy: &dyn Policy, params: &Params) -> Result<Action, PolicyError>;
    fn headers(&self) -> &Headers;
    fn headers_mut(&mut self) -> &mut Headers;
    fn body_mut(&mut self) -> &mut Option<Body>;
    fn shared(&self) -> &SharedContext;

    fn apply(&mut self, modification: &Modification) {
        let headers = self.headers_mut();
        for name in &modification.remove_headers {
            headers.remove(name);
        }
        for (name, value) in &modification.set_headers {
            headers.set(name, value);
        }
        if let Some(content) = &modification.body {
            let body = self.body_mut();
            let end_of_stream = body.as_ref().map(|b| b.end_of_stream).unwrap_or(true);
            *body = Some(Body::new(content.clone(), end_of_stream));
        }
    }
}

impl PhaseTarget for RequestContext {
    fn invoke(&mut self, policy: &dyn Policy, params: &Params) -> Result<Action, PolicyError> {
        policy.on_request(self, params)
    }

    fn headers(&self) -> &Headers {
        &self.headers
    }

    fn headers_mut(&mut self) -> &mut Headers {
        &mut self.headers
    }

    fn body_mut(&mut self) -> &mut Option<Body> {
        &mut self.body
    }

    fn shared(&self) -> &SharedContext {
        &self.shared
    }
}

impl PhaseTarget for ResponseContext {
    fn invoke(&mut self, policy: &dyn Policy, params: &Params) -> Result<Action, PolicyError> {
        policy.on_response(self, params)
    }

    fn headers(&self) -> &Headers {
        &self.headers
    }

    fn headers_mut(&mut self) -> &mut Headers {
        &mut self.headers
    }

    fn body_mut(&mut self) -> &mut Option<Body> {
        &mut self.body
    }

    fn shared(&self) -> &SharedContext {
        ResponseContext::shared(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::types::PolicyMode;
    use crate::value::Value;

    struct SetHeader(&'static str, &'static str);

    impl Policy for SetHeader {
        fn mode(&self) -> PolicyMode {
            PolicyMode::default()
        }

        fn on_request(&self, ctx: &mut RequestContext, _: &Params) -> Result<Action, PolicyError> {
            ctx.shared.metadata.insert(self.0.into(), Value::from(self.1));
            Ok(Action::Modify(Modification {
                set_headers: vec![(self.0.into(), self.1.into())],
                ..Default::default()
            }))
        }
    }

    struct RequireHeader(&'static str);

    impl Policy for RequireHeader {
        fn mode(&self) -> PolicyMode {
            PolicyMode::default()
        }

        fn on_request(&self, ctx: &mut RequestContext, _: &Params) -> Result<Action, PolicyError> {
            if ctx.headers.contains(self.0) {
                Ok(Action::Continue)
            } else {
                Ok(Action::ShortCircuit(ImmediateReply {
                    status: 401,
                    ..Default::default()
                }))
            }
        }
    }

    struct Failing;

    impl Policy for Failing {
        fn mode(&self) -> PolicyMode {
            PolicyMode::default()
        }

        fn on_request(&self, _: &mut RequestContext, _: &Params) -> Result<Action, PolicyError> {
            Err(PolicyError::Failed("database password is hunter2".into()))
        }
    }

    struct Never;

    impl ConditionEvaluator for Never {
        fn evaluate(&self, _: &str, _: &SharedContext, _: &Headers) -> Result<bool, PolicyError> {
            Ok(false)
        }
    }

    fn request() -> RequestContext {
        RequestContext::new(SharedContext::new("req-1"))
    }

    #[test]
    fn test_later_policies_see_earlier_modifications() {
        let policies: Vec<Arc<dyn Policy>> =
            vec![Arc::new(SetHeader("x-auth", "ok")), Arc::new(RequireHeader("x-auth"))];
        let specs = vec![PolicySpec::new("set", "v1"), PolicySpec::new("require", "v1")];
        let mut ctx = request();

        let result = SequentialExecutor::new()
            .execute_request(&policies, &specs, &mut ctx, false)
            .unwrap();
        assert!(!result.is_short_circuit());
        assert_eq!(result.set_headers, vec![("x-auth".to_string(), "ok".to_string())]);
        assert_eq!(ctx.headers.get("x-auth"), Some("ok"));
    }

    #[test]
    fn test_short_circuit_stops_chain() {
        let policies: Vec<Arc<dyn Policy>> =
            vec![Arc::new(RequireHeader("x-auth")), Arc::new(SetHeader("x-after", "1"))];
        let specs = vec![PolicySpec::new("require", "v1"), PolicySpec::new("set", "v1")];
        let mut ctx = request();

        let result = SequentialExecutor::new()
            .execute_request(&policies, &specs, &mut ctx, false)
            .unwrap();
        assert_eq!(result.short_circuit.as_ref().map(|r| r.status), Some(401));
        assert_eq!(result.outcomes.len(), 1);
        assert!(!ctx.headers.contains("x-after"));
    }

    #[test]
    fn test_disabled_policy_is_skipped() {
        let policies: Vec<Arc<dyn Policy>> = vec![Arc::new(Failing)];
        let specs = vec![PolicySpec::new("failing", "v1").disabled()];
        let mut ctx = request();

        let result = SequentialExecutor::new()
            .execute_request(&policies, &specs, &mut ctx, false)
            .unwrap();
        assert!(result.outcomes[0].skipped);
    }

    #[test]
    fn test_condition_evaluator_consulted_only_when_flagged() {
        let policies: Vec<Arc<dyn Policy>> = vec![Arc::new(SetHeader("x-a", "1"))];
        let specs = vec![PolicySpec::new("set", "v1").with_condition("false")];
        let executor = SequentialExecutor::new().with_condition_evaluator(Arc::new(Never));

        let mut ctx = request();
        let result = executor.execute_request(&policies, &specs, &mut ctx, true).unwrap();
        assert!(result.outcomes[0].skipped);

        let mut ctx = request();
        let result = executor.execute_request(&policies, &specs, &mut ctx, false).unwrap();
        assert!(!result.outcomes[0].skipped);
    }

    #[test]
    fn test_policy_error_names_policy() {
        let policies: Vec<Arc<dyn Policy>> = vec![Arc::new(Failing)];
        let specs = vec![PolicySpec::new("failing", "v3")];
        let mut ctx = request();

        let err = SequentialExecutor::new()
            .execute_request(&policies, &specs, &mut ctx, false)
            .err()
            .unwrap();
        assert!(err.to_string().contains("failing v3"));
    }

    #[test]
    fn test_merge_set_then_remove() {
        let mut result = ExecutionResult::default();
        result.merge(Modification {
            set_headers: vec![("x-a".into(), "1".into())],
            ..Default::default()
        });
        result.merge(Modification {
            remove_headers: vec!["X-A".into()],
            body: Some(b"new".to_vec()),
            ..Default::default()
        });
        assert!(result.set_headers.is_empty());
        assert_eq!(result.remove_headers, vec!["X-A".to_string()]);
        assert_eq!(result.body.as_deref(), Some(&b"new"[..]));
    }
}
