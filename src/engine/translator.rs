//! Translation of execution results into wire responses.

use crate::engine::executor::ExecutionResult;
use crate::extproc::types::{
    BodyMutation, CommonResponse, HeaderEntry, HeaderMutation, ImmediateResponse, Phase, PhaseResponse,
    ResponseStatus,
};

/// Converts an [`ExecutionResult`] into the phase part of a wire response.
pub trait ActionTranslator: Send + Sync {
    fn translate(&self, phase: Phase, result: ExecutionResult) -> PhaseResponse;
}

/// Maps short-circuits to immediate responses and everything else to a
/// continue carrying the accumulated mutations.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultTranslator;

impl ActionTranslator for DefaultTranslator {
    fn translate(&self, phase: Phase, result: ExecutionResult) -> PhaseResponse {
        if let Some(reply) = result.short_circuit {
            let headers = HeaderMutation {
                set_headers: reply
                    .headers
                    .into_iter()
                    .map(|(k, v)| HeaderEntry::new(k, v))
                    .collect(),
                remove_headers: Vec::new(),
            };
            return PhaseResponse::ImmediateResponse(ImmediateResponse {
                status: reply.status,
                headers: (!headers.is_empty()).then_some(headers),
                body: reply.body,
                details: format!("short_circuited_at_{}", phase),
            });
        }

        let header_mutation = HeaderMutation {
            set_headers: result
                .set_headers
                .into_iter()
                .map(|(k, v)| HeaderEntry::new(k, v))
                .collect(),
            remove_headers: result.remove_headers,
        };

        let mut response = CommonResponse {
            header_mutation: (!header_mutation.is_empty()).then_some(header_mutation),
            ..Default::default()
        };

        if let Some(body) = result.body {
            response.body_mutation = Some(if body.is_empty() {
                BodyMutation::ClearBody
            } else {
                BodyMutation::Body(body)
            });
            if phase.is_headers() {
                response.status = ResponseStatus::ContinueAndReplace;
            }
        }

        PhaseResponse::common(phase, response)
    }
}
