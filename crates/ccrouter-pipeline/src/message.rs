//! The value threaded through a pipeline's four stages
//!
//! A single request/response round-trip passes through six distinct shapes as
//! it crosses stage boundaries. `PipelineMessage` unifies them behind one type
//! so `Module::process` has a single signature regardless of which stage, and
//! which direction, is handling it.

use crate::canonical::{CompletionRequest, CompletionResponse};
use crate::wire::anthropic::{AnthropicRequest, AnthropicResponse};

/// Which leg of a request's round trip a stage is being asked to handle
///
/// The Server stage (index 3) is only ever invoked with `Request` — the
/// backward leg of `Pipeline::execute` re-visits stages 2, 1, 0, never 3,
/// since the network call itself produces the response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Forward leg: client input flowing toward the network
    Request,
    /// Backward leg: upstream output flowing back toward the client
    Response,
}

/// The payload exchanged between pipeline stages
#[derive(Debug, Clone)]
pub enum PipelineMessage {
    /// Client-shaped Anthropic Messages API request, entering stage 0
    AnthropicRequest(AnthropicRequest),
    /// Provider-agnostic canonical request, between stage 0 and stage 1
    CanonicalRequest(CompletionRequest),
    /// Provider wire-format request body, between stage 1 and stage 3 (passing through stage 2)
    WireRequest(serde_json::Value),
    /// Provider wire-format response body, the Server stage's output
    WireResponse(serde_json::Value),
    /// Provider-agnostic canonical response, between stage 1 and stage 0
    CanonicalResponse(CompletionResponse),
    /// Client-shaped Anthropic Messages API response, stage 0's final output
    AnthropicResponse(AnthropicResponse),
}

impl PipelineMessage {
    /// Unwrap an Anthropic request, or report a protocol mismatch
    pub fn into_anthropic_request(self) -> Result<AnthropicRequest, Self> {
        match self {
            Self::AnthropicRequest(r) => Ok(r),
            other => Err(other),
        }
    }

    /// Unwrap a canonical request, or report a protocol mismatch
    pub fn into_canonical_request(self) -> Result<CompletionRequest, Self> {
        match self {
            Self::CanonicalRequest(r) => Ok(r),
            other => Err(other),
        }
    }

    /// Unwrap a wire-format JSON body, or report a protocol mismatch
    pub fn into_wire_request(self) -> Result<serde_json::Value, Self> {
        match self {
            Self::WireRequest(v) => Ok(v),
            other => Err(other),
        }
    }

    /// Unwrap a wire-format JSON body, or report a protocol mismatch
    pub fn into_wire_response(self) -> Result<serde_json::Value, Self> {
        match self {
            Self::WireResponse(v) => Ok(v),
            other => Err(other),
        }
    }

    /// Unwrap a canonical response, or report a protocol mismatch
    pub fn into_canonical_response(self) -> Result<CompletionResponse, Self> {
        match self {
            Self::CanonicalResponse(r) => Ok(r),
            other => Err(other),
        }
    }

    /// Unwrap an Anthropic response, or report a protocol mismatch
    pub fn into_anthropic_response(self) -> Result<AnthropicResponse, Self> {
        match self {
            Self::AnthropicResponse(r) => Ok(r),
            other => Err(other),
        }
    }

    /// Short tag naming the current shape, for mismatch error messages
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::AnthropicRequest(_) => "anthropic-request",
            Self::CanonicalRequest(_) => "canonical-request",
            Self::WireRequest(_) => "wire-request",
            Self::WireResponse(_) => "wire-response",
            Self::CanonicalResponse(_) => "canonical-response",
            Self::AnthropicResponse(_) => "anthropic-response",
        }
    }
}
