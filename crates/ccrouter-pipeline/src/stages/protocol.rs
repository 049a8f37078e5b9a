//! Protocol stage: canonical request/response <-> provider wire-format JSON
//!
//! Three strategies, keyed by `declared_protocol`: `openai`, `gemini`,
//! `anthropic`. `openai` is the default the factory falls back to.

use std::sync::Arc;

use async_trait::async_trait;

use crate::canonical::{CompletionRequest, CompletionResponse};
use crate::context::ExecutionContext;
use crate::error::PipelineError;
use crate::message::{Direction, PipelineMessage};
use crate::module::{HealthReport, Module, ModuleIdentity, ModuleStatus, StageKind, StatusCell};
use crate::registry::{StageConfig, StageRegistry};
use crate::wire;

/// Registers every Protocol strategy into `registry`
pub fn register_all(registry: &StageRegistry) {
    registry.register(StageKind::Protocol, "openai", |cfg| Ok(Arc::new(WireCodec::new(cfg, WireFormat::OpenAi))));
    registry.register(StageKind::Protocol, "gemini", |cfg| Ok(Arc::new(WireCodec::new(cfg, WireFormat::Gemini))));
    registry.register(StageKind::Protocol, "anthropic", |cfg| Ok(Arc::new(WireCodec::new(cfg, WireFormat::Anthropic))));
}

#[derive(Debug, Clone, Copy)]
enum WireFormat {
    OpenAi,
    Gemini,
    Anthropic,
}

struct WireCodec {
    identity: ModuleIdentity,
    status: StatusCell,
    format: WireFormat,
}

impl WireCodec {
    fn new(cfg: &StageConfig, format: WireFormat) -> Self {
        let name = match format {
            WireFormat::OpenAi => "openai",
            WireFormat::Gemini => "gemini",
            WireFormat::Anthropic => "anthropic",
        };
        Self {
            identity: ModuleIdentity {
                id: format!("{}-protocol", cfg.provider_name),
                name: name.to_owned(),
                kind: StageKind::Protocol,
                version: env!("CARGO_PKG_VERSION").to_owned(),
            },
            status: StatusCell::new(),
            format,
        }
    }

    fn encode(&self, request: &CompletionRequest) -> Result<serde_json::Value, PipelineError> {
        let value = match self.format {
            WireFormat::OpenAi => {
                let wire: wire::openai::OpenAiRequest = request.into();
                serde_json::to_value(wire)
            }
            WireFormat::Gemini => {
                let wire: wire::google::GoogleRequest = request.into();
                serde_json::to_value(wire)
            }
            WireFormat::Anthropic => {
                let wire: wire::anthropic::AnthropicRequest = request.into();
                serde_json::to_value(wire)
            }
        };
        value.map_err(|e| PipelineError::ProtocolMismatch(format!("failed to encode wire request: {e}")))
    }

    fn decode(&self, body: serde_json::Value) -> Result<CompletionResponse, PipelineError> {
        match self.format {
            WireFormat::OpenAi => serde_json::from_value::<wire::openai::OpenAiResponse>(body)
                .map(Into::into)
                .map_err(|e| PipelineError::ProtocolMismatch(format!("failed to decode openai response: {e}"))),
            WireFormat::Gemini => serde_json::from_value::<wire::google::GoogleResponse>(body)
                .map(Into::into)
                .map_err(|e| PipelineError::ProtocolMismatch(format!("failed to decode gemini response: {e}"))),
            WireFormat::Anthropic => serde_json::from_value::<wire::anthropic::AnthropicResponse>(body)
                .map(Into::into)
                .map_err(|e| PipelineError::ProtocolMismatch(format!("failed to decode anthropic response: {e}"))),
        }
    }
}

#[async_trait]
impl Module for WireCodec {
    fn identity(&self) -> &ModuleIdentity {
        &self.identity
    }

    fn status(&self) -> ModuleStatus {
        self.status.get()
    }

    async fn start(&self) -> Result<(), PipelineError> {
        self.status.set(ModuleStatus::Running);
        Ok(())
    }

    async fn process(
        &self,
        direction: Direction,
        message: PipelineMessage,
        _ctx: &ExecutionContext,
    ) -> Result<PipelineMessage, PipelineError> {
        match direction {
            Direction::Request => {
                let request = message
                    .into_canonical_request()
                    .map_err(|m| PipelineError::ProtocolMismatch(format!("protocol stage expected canonical-request, got {}", m.kind())))?;
                Ok(PipelineMessage::WireRequest(self.encode(&request)?))
            }
            Direction::Response => {
                let body = message
                    .into_wire_response()
                    .map_err(|m| PipelineError::ProtocolMismatch(format!("protocol stage expected wire-response, got {}", m.kind())))?;
                Ok(PipelineMessage::CanonicalResponse(self.decode(body)?))
            }
        }
    }

    async fn stop(&self) -> Result<(), PipelineError> {
        self.status.set(ModuleStatus::Stopped);
        Ok(())
    }

    async fn health_check(&self) -> HealthReport {
        HealthReport::ok()
    }
}
