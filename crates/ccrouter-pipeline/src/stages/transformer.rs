//! Transformer stage: Anthropic wire format <-> canonical request/response
//!
//! Three strategies are registered, matching the factory's selection table:
//! `anthropic-to-openai` (the default, used for every non-Gemini, non-Anthropic
//! target), `anthropic-to-gemini`, which additionally coerces forced-function
//! tool choices down to a mode Gemini's `tool_config` can actually express,
//! and `anthropic-passthrough`, used when the upstream itself speaks the
//! Anthropic wire format — the canonical hop is still required (the Protocol
//! stage only accepts `CanonicalRequest`/`CanonicalResponse`), but nothing is
//! coerced or lossily reshaped for a foreign tool-choice model.

use std::sync::Arc;

use async_trait::async_trait;

use crate::canonical::{CompletionRequest, CompletionResponse, ToolChoice, ToolChoiceMode};
use crate::context::ExecutionContext;
use crate::error::PipelineError;
use crate::message::{Direction, PipelineMessage};
use crate::module::{HealthReport, Module, ModuleIdentity, ModuleStatus, StageKind, StatusCell};
use crate::registry::{StageConfig, StageRegistry};

/// Registers every Transformer strategy into `registry`
pub fn register_all(registry: &StageRegistry) {
    registry.register(StageKind::Transformer, "anthropic-to-openai", |cfg| {
        Ok(Arc::new(AnthropicTransformer::new(cfg, TransformMode::ToOpenAi)))
    });
    registry.register(StageKind::Transformer, "anthropic-to-gemini", |cfg| {
        Ok(Arc::new(AnthropicTransformer::new(cfg, TransformMode::ToGemini)))
    });
    registry.register(StageKind::Transformer, "anthropic-passthrough", |cfg| {
        Ok(Arc::new(AnthropicTransformer::new(cfg, TransformMode::Passthrough)))
    });
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TransformMode {
    ToOpenAi,
    ToGemini,
    Passthrough,
}

impl TransformMode {
    const fn name(self) -> &'static str {
        match self {
            Self::ToOpenAi => "anthropic-to-openai",
            Self::ToGemini => "anthropic-to-gemini",
            Self::Passthrough => "anthropic-passthrough",
        }
    }
}

struct AnthropicTransformer {
    identity: ModuleIdentity,
    status: StatusCell,
    mode: TransformMode,
}

impl AnthropicTransformer {
    fn new(cfg: &StageConfig, mode: TransformMode) -> Self {
        Self {
            identity: ModuleIdentity {
                id: format!("{}-transformer", cfg.provider_name),
                name: mode.name().to_owned(),
                kind: StageKind::Transformer,
                version: env!("CARGO_PKG_VERSION").to_owned(),
            },
            status: StatusCell::new(),
            mode,
        }
    }

    fn coerce_request(&self, mut request: CompletionRequest) -> CompletionRequest {
        if self.mode == TransformMode::ToGemini
            && let Some(ToolChoice::Function(_)) = &request.tool_choice
        {
            request.tool_choice = Some(ToolChoice::Mode(ToolChoiceMode::Required));
        }
        request
    }
}

#[async_trait]
impl Module for AnthropicTransformer {
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
                let anthropic = message
                    .into_anthropic_request()
                    .map_err(|m| PipelineError::ProtocolMismatch(format!("transformer expected anthropic-request, got {}", m.kind())))?;
                let canonical: CompletionRequest = anthropic.into();
                Ok(PipelineMessage::CanonicalRequest(self.coerce_request(canonical)))
            }
            Direction::Response => {
                let canonical = message
                    .into_canonical_response()
                    .map_err(|m| PipelineError::ProtocolMismatch(format!("transformer expected canonical-response, got {}", m.kind())))?;
                let anthropic: crate::wire::anthropic::AnthropicResponse = canonical.into();
                Ok(PipelineMessage::AnthropicResponse(anthropic))
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::canonical::{ToolChoiceFunction, ToolChoiceFunctionName};

    fn config() -> StageConfig {
        StageConfig {
            provider_name: "test".to_owned(),
            api_base_url: "https://example.invalid".parse().unwrap(),
            api_key: secrecy::SecretString::from("k"),
            target_model: "m".to_owned(),
            max_tokens: None,
            header_rules: Vec::new(),
            compatibility_options: serde_json::Value::Null,
            timeout: std::time::Duration::from_secs(60),
        }
    }

    #[test]
    fn gemini_transformer_coerces_forced_function_choice() {
        let t = AnthropicTransformer::new(&config(), TransformMode::ToGemini);
        let request = CompletionRequest {
            model: "m".to_owned(),
            messages: Vec::new(),
            params: crate::canonical::CompletionParams::default(),
            tools: None,
            tool_choice: Some(ToolChoice::Function(ToolChoiceFunction {
                tool_type: "function".to_owned(),
                function: ToolChoiceFunctionName { name: "foo".to_owned() },
            })),
            stream: false,
        };
        let coerced = t.coerce_request(request);
        assert!(matches!(coerced.tool_choice, Some(ToolChoice::Mode(ToolChoiceMode::Required))));
    }

    #[test]
    fn openai_transformer_leaves_tool_choice_untouched() {
        let t = AnthropicTransformer::new(&config(), TransformMode::ToOpenAi);
        let request = CompletionRequest {
            model: "m".to_owned(),
            messages: Vec::new(),
            params: crate::canonical::CompletionParams::default(),
            tools: None,
            tool_choice: Some(ToolChoice::Function(ToolChoiceFunction {
                tool_type: "function".to_owned(),
                function: ToolChoiceFunctionName { name: "foo".to_owned() },
            })),
            stream: false,
        };
        let result = t.coerce_request(request);
        assert!(matches!(result.tool_choice, Some(ToolChoice::Function(_))));
    }

    #[test]
    fn passthrough_transformer_leaves_tool_choice_untouched() {
        let t = AnthropicTransformer::new(&config(), TransformMode::Passthrough);
        let request = CompletionRequest {
            model: "m".to_owned(),
            messages: Vec::new(),
            params: crate::canonical::CompletionParams::default(),
            tools: None,
            tool_choice: Some(ToolChoice::Function(ToolChoiceFunction {
                tool_type: "function".to_owned(),
                function: ToolChoiceFunctionName { name: "foo".to_owned() },
            })),
            stream: false,
        };
        let result = t.coerce_request(request);
        assert!(matches!(result.tool_choice, Some(ToolChoice::Function(_))));
    }

    #[test]
    fn passthrough_transformer_is_named_for_registry_lookup() {
        let t = AnthropicTransformer::new(&config(), TransformMode::Passthrough);
        assert_eq!(t.identity().name, "anthropic-passthrough");
    }
}
