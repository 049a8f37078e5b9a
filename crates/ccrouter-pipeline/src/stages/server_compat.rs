//! ServerCompatibility stage: per-provider quirk patches on the wire body and headers
//!
//! The factory's selection table names eight strategies (`lmstudio`,
//! `ollama`, `vllm`, `anthropic`, `openai`, `gemini`, `modelscope`, `qwen`)
//! plus a `passthrough` default. Rather than eight near-identical structs,
//! one `GenericCompatibility` Module is parameterized by a `Quirks` preset
//! and registered under all nine names.

use std::sync::Arc;

use async_trait::async_trait;
use ccrouter_core::headers::apply_header_rules;
use http::HeaderMap;

use crate::context::ExecutionContext;
use crate::error::PipelineError;
use crate::message::{Direction, PipelineMessage};
use crate::module::{HealthReport, Module, ModuleIdentity, ModuleStatus, StageKind, StatusCell};
use crate::registry::{StageConfig, StageRegistry};

/// Registers every ServerCompatibility strategy into `registry`
pub fn register_all(registry: &StageRegistry) {
    for (name, quirks) in [
        ("passthrough", Quirks::passthrough()),
        ("openai", Quirks::passthrough()),
        ("anthropic", Quirks::passthrough()),
        ("lmstudio", Quirks::lmstudio()),
        ("ollama", Quirks::ollama()),
        ("vllm", Quirks::vllm()),
        ("gemini", Quirks::passthrough()),
        ("modelscope", Quirks::modelscope()),
        ("qwen", Quirks::qwen()),
    ] {
        registry.register(StageKind::ServerCompatibility, name, move |cfg| {
            Ok(Arc::new(GenericCompatibility::new(cfg, name, quirks.clone())))
        });
    }
}

/// Per-provider quirk toggles applied to the wire request/response bodies
#[derive(Debug, Clone, Default)]
struct Quirks {
    /// Strip `stream_options` before sending; some local servers reject the field
    strip_stream_options: bool,
    /// Clamp `max_tokens` down to this ceiling regardless of what the client asked for
    max_tokens_ceiling: Option<u32>,
    /// Best-effort recovery of tool calls some local servers emit as inline text
    /// (`<tool_call>{"name":...,"arguments":...}</tool_call>`) instead of a
    /// structured `tool_calls` array, when the response has none
    repair_embedded_tool_calls: bool,
}

impl Quirks {
    fn passthrough() -> Self {
        Self::default()
    }

    fn lmstudio() -> Self {
        Self {
            strip_stream_options: true,
            repair_embedded_tool_calls: true,
            ..Self::default()
        }
    }

    fn ollama() -> Self {
        Self {
            strip_stream_options: true,
            repair_embedded_tool_calls: true,
            ..Self::default()
        }
    }

    fn vllm() -> Self {
        Self {
            repair_embedded_tool_calls: true,
            ..Self::default()
        }
    }

    fn modelscope() -> Self {
        Self {
            max_tokens_ceiling: Some(8192),
            ..Self::default()
        }
    }

    fn qwen() -> Self {
        Self {
            max_tokens_ceiling: Some(8192),
            ..Self::default()
        }
    }
}

struct GenericCompatibility {
    identity: ModuleIdentity,
    status: StatusCell,
    quirks: Quirks,
    header_rules: Vec<ccrouter_core::headers::HeaderRule>,
}

impl GenericCompatibility {
    fn new(cfg: &StageConfig, name: &str, quirks: Quirks) -> Self {
        Self {
            identity: ModuleIdentity {
                id: format!("{}-compatibility", cfg.provider_name),
                name: name.to_owned(),
                kind: StageKind::ServerCompatibility,
                version: env!("CARGO_PKG_VERSION").to_owned(),
            },
            status: StatusCell::new(),
            quirks,
            header_rules: cfg.header_rules.clone(),
        }
    }

    /// Build the headers sent to the upstream from the client's incoming
    /// headers and this provider's configured rules (auth injection, forwarding, etc.)
    fn build_headers(&self, incoming: &HeaderMap) -> HeaderMap {
        apply_header_rules(incoming, &self.header_rules)
    }

    fn patch_request(&self, mut body: serde_json::Value) -> serde_json::Value {
        if let Some(obj) = body.as_object_mut() {
            if self.quirks.strip_stream_options {
                obj.remove("stream_options");
            }
            if let Some(ceiling) = self.quirks.max_tokens_ceiling
                && let Some(max_tokens) = obj.get("max_tokens").and_then(serde_json::Value::as_u64)
                && max_tokens > u64::from(ceiling)
            {
                obj.insert("max_tokens".to_owned(), serde_json::json!(ceiling));
            }
        }
        body
    }

    fn patch_response(&self, mut body: serde_json::Value) -> serde_json::Value {
        if self.quirks.repair_embedded_tool_calls {
            repair_embedded_tool_calls(&mut body);
        }
        body
    }
}

/// Scan `choices[].message` for a provider that dumped a tool call as inline
/// text instead of a structured `tool_calls` entry, and lift it out
fn repair_embedded_tool_calls(body: &mut serde_json::Value) {
    let Some(choices) = body.get_mut("choices").and_then(serde_json::Value::as_array_mut) else {
        return;
    };
    for choice in choices {
        let Some(message) = choice.get_mut("message") else { continue };
        if message.get("tool_calls").is_some_and(|v| !v.is_null()) {
            continue;
        }
        let Some(content) = message.get("content").and_then(serde_json::Value::as_str) else {
            continue;
        };
        let Some(extracted) = extract_tool_call_tag(content) else {
            continue;
        };
        if let Some(obj) = message.as_object_mut() {
            obj.insert("tool_calls".to_owned(), serde_json::json!([extracted]));
            obj.insert("content".to_owned(), serde_json::Value::Null);
        }
    }
}

fn extract_tool_call_tag(content: &str) -> Option<serde_json::Value> {
    let start = content.find("<tool_call>")? + "<tool_call>".len();
    let end = content[start..].find("</tool_call>")? + start;
    let parsed: serde_json::Value = serde_json::from_str(content[start..end].trim()).ok()?;
    let name = parsed.get("name")?.as_str()?.to_owned();
    let arguments = parsed.get("arguments").cloned().unwrap_or(serde_json::json!({}));
    Some(serde_json::json!({
        "id": format!("call_{}", uuid::Uuid::new_v4()),
        "type": "function",
        "function": {
            "name": name,
            "arguments": arguments.to_string(),
        },
    }))
}

#[async_trait]
impl Module for GenericCompatibility {
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
        ctx: &ExecutionContext,
    ) -> Result<PipelineMessage, PipelineError> {
        match direction {
            Direction::Request => {
                let body = message
                    .into_wire_request()
                    .map_err(|m| PipelineError::ProtocolMismatch(format!("compatibility stage expected wire-request, got {}", m.kind())))?;
                ctx.set_outgoing_headers(self.build_headers(&ctx.incoming_headers));
                Ok(PipelineMessage::WireRequest(self.patch_request(body)))
            }
            Direction::Response => {
                let body = message
                    .into_wire_response()
                    .map_err(|m| PipelineError::ProtocolMismatch(format!("compatibility stage expected wire-response, got {}", m.kind())))?;
                Ok(PipelineMessage::WireResponse(self.patch_response(body)))
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

    #[test]
    fn lmstudio_quirks_strip_stream_options() {
        let quirks = Quirks::lmstudio();
        assert!(quirks.strip_stream_options);
    }

    #[test]
    fn extracts_embedded_tool_call() {
        let content = r#"prefix <tool_call>{"name": "get_weather", "arguments": {"city": "nyc"}}</tool_call> suffix"#;
        let extracted = extract_tool_call_tag(content).expect("should extract");
        assert_eq!(extracted["function"]["name"], "get_weather");
    }

    #[test]
    fn repairs_response_missing_tool_calls() {
        let mut body = serde_json::json!({
            "choices": [{
                "message": {
                    "role": "assistant",
                    "content": "<tool_call>{\"name\": \"get_weather\", \"arguments\": {}}</tool_call>",
                    "tool_calls": null,
                }
            }]
        });
        repair_embedded_tool_calls(&mut body);
        assert_eq!(body["choices"][0]["message"]["tool_calls"][0]["function"]["name"], "get_weather");
    }
}
