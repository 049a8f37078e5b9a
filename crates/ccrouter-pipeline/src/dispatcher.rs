//! Request dispatcher: the external-facing entry point that ties model
//! lookup, router selection, and pipeline execution together

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use http::HeaderMap;

use crate::context::ExecutionContext;
use crate::error::PipelineError;
use crate::manager::PipelineManager;
use crate::message::PipelineMessage;
use crate::router::LoadBalancerRouter;
use crate::wire::anthropic::{AnthropicRequest, AnthropicResponse};

/// Default per-request upstream timeout; a distinct, longer timeout applies
/// to models the caller marks as long-context
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);
const LONG_CONTEXT_TIMEOUT: Duration = Duration::from_secs(300);

/// Maps client-facing model names to the virtual model names used in routing
pub type ModelMap = HashMap<String, String>;

/// Ties model lookup, router selection, and pipeline execution together for one request
pub struct Dispatcher {
    manager: Arc<PipelineManager>,
    router: Arc<LoadBalancerRouter>,
    model_map: ModelMap,
    long_context_models: Vec<String>,
}

impl Dispatcher {
    /// A dispatcher bound to a manager, its router, and the virtual-model mapping
    pub fn new(manager: Arc<PipelineManager>, router: Arc<LoadBalancerRouter>, model_map: ModelMap, long_context_models: Vec<String>) -> Self {
        Self {
            manager,
            router,
            model_map,
            long_context_models,
        }
    }

    /// Resolve `request.model` to a virtual model, pick a pipeline, execute, and report the outcome
    ///
    /// Never retries within one call: if the picked pipeline fails, the
    /// failure propagates. The router may pick a different pipeline on the
    /// *next* dispatch — zero fallback within a single request.
    ///
    /// # Errors
    ///
    /// `NoRoute` if the virtual model has no eligible pipeline; otherwise
    /// whatever error the pipeline's execution produced.
    pub async fn dispatch(&self, request: AnthropicRequest, incoming_headers: HeaderMap) -> Result<AnthropicResponse, PipelineError> {
        let virtual_model = self.model_map.get(&request.model).cloned().unwrap_or_else(|| request.model.clone());

        let pipeline_id = self.router.pick(&virtual_model)?;
        let pipeline = self.manager.get(&pipeline_id).ok_or(PipelineError::NoRoute)?;

        let timeout = if self.long_context_models.contains(&request.model) {
            LONG_CONTEXT_TIMEOUT
        } else {
            DEFAULT_TIMEOUT
        };
        let ctx = ExecutionContext::with_cancellation(pipeline.child_cancellation(), timeout, incoming_headers);

        let outcome = pipeline.execute(PipelineMessage::AnthropicRequest(request), &ctx).await;
        let report: Result<(), PipelineError> = outcome.as_ref().map(|_| ()).map_err(Clone::clone);
        self.router.report_outcome(&virtual_model, &pipeline_id, &report);

        let message = outcome?;
        message
            .into_anthropic_response()
            .map_err(|m| PipelineError::ProtocolMismatch(format!("pipeline returned {}, expected anthropic-response", m.kind())))
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use ccrouter_config::BlacklistConfig;

    use super::*;
    use crate::message::Direction;
    use crate::module::{HealthReport, Module, ModuleIdentity, ModuleStatus, StageKind, StatusCell};
    use crate::pipeline::{Pipeline, PipelineMetadata};
    use crate::wire::anthropic::{AnthropicResponse, AnthropicResponseBlock, AnthropicUsage};

    #[test]
    fn unmapped_model_name_is_used_as_its_own_virtual_model() {
        let map = ModelMap::new();
        let resolved = map.get("claude-3-opus").cloned().unwrap_or_else(|| "claude-3-opus".to_owned());
        assert_eq!(resolved, "claude-3-opus");
    }

    /// A stage that either passes its message through unchanged, short-circuits
    /// the Server stage's network call with a canned wire body, or, as the
    /// Transformer stage, turns the backward leg into a canned `AnthropicResponse`
    struct StubStage {
        identity: ModuleIdentity,
        status: StatusCell,
        is_server: bool,
        is_transformer: bool,
    }

    impl StubStage {
        fn new(name: &str, kind: StageKind, is_server: bool, is_transformer: bool) -> Self {
            Self {
                identity: ModuleIdentity {
                    id: name.to_owned(),
                    name: name.to_owned(),
                    kind,
                    version: "test".to_owned(),
                },
                status: StatusCell::new(),
                is_server,
                is_transformer,
            }
        }
    }

    #[async_trait]
    impl Module for StubStage {
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

        async fn process(&self, direction: Direction, message: PipelineMessage, _ctx: &ExecutionContext) -> Result<PipelineMessage, PipelineError> {
            match (direction, self.is_server, self.is_transformer) {
                (Direction::Request, true, _) => Ok(PipelineMessage::WireResponse(serde_json::json!({"stub": true}))),
                (Direction::Response, _, true) => Ok(PipelineMessage::AnthropicResponse(stub_response())),
                _ => Ok(message),
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

    fn stub_response() -> AnthropicResponse {
        AnthropicResponse {
            id: "stub".to_owned(),
            response_type: "message".to_owned(),
            role: "assistant".to_owned(),
            content: vec![AnthropicResponseBlock::Text { text: "stub reply".to_owned() }],
            model: "stub-model".to_owned(),
            stop_reason: None,
            stop_sequence: None,
            usage: AnthropicUsage {
                input_tokens: 1,
                output_tokens: 1,
            },
        }
    }

    fn stub_pipeline(pipeline_id: &str) -> Arc<Pipeline> {
        let stages: [Arc<dyn Module>; 4] = [
            Arc::new(StubStage::new("transformer", StageKind::Transformer, false, true)),
            Arc::new(StubStage::new("protocol", StageKind::Protocol, false, false)),
            Arc::new(StubStage::new("compat", StageKind::ServerCompatibility, false, false)),
            Arc::new(StubStage::new("server", StageKind::Server, true, false)),
        ];
        let metadata = PipelineMetadata {
            pipeline_id: pipeline_id.to_owned(),
            virtual_model: "v1".to_owned(),
            provider: "stub".to_owned(),
            target_model: "stub-model".to_owned(),
            api_key_index: 0,
            endpoint_url: "https://example.invalid".parse().unwrap(),
            transformer_name: "stub".to_owned(),
            protocol_name: "stub".to_owned(),
            server_compatibility_name: "stub".to_owned(),
            server_name: "stub".to_owned(),
        };
        Arc::new(Pipeline::new(metadata, stages, Duration::from_secs(5)))
    }

    fn anthropic_request(model: &str) -> AnthropicRequest {
        AnthropicRequest {
            model: model.to_owned(),
            max_tokens: 16,
            system: None,
            messages: Vec::new(),
            temperature: None,
            top_p: None,
            top_k: None,
            stop_sequences: None,
            stream: None,
            tools: None,
            tool_choice: None,
        }
    }

    #[tokio::test]
    async fn dispatch_resolves_virtual_model_picks_a_pipeline_and_returns_its_response() {
        let (router, _rx) = LoadBalancerRouter::new();
        let router = Arc::new(router);
        let manager = Arc::new(PipelineManager::new(Arc::clone(&router), "test", 0));

        let pipeline_id = "stub-stub-model-key0";
        let pipeline = stub_pipeline(pipeline_id);
        pipeline.handshake().await.unwrap();
        manager.insert_for_test(pipeline_id, Arc::clone(&pipeline));
        router.register("claude-3-opus", pipeline_id, BlacklistConfig::default());

        let mut model_map = ModelMap::new();
        model_map.insert("sonnet-alias".to_owned(), "claude-3-opus".to_owned());

        let dispatcher = Dispatcher::new(manager, router, model_map, Vec::new());

        let response = dispatcher.dispatch(anthropic_request("sonnet-alias"), HeaderMap::new()).await.unwrap();
        assert_eq!(response.model, "stub-model");
    }

    #[tokio::test]
    async fn dispatch_with_no_route_for_the_virtual_model_fails() {
        let (router, _rx) = LoadBalancerRouter::new();
        let router = Arc::new(router);
        let manager = Arc::new(PipelineManager::new(Arc::clone(&router), "test", 0));
        let dispatcher = Dispatcher::new(manager, router, ModelMap::new(), Vec::new());

        let result = dispatcher.dispatch(anthropic_request("no-such-model"), HeaderMap::new()).await;
        assert!(matches!(result, Err(PipelineError::NoRoute)));
    }
}
