//! Pipeline: a pinned four-stage chain bound to one `(virtual_model, provider, target_model, api_key_index)`

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use url::Url;

use crate::context::ExecutionContext;
use crate::error::PipelineError;
use crate::message::{Direction, PipelineMessage};
use crate::module::{Module, ModuleStatus};

/// Lifecycle state of the Pipeline as a whole, distinct from any one stage's `ModuleStatus`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PipelineStatus {
    /// Constructed, handshake not yet attempted or not yet succeeded
    Initializing = 0,
    /// Handshake succeeded; accepting `execute` calls
    Runtime = 1,
    /// Handshake or a later operation failed unrecoverably
    Error = 2,
    /// `stop` has completed
    Stopped = 3,
}

impl PipelineStatus {
    const fn from_u8(v: u8) -> Self {
        match v {
            0 => Self::Initializing,
            1 => Self::Runtime,
            2 => Self::Error,
            _ => Self::Stopped,
        }
    }
}

/// Immutable identity and topology metadata for one Pipeline
#[derive(Debug, Clone)]
pub struct PipelineMetadata {
    /// `"{provider}-{target_model}-key{index}"`, globally unique within a PipelineManager
    pub pipeline_id: String,
    /// Virtual model category this pipeline serves
    pub virtual_model: String,
    /// Upstream provider name
    pub provider: String,
    /// Concrete upstream model name
    pub target_model: String,
    /// Which of the provider's API keys this pipeline is bound to
    pub api_key_index: usize,
    /// URL the Server stage sends requests to
    pub endpoint_url: Url,
    /// Name of the registered Transformer strategy in use
    pub transformer_name: String,
    /// Name of the registered Protocol strategy in use
    pub protocol_name: String,
    /// Name of the registered ServerCompatibility strategy in use
    pub server_compatibility_name: String,
    /// Name of the registered Server strategy in use (`"http"` or `"websocket"`)
    pub server_name: String,
}

/// A snapshot of pipeline and per-stage status, returned by `get_status`
#[derive(Debug, Clone)]
pub struct PipelineSnapshot {
    /// Pipeline-level status
    pub status: PipelineStatus,
    /// `last_handshake_time`, if a handshake has ever succeeded
    pub last_handshake_time: Option<SystemTime>,
    /// Per-stage status, in pipeline order (transformer, protocol, server-compatibility, server)
    pub stage_statuses: [ModuleStatus; 4],
}

/// A fixed four-stage processing chain for one `(virtual_model, provider, target_model, api_key_index)` tuple
pub struct Pipeline {
    /// Immutable topology metadata
    pub metadata: PipelineMetadata,
    stages: [Arc<dyn Module>; 4],
    status: AtomicU8,
    last_handshake_time: std::sync::Mutex<Option<SystemTime>>,
    /// Owns the cancellation signal every request dispatched against this
    /// pipeline derives a child token from via `ExecutionContext::child`;
    /// `destroy_pipeline` cancels it to abort every in-flight call at once
    root_context: ExecutionContext,
}

impl Pipeline {
    /// Assemble a Pipeline from its four stages, in fixed order
    pub fn new(metadata: PipelineMetadata, stages: [Arc<dyn Module>; 4], default_timeout: Duration) -> Self {
        Self {
            metadata,
            stages,
            status: AtomicU8::new(PipelineStatus::Initializing as u8),
            last_handshake_time: std::sync::Mutex::new(None),
            root_context: ExecutionContext::for_handshake(default_timeout),
        }
    }

    /// A cancellation token that fires when `cancel` is called on this pipeline
    ///
    /// Pass the result to [`ExecutionContext::with_cancellation`] so a
    /// dispatched request can be aborted by `destroy_pipeline`.
    pub fn child_cancellation(&self) -> CancellationToken {
        self.root_context.child()
    }

    /// Cancel every in-flight request dispatched against this pipeline
    pub fn cancel(&self) {
        self.root_context.cancellation.cancel();
    }

    /// Current pipeline-level status
    pub fn status(&self) -> PipelineStatus {
        PipelineStatus::from_u8(self.status.load(Ordering::Acquire))
    }

    fn set_status(&self, status: PipelineStatus) {
        self.status.store(status as u8, Ordering::Release);
    }

    /// Start each stage in order, then probe liveness; enters `Runtime` only on full success
    ///
    /// On any failure, already-started stages are stopped in reverse order
    /// and the pipeline enters `Error`. Handshake is never skipped, even for
    /// a provider with another already-handshaken pipeline: each API key
    /// index is an independently verified credential.
    pub async fn handshake(&self) -> Result<(), PipelineError> {
        for (started, stage) in self.stages.iter().enumerate() {
            if let Err(e) = stage.start().await {
                warn!(pipeline_id = %self.metadata.pipeline_id, stage = %stage.identity().name, error = %e, "stage start failed during handshake");
                self.unwind_started_stages(started).await;
                self.set_status(PipelineStatus::Error);
                return Err(PipelineError::HandshakeFailed(format!(
                    "stage '{}' failed to start: {e}",
                    stage.identity().name
                )));
            }
        }

        for stage in &self.stages {
            let report = stage.health_check().await;
            if !report.healthy {
                warn!(pipeline_id = %self.metadata.pipeline_id, stage = %stage.identity().name, detail = %report.details, "stage unhealthy during handshake");
                self.unwind_started_stages(self.stages.len()).await;
                self.set_status(PipelineStatus::Error);
                return Err(PipelineError::HandshakeFailed(format!(
                    "stage '{}' failed health check: {}",
                    stage.identity().name,
                    report.details
                )));
            }
        }

        *self.last_handshake_time.lock().expect("last_handshake_time mutex poisoned") = Some(SystemTime::now());
        self.set_status(PipelineStatus::Runtime);
        info!(pipeline_id = %self.metadata.pipeline_id, "pipeline handshake succeeded");
        Ok(())
    }

    async fn unwind_started_stages(&self, started: usize) {
        for stage in self.stages[..started].iter().rev() {
            // best-effort: a stage that fails to stop during unwind is logged, not retried
            if let Err(e) = stage.stop().await {
                warn!(stage = %stage.identity().name, error = %e, "stage failed to stop during handshake unwind");
            }
        }
    }

    /// Thread `message` through stages 0->3, then the response back through 2->0
    ///
    /// Requires `Runtime`. A stage failure aborts execution and propagates
    /// unchanged — the pipeline never substitutes a fallback response.
    pub async fn execute(&self, message: PipelineMessage, ctx: &ExecutionContext) -> Result<PipelineMessage, PipelineError> {
        if self.status() != PipelineStatus::Runtime {
            return Err(PipelineError::ProtocolMismatch(format!(
                "pipeline '{}' is not in runtime status",
                self.metadata.pipeline_id
            )));
        }

        let mut current = message;
        for stage in &self.stages {
            current = stage.process(Direction::Request, current, ctx).await?;
        }

        for stage in self.stages[..3].iter().rev() {
            current = stage.process(Direction::Response, current, ctx).await?;
        }

        Ok(current)
    }

    /// Stop stages 3->0; idempotent
    pub async fn stop(&self) -> Result<(), PipelineError> {
        let mut first_error = None;
        for stage in self.stages.iter().rev() {
            if let Err(e) = stage.stop().await {
                warn!(stage = %stage.identity().name, error = %e, "stage stop failed, continuing to stop remaining stages");
                first_error.get_or_insert(e);
            }
        }
        self.set_status(PipelineStatus::Stopped);
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Snapshot of pipeline-level and per-stage status
    pub fn snapshot(&self) -> PipelineSnapshot {
        let stage_statuses = [
            self.stages[0].status(),
            self.stages[1].status(),
            self.stages[2].status(),
            self.stages[3].status(),
        ];
        PipelineSnapshot {
            status: self.status(),
            last_handshake_time: *self.last_handshake_time.lock().expect("last_handshake_time mutex poisoned"),
            stage_statuses,
        }
    }
}

/// Derive a pipeline's deterministic identifier
pub fn pipeline_id(provider: &str, target_model: &str, api_key_index: usize) -> String {
    format!("{provider}-{target_model}-key{api_key_index}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pipeline_id_format() {
        assert_eq!(pipeline_id("openai", "gpt-4o", 0), "openai-gpt-4o-key0");
        assert_eq!(pipeline_id("qwen", "qwen-plus", 2), "qwen-qwen-plus-key2");
    }
}
