//! The uniform stage lifecycle contract every pipeline stage implements

use std::sync::atomic::{AtomicU8, Ordering};

use async_trait::async_trait;

use crate::context::ExecutionContext;
use crate::error::PipelineError;
use crate::message::{Direction, PipelineMessage};

/// The four stage families a Pipeline is assembled from, in fixed order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StageKind {
    /// Shape-preserving bidirectional content rewriter (e.g. Anthropic <-> OpenAI)
    Transformer,
    /// Serialisation/endpoint conventions for a wire protocol
    Protocol,
    /// Parameter limits, quirk patches, embedded-tool-call repair for one provider
    ServerCompatibility,
    /// The only stage allowed to perform network I/O
    Server,
}

/// Lifecycle state of a Module, as a tagged variant rather than a status string
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ModuleStatus {
    /// Not started, or successfully stopped
    Stopped = 0,
    /// `start` is in flight
    Starting = 1,
    /// Started and accepting `process` calls
    Running = 2,
    /// `stop` is in flight
    Stopping = 3,
    /// `start`, `stop`, or a prior `process` call failed unrecoverably
    Error = 4,
}

impl ModuleStatus {
    const fn from_u8(v: u8) -> Self {
        match v {
            0 => Self::Stopped,
            1 => Self::Starting,
            2 => Self::Running,
            3 => Self::Stopping,
            _ => Self::Error,
        }
    }
}

/// Lock-free holder for a Module's current `ModuleStatus`
#[derive(Debug, Default)]
pub struct StatusCell(AtomicU8);

impl StatusCell {
    /// A new cell, initially `Stopped`
    pub const fn new() -> Self {
        Self(AtomicU8::new(ModuleStatus::Stopped as u8))
    }

    /// Current status
    pub fn get(&self) -> ModuleStatus {
        ModuleStatus::from_u8(self.0.load(Ordering::Acquire))
    }

    /// Overwrite the status
    pub fn set(&self, status: ModuleStatus) {
        self.0.store(status as u8, Ordering::Release);
    }
}

/// Side-effect-free summary returned by `Module::health_check`
#[derive(Debug, Clone)]
pub struct HealthReport {
    /// Whether the stage considers itself usable right now
    pub healthy: bool,
    /// Human-readable detail, logged but not necessarily surfaced to clients
    pub details: String,
}

impl HealthReport {
    /// A healthy report with no further detail
    pub fn ok() -> Self {
        Self {
            healthy: true,
            details: String::new(),
        }
    }

    /// An unhealthy report carrying a reason
    pub fn unhealthy(details: impl Into<String>) -> Self {
        Self {
            healthy: false,
            details: details.into(),
        }
    }
}

/// Identity fields common to every Module, independent of its kind
#[derive(Debug, Clone)]
pub struct ModuleIdentity {
    /// Unique within the owning Pipeline
    pub id: String,
    /// Strategy name, e.g. `"anthropic-to-openai"`, `"lmstudio-server-compatibility"`
    pub name: String,
    /// Stage family
    pub kind: StageKind,
    /// Strategy implementation version, for the pipeline-table artifact
    pub version: String,
}

/// The uniform lifecycle contract every pipeline stage implements
///
/// `configure` from the original contract is folded into each implementation's
/// constructor: a strategy either builds successfully from its `StageConfig`
/// or fails with `ConfigurationInvalid` before a Module value ever exists, so
/// there is no separate post-construction configuration step to get wrong.
#[async_trait]
pub trait Module: Send + Sync {
    /// Identity fields (id, name, kind, version)
    fn identity(&self) -> &ModuleIdentity;

    /// Current lifecycle status
    fn status(&self) -> ModuleStatus;

    /// Transition stopped -> starting -> running; may contact external resources
    async fn start(&self) -> Result<(), PipelineError>;

    /// Process one message; must not mutate `message`, may suspend on I/O
    ///
    /// Only the Server stage is ever called with `Direction::Response` absent —
    /// it is invoked solely for the forward leg, since its own network call
    /// produces the response that the backward leg then carries.
    async fn process(
        &self,
        direction: Direction,
        message: PipelineMessage,
        ctx: &ExecutionContext,
    ) -> Result<PipelineMessage, PipelineError>;

    /// Idempotent; releases resources; must succeed or leave status `Error`
    async fn stop(&self) -> Result<(), PipelineError>;

    /// Side-effect-free health summary; never raises
    async fn health_check(&self) -> HealthReport;
}
