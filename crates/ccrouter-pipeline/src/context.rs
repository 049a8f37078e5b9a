use std::sync::{Arc, Mutex};
use std::time::Duration;

use http::HeaderMap;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Per-request state threaded through `Pipeline::execute` and into every stage's `process`
///
/// Stages are immutable after `start`; anything that varies per request —
/// identity, cancellation, deadline, headers built mid-chain — travels here
/// instead of on the module.
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    /// Identifier assigned fresh for each `execute` call
    pub request_id: Uuid,
    /// Cancelled by `PipelineManager::destroy_pipeline` or a timeout
    pub cancellation: CancellationToken,
    /// Per-request upstream timeout, applied once the Server stage begins its call
    pub timeout: Duration,
    /// Headers from the original client request, read by the ServerCompatibility stage
    pub incoming_headers: HeaderMap,
    /// Headers the ServerCompatibility stage built for this request, read by the Server stage
    ///
    /// Single-writer (stage 2), single-reader (stage 3) mailbox; there is no
    /// other way for a stage's `process` output, which is body-shaped only,
    /// to carry the header map it computed to the next stage.
    outgoing_headers: Arc<Mutex<Option<HeaderMap>>>,
}

impl ExecutionContext {
    /// Start a fresh context for one `execute` call
    pub fn new(timeout: Duration, incoming_headers: HeaderMap) -> Self {
        Self {
            request_id: Uuid::new_v4(),
            cancellation: CancellationToken::new(),
            timeout,
            incoming_headers,
            outgoing_headers: Arc::new(Mutex::new(None)),
        }
    }

    /// A context with no real client behind it, for startup handshakes
    pub fn for_handshake(timeout: Duration) -> Self {
        Self::new(timeout, HeaderMap::new())
    }

    /// A fresh context whose cancellation token is supplied by the caller
    ///
    /// Used for per-request contexts so a pipeline's own token can be passed
    /// in as the parent via [`Self::child`], letting `destroy_pipeline` reach
    /// every in-flight request through one `.cancel()` call.
    pub fn with_cancellation(cancellation: CancellationToken, timeout: Duration, incoming_headers: HeaderMap) -> Self {
        Self {
            request_id: Uuid::new_v4(),
            cancellation,
            timeout,
            incoming_headers,
            outgoing_headers: Arc::new(Mutex::new(None)),
        }
    }

    /// A child context sharing this one's cancellation signal
    ///
    /// `destroyPipeline` cancels the parent token, which cancels every
    /// in-flight child derived from it without the caller tracking them individually.
    pub fn child(&self) -> CancellationToken {
        self.cancellation.child_token()
    }

    /// Record the headers the ServerCompatibility stage built for this request
    pub fn set_outgoing_headers(&self, headers: HeaderMap) {
        *self.outgoing_headers.lock().expect("outgoing_headers mutex poisoned") = Some(headers);
    }

    /// Read the headers built for this request, or an empty map if none were set
    pub fn outgoing_headers(&self) -> HeaderMap {
        self.outgoing_headers
            .lock()
            .expect("outgoing_headers mutex poisoned")
            .clone()
            .unwrap_or_default()
    }
}
