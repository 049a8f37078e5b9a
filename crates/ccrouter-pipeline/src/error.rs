use ccrouter_core::HttpError;
use http::StatusCode;
use thiserror::Error;

/// Stable, structured error kinds produced across the pipeline subsystem
#[derive(Debug, Clone, Error)]
pub enum PipelineError {
    /// Malformed user config, or a referenced provider/model that doesn't exist
    #[error("configuration invalid: {0}")]
    ConfigurationInvalid(String),

    /// A stage or handshake failed during startup; fatal for the whole init
    #[error("startup failed: {0}")]
    StartupFailed(String),

    /// No pipeline available for the requested virtual model
    #[error("no route available")]
    NoRoute,

    /// Upstream call exceeded its configured timeout
    #[error("upstream timeout")]
    UpstreamTimeout,

    /// Upstream returned a transient failure (5xx, connection reset)
    #[error("upstream transient error: {0}")]
    UpstreamTransient(String),

    /// Upstream rejected the request for rate limiting (HTTP 429)
    #[error("upstream rate limited")]
    UpstreamRateLimited {
        /// Seconds the router should keep this pipeline blacklisted
        retry_after: u64,
    },

    /// Upstream rejected the credential (401/403 or provider-specific auth kind)
    #[error("upstream authentication failed")]
    UpstreamAuth,

    /// A Transformer/Protocol/ServerCompatibility stage received a shape it cannot handle
    #[error("protocol mismatch: {0}")]
    ProtocolMismatch(String),

    /// Execution was cancelled by `destroyPipeline` or a per-request timeout
    #[error("execution cancelled")]
    ExecutionCancelled,

    /// The startup handshake itself failed
    #[error("handshake failed: {0}")]
    HandshakeFailed(String),
}

impl PipelineError {
    /// Whether this should be accounted as a transient error by the router
    ///
    /// Transient errors accumulate toward the consecutive-error blacklist
    /// threshold; rate-limit and auth failures have their own accounting path
    /// and are never counted here.
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::UpstreamTimeout | Self::UpstreamTransient(_))
    }

    /// Whether this is a rate-limit outcome (unconditional timed blacklist, no destroy)
    pub const fn is_rate_limited(&self) -> bool {
        matches!(self, Self::UpstreamRateLimited { .. })
    }

    /// Whether this is an authentication failure (unconditional permanent blacklist)
    pub const fn is_auth_failure(&self) -> bool {
        matches!(self, Self::UpstreamAuth)
    }
}

impl HttpError for PipelineError {
    fn status_code(&self) -> StatusCode {
        match self {
            Self::ConfigurationInvalid(_) | Self::StartupFailed(_) | Self::HandshakeFailed(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            Self::NoRoute => StatusCode::SERVICE_UNAVAILABLE,
            Self::UpstreamTimeout => StatusCode::GATEWAY_TIMEOUT,
            Self::UpstreamTransient(_) => StatusCode::BAD_GATEWAY,
            Self::UpstreamRateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            Self::UpstreamAuth => StatusCode::UNAUTHORIZED,
            Self::ProtocolMismatch(_) => StatusCode::BAD_REQUEST,
            Self::ExecutionCancelled => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_type(&self) -> &str {
        match self {
            Self::ConfigurationInvalid(_) => "configuration_invalid",
            Self::StartupFailed(_) => "startup_failed",
            Self::HandshakeFailed(_) => "handshake_failed",
            Self::NoRoute => "no_route",
            Self::UpstreamTimeout => "upstream_timeout",
            Self::UpstreamTransient(_) => "upstream_transient_error",
            Self::UpstreamRateLimited { .. } => "rate_limit_error",
            Self::UpstreamAuth => "authentication_error",
            Self::ProtocolMismatch(_) => "protocol_mismatch",
            Self::ExecutionCancelled => "execution_cancelled",
        }
    }

    fn client_message(&self) -> String {
        match self {
            // Full detail for these goes to logs only; the client sees a sanitized kind.
            Self::ConfigurationInvalid(_) | Self::StartupFailed(_) | Self::HandshakeFailed(_) => {
                "an internal error occurred".to_owned()
            }
            other => other.to_string(),
        }
    }
}
