//! Server stage: the only stage allowed to perform network I/O
//!
//! Two strategies, selected by the factory from `endpoint_url`'s scheme:
//! `http` (the default, `reqwest`-backed) and `websocket` (`tokio-tungstenite`-backed).

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use secrecy::{ExposeSecret, SecretString};
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message as WsMessage;

use crate::context::ExecutionContext;
use crate::error::PipelineError;
use crate::message::{Direction, PipelineMessage};
use crate::module::{HealthReport, Module, ModuleIdentity, ModuleStatus, StageKind, StatusCell};
use crate::registry::{StageConfig, StageRegistry};

/// Registers every Server strategy into `registry`
pub fn register_all(registry: &StageRegistry) {
    registry.register(StageKind::Server, "http", |cfg| Ok(Arc::new(HttpServer::new(cfg)?) as _));
    registry.register(StageKind::Server, "websocket", |cfg| Ok(Arc::new(WebSocketServer::new(cfg)) as _));
}

/// Choose the registered Server strategy name for an endpoint URL
pub fn strategy_for_scheme(endpoint_url: &url::Url) -> &'static str {
    match endpoint_url.scheme() {
        "ws" | "wss" => "websocket",
        _ => "http",
    }
}

struct HttpServer {
    identity: ModuleIdentity,
    status: StatusCell,
    client: reqwest::Client,
    endpoint_url: url::Url,
    api_key: SecretString,
}

impl HttpServer {
    fn new(cfg: &StageConfig) -> Result<Self, PipelineError> {
        let client = reqwest::Client::builder()
            .timeout(cfg.timeout)
            .build()
            .map_err(|e| PipelineError::ConfigurationInvalid(format!("failed to build http client: {e}")))?;
        Ok(Self {
            identity: ModuleIdentity {
                id: format!("{}-server", cfg.provider_name),
                name: "http".to_owned(),
                kind: StageKind::Server,
                version: env!("CARGO_PKG_VERSION").to_owned(),
            },
            status: StatusCell::new(),
            client,
            endpoint_url: cfg.endpoint_url.clone(),
            api_key: cfg.api_key.clone(),
        })
    }
}

#[async_trait]
impl Module for HttpServer {
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
        debug_assert!(direction == Direction::Request, "server stage is only ever invoked on the forward leg");

        let body = message
            .into_wire_request()
            .map_err(|m| PipelineError::ProtocolMismatch(format!("server stage expected wire-request, got {}", m.kind())))?;

        let mut headers = ctx.outgoing_headers();
        if !headers.contains_key(http::header::AUTHORIZATION) {
            let value = format!("Bearer {}", self.api_key.expose_secret());
            if let Ok(v) = http::HeaderValue::from_str(&value) {
                headers.insert(http::header::AUTHORIZATION, v);
            }
        }

        let send = self.client.post(self.endpoint_url.clone()).headers(headers).json(&body).send();

        let response = tokio::select! {
            result = timeout(ctx.timeout, send) => result.map_err(|_| PipelineError::UpstreamTimeout)?,
            () = ctx.cancellation.cancelled() => return Err(PipelineError::ExecutionCancelled),
        };

        let response = response.map_err(|e| {
            if e.is_timeout() {
                PipelineError::UpstreamTimeout
            } else {
                PipelineError::UpstreamTransient(e.to_string())
            }
        })?;

        let status = response.status();
        if status == http::StatusCode::TOO_MANY_REQUESTS {
            let retry_after = response
                .headers()
                .get(http::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse().ok())
                .unwrap_or(60);
            return Err(PipelineError::UpstreamRateLimited { retry_after });
        }
        if status == http::StatusCode::UNAUTHORIZED || status == http::StatusCode::FORBIDDEN {
            return Err(PipelineError::UpstreamAuth);
        }
        if status.is_server_error() {
            return Err(PipelineError::UpstreamTransient(format!("upstream returned {status}")));
        }
        if !status.is_success() {
            return Err(PipelineError::ProtocolMismatch(format!("upstream returned {status}")));
        }

        let body: serde_json::Value = response
            .json()
            .await
            .map_err(|e| PipelineError::ProtocolMismatch(format!("upstream response was not valid json: {e}")))?;

        Ok(PipelineMessage::WireResponse(body))
    }

    async fn stop(&self) -> Result<(), PipelineError> {
        self.status.set(ModuleStatus::Stopped);
        Ok(())
    }

    async fn health_check(&self) -> HealthReport {
        HealthReport::ok()
    }
}

struct WebSocketServer {
    identity: ModuleIdentity,
    status: StatusCell,
    endpoint_url: url::Url,
    timeout: Duration,
}

impl WebSocketServer {
    fn new(cfg: &StageConfig) -> Self {
        Self {
            identity: ModuleIdentity {
                id: format!("{}-server", cfg.provider_name),
                name: "websocket".to_owned(),
                kind: StageKind::Server,
                version: env!("CARGO_PKG_VERSION").to_owned(),
            },
            status: StatusCell::new(),
            endpoint_url: cfg.endpoint_url.clone(),
            timeout: cfg.timeout,
        }
    }
}

#[async_trait]
impl Module for WebSocketServer {
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
        debug_assert!(direction == Direction::Request, "server stage is only ever invoked on the forward leg");

        let body = message
            .into_wire_request()
            .map_err(|m| PipelineError::ProtocolMismatch(format!("server stage expected wire-request, got {}", m.kind())))?;

        let roundtrip = async {
            let (mut socket, _) = tokio_tungstenite::connect_async(self.endpoint_url.as_str())
                .await
                .map_err(|e| PipelineError::UpstreamTransient(format!("websocket connect failed: {e}")))?;

            let text = serde_json::to_string(&body).map_err(|e| PipelineError::ProtocolMismatch(e.to_string()))?;
            socket
                .send(WsMessage::Text(text.into()))
                .await
                .map_err(|e| PipelineError::UpstreamTransient(format!("websocket send failed: {e}")))?;

            while let Some(frame) = socket.next().await {
                let frame = frame.map_err(|e| PipelineError::UpstreamTransient(format!("websocket recv failed: {e}")))?;
                if let WsMessage::Text(text) = frame {
                    let value: serde_json::Value =
                        serde_json::from_str(&text).map_err(|e| PipelineError::ProtocolMismatch(format!("non-json websocket frame: {e}")))?;
                    return Ok(value);
                }
            }
            Err(PipelineError::UpstreamTransient("websocket closed before a response arrived".to_owned()))
        };

        let body = tokio::select! {
            result = timeout(self.timeout.min(ctx.timeout), roundtrip) => result.map_err(|_| PipelineError::UpstreamTimeout)??,
            () = ctx.cancellation.cancelled() => return Err(PipelineError::ExecutionCancelled),
        };

        Ok(PipelineMessage::WireResponse(body))
    }

    async fn stop(&self) -> Result<(), PipelineError> {
        self.status.set(ModuleStatus::Stopped);
        Ok(())
    }

    async fn health_check(&self) -> HealthReport {
        HealthReport::ok()
    }
}
