mod auth;
mod health;
mod request_context;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use ccrouter_config::Config;
use ccrouter_pipeline::handler::PipelineState;
use ccrouter_pipeline::Dispatcher;
use tower_http::trace::TraceLayer;

use crate::auth::ApiKeyState;

/// Assembled front-facing server: health check, `/v1/messages`, and the
/// bearer-token/tracing/request-context middleware stack around them
pub struct Server {
    router: Router,
    listen_address: SocketAddr,
}

impl Server {
    /// Build the server from configuration and an already-initialized dispatcher
    ///
    /// # Errors
    ///
    /// Returns an error if the configured host/port don't form a valid socket address
    pub fn new(config: &Config, dispatcher: Arc<Dispatcher>) -> anyhow::Result<Self> {
        let listen_address: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;

        let mut app = Router::new();

        if config.server.health.enabled {
            app = app.route(&config.server.health.path, axum::routing::get(health::health_handler));
        }

        app = app.merge(ccrouter_pipeline::handler::router(PipelineState::new(dispatcher)));

        app = app.layer(axum::middleware::from_fn(request_context::request_context_middleware));
        app = app.layer(TraceLayer::new_for_http());
        app = app.layer(axum::middleware::from_fn_with_state(
            ApiKeyState(config.api_key.clone()),
            auth::bearer_auth_middleware,
        ));

        Ok(Self {
            router: app,
            listen_address,
        })
    }

    /// The configured listen address
    #[must_use]
    pub const fn listen_address(&self) -> SocketAddr {
        self.listen_address
    }

    /// Consume the server and return the inner router, for tests that manage their own listener
    pub fn into_router(self) -> Router {
        self.router
    }

    /// Start serving requests until `shutdown` is cancelled
    ///
    /// # Errors
    ///
    /// Returns an error if binding the TCP listener or serving fails
    pub async fn serve(self, shutdown: tokio_util::sync::CancellationToken) -> anyhow::Result<()> {
        let listener = tokio::net::TcpListener::bind(self.listen_address).await?;
        let local_addr = listener.local_addr()?;
        tracing::info!(%local_addr, "server listening");

        axum::serve(listener, self.router)
            .with_graceful_shutdown(async move {
                shutdown.cancelled().await;
                tracing::info!("graceful shutdown initiated");
            })
            .await?;

        Ok(())
    }
}
