#![allow(clippy::must_use_candidate, clippy::missing_errors_doc)]

mod args;

use std::sync::Arc;

use args::Args;
use ccrouter_config::Config;
use ccrouter_pipeline::dispatcher::ModelMap;
use ccrouter_pipeline::{ConfigPreprocessor, Dispatcher, LoadBalancerRouter, PipelineManager, RouterEvent};
use clap::Parser;
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut config = Config::load(&args.config)?;
    if let Some(listen) = args.listen {
        config.server.host = listen.ip().to_string();
        config.server.port = listen.port();
    }

    let _telemetry_guard = ccrouter_telemetry::init(config.telemetry.as_ref(), "info")?;

    tracing::info!(config_path = %args.config.display(), "starting ccrouter");

    let config_name = args
        .config
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("ccrouter")
        .to_owned();

    let routing_table = ConfigPreprocessor::build_routing_table(&config)?;

    let (router, mut events) = LoadBalancerRouter::new();
    let router = Arc::new(router);

    let manager = Arc::new(PipelineManager::new(Arc::clone(&router), config_name, config.server.port));

    let manager_for_events = Arc::clone(&manager);
    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            match event {
                RouterEvent::DestroyPipelineRequired { pipeline_id } => {
                    tracing::warn!(pipeline_id, "router requested pipeline destruction");
                    if let Err(e) = manager_for_events.destroy_pipeline(&pipeline_id).await {
                        tracing::error!(pipeline_id, error = %e, "failed to destroy pipeline");
                    }
                }
                RouterEvent::AuthenticationRequired { pipeline_id } => {
                    tracing::warn!(pipeline_id, "pipeline permanently blacklisted after an authentication failure");
                }
                RouterEvent::PipelineReactivated { pipeline_id } => {
                    tracing::info!(pipeline_id, "pipeline reactivated");
                }
            }
        }
    });

    manager.initialize_from_routing_table(&routing_table).await?;

    let model_map = ModelMap::new();
    let dispatcher = Arc::new(Dispatcher::new(
        Arc::clone(&manager),
        Arc::clone(&router),
        model_map,
        config.long_context_models.clone(),
    ));

    let server = ccrouter_server::Server::new(&config, dispatcher)?;

    let shutdown = CancellationToken::new();
    let shutdown_clone = shutdown.clone();

    tokio::spawn(async move {
        shutdown_signal().await;
        shutdown_clone.cancel();
    });

    server.serve(shutdown).await?;

    tracing::info!("ccrouter stopped");
    Ok(())
}

/// Wait for a shutdown signal (`SIGINT` or `SIGTERM`)
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }

    tracing::info!("shutdown signal received");
}
