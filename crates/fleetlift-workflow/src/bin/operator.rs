//! Workflow service entry point: runs the `TransformRun` and
//! `TransformGroupRun` controllers side by side, exposing a small axum
//! health surface, grounded on `controller/src/bin/agent_controller.rs`'s
//! shape (load config, connect to the cluster, spawn the controller(s) in
//! the background, serve `/health`+`/ready` until signalled to stop).

use std::sync::Arc;
use std::time::Duration;

use axum::{response::Json, routing::get, Router};
use fleetlift_core::config::WorkerConfig;
use fleetlift_sandbox::SandboxProviderFactory;
use fleetlift_workflow::{dispatch, transform, Context};
use serde_json::{json, Value};
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,fleetlift_workflow=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!(
        "Starting fleetlift-operator v{}",
        env!("CARGO_PKG_VERSION")
    );

    let client = kube::Client::try_default().await?;
    info!("Connected to Kubernetes cluster");

    let namespace = std::env::var("FLEETLIFT_NAMESPACE").unwrap_or_else(|_| "fleetlift".to_string());
    let config = WorkerConfig::load();
    let sandbox_provider = SandboxProviderFactory::create(config.sandbox_provider, &namespace).await?;

    let ctx = Arc::new(Context {
        client: client.clone(),
        namespace: namespace.clone(),
        config: Arc::new(config),
        sandbox_provider,
    });

    let transform_handle = tokio::spawn({
        let ctx = ctx.clone();
        async move { transform::run_controller(ctx).await }
    });
    let dispatch_handle = tokio::spawn({
        let ctx = ctx.clone();
        async move { dispatch::run_controller(ctx).await }
    });

    let app = Router::new()
        .route("/health", get(health))
        .route("/ready", get(health));

    let listener = tokio::net::TcpListener::bind("0.0.0.0:8080").await?;
    info!("fleetlift-operator HTTP server listening on 0.0.0.0:8080");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    transform_handle.abort();
    dispatch_handle.abort();
    if let Err(e) = tokio::time::timeout(Duration::from_secs(5), async {
        let _ = transform_handle.await;
        let _ = dispatch_handle.await;
    })
    .await
    {
        error!(error = ?e, "controllers did not shut down within the grace period");
    }

    info!("fleetlift-operator stopped");
    Ok(())
}

async fn health() -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "service": "fleetlift-operator",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => info!("received Ctrl+C, shutting down gracefully"),
        () = terminate => info!("received SIGTERM, shutting down gracefully"),
    }
}
