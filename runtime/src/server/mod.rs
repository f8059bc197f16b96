//! REST API server for script execution

pub mod execute;

pub use execute::{translate, RequestLimits, SandboxExecutor, ScriptExecutor};

use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use axum::{Extension, Json, Router};
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::info;

/// Create the REST API application router
pub fn create_app(executor: Arc<dyn ScriptExecutor>, limits: RequestLimits) -> Router {
    Router::new()
        .route("/healthz", get(health_check))
        .route("/execute", post(execute::execute_script))
        .layer(Extension(executor))
        .layer(Extension(limits))
        .layer(DefaultBodyLimit::max(limits.max_body_bytes))
        .layer(TraceLayer::new_for_http())
}

async fn health_check() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

/// Start the REST API server and run until interrupted
pub async fn serve(addr: SocketAddr, app: Router) -> anyhow::Result<()> {
    info!("Starting REST API server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("REST API server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %err, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
}
