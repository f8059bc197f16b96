use anyhow::{Context, Result};
use clap::Parser;
use runtime::cli::ServeArgs;
use runtime::server::{self, SandboxExecutor};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = ServeArgs::parse();
    let config = args
        .sandbox_config()
        .context("invalid sandbox configuration")?;
    let limits = args
        .request_limits()
        .context("invalid request limits")?;

    if !config.confinement.is_jailed() {
        warn!("Confinement is disabled; scripts will run without the jail. Never use this in production");
    }

    let addr = args.socket_addr();
    info!(
        %addr,
        jail_bin = %config.jail_bin,
        policy = %config.policy_path.display(),
        runner = %config.runner_bin.display(),
        scratch_dir = %config.scratch_dir.display(),
        timeout_ms = config.timeout.as_millis() as u64,
        max_script_chars = limits.max_script_chars,
        "Starting script execution service"
    );

    let executor = Arc::new(SandboxExecutor::new(config));
    server::serve(addr, server::create_app(executor, limits)).await
}
