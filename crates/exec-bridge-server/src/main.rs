//! Exec bridge server.
//!
//! Serves interactive shells inside Kubernetes pods over WebSocket.
//!
//! Run with: cargo run -p exec-bridge-server -- --addr 127.0.0.1:8888

mod config;

use std::{net::SocketAddr, path::PathBuf, sync::Arc, time::Duration};

use anyhow::{Context, Result};
use clap::Parser;
use exec_bridge_executor::KubectlExecutor;
use exec_bridge_transport::{BridgeState, create_router};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::ServerConfig;

#[derive(Parser, Debug)]
#[command(name = "exec-bridge", version, about = "WebSocket bridge to shells in Kubernetes pods")]
struct Args {
    /// Address to listen on.
    #[arg(long, env = "EXEC_BRIDGE_ADDR", default_value = "127.0.0.1:8888")]
    addr: SocketAddr,

    /// Kubeconfig used to reach the cluster [default: ~/.kube/execConfig].
    #[arg(long, env = "EXEC_BRIDGE_KUBECONFIG")]
    kubeconfig: Option<PathBuf>,

    /// Optional TOML configuration file.
    #[arg(long, env = "EXEC_BRIDGE_CONFIG")]
    config: Option<PathBuf>,

    /// kubectl binary name or path.
    #[arg(long, default_value = "kubectl")]
    kubectl: String,

    /// Emit logs as JSON.
    #[arg(long)]
    log_json: bool,
}

fn default_kubeconfig() -> PathBuf {
    dirs::home_dir()
        .map(|home| home.join(".kube").join("execConfig"))
        .unwrap_or_default()
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into());
    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {e}");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutting down");
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing(args.log_json);

    let config = ServerConfig::load(args.config.as_deref())?;

    let kubeconfig = args.kubeconfig.unwrap_or_else(default_kubeconfig);
    if !kubeconfig.is_file() {
        tracing::warn!(
            path = %kubeconfig.display(),
            "Kubeconfig not found; sessions will fail to attach until it exists"
        );
    }

    let mut executor = KubectlExecutor::new(args.kubectl, kubeconfig);
    if let Some(secs) = config.kubectl_request_timeout_secs {
        executor = executor.with_request_timeout(Duration::from_secs(secs));
    }

    let mut state = BridgeState::new(Arc::new(executor), config.relay.clone());
    if let Some(command) = config.command {
        state = state.with_command(command);
    }

    let listener = tokio::net::TcpListener::bind(args.addr)
        .await
        .with_context(|| format!("Failed to bind {}", args.addr))?;
    tracing::info!("Server listening on http://{}", args.addr);

    axum::serve(listener, create_router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    Ok(())
}
