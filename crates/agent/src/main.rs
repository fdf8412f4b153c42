//! Fleet agent
//!
//! Runs on every managed host: keeps the central API's view of this
//! host's containers current and executes lifecycle tasks addressed to it.

use anyhow::{Context, Result};
use fleet_agent::{api, config::AgentConfig};
use fleet_agent_lib::{
    runtime::DockerRuntime, sync::HttpSyncTransport, Agent, AgentMetrics, HealthRegistry,
};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().json())
        .init();

    info!("Starting fleet-agent");

    let config = AgentConfig::load()?;
    let endpoint = config.runtime_endpoint()?;
    info!(
        api_url = %config.api_url,
        runtime_endpoint = %endpoint.label(),
        authenticated = config.api_token.is_some(),
        "Agent configured"
    );

    let runtime =
        Arc::new(DockerRuntime::connect(&endpoint).context("Failed to create runtime client")?);
    let transport = Arc::new(
        HttpSyncTransport::new(config.transport_config())
            .context("Failed to create central API client")?,
    );

    let health = HealthRegistry::new();
    let cancel = CancellationToken::new();

    let state = Arc::new(api::AppState::new(health.clone(), AgentMetrics::new()));
    let api_handle = tokio::spawn(api::serve(config.health_port, state, cancel.child_token()));

    tokio::spawn(shutdown_on_signal(cancel.clone()));

    let agent = Agent::new(
        runtime,
        transport,
        config.agent_settings(endpoint.label()),
        health,
    );
    let result = agent.run(cancel.clone()).await;

    // A fatal startup error returns before the token fires
    cancel.cancel();
    match api_handle.await {
        Ok(Err(e)) => warn!(error = %e, "Health endpoint failed"),
        Err(e) => warn!(error = %e, "Health endpoint task panicked"),
        Ok(Ok(())) => {}
    }

    result
}

async fn shutdown_on_signal(cancel: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for SIGINT");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("SIGINT received"),
        _ = terminate => info!("SIGTERM received"),
    }
    cancel.cancel();
}
