use std::net::SocketAddr;

use tracing::{info, warn};

use topogrid_workload::{AppState, CONTAINER_PORT, WorkloadConfig, build_router};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,topogrid_workload=debug".into()),
        )
        .init();

    let config = WorkloadConfig::from_env();
    info!(
        service = %config.service_name,
        secret_present = config.has_secret(),
        "workload configured"
    );
    if !config.has_secret() {
        warn!("APP_SECRET is not set");
    }

    let state = AppState::new(config);
    let router = build_router(state.clone());
    let addr = SocketAddr::from(([0, 0, 0, 0], CONTAINER_PORT));
    let listener = tokio::net::TcpListener::bind(addr).await?;

    // Probes succeed only once the socket accepts connections.
    state.mark_ready();
    info!(%addr, "workload listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!(error = %e, "failed to listen for shutdown signal");
                std::future::pending::<()>().await;
            }
            info!("shutdown signal received");
        })
        .await?;

    info!("workload stopped");
    Ok(())
}
