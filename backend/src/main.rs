// Lodestar Control Plane server entry point

use lodestar_control_plane::config::AppConfig;
use lodestar_control_plane::{build_node, connect_store, create_router};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// How often the supervisory staleness pass sweeps the registry.
const STALE_SWEEP_INTERVAL: Duration = Duration::from_secs(60);
/// Instances unrenewed for this long are marked logically offline.
const STALE_AFTER: Duration = Duration::from_secs(120);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config_path = std::env::var("LODESTAR_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("config/server.toml"));
    let app_config = AppConfig::load(Some(config_path.as_path()))?;

    init_telemetry(&app_config);

    let kv = connect_store(&app_config).await?;
    let (state, supervisor) = build_node(kv, app_config.clone()).await?;
    supervisor.start_all().await?;

    // Supervisory staleness sweep over the registry.
    let sweep_registry = Arc::clone(&state.registry);
    tokio::spawn(async move {
        let mut tick = tokio::time::interval(STALE_SWEEP_INTERVAL);
        loop {
            tick.tick().await;
            if let Err(e) = sweep_registry.mark_stale_all(STALE_AFTER).await {
                tracing::warn!(error = %e, "registry staleness sweep failed");
            }
        }
    });

    let app = create_router(state);
    let addr = format!("{}:{}", app_config.server.host, app_config.server.port);
    tracing::info!("starting Lodestar control plane on {addr}");

    let listener = TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    supervisor.stop_all().await;
    Ok(())
}

fn init_telemetry(config: &AppConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.log.filter.clone()));
    let registry = tracing_subscriber::registry().with(filter);
    if config.log.json {
        registry
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for shutdown signal");
    }
    tracing::info!("shutdown signal received");
}
