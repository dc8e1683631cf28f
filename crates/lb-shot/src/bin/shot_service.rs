use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use tracing::info;
use tracing_subscriber::EnvFilter;

use lb_shot::{submitter_from_config, JsonArtifactStore, ShotService};
use lb_types::Config;

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => info!("SIGINT received"),
                    _ = sigterm.recv() => info!("SIGTERM received"),
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "SIGTERM handler unavailable");
                let _ = tokio::signal::ctrl_c().await;
                info!("SIGINT received");
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
        info!("Ctrl-C received");
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config_path = std::env::args().nth(1).map(PathBuf::from);
    let config = Config::load(config_path.as_deref()).context("Failed to load configuration")?;

    let addr = std::env::var("LOOPBRIDGE_SHOT_ADDR").unwrap_or_else(|_| config.service.bind_address.clone());

    let service = ShotService::bind(
        &addr,
        config.service.idle_timeout(),
        Arc::new(JsonArtifactStore::new()),
        submitter_from_config(&config.service.submit),
    )
    .await
    .with_context(|| format!("Failed to bind shot service on {addr}"))?;

    let stats = service.run(shutdown_signal()).await;
    info!(
        handled = stats.handled,
        failed = stats.failed,
        reason = ?stats.reason,
        "exiting"
    );
    Ok(())
}
