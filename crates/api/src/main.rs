use anyhow::Context;

use postview_api::config::AppConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    postview_observability::init();

    let config = AppConfig::from_env()?;
    let (app, services) = postview_api::app::build_app(&config).await?;

    let listener = tokio::net::TcpListener::bind(config.bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.bind_addr))?;

    tracing::info!(addr = %listener.local_addr()?, "listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // Finish in-flight publishes and projections before exiting.
    tokio::task::spawn_blocking(move || services.shutdown()).await?;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutdown requested");
}
