use std::sync::Arc;

use anyhow::Context;

use keystone_api::{app, config::ApiConfig};

#[tokio::main]
async fn main() {
    keystone_observability::init();

    if let Err(err) = run().await {
        tracing::error!(error = %format!("{err:#}"), "fatal startup error");
        std::process::exit(1);
    }
}

async fn run() -> anyhow::Result<()> {
    let config = ApiConfig::from_env().context("invalid configuration")?;
    let services = app::services::build_services(&config)
        .await
        .context("failed to initialise auth services")?;

    let services = Arc::new(services);
    if let Some(period) = config.purge_interval {
        app::maintenance::spawn_revocation_purge(services.revocations.clone(), period);
    }

    let app = app::build_app(services);

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.bind_addr))?;

    tracing::info!("listening on {}", listener.local_addr()?);

    axum::serve(listener, app).await.context("server error")
}
