use anyhow::Context;

use fleetstats_infra::FleetStatsConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    fleetstats_observability::init();

    let config = FleetStatsConfig::from_env().context("invalid configuration")?;
    tracing::info!(
        persistent = config.use_persistent_stores,
        merge_order = %config.merge_order,
        "starting fleet statistics api"
    );

    let app = fleetstats_api::app::build_app(&config).await?;

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.bind_addr))?;

    tracing::info!("listening on {}", listener.local_addr()?);

    axum::serve(listener, app).await?;
    Ok(())
}
