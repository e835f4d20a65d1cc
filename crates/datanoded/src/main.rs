//! datanoded — clusterdfs DataNode daemon.

use anyhow::Result;

use clusterdfs_core::DataNodeConfig;
use datanoded::DataNode;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let config = DataNodeConfig::load().unwrap_or_else(|e| {
        tracing::warn!(error = %e, "failed to load config, using defaults");
        DataNodeConfig::default()
    });
    tracing::info!(
        port = config.network.port,
        data_dir = %config.storage.data_dir.display(),
        coordinator = %config.coordinator_addr(),
        "datanoded starting"
    );

    let node = DataNode::bind(config).await?.start();

    tokio::signal::ctrl_c().await?;
    tracing::info!("shutdown signal received");
    node.stop().await
}
