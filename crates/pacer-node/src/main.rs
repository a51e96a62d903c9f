mod roles;

use anyhow::{Context, Result};
use pacer::PacerConfig;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::roles::{DemoConfig, Role};

#[tokio::main]
async fn main() -> Result<()> {
    let dotenv = dotenvy::dotenv();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "pacer=info,pacer_node=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    if let Ok(path) = dotenv {
        tracing::debug!(path = %path.display(), "Loaded environment file");
    }

    tracing::info!("pacer-node starting...");

    // Configure via environment variables, see pacer::config for the list
    let config = PacerConfig::from_env().context("Failed to load configuration")?;
    config.validate().context("Invalid configuration")?;

    let role: Role = std::env::var("PACER_ROLE")
        .unwrap_or_else(|_| "demo".to_string())
        .parse()?;

    tracing::info!(role = %role, "Role configured");
    tracing::debug!(
        config = %serde_json::to_string(&config).context("Failed to render configuration")?,
        "Effective configuration"
    );

    match role {
        Role::Coordinator => roles::run_coordinator(config).await?,
        Role::Producer => roles::run_producer(config).await?,
        Role::Demo => roles::run_demo(config, DemoConfig::from_env()?).await?,
    }

    tracing::info!("pacer-node shutdown complete");
    Ok(())
}
