use anyhow::Context as _;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let settings = web::Settings::new().context("Failed to load settings")?;
    tracing::debug!(data = %settings.storage.data.display(), "loaded settings");

    web::launch(settings).await.context("Server stopped")
}
