use anyhow::Context;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use axum_speedtest::config::Config;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::parse();

    let filter = match &config.log_level {
        Some(level) => EnvFilter::try_new(level).context("invalid log level")?,
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let app = axum_speedtest::router(&config.path);

    let listener = tokio::net::TcpListener::bind(config.listen_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.listen_addr))?;

    tracing::info!(
        "speedtest-server listening on http://{}{}",
        listener.local_addr()?,
        config.path
    );

    axum::serve(listener, app).await?;
    Ok(())
}
