//! Meridian CLI - personal telemetry pipeline

use clap::Parser;
use meridian::cli::types::Cli;
use meridian::Meridian;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let cli = Cli::parse();
    let app = Meridian::builder().build().await?;
    meridian::cli::run(cli, app).await?;

    Ok(())
}
