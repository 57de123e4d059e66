use anyhow::Context;
use clap::Parser;
use partyhall::{Cli, PartyhallServer, ServerConfig};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let default_filter = if cli.debug { "partyhall=debug" } else { "partyhall=info" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = ServerConfig::from(cli);
    if config.database_url.is_some() {
        tracing::info!("database url configured; account storage is external");
    }

    let server = PartyhallServer::builder()
        .config(config.clone())
        .build()
        .await
        .with_context(|| format!("failed to bind {}", config.bind_addr))?;

    tracing::info!(
        addr = %server.local_addr()?,
        max_rooms = config.registry.max_rooms,
        allow_guests = config.allow_guests,
        "starting partyhall"
    );

    server
        .run_until(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "failed to listen for ctrl-c");
                std::future::pending::<()>().await;
            }
        })
        .await?;

    tracing::info!("partyhall stopped");
    Ok(())
}
