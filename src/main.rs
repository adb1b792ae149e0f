use clap::Parser;
use std::net::SocketAddr;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt}; // for .with() on registry

use vaultmart_core::cli::{Cli, Commands, DbCommands, EscrowCommands};
use vaultmart_core::config::{Config, LogFormat};
use vaultmart_core::secrets::SecretsManager;
use vaultmart_core::{cli, create_app, db, services, startup, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let mut config = Config::from_env()?;

    // Setup logging
    let filter =
        tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into());
    match config.log_format {
        LogFormat::Json => tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init(),
        LogFormat::Pretty => tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init(),
    }

    if SecretsManager::is_configured() {
        let secrets = SecretsManager::new().await?;
        secrets.fill_config(&mut config).await?;
        tracing::info!("Secrets loaded from Vault");
    }

    let cli = Cli::parse();
    match cli.command.unwrap_or(Commands::Serve) {
        Commands::Serve => serve(config).await,
        Commands::Db(DbCommands::Migrate) => cli::handle_db_migrate(&config).await,
        Commands::Config => {
            let pool = db::create_pool(&config).await?;
            cli::handle_config_validate(&config, &pool).await
        }
        Commands::Escrow(EscrowCommands::Sweep) => {
            let pool = db::create_pool(&config).await?;
            cli::handle_escrow_sweep(&config, pool).await
        }
    }
}

async fn serve(config: Config) -> anyhow::Result<()> {
    // Database pool
    let pool = db::create_pool(&config).await?;
    db::run_migrations(&pool).await?;

    let (services, store) = startup::build_services(&config, pool)?;

    // Escrow sweeper runs beside the HTTP server
    tokio::spawn(services::run_sweeper(
        services.escrow.clone(),
        Duration::from_secs(config.escrow_sweep_interval_secs),
        chrono::Duration::minutes(config.pending_order_ttl_minutes),
    ));

    let app = create_app(AppState::new(
        services,
        store,
        config.payment_webhook_secret.clone(),
    ));

    let addr = SocketAddr::from(([0, 0, 0, 0], config.server_port));
    tracing::info!("listening on {}", addr);

    axum::Server::bind(&addr)
        .serve(app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("shutdown signal received");
}
