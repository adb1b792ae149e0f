use clap::{Parser, Subcommand};
use sqlx::PgPool;
use crate::config::Config;

#[derive(Parser)]
#[command(name = "vaultmart-core")]
#[command(about = "VaultMart Core - order fulfillment and escrow ledger", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the HTTP server and escrow sweeper (default)
    Serve,

    /// Database management commands
    #[command(subcommand)]
    Db(DbCommands),

    /// Escrow maintenance commands
    #[command(subcommand)]
    Escrow(EscrowCommands),

    /// Configuration validation
    Config,
}

#[derive(Subcommand)]
pub enum DbCommands {
    /// Run database migrations
    Migrate,
}

#[derive(Subcommand)]
pub enum EscrowCommands {
    /// Release expired holds and expire unpaid orders once, then exit
    Sweep,
}

pub async fn handle_db_migrate(config: &Config) -> anyhow::Result<()> {
    let pool = crate::db::create_pool(config).await?;

    tracing::info!("Running database migrations...");
    crate::db::run_migrations(&pool).await?;

    println!("✓ Database migrations completed");

    Ok(())
}

pub async fn handle_config_validate(config: &Config, pool: &PgPool) -> anyhow::Result<()> {
    tracing::info!("Validating configuration...");

    println!("Configuration:");
    println!("  Server Port: {}", config.server_port);
    println!("  Database URL: {}", mask_password(&config.database_url));
    println!("  Max Connections: {}", config.database_max_connections);
    println!("  Platform Fee: {} bps", config.platform_fee_bps);
    println!(
        "  Platform Wallet User: {}",
        config
            .platform_user_id
            .map(|id| id.to_string())
            .unwrap_or_else(|| "(none, fees not withheld)".to_string())
    );
    println!("  Pending Order TTL: {} min", config.pending_order_ttl_minutes);
    println!("  Escrow Sweep Interval: {} s", config.escrow_sweep_interval_secs);

    let report = crate::startup::validate_environment(config, pool).await?;
    report.print();
    if !report.is_valid() {
        anyhow::bail!("Configuration is invalid");
    }

    tracing::info!("Configuration is valid");
    println!("✓ Configuration is valid");

    Ok(())
}

pub async fn handle_escrow_sweep(config: &Config, pool: PgPool) -> anyhow::Result<()> {
    let (services, _store) = crate::startup::build_services(config, pool)?;
    let ttl = chrono::Duration::minutes(config.pending_order_ttl_minutes);

    tracing::info!("Running escrow sweep...");
    let report = crate::services::sweep_once(&services.escrow, ttl).await?;

    println!("✓ Escrow sweep completed");
    println!("  Holds released: {}", report.released_holds);
    println!("  Orders expired: {}", report.expired_orders);

    Ok(())
}

fn mask_password(url: &str) -> String {
    if let Some(at_pos) = url.rfind('@') {
        if let Some(colon_pos) = url[..at_pos].rfind(':') {
            if let Some(slash_pos) = url[..colon_pos].rfind("//") {
                let prefix = &url[..slash_pos + 2];
                let user_start = slash_pos + 2;
                let user = &url[user_start..colon_pos];
                let suffix = &url[at_pos..];
                return format!("{}{}:****{}", prefix, user, suffix);
            }
        }
    }
    url.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn masks_database_password() {
        assert_eq!(
            mask_password("postgres://market:s3cret@db:5432/vaultmart"),
            "postgres://market:****@db:5432/vaultmart"
        );
        assert_eq!(
            mask_password("postgres://localhost/vaultmart"),
            "postgres://localhost/vaultmart"
        );
    }

    #[test]
    fn parses_subcommands() {
        let cli = Cli::try_parse_from(["vaultmart-core", "escrow", "sweep"]).unwrap();
        assert!(matches!(cli.command, Some(Commands::Escrow(EscrowCommands::Sweep))));

        let cli = Cli::try_parse_from(["vaultmart-core"]).unwrap();
        assert!(cli.command.is_none());
    }
}
