use crate::config::Config;
use crate::crypto::SecretCipher;
use crate::domain::SystemClock;
use crate::ports::{SalesCounter, Store};
use crate::services::{FeePolicy, Services};
use anyhow::{Context, Result};
use sqlx::PgPool;
use std::sync::Arc;

pub struct ValidationReport {
    pub environment: bool,
    pub database: bool,
    pub errors: Vec<String>,
}

impl ValidationReport {
    pub fn is_valid(&self) -> bool {
        self.environment && self.database
    }

    pub fn print(&self) {
        println!("\n=== Startup Validation Report ===");
        println!("Environment Variables: {}", status(self.environment));
        println!("Database Connectivity: {}", status(self.database));

        if !self.errors.is_empty() {
            println!("\nErrors:");
            for error in &self.errors {
                println!("  ❌ {}", error);
            }
        }

        println!("\nOverall Status: {}", if self.is_valid() { "✅ PASS" } else { "❌ FAIL" });
        println!("=================================\n");
    }
}

fn status(ok: bool) -> &'static str {
    if ok { "✅ OK" } else { "❌ FAIL" }
}

pub async fn validate_environment(config: &Config, pool: &PgPool) -> Result<ValidationReport> {
    let mut report = ValidationReport {
        environment: true,
        database: true,
        errors: Vec::new(),
    };

    if let Err(e) = validate_env_vars(config) {
        report.environment = false;
        report.errors.push(format!("Environment: {}", e));
    }

    if let Err(e) = validate_database(pool).await {
        report.database = false;
        report.errors.push(format!("Database: {}", e));
    }

    Ok(report)
}

fn validate_env_vars(config: &Config) -> Result<()> {
    if config.database_url.is_empty() {
        anyhow::bail!("DATABASE_URL is empty");
    }
    if config.server_port == 0 {
        anyhow::bail!("SERVER_PORT must be greater than 0");
    }
    if config.pending_order_ttl_minutes <= 0 {
        anyhow::bail!("PENDING_ORDER_TTL_MINUTES must be greater than 0");
    }
    if config.escrow_sweep_interval_secs == 0 {
        anyhow::bail!("ESCROW_SWEEP_INTERVAL_SECS must be greater than 0");
    }
    load_cipher(config)?;
    if config.payment_webhook_secret.as_deref().map_or(true, str::is_empty) {
        anyhow::bail!("PAYMENT_WEBHOOK_SECRET is not set");
    }

    Ok(())
}

async fn validate_database(pool: &PgPool) -> Result<()> {
    sqlx::query("SELECT 1")
        .fetch_one(pool)
        .await
        .context("Failed to connect to database")?;

    let applied: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM _sqlx_migrations")
        .fetch_one(pool)
        .await
        .context("Failed to check migrations table")?;

    if applied == 0 {
        anyhow::bail!("No migrations applied");
    }

    Ok(())
}

pub fn load_cipher(config: &Config) -> Result<SecretCipher> {
    let encoded = config
        .secret_encryption_key
        .as_deref()
        .context("SECRET_ENCRYPTION_KEY is not set")?;
    SecretCipher::from_base64(encoded).context("SECRET_ENCRYPTION_KEY is invalid")
}

/// Wires every service against the Postgres adapters.
pub fn build_services(config: &Config, pool: PgPool) -> Result<(Services, Arc<dyn Store>)> {
    let store: Arc<dyn Store> = Arc::new(crate::adapters::PostgresStore::new(pool.clone()));
    let sales: Arc<dyn SalesCounter> = Arc::new(crate::adapters::PostgresSalesCounter::new(pool));
    let services = Services::new(
        store.clone(),
        sales,
        Arc::new(load_cipher(config)?),
        Arc::new(SystemClock),
        FeePolicy::new(config.platform_fee_bps, config.platform_user_id),
    );
    Ok((services, store))
}
