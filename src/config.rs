use anyhow::Context;
use dotenvy::dotenv;
use serde::Deserialize;
use std::env;
use uuid::Uuid;

pub const DEFAULT_PLATFORM_FEE_BPS: u32 = 500;

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Pretty,
    Json,
}

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub server_port: u16,
    pub database_url: String,
    pub database_max_connections: u32,
    /// base64 AES-256 key; may be filled from Vault at startup.
    pub secret_encryption_key: Option<String>,
    pub payment_webhook_secret: Option<String>,
    pub platform_fee_bps: u32,
    pub platform_user_id: Option<Uuid>,
    pub pending_order_ttl_minutes: i64,
    pub escrow_sweep_interval_secs: u64,
    pub log_format: LogFormat,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenv().ok(); // Load .env file if present

        Ok(Config {
            server_port: env::var("SERVER_PORT")
                .unwrap_or_else(|_| "3000".to_string())
                .parse()
                .context("SERVER_PORT must be a port number")?,
            database_url: env::var("DATABASE_URL").context("DATABASE_URL is required")?,
            database_max_connections: env::var("DATABASE_MAX_CONNECTIONS")
                .unwrap_or_else(|_| "5".to_string())
                .parse()
                .context("DATABASE_MAX_CONNECTIONS must be a number")?,
            secret_encryption_key: env::var("SECRET_ENCRYPTION_KEY").ok(),
            payment_webhook_secret: env::var("PAYMENT_WEBHOOK_SECRET").ok(),
            platform_fee_bps: parse_fee_bps(
                &env::var("PLATFORM_FEE_BPS").unwrap_or_else(|_| DEFAULT_PLATFORM_FEE_BPS.to_string()),
            )?,
            platform_user_id: env::var("PLATFORM_USER_ID")
                .ok()
                .map(|raw| raw.parse())
                .transpose()
                .context("PLATFORM_USER_ID must be a UUID")?,
            pending_order_ttl_minutes: env::var("PENDING_ORDER_TTL_MINUTES")
                .unwrap_or_else(|_| "30".to_string())
                .parse()
                .context("PENDING_ORDER_TTL_MINUTES must be a number")?,
            escrow_sweep_interval_secs: env::var("ESCROW_SWEEP_INTERVAL_SECS")
                .unwrap_or_else(|_| "60".to_string())
                .parse()
                .context("ESCROW_SWEEP_INTERVAL_SECS must be a number")?,
            log_format: parse_log_format(&env::var("LOG_FORMAT").unwrap_or_else(|_| "pretty".to_string()))?,
        })
    }
}

fn parse_fee_bps(raw: &str) -> anyhow::Result<u32> {
    let bps: u32 = raw
        .trim()
        .parse()
        .context("PLATFORM_FEE_BPS must be a whole number of basis points")?;
    if bps > 10_000 {
        anyhow::bail!("PLATFORM_FEE_BPS must be at most 10000");
    }
    Ok(bps)
}

fn parse_log_format(raw: &str) -> anyhow::Result<LogFormat> {
    match raw.trim().to_lowercase().as_str() {
        "pretty" | "" => Ok(LogFormat::Pretty),
        "json" => Ok(LogFormat::Json),
        other => anyhow::bail!("LOG_FORMAT must be 'pretty' or 'json', got '{}'", other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_fee_bps() {
        assert_eq!(parse_fee_bps("500").unwrap(), 500);
        assert_eq!(parse_fee_bps(" 0 ").unwrap(), 0);
        assert!(parse_fee_bps("10001").is_err());
        assert!(parse_fee_bps("5%").is_err());
    }

    #[test]
    fn parses_log_format() {
        assert_eq!(parse_log_format("json").unwrap(), LogFormat::Json);
        assert_eq!(parse_log_format("PRETTY").unwrap(), LogFormat::Pretty);
        assert!(parse_log_format("xml").is_err());
    }
}
