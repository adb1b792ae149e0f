use std::collections::HashMap;
use std::env;

use anyhow::{Context, Result};
use vaultrs::auth::approle;
use vaultrs::client::{Client, VaultClient, VaultClientSettingsBuilder};
use vaultrs::kv2;

use crate::config::Config;

/// Reads service secrets from Vault's KV v2 engine with AppRole auth.
pub struct SecretsManager {
    client: VaultClient,
    kv_mount: String,
}

impl SecretsManager {
    /// Vault is optional; it is used when `VAULT_ROLE_ID` is set.
    pub fn is_configured() -> bool {
        env::var("VAULT_ROLE_ID").is_ok()
    }

    pub async fn new() -> Result<Self> {
        let vault_addr =
            env::var("VAULT_ADDR").unwrap_or_else(|_| "http://127.0.0.1:8200".to_string());
        let role_id = env::var("VAULT_ROLE_ID").context("VAULT_ROLE_ID is required")?;
        let secret_id = env::var("VAULT_SECRET_ID").context("VAULT_SECRET_ID is required")?;
        let auth_mount = env::var("VAULT_AUTH_MOUNT").unwrap_or_else(|_| "auth/approle".to_string());
        let kv_mount = env::var("VAULT_KV_MOUNT").unwrap_or_else(|_| "secret".to_string());

        let mut client = VaultClient::new(
            VaultClientSettingsBuilder::default()
                .address(&vault_addr)
                .build()
                .context("failed to build Vault client settings")?,
        )
        .context("failed to create Vault client")?;

        let auth = approle::login(&mut client, &auth_mount, &role_id, &secret_id)
            .await
            .context("failed to authenticate to Vault with AppRole")?;
        client.set_token(&auth.client_token);

        Ok(Self { client, kv_mount })
    }

    async fn read_key(&self, path: &str, key: &str) -> Result<String> {
        let secret: HashMap<String, String> = kv2::read(&self.client, &self.kv_mount, path)
            .await
            .with_context(|| format!("failed to read {}/{} from Vault", self.kv_mount, path))?;

        secret
            .get(key)
            .cloned()
            .with_context(|| format!("{} key not found in Vault {}/{}", key, self.kv_mount, path))
    }

    /// base64 AES-256 key for inventory secrets.
    pub async fn get_secret_encryption_key(&self) -> Result<String> {
        self.read_key("inventory", "encryption_key").await
    }

    pub async fn get_payment_webhook_secret(&self) -> Result<String> {
        self.read_key("payments", "webhook_secret").await
    }

    /// Fills secrets missing from the environment.
    pub async fn fill_config(&self, config: &mut Config) -> Result<()> {
        if config.secret_encryption_key.is_none() {
            config.secret_encryption_key = Some(self.get_secret_encryption_key().await?);
        }
        if config.payment_webhook_secret.is_none() {
            config.payment_webhook_secret = Some(self.get_payment_webhook_secret().await?);
        }
        Ok(())
    }
}
