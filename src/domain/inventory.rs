//! Secret-bearing stock units grouped into (shop, platform) pools.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "inventory_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum InventoryStatus {
    Available,
    Reserved,
    Delivered,
    Revoked,
}

/// How the purchased secret is presented to the buyer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "secret_type", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum SecretType {
    Account,
    InviteLink,
    Code,
}

/// Key of an inventory pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PoolKey {
    pub shop_id: Uuid,
    pub platform_id: Uuid,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct InventoryItem {
    pub id: Uuid,
    pub shop_id: Uuid,
    pub platform_id: Uuid,
    pub product_id: Uuid,
    pub secret_type: SecretType,
    /// base64(nonce || ciphertext || tag); never plaintext.
    #[serde(skip_serializing)]
    pub encrypted_secret: String,
    pub status: InventoryStatus,
    pub reserved_at: Option<DateTime<Utc>>,
    pub delivered_at: Option<DateTime<Utc>>,
    pub deleted_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl InventoryItem {
    pub fn new(
        pool: PoolKey,
        product_id: Uuid,
        secret_type: SecretType,
        encrypted_secret: String,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            shop_id: pool.shop_id,
            platform_id: pool.platform_id,
            product_id,
            secret_type,
            encrypted_secret,
            status: InventoryStatus::Available,
            reserved_at: None,
            delivered_at: None,
            deleted_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn pool(&self) -> PoolKey {
        PoolKey {
            shop_id: self.shop_id,
            platform_id: self.platform_id,
        }
    }

    pub fn is_claimable(&self) -> bool {
        self.status == InventoryStatus::Available && self.deleted_at.is_none()
    }

    /// Applies a claim. `Delivered` claims stamp both timestamps.
    pub fn claim(&mut self, status: InventoryStatus, now: DateTime<Utc>) {
        self.status = status;
        self.reserved_at = Some(now);
        if status == InventoryStatus::Delivered {
            self.delivered_at = Some(now);
        }
        self.updated_at = now;
    }

    pub fn release(&mut self, now: DateTime<Utc>) {
        self.status = InventoryStatus::Available;
        self.reserved_at = None;
        self.delivered_at = None;
        self.updated_at = now;
    }
}

/// Secret returned in plaintext to its owner or purchaser.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RevealedSecret {
    pub inventory_item_id: Uuid,
    pub order_item_id: Option<Uuid>,
    pub secret_type: SecretType,
    pub status: InventoryStatus,
    pub secret: String,
}

/// Keeps the first and last two characters of a secret.
pub fn mask_secret(secret: &str) -> String {
    let chars: Vec<char> = secret.chars().collect();
    if chars.len() <= 4 {
        return "*".repeat(chars.len().max(4));
    }
    let head: String = chars[..2].iter().collect();
    let tail: String = chars[chars.len() - 2..].iter().collect();
    format!("{}****{}", head, tail)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn masks_long_secrets() {
        assert_eq!(mask_secret("user:password"), "us****rd");
        assert_eq!(mask_secret("abc"), "****");
        assert_eq!(mask_secret("abcdef"), "ab****ef");
    }

    #[test]
    fn release_clears_claim_timestamps() {
        let now = Utc::now();
        let pool = PoolKey {
            shop_id: Uuid::new_v4(),
            platform_id: Uuid::new_v4(),
        };
        let mut item = InventoryItem::new(pool, Uuid::new_v4(), SecretType::Code, "x".into(), now);
        assert!(item.is_claimable());

        item.claim(InventoryStatus::Delivered, now);
        assert_eq!(item.status, InventoryStatus::Delivered);
        assert!(item.delivered_at.is_some());
        assert!(!item.is_claimable());

        item.release(now);
        assert!(item.is_claimable());
        assert!(item.reserved_at.is_none());
        assert!(item.delivered_at.is_none());
    }
}
