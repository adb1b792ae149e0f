//! Read models of the external catalog: products and shops.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::inventory::{PoolKey, SecretType};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "product_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ProductStatus {
    Pending,
    Approved,
    Rejected,
    Hidden,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Product {
    pub id: Uuid,
    pub shop_id: Uuid,
    pub platform_id: Uuid,
    pub seller_id: Uuid,
    pub name: String,
    pub price: i64,
    pub status: ProductStatus,
    pub secret_type: SecretType,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Product {
    pub fn is_purchasable(&self) -> bool {
        self.status == ProductStatus::Approved && self.deleted_at.is_none() && self.price > 0
    }

    pub fn pool(&self) -> PoolKey {
        PoolKey {
            shop_id: self.shop_id,
            platform_id: self.platform_id,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Shop {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub name: String,
    pub total_sales: i64,
}
