//! Inventory allocator: seller stock intake and atomic unit claims.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::crypto::SecretCipher;
use crate::domain::inventory::mask_secret;
use crate::domain::{Clock, InventoryItem, InventoryStatus, PoolKey, Product, RevealedSecret};
use crate::error::AppError;
use crate::ports::{within_transaction, Store, UnitOfWork};
use crate::validation::validate_secret_value;

/// Claims exactly `quantity` units from `pool`, oldest first. Claiming fewer
/// is an error so the surrounding transaction rolls back any partial claim.
pub async fn claim(
    uow: &mut dyn UnitOfWork,
    pool: PoolKey,
    product_id: Uuid,
    quantity: i64,
    status: InventoryStatus,
    now: DateTime<Utc>,
) -> Result<Vec<InventoryItem>, AppError> {
    let claimed = uow.claim_available(pool, quantity, status, now).await?;
    if (claimed.len() as i64) < quantity {
        return Err(AppError::InsufficientStock {
            product_id,
            requested: quantity,
            available: claimed.len() as i64,
        });
    }
    Ok(claimed)
}

/// Returns units to the pool and clears their claim timestamps.
pub async fn release(
    uow: &mut dyn UnitOfWork,
    ids: &[Uuid],
    now: DateTime<Utc>,
) -> Result<u64, AppError> {
    if ids.is_empty() {
        return Ok(0);
    }
    Ok(uow
        .set_inventory_status(ids, InventoryStatus::Available, now)
        .await?)
}

/// Takes exposed units out of circulation for good.
pub async fn revoke(
    uow: &mut dyn UnitOfWork,
    ids: &[Uuid],
    now: DateTime<Utc>,
) -> Result<u64, AppError> {
    if ids.is_empty() {
        return Ok(0);
    }
    Ok(uow
        .set_inventory_status(ids, InventoryStatus::Revoked, now)
        .await?)
}

async fn owned_product(
    uow: &mut dyn UnitOfWork,
    seller_id: Uuid,
    product_id: Uuid,
) -> Result<Product, AppError> {
    let product = uow
        .find_product(product_id)
        .await?
        .filter(|p| p.deleted_at.is_none())
        .ok_or_else(|| AppError::NotFound(format!("product {}", product_id)))?;
    ensure_shop_owner(uow, seller_id, product.shop_id).await?;
    Ok(product)
}

async fn ensure_shop_owner(
    uow: &mut dyn UnitOfWork,
    seller_id: Uuid,
    shop_id: Uuid,
) -> Result<(), AppError> {
    let shop = uow
        .find_shop(shop_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("shop {}", shop_id)))?;
    if shop.owner_id != seller_id {
        return Err(AppError::Forbidden(format!(
            "shop {} belongs to another seller",
            shop_id
        )));
    }
    Ok(())
}

#[derive(Clone)]
pub struct InventoryAllocator {
    store: Arc<dyn Store>,
    cipher: Arc<SecretCipher>,
    clock: Arc<dyn Clock>,
}

impl InventoryAllocator {
    pub fn new(store: Arc<dyn Store>, cipher: Arc<SecretCipher>, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            cipher,
            clock,
        }
    }

    /// Decrypts a unit's secret.
    pub fn reveal(&self, item: &InventoryItem) -> Result<String, AppError> {
        Ok(self.cipher.decrypt_string(&item.encrypted_secret)?)
    }

    /// Masked form of a unit's secret, kept on the order item as evidence.
    pub fn masked(&self, item: &InventoryItem) -> Result<String, AppError> {
        Ok(mask_secret(&self.reveal(item)?))
    }

    /// Encrypts and stores one unit in the product's pool.
    pub async fn add(
        &self,
        seller_id: Uuid,
        product_id: Uuid,
        secret_value: &str,
    ) -> Result<InventoryItem, AppError> {
        let secret = validate_secret_value(secret_value)?;
        let encrypted = self.cipher.encrypt_string(&secret)?;
        let now = self.clock.now();

        let item = within_transaction(self.store.as_ref(), move |uow| {
            Box::pin(async move {
                let product = owned_product(uow, seller_id, product_id).await?;
                let item = InventoryItem::new(
                    product.pool(),
                    product.id,
                    product.secret_type,
                    encrypted,
                    now,
                );
                Ok(uow.insert_inventory(&item).await?)
            })
        })
        .await?;

        tracing::info!(
            inventory_item_id = %item.id,
            shop_id = %item.shop_id,
            platform_id = %item.platform_id,
            "inventory unit added"
        );
        Ok(item)
    }

    /// Units left in the product's pool.
    pub async fn available_count(&self, product_id: Uuid) -> Result<i64, AppError> {
        within_transaction(self.store.as_ref(), move |uow| {
            Box::pin(async move {
                let product = uow
                    .find_product(product_id)
                    .await?
                    .ok_or_else(|| AppError::NotFound(format!("product {}", product_id)))?;
                Ok(uow.count_available(product.pool()).await?)
            })
        })
        .await
    }

    /// Every live unit of a shop, decrypted for its owner.
    pub async fn list_for_seller(
        &self,
        seller_id: Uuid,
        shop_id: Uuid,
    ) -> Result<Vec<RevealedSecret>, AppError> {
        let items = within_transaction(self.store.as_ref(), move |uow| {
            Box::pin(async move {
                ensure_shop_owner(uow, seller_id, shop_id).await?;
                Ok(uow.list_inventory_by_shop(shop_id).await?)
            })
        })
        .await?;

        items
            .iter()
            .map(|item| -> Result<RevealedSecret, AppError> {
                Ok(RevealedSecret {
                    inventory_item_id: item.id,
                    order_item_id: None,
                    secret_type: item.secret_type,
                    status: item.status,
                    secret: self.reveal(item)?,
                })
            })
            .collect()
    }

    /// Soft-deletes an unsold unit.
    pub async fn remove(&self, seller_id: Uuid, item_id: Uuid) -> Result<(), AppError> {
        let now = self.clock.now();
        within_transaction(self.store.as_ref(), move |uow| {
            Box::pin(async move {
                let item = uow
                    .find_inventory(&[item_id])
                    .await?
                    .into_iter()
                    .find(|item| item.deleted_at.is_none())
                    .ok_or_else(|| AppError::NotFound(format!("inventory item {}", item_id)))?;
                ensure_shop_owner(uow, seller_id, item.shop_id).await?;
                if !uow.soft_delete_inventory(item_id, now).await? {
                    return Err(AppError::InvalidState(format!(
                        "inventory item {} is {:?} and cannot be removed",
                        item_id, item.status
                    )));
                }
                Ok(())
            })
        })
        .await?;

        tracing::info!(inventory_item_id = %item_id, "inventory unit removed");
        Ok(())
    }
}
