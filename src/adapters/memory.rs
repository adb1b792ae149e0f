//! In-memory implementation of the persistence ports.
//!
//! Transactions are serialized behind one async mutex and work on a copy of
//! the state taken at `begin`; `commit` swaps the copy in, `rollback` drops
//! it. Used by the test suite and for local runs without Postgres.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

use crate::domain::{
    HoldStatus, InventoryItem, InventoryStatus, ItemStatus, Order, OrderItem, OrderStatus, PoolKey,
    Product, Shop, Wallet, WalletTransaction, WalletTxKind,
};
use crate::ports::{
    InventoryRepository, OrderItemRepository, OrderRepository, ProductRepository,
    RepositoryError, RepositoryResult, SalesCounter, ShopRepository, Store, UnitOfWork,
    WalletRepository, WalletTransactionRepository,
};

#[derive(Debug, Clone, Default)]
pub struct MemoryState {
    pub products: HashMap<Uuid, Product>,
    pub shops: HashMap<Uuid, Shop>,
    pub inventory: HashMap<Uuid, InventoryItem>,
    pub orders: HashMap<Uuid, Order>,
    pub order_items: HashMap<Uuid, OrderItem>,
    pub wallets: HashMap<Uuid, Wallet>,
    pub wallet_txs: Vec<WalletTransaction>,
}

impl MemoryState {
    pub fn wallet_of(&self, user_id: Uuid) -> Option<&Wallet> {
        self.wallets.values().find(|w| w.user_id == user_id)
    }

    pub fn items_of(&self, order_id: Uuid) -> Vec<&OrderItem> {
        let mut items: Vec<&OrderItem> = self
            .order_items
            .values()
            .filter(|item| item.order_id == order_id)
            .collect();
        items.sort_by_key(|item| (item.created_at, item.id));
        items
    }

    pub fn txs_of(&self, wallet_id: Uuid) -> Vec<&WalletTransaction> {
        self.wallet_txs
            .iter()
            .filter(|tx| tx.wallet_id == wallet_id)
            .collect()
    }
}

#[derive(Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<MemoryState>>,
    sales: Arc<std::sync::Mutex<HashMap<Uuid, i64>>>,
    fail_sales: Arc<AtomicBool>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert_shop(&self, shop: Shop) {
        self.state.lock().await.shops.insert(shop.id, shop);
    }

    pub async fn insert_product(&self, product: Product) {
        self.state.lock().await.products.insert(product.id, product);
    }

    /// Copy of the committed state.
    pub async fn snapshot(&self) -> MemoryState {
        self.state.lock().await.clone()
    }

    pub fn sales_of(&self, shop_id: Uuid) -> i64 {
        self.sales
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(&shop_id)
            .copied()
            .unwrap_or(0)
    }

    /// Makes every sales counter increment fail.
    pub fn fail_sales_counter(&self, fail: bool) {
        self.fail_sales.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn begin(&self) -> RepositoryResult<Box<dyn UnitOfWork>> {
        let guard = self.state.clone().lock_owned().await;
        let working = guard.clone();
        Ok(Box::new(MemoryUnitOfWork { guard, working }))
    }
}

#[async_trait]
impl SalesCounter for MemoryStore {
    async fn increment_sales(&self, shop_id: Uuid, units: i64) -> RepositoryResult<()> {
        if self.fail_sales.load(Ordering::SeqCst) {
            return Err(RepositoryError::Internal(
                "sales counter unavailable".to_string(),
            ));
        }
        let mut sales = self.sales.lock().unwrap_or_else(|e| e.into_inner());
        *sales.entry(shop_id).or_insert(0) += units;
        Ok(())
    }
}

pub struct MemoryUnitOfWork {
    guard: OwnedMutexGuard<MemoryState>,
    working: MemoryState,
}

#[async_trait]
impl UnitOfWork for MemoryUnitOfWork {
    async fn commit(self: Box<Self>) -> RepositoryResult<()> {
        let MemoryUnitOfWork { mut guard, working } = *self;
        *guard = working;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> RepositoryResult<()> {
        Ok(())
    }
}

#[async_trait]
impl ProductRepository for MemoryUnitOfWork {
    async fn find_products(&mut self, ids: &[Uuid]) -> RepositoryResult<Vec<Product>> {
        Ok(ids
            .iter()
            .filter_map(|id| self.working.products.get(id).cloned())
            .collect())
    }

    async fn find_product(&mut self, id: Uuid) -> RepositoryResult<Option<Product>> {
        Ok(self.working.products.get(&id).cloned())
    }
}

#[async_trait]
impl ShopRepository for MemoryUnitOfWork {
    async fn find_shop(&mut self, id: Uuid) -> RepositoryResult<Option<Shop>> {
        Ok(self.working.shops.get(&id).cloned())
    }
}

impl MemoryUnitOfWork {
    fn available_in(&self, pool: PoolKey) -> Vec<&InventoryItem> {
        let mut items: Vec<&InventoryItem> = self
            .working
            .inventory
            .values()
            .filter(|item| item.pool() == pool && item.is_claimable())
            .collect();
        items.sort_by_key(|item| (item.created_at, item.id));
        items
    }
}

#[async_trait]
impl InventoryRepository for MemoryUnitOfWork {
    async fn insert_inventory(&mut self, item: &InventoryItem) -> RepositoryResult<InventoryItem> {
        self.working.inventory.insert(item.id, item.clone());
        Ok(item.clone())
    }

    async fn count_available(&mut self, pool: PoolKey) -> RepositoryResult<i64> {
        Ok(self.available_in(pool).len() as i64)
    }

    async fn claim_available(
        &mut self,
        pool: PoolKey,
        quantity: i64,
        status: InventoryStatus,
        now: DateTime<Utc>,
    ) -> RepositoryResult<Vec<InventoryItem>> {
        let ids: Vec<Uuid> = self
            .available_in(pool)
            .into_iter()
            .take(quantity.max(0) as usize)
            .map(|item| item.id)
            .collect();

        let mut claimed = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(item) = self.working.inventory.get_mut(&id) {
                item.claim(status, now);
                claimed.push(item.clone());
            }
        }
        Ok(claimed)
    }

    async fn set_inventory_status(
        &mut self,
        ids: &[Uuid],
        status: InventoryStatus,
        now: DateTime<Utc>,
    ) -> RepositoryResult<u64> {
        let mut updated = 0;
        for id in ids {
            if let Some(item) = self.working.inventory.get_mut(id) {
                match status {
                    InventoryStatus::Available => item.release(now),
                    InventoryStatus::Delivered => {
                        item.status = status;
                        item.delivered_at = Some(now);
                        item.updated_at = now;
                    }
                    _ => {
                        item.status = status;
                        item.updated_at = now;
                    }
                }
                updated += 1;
            }
        }
        Ok(updated)
    }

    async fn find_inventory(&mut self, ids: &[Uuid]) -> RepositoryResult<Vec<InventoryItem>> {
        Ok(ids
            .iter()
            .filter_map(|id| self.working.inventory.get(id).cloned())
            .collect())
    }

    async fn list_inventory_by_shop(&mut self, shop_id: Uuid) -> RepositoryResult<Vec<InventoryItem>> {
        let mut items: Vec<InventoryItem> = self
            .working
            .inventory
            .values()
            .filter(|item| item.shop_id == shop_id && item.deleted_at.is_none())
            .cloned()
            .collect();
        items.sort_by_key(|item| (item.created_at, item.id));
        Ok(items)
    }

    async fn soft_delete_inventory(&mut self, id: Uuid, now: DateTime<Utc>) -> RepositoryResult<bool> {
        match self.working.inventory.get_mut(&id) {
            Some(item) if item.is_claimable() => {
                item.deleted_at = Some(now);
                item.updated_at = now;
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

#[async_trait]
impl OrderRepository for MemoryUnitOfWork {
    async fn insert_order(&mut self, order: &Order) -> RepositoryResult<Order> {
        if self.working.orders.values().any(|o| o.code == order.code) {
            return Err(RepositoryError::Conflict(format!(
                "order code {} already exists",
                order.code
            )));
        }
        self.working.orders.insert(order.id, order.clone());
        Ok(order.clone())
    }

    async fn find_order(&mut self, id: Uuid) -> RepositoryResult<Option<Order>> {
        Ok(self.working.orders.get(&id).cloned())
    }

    async fn lock_order(&mut self, id: Uuid) -> RepositoryResult<Option<Order>> {
        Ok(self.working.orders.get(&id).cloned())
    }

    async fn lock_order_by_code(&mut self, code: &str) -> RepositoryResult<Option<Order>> {
        Ok(self
            .working
            .orders
            .values()
            .find(|o| o.code == code)
            .cloned())
    }

    async fn find_order_by_idempotency_key(
        &mut self,
        buyer_id: Uuid,
        key: &str,
    ) -> RepositoryResult<Option<Order>> {
        Ok(self
            .working
            .orders
            .values()
            .find(|o| o.buyer_id == buyer_id && o.idempotency_key.as_deref() == Some(key))
            .cloned())
    }

    async fn order_code_exists(&mut self, code: &str) -> RepositoryResult<bool> {
        Ok(self.working.orders.values().any(|o| o.code == code))
    }

    async fn update_order(&mut self, order: &Order) -> RepositoryResult<Order> {
        match self.working.orders.get_mut(&order.id) {
            Some(existing) => {
                *existing = order.clone();
                Ok(order.clone())
            }
            None => Err(RepositoryError::NotFound(format!("order {}", order.id))),
        }
    }

    async fn list_orders_created_before(
        &mut self,
        status: OrderStatus,
        before: DateTime<Utc>,
        limit: i64,
    ) -> RepositoryResult<Vec<Order>> {
        let mut orders: Vec<Order> = self
            .working
            .orders
            .values()
            .filter(|o| o.status == status && o.created_at < before)
            .cloned()
            .collect();
        orders.sort_by_key(|o| (o.created_at, o.id));
        orders.truncate(limit.max(0) as usize);
        Ok(orders)
    }
}

#[async_trait]
impl OrderItemRepository for MemoryUnitOfWork {
    async fn insert_order_item(&mut self, item: &OrderItem) -> RepositoryResult<OrderItem> {
        self.working.order_items.insert(item.id, item.clone());
        Ok(item.clone())
    }

    async fn list_order_items(&mut self, order_id: Uuid) -> RepositoryResult<Vec<OrderItem>> {
        Ok(self
            .working
            .items_of(order_id)
            .into_iter()
            .cloned()
            .collect())
    }

    async fn lock_order_item(&mut self, id: Uuid) -> RepositoryResult<Option<OrderItem>> {
        Ok(self.working.order_items.get(&id).cloned())
    }

    async fn update_order_item(&mut self, item: &OrderItem) -> RepositoryResult<OrderItem> {
        if !item.is_consistent() {
            return Err(RepositoryError::Internal(format!(
                "order item {} has inconsistent item and hold status",
                item.id
            )));
        }
        match self.working.order_items.get_mut(&item.id) {
            Some(existing) => {
                *existing = item.clone();
                Ok(item.clone())
            }
            None => Err(RepositoryError::NotFound(format!("order item {}", item.id))),
        }
    }

    async fn list_expired_holds(
        &mut self,
        now: DateTime<Utc>,
        limit: i64,
    ) -> RepositoryResult<Vec<OrderItem>> {
        let mut items: Vec<OrderItem> = self
            .working
            .order_items
            .values()
            .filter(|item| {
                item.hold_status == HoldStatus::Holding
                    && item.item_status == ItemStatus::Delivered
                    && item.safe_until <= now
            })
            .cloned()
            .collect();
        items.sort_by_key(|item| (item.safe_until, item.id));
        items.truncate(limit.max(0) as usize);
        Ok(items)
    }
}

#[async_trait]
impl WalletRepository for MemoryUnitOfWork {
    async fn get_or_create_wallet(
        &mut self,
        user_id: Uuid,
        now: DateTime<Utc>,
    ) -> RepositoryResult<Wallet> {
        if let Some(wallet) = self.working.wallet_of(user_id) {
            return Ok(wallet.clone());
        }
        let wallet = Wallet::new(user_id, now);
        self.working.wallets.insert(wallet.id, wallet.clone());
        Ok(wallet)
    }

    async fn find_wallet(&mut self, id: Uuid) -> RepositoryResult<Option<Wallet>> {
        Ok(self.working.wallets.get(&id).cloned())
    }

    async fn find_wallet_by_user(&mut self, user_id: Uuid) -> RepositoryResult<Option<Wallet>> {
        Ok(self.working.wallet_of(user_id).cloned())
    }

    async fn lock_wallet(&mut self, id: Uuid) -> RepositoryResult<Option<Wallet>> {
        Ok(self.working.wallets.get(&id).cloned())
    }

    async fn apply_wallet_delta(
        &mut self,
        id: Uuid,
        balance_delta: i64,
        hold_delta: i64,
        now: DateTime<Utc>,
    ) -> RepositoryResult<Option<Wallet>> {
        let wallet = self
            .working
            .wallets
            .get_mut(&id)
            .ok_or_else(|| RepositoryError::NotFound(format!("wallet {}", id)))?;

        if wallet.balance + balance_delta < 0 || wallet.hold_balance + hold_delta < 0 {
            return Ok(None);
        }
        wallet.balance += balance_delta;
        wallet.hold_balance += hold_delta;
        wallet.updated_at = now;
        Ok(Some(wallet.clone()))
    }
}

#[async_trait]
impl WalletTransactionRepository for MemoryUnitOfWork {
    async fn append_wallet_tx(
        &mut self,
        tx: &WalletTransaction,
    ) -> RepositoryResult<WalletTransaction> {
        if tx.kind == WalletTxKind::Topup
            && self
                .working
                .wallet_txs
                .iter()
                .any(|t| t.kind == WalletTxKind::Topup && t.ref_id == tx.ref_id)
        {
            return Err(RepositoryError::Conflict(format!(
                "top-up {} already recorded",
                tx.ref_id
            )));
        }
        self.working.wallet_txs.push(tx.clone());
        Ok(tx.clone())
    }

    async fn list_wallet_txs(
        &mut self,
        wallet_id: Uuid,
        limit: i64,
        offset: i64,
    ) -> RepositoryResult<Vec<WalletTransaction>> {
        Ok(self
            .working
            .wallet_txs
            .iter()
            .rev()
            .filter(|tx| tx.wallet_id == wallet_id)
            .skip(offset.max(0) as usize)
            .take(limit.max(0) as usize)
            .cloned()
            .collect())
    }

    async fn find_topup_by_ref(
        &mut self,
        ref_id: &str,
    ) -> RepositoryResult<Option<WalletTransaction>> {
        Ok(self
            .working
            .wallet_txs
            .iter()
            .find(|t| t.kind == WalletTxKind::Topup && t.ref_id == ref_id)
            .cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::SecretType;

    fn pool() -> PoolKey {
        PoolKey {
            shop_id: Uuid::new_v4(),
            platform_id: Uuid::new_v4(),
        }
    }

    #[tokio::test]
    async fn rollback_discards_writes() {
        let store = MemoryStore::new();
        let user = Uuid::new_v4();

        let mut uow = store.begin().await.unwrap();
        uow.get_or_create_wallet(user, Utc::now()).await.unwrap();
        uow.rollback().await.unwrap();

        assert!(store.snapshot().await.wallet_of(user).is_none());
    }

    #[tokio::test]
    async fn commit_publishes_writes() {
        let store = MemoryStore::new();
        let user = Uuid::new_v4();

        let mut uow = store.begin().await.unwrap();
        uow.get_or_create_wallet(user, Utc::now()).await.unwrap();
        uow.commit().await.unwrap();

        assert!(store.snapshot().await.wallet_of(user).is_some());
    }

    #[tokio::test]
    async fn claim_is_oldest_first_and_bounded() {
        let store = MemoryStore::new();
        let pool = pool();
        let base = Utc::now();

        let mut uow = store.begin().await.unwrap();
        let mut ids = Vec::new();
        for offset in 0..3 {
            let item = InventoryItem::new(
                pool,
                Uuid::new_v4(),
                SecretType::Code,
                "enc".into(),
                base + chrono::Duration::seconds(offset),
            );
            ids.push(item.id);
            uow.insert_inventory(&item).await.unwrap();
        }

        let claimed = uow
            .claim_available(pool, 2, InventoryStatus::Reserved, base)
            .await
            .unwrap();
        assert_eq!(
            claimed.iter().map(|i| i.id).collect::<Vec<_>>(),
            ids[..2].to_vec()
        );
        assert_eq!(uow.count_available(pool).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn wallet_delta_refuses_negative_balances() {
        let store = MemoryStore::new();
        let mut uow = store.begin().await.unwrap();
        let wallet = uow.get_or_create_wallet(Uuid::new_v4(), Utc::now()).await.unwrap();

        let refused = uow
            .apply_wallet_delta(wallet.id, -1, 0, Utc::now())
            .await
            .unwrap();
        assert!(refused.is_none());

        let applied = uow
            .apply_wallet_delta(wallet.id, 100, 0, Utc::now())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(applied.balance, 100);
    }
}
