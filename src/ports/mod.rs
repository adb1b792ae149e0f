//! Ports (interfaces) for persistence.
//! The orchestrator and ledger depend on these traits only; adapters
//! provide Postgres and in-memory implementations.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use thiserror::Error;
use uuid::Uuid;

use crate::domain::{
    InventoryItem, InventoryStatus, Order, OrderItem, OrderStatus, PoolKey, Product, Shop, Wallet,
    WalletTransaction,
};
use crate::error::AppError;

/// Postgres serialization failure and deadlock codes.
const RETRYABLE_SQLSTATES: &[&str] = &["40001", "40P01"];
const UNIQUE_VIOLATION: &str = "23505";

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("write conflict: {0}")]
    Conflict(String),

    #[error("database error: {0}")]
    Database(sqlx::Error),

    #[error("{0}")]
    Internal(String),
}

impl From<sqlx::Error> for RepositoryError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::RowNotFound => RepositoryError::NotFound("row".to_string()),
            sqlx::Error::Database(db) => match db.code().as_deref() {
                Some(code) if RETRYABLE_SQLSTATES.contains(&code) || code == UNIQUE_VIOLATION => {
                    RepositoryError::Conflict(db.message().to_string())
                }
                _ => RepositoryError::Database(err),
            },
            _ => RepositoryError::Database(err),
        }
    }
}

pub type RepositoryResult<T> = Result<T, RepositoryError>;

#[async_trait]
pub trait ProductRepository {
    async fn find_products(&mut self, ids: &[Uuid]) -> RepositoryResult<Vec<Product>>;
    async fn find_product(&mut self, id: Uuid) -> RepositoryResult<Option<Product>>;
}

#[async_trait]
pub trait ShopRepository {
    async fn find_shop(&mut self, id: Uuid) -> RepositoryResult<Option<Shop>>;
}

#[async_trait]
pub trait InventoryRepository {
    async fn insert_inventory(&mut self, item: &InventoryItem) -> RepositoryResult<InventoryItem>;

    async fn count_available(&mut self, pool: PoolKey) -> RepositoryResult<i64>;

    /// Claims up to `quantity` available units ordered by (created_at, id),
    /// skipping units locked by concurrent claimers.
    async fn claim_available(
        &mut self,
        pool: PoolKey,
        quantity: i64,
        status: InventoryStatus,
        now: DateTime<Utc>,
    ) -> RepositoryResult<Vec<InventoryItem>>;

    async fn set_inventory_status(
        &mut self,
        ids: &[Uuid],
        status: InventoryStatus,
        now: DateTime<Utc>,
    ) -> RepositoryResult<u64>;

    async fn find_inventory(&mut self, ids: &[Uuid]) -> RepositoryResult<Vec<InventoryItem>>;

    async fn list_inventory_by_shop(&mut self, shop_id: Uuid) -> RepositoryResult<Vec<InventoryItem>>;

    /// Soft-deletes an unsold unit. Returns false when it is not available.
    async fn soft_delete_inventory(&mut self, id: Uuid, now: DateTime<Utc>) -> RepositoryResult<bool>;
}

#[async_trait]
pub trait OrderRepository {
    async fn insert_order(&mut self, order: &Order) -> RepositoryResult<Order>;

    async fn find_order(&mut self, id: Uuid) -> RepositoryResult<Option<Order>>;

    /// Reads an order and locks it for the rest of the transaction.
    async fn lock_order(&mut self, id: Uuid) -> RepositoryResult<Option<Order>>;

    async fn lock_order_by_code(&mut self, code: &str) -> RepositoryResult<Option<Order>>;

    async fn find_order_by_idempotency_key(
        &mut self,
        buyer_id: Uuid,
        key: &str,
    ) -> RepositoryResult<Option<Order>>;

    async fn order_code_exists(&mut self, code: &str) -> RepositoryResult<bool>;

    async fn update_order(&mut self, order: &Order) -> RepositoryResult<Order>;

    async fn list_orders_created_before(
        &mut self,
        status: OrderStatus,
        before: DateTime<Utc>,
        limit: i64,
    ) -> RepositoryResult<Vec<Order>>;
}

#[async_trait]
pub trait OrderItemRepository {
    async fn insert_order_item(&mut self, item: &OrderItem) -> RepositoryResult<OrderItem>;

    async fn list_order_items(&mut self, order_id: Uuid) -> RepositoryResult<Vec<OrderItem>>;

    async fn lock_order_item(&mut self, id: Uuid) -> RepositoryResult<Option<OrderItem>>;

    async fn update_order_item(&mut self, item: &OrderItem) -> RepositoryResult<OrderItem>;

    /// Delivered items still in escrow whose warranty window has passed.
    async fn list_expired_holds(
        &mut self,
        now: DateTime<Utc>,
        limit: i64,
    ) -> RepositoryResult<Vec<OrderItem>>;
}

#[async_trait]
pub trait WalletRepository {
    /// Atomic upsert keyed on `user_id`.
    async fn get_or_create_wallet(&mut self, user_id: Uuid, now: DateTime<Utc>)
        -> RepositoryResult<Wallet>;

    async fn find_wallet(&mut self, id: Uuid) -> RepositoryResult<Option<Wallet>>;

    async fn find_wallet_by_user(&mut self, user_id: Uuid) -> RepositoryResult<Option<Wallet>>;

    async fn lock_wallet(&mut self, id: Uuid) -> RepositoryResult<Option<Wallet>>;

    /// Adds both deltas in one conditional update. Returns `None` when either
    /// balance would go negative; the wallet is left untouched in that case.
    async fn apply_wallet_delta(
        &mut self,
        id: Uuid,
        balance_delta: i64,
        hold_delta: i64,
        now: DateTime<Utc>,
    ) -> RepositoryResult<Option<Wallet>>;
}

#[async_trait]
pub trait WalletTransactionRepository {
    async fn append_wallet_tx(&mut self, tx: &WalletTransaction)
        -> RepositoryResult<WalletTransaction>;

    async fn list_wallet_txs(
        &mut self,
        wallet_id: Uuid,
        limit: i64,
        offset: i64,
    ) -> RepositoryResult<Vec<WalletTransaction>>;

    async fn find_topup_by_ref(&mut self, ref_id: &str)
        -> RepositoryResult<Option<WalletTransaction>>;
}

/// All repositories bound to one open transaction.
#[async_trait]
pub trait UnitOfWork:
    ProductRepository
    + ShopRepository
    + InventoryRepository
    + OrderRepository
    + OrderItemRepository
    + WalletRepository
    + WalletTransactionRepository
    + Send
{
    async fn commit(self: Box<Self>) -> RepositoryResult<()>;
    async fn rollback(self: Box<Self>) -> RepositoryResult<()>;
}

#[async_trait]
pub trait Store: Send + Sync {
    async fn begin(&self) -> RepositoryResult<Box<dyn UnitOfWork>>;
}

/// Shop sales counter. Lives outside every transaction.
#[async_trait]
pub trait SalesCounter: Send + Sync {
    async fn increment_sales(&self, shop_id: Uuid, units: i64) -> RepositoryResult<()>;
}

/// Runs `body` inside one transaction: commit on `Ok`, rollback on `Err`.
pub async fn within_transaction<T, F>(store: &dyn Store, body: F) -> Result<T, AppError>
where
    T: Send,
    F: for<'t> FnOnce(&'t mut dyn UnitOfWork) -> BoxFuture<'t, Result<T, AppError>> + Send,
{
    let mut uow = store.begin().await?;
    match body(&mut *uow).await {
        Ok(value) => {
            uow.commit().await?;
            Ok(value)
        }
        Err(err) => {
            if let Err(rollback_err) = uow.rollback().await {
                tracing::warn!(error = %rollback_err, "rollback failed");
            }
            Err(err)
        }
    }
}
