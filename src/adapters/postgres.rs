//! Postgres implementation of the persistence ports.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

use crate::domain::{
    InventoryItem, InventoryStatus, Order, OrderItem, OrderStatus, PoolKey, Product, Shop, Wallet,
    WalletTransaction, wallet::DEFAULT_CURRENCY,
};
use crate::ports::{
    InventoryRepository, OrderItemRepository, OrderRepository, ProductRepository,
    RepositoryError, RepositoryResult, SalesCounter, ShopRepository, Store, UnitOfWork,
    WalletRepository, WalletTransactionRepository,
};

/// Postgres-backed store. Each unit of work is one database transaction.
#[derive(Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl Store for PostgresStore {
    async fn begin(&self) -> RepositoryResult<Box<dyn UnitOfWork>> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(PgUnitOfWork { tx }))
    }
}

/// Shop sales counter, updated outside any order transaction.
#[derive(Clone)]
pub struct PostgresSalesCounter {
    pool: PgPool,
}

impl PostgresSalesCounter {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SalesCounter for PostgresSalesCounter {
    async fn increment_sales(&self, shop_id: Uuid, units: i64) -> RepositoryResult<()> {
        let result = sqlx::query("UPDATE shops SET total_sales = total_sales + $2 WHERE id = $1")
            .bind(shop_id)
            .bind(units)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound(format!("shop {}", shop_id)));
        }
        Ok(())
    }
}

pub struct PgUnitOfWork {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl UnitOfWork for PgUnitOfWork {
    async fn commit(self: Box<Self>) -> RepositoryResult<()> {
        self.tx.commit().await?;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> RepositoryResult<()> {
        self.tx.rollback().await?;
        Ok(())
    }
}

#[async_trait]
impl ProductRepository for PgUnitOfWork {
    async fn find_products(&mut self, ids: &[Uuid]) -> RepositoryResult<Vec<Product>> {
        let rows = sqlx::query_as::<_, Product>(
            r#"
            SELECT id, shop_id, platform_id, seller_id, name, price, status, secret_type, deleted_at
            FROM products
            WHERE id = ANY($1)
            "#,
        )
        .bind(ids)
        .fetch_all(&mut *self.tx)
        .await?;

        Ok(rows)
    }

    async fn find_product(&mut self, id: Uuid) -> RepositoryResult<Option<Product>> {
        let row = sqlx::query_as::<_, Product>(
            r#"
            SELECT id, shop_id, platform_id, seller_id, name, price, status, secret_type, deleted_at
            FROM products
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&mut *self.tx)
        .await?;

        Ok(row)
    }
}

#[async_trait]
impl ShopRepository for PgUnitOfWork {
    async fn find_shop(&mut self, id: Uuid) -> RepositoryResult<Option<Shop>> {
        let row = sqlx::query_as::<_, Shop>(
            "SELECT id, owner_id, name, total_sales FROM shops WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&mut *self.tx)
        .await?;

        Ok(row)
    }
}

#[async_trait]
impl InventoryRepository for PgUnitOfWork {
    async fn insert_inventory(&mut self, item: &InventoryItem) -> RepositoryResult<InventoryItem> {
        let row = sqlx::query_as::<_, InventoryItem>(
            r#"
            INSERT INTO inventory_items (
                id, shop_id, platform_id, product_id, secret_type, encrypted_secret,
                status, reserved_at, delivered_at, deleted_at, created_at, updated_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            RETURNING *
            "#,
        )
        .bind(item.id)
        .bind(item.shop_id)
        .bind(item.platform_id)
        .bind(item.product_id)
        .bind(item.secret_type)
        .bind(&item.encrypted_secret)
        .bind(item.status)
        .bind(item.reserved_at)
        .bind(item.delivered_at)
        .bind(item.deleted_at)
        .bind(item.created_at)
        .bind(item.updated_at)
        .fetch_one(&mut *self.tx)
        .await?;

        Ok(row)
    }

    async fn count_available(&mut self, pool: PoolKey) -> RepositoryResult<i64> {
        let count: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*) FROM inventory_items
            WHERE shop_id = $1 AND platform_id = $2
              AND status = 'available' AND deleted_at IS NULL
            "#,
        )
        .bind(pool.shop_id)
        .bind(pool.platform_id)
        .fetch_one(&mut *self.tx)
        .await?;

        Ok(count)
    }

    async fn claim_available(
        &mut self,
        pool: PoolKey,
        quantity: i64,
        status: InventoryStatus,
        now: DateTime<Utc>,
    ) -> RepositoryResult<Vec<InventoryItem>> {
        // SKIP LOCKED: a unit locked by a concurrent claimer is treated as taken.
        let mut rows = sqlx::query_as::<_, InventoryItem>(
            r#"
            WITH picked AS (
                SELECT id FROM inventory_items
                WHERE shop_id = $1 AND platform_id = $2
                  AND status = 'available' AND deleted_at IS NULL
                ORDER BY created_at, id
                LIMIT $3
                FOR UPDATE SKIP LOCKED
            )
            UPDATE inventory_items i
            SET status = $4,
                reserved_at = $5,
                delivered_at = CASE WHEN $4 = 'delivered'::inventory_status THEN $5 ELSE NULL END,
                updated_at = $5
            FROM picked
            WHERE i.id = picked.id
            RETURNING i.*
            "#,
        )
        .bind(pool.shop_id)
        .bind(pool.platform_id)
        .bind(quantity)
        .bind(status)
        .bind(now)
        .fetch_all(&mut *self.tx)
        .await?;

        rows.sort_by_key(|item| (item.created_at, item.id));
        Ok(rows)
    }

    async fn set_inventory_status(
        &mut self,
        ids: &[Uuid],
        status: InventoryStatus,
        now: DateTime<Utc>,
    ) -> RepositoryResult<u64> {
        let result = sqlx::query(
            r#"
            UPDATE inventory_items
            SET status = $2,
                reserved_at = CASE WHEN $2 = 'available'::inventory_status THEN NULL ELSE reserved_at END,
                delivered_at = CASE
                    WHEN $2 = 'available'::inventory_status THEN NULL
                    WHEN $2 = 'delivered'::inventory_status THEN $3
                    ELSE delivered_at
                END,
                updated_at = $3
            WHERE id = ANY($1)
            "#,
        )
        .bind(ids)
        .bind(status)
        .bind(now)
        .execute(&mut *self.tx)
        .await?;

        Ok(result.rows_affected())
    }

    async fn find_inventory(&mut self, ids: &[Uuid]) -> RepositoryResult<Vec<InventoryItem>> {
        let rows = sqlx::query_as::<_, InventoryItem>(
            "SELECT * FROM inventory_items WHERE id = ANY($1) ORDER BY created_at, id",
        )
        .bind(ids)
        .fetch_all(&mut *self.tx)
        .await?;

        Ok(rows)
    }

    async fn list_inventory_by_shop(&mut self, shop_id: Uuid) -> RepositoryResult<Vec<InventoryItem>> {
        let rows = sqlx::query_as::<_, InventoryItem>(
            r#"
            SELECT * FROM inventory_items
            WHERE shop_id = $1 AND deleted_at IS NULL
            ORDER BY created_at, id
            "#,
        )
        .bind(shop_id)
        .fetch_all(&mut *self.tx)
        .await?;

        Ok(rows)
    }

    async fn soft_delete_inventory(&mut self, id: Uuid, now: DateTime<Utc>) -> RepositoryResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE inventory_items SET deleted_at = $2, updated_at = $2
            WHERE id = $1 AND status = 'available' AND deleted_at IS NULL
            "#,
        )
        .bind(id)
        .bind(now)
        .execute(&mut *self.tx)
        .await?;

        Ok(result.rows_affected() == 1)
    }
}

#[async_trait]
impl OrderRepository for PgUnitOfWork {
    async fn insert_order(&mut self, order: &Order) -> RepositoryResult<Order> {
        let row = sqlx::query_as::<_, Order>(
            r#"
            INSERT INTO orders (
                id, code, buyer_id, total_amount, fee_amount, payable_amount, status,
                payment_method, payment_provider, external_txn_id, paid_at,
                cancelled_by, cancel_reason, cancelled_at, idempotency_key, created_at, updated_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17)
            RETURNING *
            "#,
        )
        .bind(order.id)
        .bind(&order.code)
        .bind(order.buyer_id)
        .bind(order.total_amount)
        .bind(order.fee_amount)
        .bind(order.payable_amount)
        .bind(order.status)
        .bind(order.payment_method)
        .bind(&order.payment_provider)
        .bind(&order.external_txn_id)
        .bind(order.paid_at)
        .bind(order.cancelled_by)
        .bind(&order.cancel_reason)
        .bind(order.cancelled_at)
        .bind(&order.idempotency_key)
        .bind(order.created_at)
        .bind(order.updated_at)
        .fetch_one(&mut *self.tx)
        .await?;

        Ok(row)
    }

    async fn find_order(&mut self, id: Uuid) -> RepositoryResult<Option<Order>> {
        let row = sqlx::query_as::<_, Order>("SELECT * FROM orders WHERE id = $1")
            .bind(id)
            .fetch_optional(&mut *self.tx)
            .await?;

        Ok(row)
    }

    async fn lock_order(&mut self, id: Uuid) -> RepositoryResult<Option<Order>> {
        let row = sqlx::query_as::<_, Order>("SELECT * FROM orders WHERE id = $1 FOR UPDATE")
            .bind(id)
            .fetch_optional(&mut *self.tx)
            .await?;

        Ok(row)
    }

    async fn lock_order_by_code(&mut self, code: &str) -> RepositoryResult<Option<Order>> {
        let row = sqlx::query_as::<_, Order>("SELECT * FROM orders WHERE code = $1 FOR UPDATE")
            .bind(code)
            .fetch_optional(&mut *self.tx)
            .await?;

        Ok(row)
    }

    async fn find_order_by_idempotency_key(
        &mut self,
        buyer_id: Uuid,
        key: &str,
    ) -> RepositoryResult<Option<Order>> {
        let row = sqlx::query_as::<_, Order>(
            "SELECT * FROM orders WHERE buyer_id = $1 AND idempotency_key = $2",
        )
        .bind(buyer_id)
        .bind(key)
        .fetch_optional(&mut *self.tx)
        .await?;

        Ok(row)
    }

    async fn order_code_exists(&mut self, code: &str) -> RepositoryResult<bool> {
        let exists: bool = sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM orders WHERE code = $1)")
            .bind(code)
            .fetch_one(&mut *self.tx)
            .await?;

        Ok(exists)
    }

    async fn update_order(&mut self, order: &Order) -> RepositoryResult<Order> {
        let row = sqlx::query_as::<_, Order>(
            r#"
            UPDATE orders
            SET status = $2, payment_provider = $3, external_txn_id = $4, paid_at = $5,
                cancelled_by = $6, cancel_reason = $7, cancelled_at = $8, updated_at = $9
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(order.id)
        .bind(order.status)
        .bind(&order.payment_provider)
        .bind(&order.external_txn_id)
        .bind(order.paid_at)
        .bind(order.cancelled_by)
        .bind(&order.cancel_reason)
        .bind(order.cancelled_at)
        .bind(order.updated_at)
        .fetch_optional(&mut *self.tx)
        .await?;

        row.ok_or_else(|| RepositoryError::NotFound(format!("order {}", order.id)))
    }

    async fn list_orders_created_before(
        &mut self,
        status: OrderStatus,
        before: DateTime<Utc>,
        limit: i64,
    ) -> RepositoryResult<Vec<Order>> {
        let rows = sqlx::query_as::<_, Order>(
            r#"
            SELECT * FROM orders
            WHERE status = $1 AND created_at < $2
            ORDER BY created_at, id
            LIMIT $3
            "#,
        )
        .bind(status)
        .bind(before)
        .bind(limit)
        .fetch_all(&mut *self.tx)
        .await?;

        Ok(rows)
    }
}

#[async_trait]
impl OrderItemRepository for PgUnitOfWork {
    async fn insert_order_item(&mut self, item: &OrderItem) -> RepositoryResult<OrderItem> {
        let row = sqlx::query_as::<_, OrderItem>(
            r#"
            INSERT INTO order_items (
                id, order_id, shop_id, product_id, inventory_item_id, seller_id,
                unit_price, quantity, subtotal, item_status, hold_amount, hold_status,
                hold_at, release_at, safe_until, delivery_method, masked_secret,
                delivered_at, revealed_at, completed_at, created_at, updated_at
            ) VALUES (
                $1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11,
                $12, $13, $14, $15, $16, $17, $18, $19, $20, $21, $22
            )
            RETURNING *
            "#,
        )
        .bind(item.id)
        .bind(item.order_id)
        .bind(item.shop_id)
        .bind(item.product_id)
        .bind(item.inventory_item_id)
        .bind(item.seller_id)
        .bind(item.unit_price)
        .bind(item.quantity)
        .bind(item.subtotal)
        .bind(item.item_status)
        .bind(item.hold_amount)
        .bind(item.hold_status)
        .bind(item.hold_at)
        .bind(item.release_at)
        .bind(item.safe_until)
        .bind(item.delivery_method)
        .bind(&item.masked_secret)
        .bind(item.delivered_at)
        .bind(item.revealed_at)
        .bind(item.completed_at)
        .bind(item.created_at)
        .bind(item.updated_at)
        .fetch_one(&mut *self.tx)
        .await?;

        Ok(row)
    }

    async fn list_order_items(&mut self, order_id: Uuid) -> RepositoryResult<Vec<OrderItem>> {
        let rows = sqlx::query_as::<_, OrderItem>(
            "SELECT * FROM order_items WHERE order_id = $1 ORDER BY created_at, id",
        )
        .bind(order_id)
        .fetch_all(&mut *self.tx)
        .await?;

        Ok(rows)
    }

    async fn lock_order_item(&mut self, id: Uuid) -> RepositoryResult<Option<OrderItem>> {
        let row = sqlx::query_as::<_, OrderItem>("SELECT * FROM order_items WHERE id = $1 FOR UPDATE")
            .bind(id)
            .fetch_optional(&mut *self.tx)
            .await?;

        Ok(row)
    }

    async fn update_order_item(&mut self, item: &OrderItem) -> RepositoryResult<OrderItem> {
        let row = sqlx::query_as::<_, OrderItem>(
            r#"
            UPDATE order_items
            SET item_status = $2, hold_status = $3, release_at = $4, safe_until = $5,
                masked_secret = $6, delivered_at = $7, revealed_at = $8, completed_at = $9,
                updated_at = $10
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(item.id)
        .bind(item.item_status)
        .bind(item.hold_status)
        .bind(item.release_at)
        .bind(item.safe_until)
        .bind(&item.masked_secret)
        .bind(item.delivered_at)
        .bind(item.revealed_at)
        .bind(item.completed_at)
        .bind(item.updated_at)
        .fetch_optional(&mut *self.tx)
        .await?;

        row.ok_or_else(|| RepositoryError::NotFound(format!("order item {}", item.id)))
    }

    async fn list_expired_holds(
        &mut self,
        now: DateTime<Utc>,
        limit: i64,
    ) -> RepositoryResult<Vec<OrderItem>> {
        let rows = sqlx::query_as::<_, OrderItem>(
            r#"
            SELECT * FROM order_items
            WHERE hold_status = 'holding' AND item_status = 'delivered' AND safe_until <= $1
            ORDER BY safe_until, id
            LIMIT $2
            "#,
        )
        .bind(now)
        .bind(limit)
        .fetch_all(&mut *self.tx)
        .await?;

        Ok(rows)
    }
}

#[async_trait]
impl WalletRepository for PgUnitOfWork {
    async fn get_or_create_wallet(
        &mut self,
        user_id: Uuid,
        now: DateTime<Utc>,
    ) -> RepositoryResult<Wallet> {
        // The no-op update makes RETURNING yield the existing row on conflict.
        let row = sqlx::query_as::<_, Wallet>(
            r#"
            INSERT INTO wallets (id, user_id, balance, hold_balance, currency, created_at, updated_at)
            VALUES ($1, $2, 0, 0, $3, $4, $4)
            ON CONFLICT (user_id) DO UPDATE SET user_id = EXCLUDED.user_id
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(user_id)
        .bind(DEFAULT_CURRENCY)
        .bind(now)
        .fetch_one(&mut *self.tx)
        .await?;

        Ok(row)
    }

    async fn find_wallet(&mut self, id: Uuid) -> RepositoryResult<Option<Wallet>> {
        let row = sqlx::query_as::<_, Wallet>("SELECT * FROM wallets WHERE id = $1")
            .bind(id)
            .fetch_optional(&mut *self.tx)
            .await?;

        Ok(row)
    }

    async fn find_wallet_by_user(&mut self, user_id: Uuid) -> RepositoryResult<Option<Wallet>> {
        let row = sqlx::query_as::<_, Wallet>("SELECT * FROM wallets WHERE user_id = $1")
            .bind(user_id)
            .fetch_optional(&mut *self.tx)
            .await?;

        Ok(row)
    }

    async fn lock_wallet(&mut self, id: Uuid) -> RepositoryResult<Option<Wallet>> {
        let row = sqlx::query_as::<_, Wallet>("SELECT * FROM wallets WHERE id = $1 FOR UPDATE")
            .bind(id)
            .fetch_optional(&mut *self.tx)
            .await?;

        Ok(row)
    }

    async fn apply_wallet_delta(
        &mut self,
        id: Uuid,
        balance_delta: i64,
        hold_delta: i64,
        now: DateTime<Utc>,
    ) -> RepositoryResult<Option<Wallet>> {
        let row = sqlx::query_as::<_, Wallet>(
            r#"
            UPDATE wallets
            SET balance = balance + $2, hold_balance = hold_balance + $3, updated_at = $4
            WHERE id = $1 AND balance + $2 >= 0 AND hold_balance + $3 >= 0
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(balance_delta)
        .bind(hold_delta)
        .bind(now)
        .fetch_optional(&mut *self.tx)
        .await?;

        if row.is_none() && self.find_wallet(id).await?.is_none() {
            return Err(RepositoryError::NotFound(format!("wallet {}", id)));
        }
        Ok(row)
    }
}

#[async_trait]
impl WalletTransactionRepository for PgUnitOfWork {
    async fn append_wallet_tx(
        &mut self,
        tx: &WalletTransaction,
    ) -> RepositoryResult<WalletTransaction> {
        let row = sqlx::query_as::<_, WalletTransaction>(
            r#"
            INSERT INTO wallet_transactions (
                id, wallet_id, kind, ref_type, ref_id, direction, amount, note, created_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            RETURNING *
            "#,
        )
        .bind(tx.id)
        .bind(tx.wallet_id)
        .bind(tx.kind)
        .bind(tx.ref_type)
        .bind(&tx.ref_id)
        .bind(tx.direction)
        .bind(tx.amount)
        .bind(&tx.note)
        .bind(tx.created_at)
        .fetch_one(&mut *self.tx)
        .await?;

        Ok(row)
    }

    async fn list_wallet_txs(
        &mut self,
        wallet_id: Uuid,
        limit: i64,
        offset: i64,
    ) -> RepositoryResult<Vec<WalletTransaction>> {
        let rows = sqlx::query_as::<_, WalletTransaction>(
            r#"
            SELECT * FROM wallet_transactions
            WHERE wallet_id = $1
            ORDER BY created_at DESC, id DESC
            LIMIT $2 OFFSET $3
            "#,
        )
        .bind(wallet_id)
        .bind(limit)
        .bind(offset)
        .fetch_all(&mut *self.tx)
        .await?;

        Ok(rows)
    }

    async fn find_topup_by_ref(
        &mut self,
        ref_id: &str,
    ) -> RepositoryResult<Option<WalletTransaction>> {
        let row = sqlx::query_as::<_, WalletTransaction>(
            "SELECT * FROM wallet_transactions WHERE kind = 'topup' AND ref_id = $1",
        )
        .bind(ref_id)
        .fetch_optional(&mut *self.tx)
        .await?;

        Ok(row)
    }
}
