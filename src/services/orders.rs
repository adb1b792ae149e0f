//! Order orchestrator: checkout and cancellation compensation.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::inventory::{self, InventoryAllocator};
use super::ledger::{self, FeePolicy};
use crate::domain::escrow::seller_cancel_window;
use crate::domain::order::generate_order_code;
use crate::domain::{
    CancelActor, Clock, InventoryStatus, ItemStatus, LedgerRef, NewOrderItem, Order, OrderItem,
    OrderStatus, PaymentMethod, PoolKey, Product,
};
use crate::error::AppError;
use crate::ports::{within_transaction, SalesCounter, Store, UnitOfWork};
use crate::validation::{
    validate_cart_size, validate_quantity, validate_reason, validate_reference, ValidationError,
    IDEMPOTENCY_KEY_MAX_LEN,
};

pub const ORDER_CODE_ATTEMPTS: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CartLine {
    pub product_id: Uuid,
    pub quantity: i64,
}

#[derive(Debug, Clone)]
pub struct CreateOrderRequest {
    pub buyer_id: Uuid,
    pub items: Vec<CartLine>,
    pub payment_method: PaymentMethod,
    pub idempotency_key: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CreatedOrder {
    pub order: Order,
    pub items: Vec<OrderItem>,
    /// Returned from an earlier request with the same idempotency key.
    #[serde(skip)]
    pub replayed: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CancelOutcome {
    pub success: bool,
    pub refunded_amount: i64,
}

/// Validates the cart and merges repeated products, keeping first-seen order.
pub fn merge_cart(lines: &[CartLine]) -> Result<Vec<CartLine>, ValidationError> {
    validate_cart_size(lines.len())?;
    let mut merged: Vec<CartLine> = Vec::with_capacity(lines.len());
    for line in lines {
        validate_quantity(line.quantity)?;
        match merged.iter_mut().find(|m| m.product_id == line.product_id) {
            Some(existing) => existing.quantity += line.quantity,
            None => merged.push(*line),
        }
    }
    for line in &merged {
        validate_quantity(line.quantity)?;
    }
    Ok(merged)
}

struct Checkout {
    buyer_id: Uuid,
    lines: Vec<CartLine>,
    payment_method: PaymentMethod,
    idempotency_key: Option<String>,
    now: DateTime<Utc>,
}

async fn allocate_order_code(
    uow: &mut dyn UnitOfWork,
    now: DateTime<Utc>,
) -> Result<String, AppError> {
    for _ in 0..ORDER_CODE_ATTEMPTS {
        let code = generate_order_code(now);
        if !uow.order_code_exists(&code).await? {
            return Ok(code);
        }
        tracing::debug!(code = %code, "order code collision");
    }
    Err(AppError::Internal(format!(
        "no unique order code after {} attempts",
        ORDER_CODE_ATTEMPTS
    )))
}

async fn place_order(
    uow: &mut dyn UnitOfWork,
    allocator: InventoryAllocator,
    policy: FeePolicy,
    checkout: Checkout,
) -> Result<CreatedOrder, AppError> {
    let Checkout {
        buyer_id,
        lines,
        payment_method,
        idempotency_key,
        now,
    } = checkout;

    if let Some(key) = idempotency_key.as_deref() {
        if let Some(order) = uow.find_order_by_idempotency_key(buyer_id, key).await? {
            let items = uow.list_order_items(order.id).await?;
            return Ok(CreatedOrder {
                order,
                items,
                replayed: true,
            });
        }
    }

    let ids: Vec<Uuid> = lines.iter().map(|line| line.product_id).collect();
    let products: HashMap<Uuid, Product> = uow
        .find_products(&ids)
        .await?
        .into_iter()
        .map(|product| (product.id, product))
        .collect();

    // Lines drawing on the same pool share its stock.
    let mut remaining: HashMap<PoolKey, i64> = HashMap::new();
    let mut priced: Vec<(Product, i64)> = Vec::with_capacity(lines.len());
    let mut total: i64 = 0;
    for line in &lines {
        let product = products
            .get(&line.product_id)
            .filter(|product| product.is_purchasable())
            .ok_or_else(|| {
                AppError::InvalidInput(format!(
                    "product {} is not available for purchase",
                    line.product_id
                ))
            })?;

        let pool = product.pool();
        let available = match remaining.get(&pool) {
            Some(left) => *left,
            None => uow.count_available(pool).await?,
        };
        if available < line.quantity {
            return Err(AppError::InsufficientStock {
                product_id: product.id,
                requested: line.quantity,
                available,
            });
        }
        remaining.insert(pool, available - line.quantity);

        total = product
            .price
            .checked_mul(line.quantity)
            .and_then(|subtotal| total.checked_add(subtotal))
            .ok_or_else(|| AppError::InvalidInput("order total is too large".to_string()))?;
        priced.push((product.clone(), line.quantity));
    }

    let immediate = payment_method.is_immediate();
    let buyer_wallet = if immediate {
        let wallet = uow.get_or_create_wallet(buyer_id, now).await?;
        let wallet = uow
            .lock_wallet(wallet.id)
            .await?
            .ok_or_else(|| AppError::Internal(format!("wallet {} vanished", wallet.id)))?;
        if wallet.balance < total {
            return Err(AppError::InsufficientFunds {
                required: total,
                available: wallet.balance,
            });
        }
        Some(wallet)
    } else {
        None
    };

    let code = allocate_order_code(uow, now).await?;
    let order = Order::new(
        code,
        buyer_id,
        total,
        policy.order_fee(total),
        payment_method,
        idempotency_key,
        now,
    );
    let order = uow.insert_order(&order).await?;

    let unit_status = if immediate {
        InventoryStatus::Delivered
    } else {
        InventoryStatus::Reserved
    };
    let mut items = Vec::new();
    for (product, quantity) in &priced {
        let units =
            inventory::claim(uow, product.pool(), product.id, *quantity, unit_status, now).await?;
        for unit in units {
            let masked_secret = if immediate {
                Some(allocator.masked(&unit)?)
            } else {
                None
            };
            let item = OrderItem::new(
                NewOrderItem {
                    order_id: order.id,
                    shop_id: product.shop_id,
                    product_id: product.id,
                    inventory_item_id: unit.id,
                    seller_id: product.seller_id,
                    unit_price: product.price,
                    delivery_method: product.secret_type,
                    masked_secret,
                    delivered: immediate,
                },
                now,
            );
            items.push(uow.insert_order_item(&item).await?);
        }
    }

    if let Some(wallet) = buyer_wallet {
        ledger::hold(uow, wallet.id, total, &LedgerRef::order(order.id), now).await?;
    }

    Ok(CreatedOrder {
        order,
        items,
        replayed: false,
    })
}

/// Refunds still-held escrow, returns units to their pools and cancels the
/// order. Pending orders hold no funds and refund nothing.
pub(crate) async fn compensate(
    uow: &mut dyn UnitOfWork,
    mut order: Order,
    items: Vec<OrderItem>,
    actor: CancelActor,
    reason: String,
    now: DateTime<Utc>,
) -> Result<CancelOutcome, AppError> {
    if !order.status.can_transition_to(OrderStatus::Cancelled) {
        return Err(AppError::InvalidState(format!(
            "order {} cannot be cancelled while {:?}",
            order.id, order.status
        )));
    }

    let funded = order.status == OrderStatus::Paid;
    let mut refunded_amount = 0;
    let mut unit_ids = Vec::new();
    for mut item in items.into_iter().filter(|item| item.is_holding()) {
        if funded {
            refunded_amount += item.hold_amount;
        }
        unit_ids.push(item.inventory_item_id);
        item.mark_refunded(now);
        uow.update_order_item(&item).await?;
    }

    if refunded_amount > 0 {
        let wallet = uow
            .find_wallet_by_user(order.buyer_id)
            .await?
            .ok_or_else(|| {
                AppError::InvariantViolation(format!(
                    "paid order {} has no buyer wallet",
                    order.id
                ))
            })?;
        ledger::refund(uow, wallet.id, refunded_amount, &LedgerRef::order(order.id), now).await?;
    }
    inventory::release(uow, &unit_ids, now).await?;

    order.status = OrderStatus::Cancelled;
    order.cancelled_by = Some(actor);
    order.cancel_reason = Some(reason);
    order.cancelled_at = Some(now);
    order.updated_at = now;
    uow.update_order(&order).await?;

    Ok(CancelOutcome {
        success: true,
        refunded_amount,
    })
}

pub(crate) async fn lock_order(uow: &mut dyn UnitOfWork, order_id: Uuid) -> Result<Order, AppError> {
    uow.lock_order(order_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("order {}", order_id)))
}

/// Bumps shop sales for delivered units. Runs after commit; failures are
/// logged and never undo the order.
pub(crate) async fn record_sales(sales: &dyn SalesCounter, order_id: Uuid, items: &[OrderItem]) {
    let mut per_shop: HashMap<Uuid, i64> = HashMap::new();
    for item in items
        .iter()
        .filter(|item| item.item_status == ItemStatus::Delivered)
    {
        *per_shop.entry(item.shop_id).or_insert(0) += i64::from(item.quantity);
    }

    for (shop_id, units) in per_shop {
        if let Err(e) = sales.increment_sales(shop_id, units).await {
            tracing::warn!(%order_id, %shop_id, units, error = %e, "failed to update shop sales counter");
        }
    }
}

#[derive(Clone)]
pub struct OrderService {
    store: Arc<dyn Store>,
    sales: Arc<dyn SalesCounter>,
    allocator: InventoryAllocator,
    clock: Arc<dyn Clock>,
    policy: FeePolicy,
}

impl OrderService {
    pub fn new(
        store: Arc<dyn Store>,
        sales: Arc<dyn SalesCounter>,
        allocator: InventoryAllocator,
        clock: Arc<dyn Clock>,
        policy: FeePolicy,
    ) -> Self {
        Self {
            store,
            sales,
            allocator,
            clock,
            policy,
        }
    }

    /// Claims stock, prices the cart and, for wallet payments, places the
    /// escrow hold. Everything commits together or not at all.
    pub async fn create_order(&self, request: CreateOrderRequest) -> Result<CreatedOrder, AppError> {
        let lines = merge_cart(&request.items)?;
        let idempotency_key = request
            .idempotency_key
            .as_deref()
            .map(|key| validate_reference("idempotency_key", key, IDEMPOTENCY_KEY_MAX_LEN))
            .transpose()?;

        let checkout = Checkout {
            buyer_id: request.buyer_id,
            lines,
            payment_method: request.payment_method,
            idempotency_key,
            now: self.clock.now(),
        };
        let allocator = self.allocator.clone();
        let policy = self.policy;

        let created = within_transaction(self.store.as_ref(), move |uow| {
            Box::pin(place_order(uow, allocator, policy, checkout))
        })
        .await?;

        if created.replayed {
            tracing::info!(order_id = %created.order.id, "idempotent order replayed");
            return Ok(created);
        }

        tracing::info!(
            order_id = %created.order.id,
            code = %created.order.code,
            buyer_id = %created.order.buyer_id,
            total = created.order.total_amount,
            units = created.items.len(),
            payment_method = created.order.payment_method.as_str(),
            "order created"
        );
        record_sales(self.sales.as_ref(), created.order.id, &created.items).await;

        Ok(created)
    }

    /// Seller cancellation of a paid order within the cancel window.
    pub async fn cancel_order_by_seller(
        &self,
        order_id: Uuid,
        seller_id: Uuid,
        reason: &str,
    ) -> Result<CancelOutcome, AppError> {
        let reason = validate_reason(reason)?;
        let now = self.clock.now();

        let outcome = within_transaction(self.store.as_ref(), move |uow| {
            Box::pin(async move {
                let order = lock_order(uow, order_id).await?;
                let items = uow.list_order_items(order.id).await?;
                if !items.iter().any(|item| item.seller_id == seller_id) {
                    return Err(AppError::Forbidden(format!(
                        "order {} has no items from this seller",
                        order_id
                    )));
                }
                if order.status != OrderStatus::Paid {
                    return Err(AppError::InvalidState(format!(
                        "only paid orders can be cancelled by the seller, order {} is {:?}",
                        order_id, order.status
                    )));
                }
                if now - order.created_at > seller_cancel_window() {
                    return Err(AppError::InvalidState(format!(
                        "seller cancellation window for order {} has closed",
                        order_id
                    )));
                }
                compensate(uow, order, items, CancelActor::Seller, reason, now).await
            })
        })
        .await?;

        tracing::info!(
            %order_id,
            %seller_id,
            refunded = outcome.refunded_amount,
            "order cancelled by seller"
        );
        Ok(outcome)
    }

    /// Buyer cancellation, allowed until any purchased secret has been used.
    pub async fn cancel_order_by_buyer(
        &self,
        order_id: Uuid,
        buyer_id: Uuid,
        reason: &str,
    ) -> Result<CancelOutcome, AppError> {
        let reason = validate_reason(reason)?;
        let now = self.clock.now();

        let outcome = within_transaction(self.store.as_ref(), move |uow| {
            Box::pin(async move {
                let order = lock_order(uow, order_id).await?;
                if order.buyer_id != buyer_id {
                    return Err(AppError::Forbidden(format!(
                        "order {} belongs to another buyer",
                        order_id
                    )));
                }
                if order.status.is_terminal() || order.status == OrderStatus::Disputed {
                    return Err(AppError::InvalidState(format!(
                        "order {} cannot be cancelled while {:?}",
                        order_id, order.status
                    )));
                }
                let items = uow.list_order_items(order.id).await?;
                if items.iter().any(|item| item.is_consumed()) {
                    return Err(AppError::InvalidState(format!(
                        "order {} has items that were already delivered to the buyer",
                        order_id
                    )));
                }
                compensate(uow, order, items, CancelActor::Buyer, reason, now).await
            })
        })
        .await?;

        tracing::info!(
            %order_id,
            %buyer_id,
            refunded = outcome.refunded_amount,
            "order cancelled by buyer"
        );
        Ok(outcome)
    }
}
